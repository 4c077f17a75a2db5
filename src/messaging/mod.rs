mod types;

pub use types::{EventSource, MidiEvent, NoteEvent};
