//! Equal-temperament note lookup for MIDI note numbers.

const A4_MIDI: f32 = 69.0;
const A4_FREQ: f32 = 440.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Convert a MIDI note number to its equal-temperament frequency in Hz.
pub fn note_to_frequency(note: u8) -> f32 {
    A4_FREQ * 2.0f32.powf((note as f32 - A4_MIDI) / 12.0)
}

/// Human-readable note name ("A4", "C#3", ...) for diagnostics.
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i8 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}
