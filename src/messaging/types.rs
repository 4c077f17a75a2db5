/// Inbound MIDI-equivalent events, one variant per message kind the voice
/// understands. The event loop matches on this exhaustively, so adding a
/// kind forces every handler to take a position on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn(u8, u8),  // (note, velocity)
    NoteOff(u8, u8), // (note, velocity)
    TimingClock,
    ChannelPressure(u8),
    PolyphonicKeyPressure(u8, u8), // (note, pressure)
    ControlChange(u8, u8),         // (control, value)
    ProgramChange(u8),
    PitchBend(u16), // 14-bit, 0x2000 is center
    Start,
    Stop,
    SystemExclusive(Vec<u8>),
    Unknown(u8), // unrecognized status byte
}

impl MidiEvent {
    /// The note-on/off projection of this event, if it has one. Only
    /// these supersede an in-flight envelope.
    pub fn as_note_event(&self) -> Option<NoteEvent> {
        match *self {
            MidiEvent::NoteOn(note, velocity) => Some(NoteEvent::On { note, velocity }),
            MidiEvent::NoteOff(note, _) => Some(NoteEvent::Off { note }),
            _ => None,
        }
    }
}

/// The subset of events that starts or ends a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    On { note: u8, velocity: u8 },
    Off { note: u8 },
}

/// Non-blocking "receive next event" capability; `None` means nothing is
/// pending right now.
pub trait EventSource {
    fn poll_event(&mut self) -> Option<MidiEvent>;
}
