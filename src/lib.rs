//! Monophonic MIDI voice for the AD9833 programmable waveform generator.
//!
//! The core is hardware-free: the serial link, the amplitude DAC, the
//! event feed and the clock are all capabilities the host injects
//! ([`Transport`], [`AmplitudeOutput`], [`EventSource`], [`Clock`]).
//! On top of them sit the register codec, the double-buffered device
//! controller, the ADSR/portamento envelope sequencer and the event loop.

pub mod config;
pub mod core;
pub mod messaging;
pub mod midi;
pub mod note;

pub use crate::config::{ConfigError, VoiceConfig};
pub use crate::core::clock::{Clock, SystemClock, VirtualClock};
pub use crate::core::device::{DeviceController, DeviceState, Transport, TransportError};
pub use crate::core::envelope::{
    AmplitudeOutput, EnvelopePhase, EnvelopeSequencer, EnvelopeSpec, Stage,
};
pub use crate::core::registers::{RegisterSelect, RegisterWord, WaveType};
pub use crate::core::voice::Voice;
pub use crate::messaging::{EventSource, MidiEvent, NoteEvent};
