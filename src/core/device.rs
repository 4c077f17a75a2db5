//! Device controller owning the AD9833 register state.
//!
//! The controller holds the only copy of the chip-side state (active
//! register selects, reset/pause flags, wave type) and mutates it through
//! the operations below, emitting the corresponding words through a
//! [`Transport`] it owns exclusively. Value registers are double-buffered:
//! an update always lands in the register that is *not* live, then a
//! control word switches it in, so the running output is never torn.

use std::fmt;

use log::{debug, trace};

use crate::core::registers::{
    encode_frequency, encode_phase, RegisterSelect, RegisterWord, WaveType,
    DEFAULT_MASTER_CLOCK_HZ,
};

/// Serial write failure reported by the transport. The controller never
/// retries; errors propagate to the caller unchanged.
#[derive(Debug)]
pub enum TransportError {
    Write(String),
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Write(detail) => write!(f, "serial write failed: {detail}"),
            TransportError::Disconnected => write!(f, "transport disconnected"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The "send one 16-bit control word" capability. Words are ordered and
/// unbatched; the chip's state machine is edge-triggered on specific word
/// sequences, so the controller's emission order must be preserved.
pub trait Transport {
    fn send_control_word(&mut self, word: u16) -> Result<(), TransportError>;
}

/// Snapshot of the chip-side state. Plain value; the control word is a
/// pure derivation so there is no hidden mutation order to get wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub freq_select: RegisterSelect,
    pub phase_select: RegisterSelect,
    pub reset: bool,
    pub paused: bool,
    pub wave_type: WaveType,
    pub master_clock_hz: u32,
}

impl DeviceState {
    pub fn new(master_clock_hz: u32) -> Self {
        Self {
            freq_select: RegisterSelect::Zero,
            phase_select: RegisterSelect::Zero,
            reset: true,
            paused: true,
            wave_type: WaveType::Sine,
            master_clock_hz,
        }
    }

    /// Control word for the current flags and register selects.
    pub fn control_word(&self) -> u16 {
        crate::core::registers::encode_control(
            self.reset,
            self.paused,
            self.freq_select,
            self.phase_select,
            self.wave_type,
        )
    }
}

/// Drives one AD9833 over an exclusively owned transport.
pub struct DeviceController<T: Transport> {
    state: DeviceState,
    transport: T,
}

impl<T: Transport> DeviceController<T> {
    pub fn new(transport: T) -> Self {
        Self::with_master_clock(transport, DEFAULT_MASTER_CLOCK_HZ)
    }

    pub fn with_master_clock(transport: T, master_clock_hz: u32) -> Self {
        Self {
            state: DeviceState::new(master_clock_hz),
            transport,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn master_clock_hz(&self) -> u32 {
        self.state.master_clock_hz
    }

    /// Store the wave type. Takes effect on the next control-word
    /// emission; wave-mode bits are never sent standalone.
    pub fn set_wave_type(&mut self, wave_type: WaveType) {
        self.state.wave_type = wave_type;
    }

    /// Stop and re-initialize the generator: load `freq_hz` into both
    /// frequency registers and `phase_word` into both phase registers so
    /// whichever buffer slot goes live next starts from a known value.
    /// Forces sine mode. Leaves the chip out of reset but still paused.
    pub fn reset(&mut self, freq_hz: f32, phase_word: u16) -> Result<(), TransportError> {
        debug!("device reset: freq={freq_hz} phase={phase_word}");
        self.state.reset = true;
        self.state.paused = true;
        self.state.freq_select = RegisterSelect::Zero;
        self.state.phase_select = RegisterSelect::Zero;
        self.state.wave_type = WaveType::Sine;
        self.emit_control()?;

        // Phase pair first, then frequency pair; both buffer slots of each
        self.update_phase(phase_word)?;
        self.update_phase(phase_word)?;
        self.update_frequency(freq_hz)?;
        self.update_frequency(freq_hz)?;

        self.state.reset = false;
        self.emit_control()
    }

    /// Resume output from the last-loaded register contents.
    pub fn start(&mut self) -> Result<(), TransportError> {
        debug!("device start");
        self.state.reset = false;
        self.state.paused = false;
        self.emit_control()
    }

    /// Stop the internal clock, freezing the DAC at its last level.
    pub fn pause(&mut self) -> Result<(), TransportError> {
        debug!("device pause");
        self.state.paused = true;
        self.emit_control()
    }

    /// Pause and zero both phase registers, returning the output to the
    /// midpoint. Whichever phase register goes live next is glitch-free.
    pub fn stop(&mut self) -> Result<(), TransportError> {
        debug!("device stop");
        self.state.paused = true;
        self.update_phase(0)?;
        self.update_phase(0)?;
        self.emit_control()
    }

    /// Load `freq_hz` into the currently inactive frequency register,
    /// then switch it live. The playing frequency is untouched until the
    /// new value is fully written.
    pub fn update_frequency(&mut self, freq_hz: f32) -> Result<(), TransportError> {
        self.state.freq_select = self.state.freq_select.other();
        let (msw, lsw) = encode_frequency(freq_hz, self.state.freq_select, self.state.master_clock_hz);
        // LSW first: the chip latches the pair in that order
        self.send(RegisterWord::FreqLsw(lsw))?;
        self.send(RegisterWord::FreqMsw(msw))?;
        self.emit_control()
    }

    /// Double-buffered phase update, same flip-then-write-then-select
    /// discipline as [`Self::update_frequency`].
    pub fn update_phase(&mut self, phase_word: u16) -> Result<(), TransportError> {
        self.state.phase_select = self.state.phase_select.other();
        let word = encode_phase(phase_word, self.state.phase_select);
        self.send(RegisterWord::Phase(word))?;
        self.emit_control()
    }

    fn emit_control(&mut self) -> Result<(), TransportError> {
        let word = self.state.control_word();
        self.send(RegisterWord::Control(word))
    }

    fn send(&mut self, word: RegisterWord) -> Result<(), TransportError> {
        trace!("tx {word:?} = {:#06x}", word.raw());
        self.transport.send_control_word(word.raw())
    }
}
