//! Register codec for the AD9833 waveform generator.
//!
//! The chip is programmed with 16-bit words: a frequency value is split
//! into two 14-bit halves (LSW then MSW), a phase value occupies 12 bits,
//! and a single control word carries the mode flags. The top bits of each
//! word address one of the two frequency or phase registers, which is what
//! makes double-buffered updates possible.

use serde::{Deserialize, Serialize};

/// Default master clock (MCLK) of the FeatherWing board, 25 MHz.
pub const DEFAULT_MASTER_CLOCK_HZ: u32 = 25_000_000;

/// Width of the frequency accumulator.
pub const FREQ_BITS: u32 = 28;

const FREQ_WORD_MAX: u32 = (1 << FREQ_BITS) - 1;
const PAYLOAD_MASK: u16 = 0x3FFF;
const PHASE_MAX: u16 = 0x0FFF;

const CONTROL_BASE: u16 = 0x2000;
const CONTROL_RESET: u16 = 0x0100;
const CONTROL_PAUSE: u16 = 0x0080;
const CONTROL_TRIANGLE: u16 = 0x0002;
const CONTROL_SQUARE: u16 = 0x0028;

/// Output waveform selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaveType {
    Sine,
    Triangle,
    Square,
}

/// One of the chip's two frequency (or phase) registers.
///
/// Two variants only: an out-of-range register select is unrepresentable,
/// so no runtime check exists for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSelect {
    Zero,
    One,
}

impl RegisterSelect {
    /// The register this one is double-buffered against.
    pub fn other(self) -> Self {
        match self {
            RegisterSelect::Zero => RegisterSelect::One,
            RegisterSelect::One => RegisterSelect::Zero,
        }
    }

    /// Select bit as used in the control word (DB11 / DB10).
    pub fn bit(self) -> u16 {
        match self {
            RegisterSelect::Zero => 0,
            RegisterSelect::One => 1,
        }
    }

    fn freq_overlay(self) -> u16 {
        match self {
            // DB15=0, DB14=1 addresses FREQ0
            RegisterSelect::Zero => 0x4000,
            // DB15=1, DB14=0 addresses FREQ1
            RegisterSelect::One => 0x8000,
        }
    }

    fn phase_overlay(self) -> u16 {
        match self {
            // DB15=1, DB14=1, DB13=0 addresses PHASE0
            RegisterSelect::Zero => 0xC000,
            // DB15=1, DB14=1, DB13=1 addresses PHASE1
            RegisterSelect::One => 0xE000,
        }
    }
}

/// A 16-bit word tagged with its destination on the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWord {
    FreqLsw(u16),
    FreqMsw(u16),
    Phase(u16),
    Control(u16),
}

impl RegisterWord {
    /// The raw 16-bit value as sent over the wire.
    pub fn raw(self) -> u16 {
        match self {
            RegisterWord::FreqLsw(w)
            | RegisterWord::FreqMsw(w)
            | RegisterWord::Phase(w)
            | RegisterWord::Control(w) => w,
        }
    }
}

/// Clamp a requested output frequency to the range the chip can produce,
/// `[0, master_clock / 2]`.
pub fn clamp_frequency(freq_hz: f32, master_clock_hz: u32) -> f32 {
    freq_hz.clamp(0.0, (master_clock_hz / 2) as f32)
}

/// Encode an output frequency into the `(msw, lsw)` word pair addressed
/// at `select`.
///
/// The frequency is converted into a 28-bit accumulator increment,
/// `round(freq * 2^28 / master_clock)`, split into two 14-bit halves with
/// the register-select overlay OR'd onto both.
pub fn encode_frequency(freq_hz: f32, select: RegisterSelect, master_clock_hz: u32) -> (u16, u16) {
    let freq_hz = clamp_frequency(freq_hz, master_clock_hz);
    let freq_word = ((freq_hz as f64 * (1u64 << FREQ_BITS) as f64 / master_clock_hz as f64)
        .round() as u64)
        .min(FREQ_WORD_MAX as u64) as u32;

    let msw = ((freq_word >> 14) as u16 & PAYLOAD_MASK) | select.freq_overlay();
    let lsw = (freq_word as u16 & PAYLOAD_MASK) | select.freq_overlay();
    (msw, lsw)
}

/// Recover the frequency encoded by [`encode_frequency`]. Used to verify
/// round-trips; accuracy is bounded by `master_clock / 2^28`.
pub fn decode_frequency(msw: u16, lsw: u16, master_clock_hz: u32) -> f32 {
    let word = ((msw & PAYLOAD_MASK) as u32) << 14 | (lsw & PAYLOAD_MASK) as u32;
    (word as f64 * master_clock_hz as f64 / (1u64 << FREQ_BITS) as f64) as f32
}

/// Encode a phase offset (`0..=4095`, one turn is 4096) addressed at
/// `select`. Out-of-range values clamp.
pub fn encode_phase(phase_word: u16, select: RegisterSelect) -> u16 {
    phase_word.min(PHASE_MAX) | select.phase_overlay()
}

/// Assemble the control word from the full mode state. Wave-mode bits are
/// always part of a complete control word, never sent on their own.
pub fn encode_control(
    reset: bool,
    paused: bool,
    freq_sel: RegisterSelect,
    phase_sel: RegisterSelect,
    wave_type: WaveType,
) -> u16 {
    let mut control = CONTROL_BASE;

    if reset {
        control |= CONTROL_RESET;
    }
    if paused {
        // Disables the internal master clock, freezing the DAC output
        control |= CONTROL_PAUSE;
    }

    control |= freq_sel.bit() << 11;
    control |= phase_sel.bit() << 10;

    match wave_type {
        WaveType::Sine => {}
        WaveType::Triangle => control |= CONTROL_TRIANGLE,
        WaveType::Square => control |= CONTROL_SQUARE,
    }

    control
}
