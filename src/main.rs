use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, trace, warn};

use ad9833_voice::core::clock::SystemClock;
use ad9833_voice::core::device::{DeviceController, Transport, TransportError};
use ad9833_voice::core::envelope::{AmplitudeOutput, EnvelopeSequencer};
use ad9833_voice::core::voice::Voice;
use ad9833_voice::midi::{event_channel, MidiInputHandler};
use ad9833_voice::VoiceConfig;

/// Stand-in for the SPI link when no hardware is attached: every word is
/// logged instead of clocked out.
struct TraceTransport;

impl Transport for TraceTransport {
    fn send_control_word(&mut self, word: u16) -> Result<(), TransportError> {
        trace!("spi <- {word:#06x}");
        Ok(())
    }
}

/// Stand-in for the amplitude DAC.
struct TraceAmplitude;

impl AmplitudeOutput for TraceAmplitude {
    fn set_level(&mut self, level: f32) {
        trace!("dac <- {level:.4}");
    }
}

fn main() -> Result<()> {
    env_logger::init();
    info!("ad9833-voice starting");

    let config = match VoiceConfig::default_path() {
        Ok(path) => VoiceConfig::load_or_create(&path).unwrap_or_else(|err| {
            warn!("config unusable ({err}); falling back to defaults");
            VoiceConfig::default()
        }),
        Err(err) => {
            warn!("{err}; falling back to defaults");
            VoiceConfig::default()
        }
    };

    let (sender, events) = event_channel();
    let mut midi_in = MidiInputHandler::new(sender);
    let ports = midi_in.list_ports();
    match ports.first() {
        Some(port) => {
            midi_in
                .connect_to_port(port)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("connecting to MIDI port '{port}'"))?;
            info!("listening on MIDI port '{port}'");
        }
        None => warn!("no MIDI input ports found; running idle"),
    }

    // Bring the generator to a known state before the first note
    let mut device = DeviceController::with_master_clock(TraceTransport, config.master_clock_hz);
    device.reset(440.0, 0).context("resetting waveform generator")?;
    device.set_wave_type(config.wave_type);
    device.start().context("starting waveform generator")?;
    info!("generator running: {:?} wave", config.wave_type);

    let sequencer = EnvelopeSequencer::new(device, TraceAmplitude, SystemClock::new());
    let mut voice = Voice::new(sequencer, events, config.envelope_spec());

    loop {
        if !voice.poll_once()? {
            thread::sleep(Duration::from_millis(1));
        }
    }
}
