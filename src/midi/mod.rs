//! MIDI input adapter: midir callback -> crossbeam channel -> the
//! event loop's non-blocking [`EventSource`].

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use log::{debug, warn};
use midir::{MidiInput, MidiInputConnection};

use crate::messaging::{EventSource, MidiEvent};

const CLIENT_NAME: &str = "ad9833-voice";

/// Create the channel pair connecting a [`MidiInputHandler`] to the event
/// loop.
pub fn event_channel() -> (Sender<MidiEvent>, ChannelEvents) {
    let (sender, receiver) = unbounded();
    (sender, ChannelEvents { receiver })
}

/// Receiving side of the event channel.
pub struct ChannelEvents {
    receiver: Receiver<MidiEvent>,
}

impl EventSource for ChannelEvents {
    fn poll_event(&mut self) -> Option<MidiEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                warn!("MIDI event channel disconnected");
                None
            }
        }
    }
}

/// Handles MIDI input from connected devices, decoding raw messages into
/// [`MidiEvent`]s.
pub struct MidiInputHandler {
    connection: Option<MidiInputConnection<()>>,
    sender: Sender<MidiEvent>,
}

impl MidiInputHandler {
    pub fn new(sender: Sender<MidiEvent>) -> Self {
        Self {
            connection: None,
            sender,
        }
    }

    /// List all available MIDI input port names.
    pub fn list_ports(&self) -> Vec<String> {
        let mut port_names = Vec::new();

        match MidiInput::new(CLIENT_NAME) {
            Ok(midi_in) => {
                for port in midi_in.ports() {
                    if let Ok(name) = midi_in.port_name(&port) {
                        port_names.push(name);
                    }
                }
            }
            Err(err) => {
                warn!("error initializing MIDI input: {err}");
            }
        }

        port_names
    }

    /// Connect to a specific MIDI input port by name.
    pub fn connect_to_port(&mut self, port_name: &str) -> Result<(), String> {
        self.disconnect();

        let mut midi_in = MidiInput::new(CLIENT_NAME)
            .map_err(|err| format!("failed to create MIDI input: {err}"))?;
        // Timing clocks drive the tempo estimate
        midi_in.ignore(midir::Ignore::None);

        let ports = midi_in.ports();
        let port = ports
            .into_iter()
            .find(|port| {
                midi_in
                    .port_name(port)
                    .map(|name| name == port_name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| format!("MIDI port '{port_name}' not found"))?;

        let sender = self.sender.clone();
        let connection = midi_in
            .connect(
                &port,
                "midir-read-input",
                move |_stamp, message, _| {
                    if let Some(event) = decode_message(message) {
                        sender.send(event).ok();
                    }
                },
                (),
            )
            .map_err(|err| format!("failed to connect to MIDI port: {err}"))?;

        debug!("connected to MIDI port '{port_name}'");
        self.connection = Some(connection);
        Ok(())
    }

    /// Disconnect from the currently connected MIDI port.
    pub fn disconnect(&mut self) {
        self.connection = None;
    }
}

/// Decode one raw MIDI message into an event. Returns `None` for messages
/// too short to carry their payload.
fn decode_message(message: &[u8]) -> Option<MidiEvent> {
    let status = *message.first()?;

    // System messages carry no channel nibble
    if status >= 0xF0 {
        return Some(match status {
            0xF0 => MidiEvent::SystemExclusive(message[1..].to_vec()),
            0xF8 => MidiEvent::TimingClock,
            0xFA => MidiEvent::Start,
            0xFC => MidiEvent::Stop,
            other => MidiEvent::Unknown(other),
        });
    }

    match status & 0xF0 {
        0x80 => Some(MidiEvent::NoteOff(*message.get(1)?, *message.get(2)?)),
        0x90 => Some(MidiEvent::NoteOn(*message.get(1)?, *message.get(2)?)),
        0xA0 => Some(MidiEvent::PolyphonicKeyPressure(
            *message.get(1)?,
            *message.get(2)?,
        )),
        0xB0 => Some(MidiEvent::ControlChange(
            *message.get(1)?,
            *message.get(2)?,
        )),
        0xC0 => Some(MidiEvent::ProgramChange(*message.get(1)?)),
        0xD0 => Some(MidiEvent::ChannelPressure(*message.get(1)?)),
        0xE0 => {
            let lsb = *message.get(1)? as u16;
            let msb = *message.get(2)? as u16;
            Some(MidiEvent::PitchBend((msb << 7) | lsb))
        }
        other => Some(MidiEvent::Unknown(other)),
    }
}
