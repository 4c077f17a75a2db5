//! Event loop mapping MIDI-equivalent events onto the envelope sequencer
//! and device controller.
//!
//! Single-threaded and cooperative: envelope runs block the loop, so a
//! note event that arrives mid-envelope takes effect at the next step
//! boundary. Non-note events polled during an envelope are deferred and
//! handled once the envelope call returns.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::core::clock::Clock;
use crate::core::device::{Transport, TransportError};
use crate::core::envelope::{AmplitudeOutput, EnvelopeSequencer, EnvelopeSpec};
use crate::messaging::{EventSource, MidiEvent, NoteEvent};
use crate::note::{note_name, note_to_frequency};

/// MIDI clocks per quarter note.
const TICKS_PER_BEAT: f32 = 24.0;

/// One monophonic voice: envelope sequencer, its event source, and the
/// running tempo estimate.
pub struct Voice<T, A, C, E>
where
    T: Transport,
    A: AmplitudeOutput,
    C: Clock,
    E: EventSource,
{
    sequencer: EnvelopeSequencer<T, A, C>,
    events: E,
    deferred: VecDeque<MidiEvent>,
    spec: EnvelopeSpec,
    tempo_bpm: f32,
    last_tick: Option<std::time::Duration>,
    last_velocity_scale: f32,
}

impl<T, A, C, E> Voice<T, A, C, E>
where
    T: Transport,
    A: AmplitudeOutput,
    C: Clock,
    E: EventSource,
{
    pub fn new(sequencer: EnvelopeSequencer<T, A, C>, events: E, spec: EnvelopeSpec) -> Self {
        Self {
            sequencer,
            events,
            deferred: VecDeque::new(),
            spec,
            tempo_bpm: 0.0,
            last_tick: None,
            last_velocity_scale: 0.0,
        }
    }

    pub fn sequencer(&self) -> &EnvelopeSequencer<T, A, C> {
        &self.sequencer
    }

    /// Running-average tempo from timing clocks, 0.0 until two ticks have
    /// been seen.
    pub fn tempo_bpm(&self) -> f32 {
        self.tempo_bpm
    }

    /// Service at most one pending event. Returns `true` if an event was
    /// handled, `false` if nothing was pending (the host decides how to
    /// idle).
    pub fn poll_once(&mut self) -> Result<bool, TransportError> {
        let next = self
            .deferred
            .pop_front()
            .or_else(|| self.events.poll_event());
        match next {
            Some(event) => {
                self.dispatch(event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn dispatch(&mut self, event: MidiEvent) -> Result<(), TransportError> {
        match event {
            MidiEvent::NoteOn(note, velocity) => {
                debug!(
                    "note on : #{note:02} {} {:.3}Hz vel {velocity}",
                    note_name(note),
                    note_to_frequency(note)
                );
                self.play(NoteEvent::On { note, velocity })
            }
            MidiEvent::NoteOff(note, velocity) => {
                debug!(
                    "note off: #{note:02} {} {:.3}Hz vel {velocity}",
                    note_name(note),
                    note_to_frequency(note)
                );
                self.play(NoteEvent::Off { note })
            }
            MidiEvent::TimingClock => {
                self.tick();
                Ok(())
            }
            // The remaining kinds are surfaced for diagnostics only: a
            // hook point, no device effect in the current design.
            MidiEvent::ChannelPressure(pressure) => {
                debug!("channel pressure: {pressure}");
                Ok(())
            }
            MidiEvent::PolyphonicKeyPressure(note, pressure) => {
                debug!(
                    "poly pressure: #{note:02} {} press {pressure}",
                    note_name(note)
                );
                Ok(())
            }
            MidiEvent::ControlChange(control, value) => {
                debug!("control change: ctrl #{control} value {value}");
                Ok(())
            }
            MidiEvent::ProgramChange(patch) => {
                debug!("program change: patch {patch}");
                Ok(())
            }
            MidiEvent::PitchBend(bend) => {
                debug!("pitch bend: {bend}");
                Ok(())
            }
            MidiEvent::Start => {
                debug!("-- start --");
                Ok(())
            }
            MidiEvent::Stop => {
                debug!("-- stop --");
                Ok(())
            }
            MidiEvent::SystemExclusive(data) => {
                debug!("sysex: {} bytes", data.len());
                Ok(())
            }
            MidiEvent::Unknown(status) => {
                debug!("unknown MIDI status {status:#04x}");
                Ok(())
            }
        }
    }

    /// Run an envelope for a note event. When the sequencer is superseded
    /// at a step boundary it hands the new note event back, and the chain
    /// continues here until one envelope runs to completion.
    fn play(&mut self, event: NoteEvent) -> Result<(), TransportError> {
        let spec = self.spec;
        let mut event = event;
        loop {
            let superseding = match event {
                NoteEvent::On { note, velocity } if velocity > 0 => {
                    let scale = velocity as f32 / 127.0;
                    self.last_velocity_scale = scale;
                    let Self {
                        sequencer,
                        events,
                        deferred,
                        ..
                    } = self;
                    sequencer.note_on(note, scale, &spec, &mut || {
                        next_note_event(events, deferred)
                    })?
                }
                // Velocity-zero note-on is a note-off; release always uses
                // the last sounding velocity
                NoteEvent::On { .. } | NoteEvent::Off { .. } => {
                    let scale = self.last_velocity_scale;
                    let Self {
                        sequencer,
                        events,
                        deferred,
                        ..
                    } = self;
                    sequencer.note_off(scale, &spec, &mut || {
                        next_note_event(events, deferred)
                    })?
                }
            };
            match superseding {
                Some(next) => {
                    trace!("superseding note event: {next:?}");
                    event = next;
                }
                None => return Ok(()),
            }
        }
    }

    /// Update the running-average tempo estimate from a timing clock.
    fn tick(&mut self) {
        let now = self.sequencer.clock().now();
        if let Some(previous) = self.last_tick {
            let interval_ns = (now - previous).as_nanos();
            if interval_ns != 0 {
                let instant_bpm = 60.0e9 / (interval_ns as f32 * TICKS_PER_BEAT);
                self.tempo_bpm = (self.tempo_bpm + instant_bpm) / 2.0;
                trace!("tick: {:.1} BPM", self.tempo_bpm);
            }
        }
        self.last_tick = Some(now);
    }
}

/// Drain the source until a note event shows up; anything else is queued
/// for handling after the envelope returns.
fn next_note_event<E: EventSource>(
    events: &mut E,
    deferred: &mut VecDeque<MidiEvent>,
) -> Option<NoteEvent> {
    while let Some(event) = events.poll_event() {
        match event.as_note_event() {
            Some(note_event) => return Some(note_event),
            None => deferred.push_back(event),
        }
    }
    None
}
