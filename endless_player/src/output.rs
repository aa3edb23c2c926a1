// Note outputs: where a sink delivers notes when their time comes.
//
// The sink decides *when*; a `NoteOutput` decides *what happens*. Synthesis
// and MIDI device handling live behind this trait and are not part of this
// crate. Two outputs ship here:
// - `LogOutput` writes each note to the log, for listening in on a live run.
// - `RecordingOutput` keeps every delivered event in a shared buffer, for
//   tests and for rendering a run to a MIDI file (see midi.rs).

use std::sync::{Arc, Mutex, MutexGuard};

use crate::sink::Timestamp;

/// Receives note on/off messages at their scheduled times.
pub trait NoteOutput: Send {
    fn note_on(&mut self, time: Timestamp, channel: u8, pitch: u8, velocity: u8);
    fn note_off(&mut self, time: Timestamp, channel: u8, pitch: u8);
    /// Silence everything still sounding. Called once at teardown.
    fn all_notes_off(&mut self, time: Timestamp);
}

/// Logs notes at `info` level.
#[derive(Debug, Default)]
pub struct LogOutput;

impl NoteOutput for LogOutput {
    fn note_on(&mut self, time: Timestamp, channel: u8, pitch: u8, velocity: u8) {
        log::info!("{time:>10} ms  ch {channel:>2}  on  {pitch:>3} vel {velocity}");
    }

    fn note_off(&mut self, time: Timestamp, channel: u8, pitch: u8) {
        log::debug!("{time:>10} ms  ch {channel:>2}  off {pitch:>3}");
    }

    fn all_notes_off(&mut self, time: Timestamp) {
        log::info!("{time:>10} ms  all notes off");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEventKind {
    On { channel: u8, pitch: u8, velocity: u8 },
    Off { channel: u8, pitch: u8 },
    AllOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent {
    pub time: Timestamp,
    pub kind: OutputEventKind,
}

/// Buffers delivered events. Clones share the same buffer, so one clone can
/// go into a sink on another thread while the caller keeps the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    events: Arc<Mutex<Vec<OutputEvent>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far, in delivery order.
    pub fn events(&self) -> Vec<OutputEvent> {
        self.lock().clone()
    }

    /// Just the note-ons as `(time, pitch)`.
    pub fn onsets(&self) -> Vec<(Timestamp, u8)> {
        self.lock()
            .iter()
            .filter_map(|e| match e.kind {
                OutputEventKind::On { pitch, .. } => Some((e.time, pitch)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, time: Timestamp, kind: OutputEventKind) {
        self.lock().push(OutputEvent { time, kind });
    }

    // Pushes never leave the buffer half-written, so a poisoned lock is
    // still readable.
    fn lock(&self) -> MutexGuard<'_, Vec<OutputEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl NoteOutput for RecordingOutput {
    fn note_on(&mut self, time: Timestamp, channel: u8, pitch: u8, velocity: u8) {
        self.push(time, OutputEventKind::On { channel, pitch, velocity });
    }

    fn note_off(&mut self, time: Timestamp, channel: u8, pitch: u8) {
        self.push(time, OutputEventKind::Off { channel, pitch });
    }

    fn all_notes_off(&mut self, time: Timestamp) {
        self.push(time, OutputEventKind::AllOff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_clones_share_a_buffer() {
        let recording = RecordingOutput::new();
        let mut handle = recording.clone();
        handle.note_on(10, 0, 60, 100);
        handle.note_off(20, 0, 60);
        handle.all_notes_off(30);

        let events = recording.events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            OutputEvent {
                time: 10,
                kind: OutputEventKind::On { channel: 0, pitch: 60, velocity: 100 }
            }
        );
        assert_eq!(recording.onsets(), vec![(10, 60)]);
    }
}
