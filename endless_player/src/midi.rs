// MIDI file output from a recorded run.
//
// Converts the events a `RecordingOutput` captured (see player.rs `render`)
// into a Standard MIDI File so a rendered stretch of the endless stream can be
// opened in any player or DAW. Output is SMF format 0: a single track with a
// tempo event up front, then note on/off messages.
//
// Event times are milliseconds on the sink's clock. They are shifted so the
// first event lands on tick 0 (the lead time would otherwise open the file
// with silence) and converted to ticks at the run's tempo.
//
// Uses the `midly` crate for writing.

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

use crate::error::{PlayerError, Result};
use crate::output::{OutputEvent, OutputEventKind};
use crate::sink::Timestamp;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// MIDI controller number for "all notes off".
const CC_ALL_NOTES_OFF: u8 = 123;

/// Convert recorded events to MIDI and write them to `path`.
pub fn write_midi(events: &[OutputEvent], tempo_bpm: f64, path: &Path) -> Result<()> {
    let smf = events_to_smf(events, tempo_bpm);
    let mut buf = Vec::new();
    smf.write(&mut buf)
        .map_err(|e| PlayerError::Midi(e.to_string()))?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Build an in-memory SMF from recorded events. Events must be in time order,
/// as a `Timeline` delivers them.
pub fn events_to_smf(events: &[OutputEvent], tempo_bpm: f64) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let mut track: Track<'static> = Vec::new();
    let micros_per_quarter = (60_000_000.0 / tempo_bpm).round() as u32;
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros_per_quarter))),
    });

    let origin = events.first().map_or(0, |e| e.time);
    let mut last_tick: u32 = 0;
    for event in events {
        let tick = ms_to_ticks(event.time.saturating_sub(origin), tempo_bpm);
        // Only the first message of an event carries the delta.
        let mut delta = tick.saturating_sub(last_tick);
        last_tick = last_tick.max(tick);

        for (channel, message) in messages(event.kind) {
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi { channel, message },
            });
            delta = 0;
        }
    }

    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);
    smf
}

/// MIDI messages for one recorded event. All-off expands to one controller
/// message per channel.
fn messages(kind: OutputEventKind) -> Vec<(u4, MidiMessage)> {
    match kind {
        OutputEventKind::On { channel, pitch, velocity } => vec![(
            u4::new(channel),
            MidiMessage::NoteOn {
                key: u7::new(pitch),
                vel: u7::new(velocity),
            },
        )],
        OutputEventKind::Off { channel, pitch } => vec![(
            u4::new(channel),
            MidiMessage::NoteOff {
                key: u7::new(pitch),
                vel: u7::new(0),
            },
        )],
        OutputEventKind::AllOff => (0..16u8)
            .map(|ch| {
                (
                    u4::new(ch),
                    MidiMessage::Controller {
                        controller: u7::new(CC_ALL_NOTES_OFF),
                        value: u7::new(0),
                    },
                )
            })
            .collect(),
    }
}

fn ms_to_ticks(ms: Timestamp, tempo_bpm: f64) -> u32 {
    let ticks_per_ms = f64::from(TICKS_PER_QUARTER) * tempo_bpm / 60_000.0;
    (ms as f64 * ticks_per_ms).round() as u32
}
