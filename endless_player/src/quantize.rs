// Quantization: performance JSON -> phrases of symbols.
//
// Input is the JSON shape produced by common MIDI-to-JSON converters: a
// `header` carrying `bpm`, a `duration` in seconds, a `phraseLength` step
// count, and `tracks`, each holding `notes` with a `midi` key number and an
// onset `time` in seconds. Only onsets matter; note lengths and velocities are
// ignored.
//
// The timeline is cut into eighth-note slices of `60 / (2 * bpm)` seconds.
// Each slice collects the pitches whose onset falls inside it, in file order.
// Consecutive runs of `phraseLength` slices become phrases, and each slice is
// encoded as a symbol with its index inside the phrase (see symbol.rs).
// Slices left over after the last whole phrase are dropped.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::symbol::{MAX_PITCH, Symbol};

/// Track read when the caller does not ask for one. Converters put the tempo
/// map in track 0 and the first instrument in track 1.
pub const DEFAULT_TRACK: usize = 1;

/// Most slices one performance may quantize to: about 69 hours at 120 bpm.
pub const MAX_SLICES: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum QuantizeError {
    #[error("reading performance: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing performance JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tempo must be a positive number of beats per minute, got {0}")]
    InvalidTempo(f64),
    #[error("phrase length must be at least 1")]
    InvalidPhraseLength,
    #[error("duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f64),
    #[error("{duration}s at this tempo is more than {max_slices} slices")]
    TooLong { duration: f64, max_slices: usize },
    #[error("no track contains any notes")]
    NoNotes,
    #[error("note {midi} at {time}s is outside the MIDI key range")]
    InvalidNote { midi: i64, time: f64 },
    #[error("performance has {slices} slices, fewer than one phrase of {phrase_length}")]
    TooShort { slices: usize, phrase_length: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceHeader {
    pub bpm: f64,
    #[serde(rename = "PPQ", default)]
    pub ppq: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceNote {
    pub midi: i64,
    /// Onset in seconds from the start of the performance.
    pub time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceTrack {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Vec<PerformanceNote>,
}

/// Raw performance as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Performance {
    pub header: PerformanceHeader,
    /// Length in seconds.
    pub duration: f64,
    #[serde(rename = "phraseLength")]
    pub phrase_length: usize,
    #[serde(default)]
    pub tracks: Vec<PerformanceTrack>,
}

impl Performance {
    pub fn load(path: &Path) -> Result<Self, QuantizeError> {
        let data = std::fs::read_to_string(path)?;
        let perf: Performance = serde_json::from_str(&data)?;
        Ok(perf)
    }
}

/// Phrases ready for the learner, plus the metadata playback needs.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedPerformance {
    pub tempo_bpm: f64,
    pub phrase_length: usize,
    pub phrases: Vec<Vec<Symbol>>,
}

/// Seconds per eighth-note slice at `bpm`.
pub fn slice_seconds(bpm: f64) -> f64 {
    60.0 / (2.0 * bpm)
}

pub fn quantize(perf: &Performance, track: usize) -> Result<QuantizedPerformance, QuantizeError> {
    let bpm = perf.header.bpm;
    if !(bpm.is_finite() && bpm > 0.0) {
        return Err(QuantizeError::InvalidTempo(bpm));
    }
    if perf.phrase_length == 0 {
        return Err(QuantizeError::InvalidPhraseLength);
    }
    if !(perf.duration.is_finite() && perf.duration > 0.0) {
        return Err(QuantizeError::InvalidDuration(perf.duration));
    }

    let step = slice_seconds(bpm);
    let slice_count = (perf.duration / step).ceil();
    if slice_count > MAX_SLICES as f64 {
        return Err(QuantizeError::TooLong {
            duration: perf.duration,
            max_slices: MAX_SLICES,
        });
    }
    let slice_count = slice_count as usize;
    let notes = select_track(perf, track)?;

    let mut slices: Vec<Vec<u8>> = vec![Vec::new(); slice_count];
    for note in notes {
        let pitch = u8::try_from(note.midi)
            .ok()
            .filter(|p| *p <= MAX_PITCH)
            .ok_or(QuantizeError::InvalidNote {
                midi: note.midi,
                time: note.time,
            })?;
        if note.time < 0.0 {
            continue;
        }
        let idx = (note.time / step).floor() as usize;
        if let Some(slice) = slices.get_mut(idx) {
            slice.push(pitch);
        }
    }

    let phrase_length = perf.phrase_length;
    if slices.len() < phrase_length {
        return Err(QuantizeError::TooShort {
            slices: slices.len(),
            phrase_length,
        });
    }

    let phrases: Vec<Vec<Symbol>> = slices
        .chunks_exact(phrase_length)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .map(|(pos, pitches)| Symbol::from_slice(pos, pitches))
                .collect()
        })
        .collect();

    log::info!(
        "quantized {} slices into {} phrases of {} ({} slices dropped)",
        slices.len(),
        phrases.len(),
        phrase_length,
        slices.len() % phrase_length
    );

    Ok(QuantizedPerformance {
        tempo_bpm: bpm,
        phrase_length,
        phrases,
    })
}

/// Load and quantize in one step.
pub fn quantize_file(path: &Path, track: usize) -> Result<QuantizedPerformance, QuantizeError> {
    let perf = Performance::load(path)?;
    if let Some(name) = &perf.header.name {
        log::info!("performance: {name}");
    }
    quantize(&perf, track)
}

/// The requested track's notes, or the first track that has any.
fn select_track(perf: &Performance, track: usize) -> Result<&[PerformanceNote], QuantizeError> {
    if let Some(t) = perf.tracks.get(track).filter(|t| !t.notes.is_empty()) {
        return Ok(&t.notes);
    }
    let (idx, t) = perf
        .tracks
        .iter()
        .enumerate()
        .find(|(_, t)| !t.notes.is_empty())
        .ok_or(QuantizeError::NoNotes)?;
    log::warn!("track {track} has no notes; using track {idx}");
    Ok(&t.notes)
}
