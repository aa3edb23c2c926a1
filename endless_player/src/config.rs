// Playback configuration.
//
// Everything the scheduler needs besides the model: how many steps to
// generate per batch, the tempo that sets the step spacing, how far ahead of
// the clock a batch is scheduled, and the fixed note duration, channel and
// velocity. Loaded from JSON with every field optional (missing fields take
// the defaults below), then overridden by CLI flags.
//
// Step spacing is one eighth note: `60000 / (2 * tempo_bpm)` milliseconds.
// Offsets within a batch are computed from the exact step length and rounded
// once per offset, so long runs do not accumulate rounding drift.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PlayerError, Result};
use crate::learner::LearnedModel;
use crate::sink::Timestamp;

/// Longest a single batch may reach past its anchor: the last step, plus
/// lead time, plus the note's length.
pub const MAX_BATCH_HORIZON_MS: Timestamp = 24 * 60 * 60 * 1000;

/// Where each batch's first seed comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// One unbroken trajectory: each batch continues from the last symbol of
    /// the previous one.
    #[default]
    Continuous,
    /// Re-draw a phrase-initial seed at the start of every batch.
    RestartEachBatch,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Steps generated per batch.
    pub batch_size: usize,
    pub tempo_bpm: f64,
    /// Offset added to every note so dispatch jitter never makes a note late.
    pub lead_time_ms: Timestamp,
    pub note_duration_ms: Timestamp,
    pub channel: u8,
    pub velocity: u8,
    pub seed_policy: SeedPolicy,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            tempo_bpm: 120.0,
            lead_time_ms: 10_000,
            note_duration_ms: 2_500,
            channel: 0,
            velocity: 100,
            seed_policy: SeedPolicy::Continuous,
        }
    }
}

impl PlaybackConfig {
    /// Defaults with batch size and tempo taken from the model, so one batch
    /// spans one learned phrase.
    pub fn for_model(model: &LearnedModel) -> Self {
        Self {
            batch_size: model.phrase_length,
            tempo_bpm: model.tempo_bpm,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: PlaybackConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PlayerError::Config("batch_size must be at least 1".into()));
        }
        if !(self.tempo_bpm.is_finite() && self.tempo_bpm > 0.0) {
            return Err(PlayerError::Config(format!(
                "tempo_bpm must be positive, got {}",
                self.tempo_bpm
            )));
        }
        if self.note_duration_ms == 0 {
            return Err(PlayerError::Config("note_duration_ms must be at least 1".into()));
        }
        if self.channel > 15 {
            return Err(PlayerError::Config(format!(
                "channel must be 0..=15, got {}",
                self.channel
            )));
        }
        let horizon = self.batch_size as f64 * self.step_interval_ms()
            + self.lead_time_ms as f64
            + self.note_duration_ms as f64;
        if horizon > MAX_BATCH_HORIZON_MS as f64 {
            return Err(PlayerError::Config(format!(
                "one batch reaches {horizon:.0} ms ahead, over the {MAX_BATCH_HORIZON_MS} ms limit"
            )));
        }
        if self.velocity > 127 {
            return Err(PlayerError::Config(format!(
                "velocity must be 0..=127, got {}",
                self.velocity
            )));
        }
        Ok(())
    }

    /// Milliseconds per step (one eighth note).
    pub fn step_interval_ms(&self) -> f64 {
        60_000.0 / (2.0 * self.tempo_bpm)
    }

    /// Offset of step `i` from the batch anchor, rounded to the millisecond.
    pub fn step_offset_ms(&self, i: usize) -> Timestamp {
        (i as f64 * self.step_interval_ms()).round() as Timestamp
    }

    /// Wall-clock span of one batch; also the delay until the next wake-up.
    pub fn batch_span_ms(&self) -> Timestamp {
        self.step_offset_ms(self.batch_size)
    }
}
