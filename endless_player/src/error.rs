// Error types for the player.
//
// Each layer owns a narrow enum (`SymbolError` in symbol.rs, `ModelError` in
// chain.rs, `QuantizeError` in quantize.rs). `PlayerError` wraps them for the
// scheduler, the playback driver, and the CLI, so `?` works across layers.

use thiserror::Error;

use crate::chain::ModelError;
use crate::quantize::QuantizeError;
use crate::symbol::SymbolError;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Quantize(#[from] QuantizeError),

    #[error("invalid playback config: {0}")]
    Config(String),

    /// `generate_batch` was called after a stop or a fatal error.
    #[error("scheduler is stopped")]
    Stopped,

    /// A batch anchored this close to `Timestamp::MAX` cannot be scheduled.
    #[error("clock at {0} ms has no room left for another batch")]
    ClockOverflow(u64),

    #[error("playback thread panicked")]
    ThreadPanicked,

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MIDI: {0}")]
    Midi(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
