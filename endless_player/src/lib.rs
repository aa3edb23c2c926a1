// Endless Player
//
// Learns a first-order Markov chain from a short quantized performance and
// plays an unending stream of new phrases in its style, scheduling each batch
// of notes ahead of the clock so playback never runs dry.
//
// Architecture:
// - symbol.rs: `Symbol`, the encoded time slice the chain walks over, and its
//   decoding into a position plus pitches
// - chain.rs: `TransitionTable`, count-weighted successor sampling with a
//   uniform fallback for unseen seeds; snapshots and matrix dumps
// - quantize.rs: performance JSON -> eighth-note slices -> phrases of symbols
// - learner.rs: phrases -> `LearnedModel` (table + phrase-initial seeds);
//   JSON save/load
// - config.rs: `PlaybackConfig` (batch size, tempo, lead time, note shape)
// - sink.rs: the `EventSink` contract and `Timeline`, a dispatch queue over a
//   virtual or wall clock
// - output.rs: `NoteOutput` implementations that receive dispatched notes
// - scheduler.rs: the Idle/Running/Stopped batch generator
// - player.rs: the drive loop, offline `render`, and threaded live playback
// - midi.rs: writes a recorded run to a Standard MIDI File
// - error.rs: `PlayerError`, wrapping every layer's error
//
// All randomness comes from an injected `endless_prng::ChainRng`, so a run is
// reproducible from its seed.

pub mod chain;
pub mod config;
pub mod error;
pub mod learner;
pub mod midi;
pub mod output;
pub mod player;
pub mod quantize;
pub mod scheduler;
pub mod sink;
pub mod symbol;

pub use error::{PlayerError, Result};
