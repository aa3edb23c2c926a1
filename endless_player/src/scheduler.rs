// Look-ahead batch scheduler: turns the chain into an unbroken note stream.
//
// Each call to `generate_batch` reads the sink's clock once (the batch
// anchor), samples `batch_size` symbols, schedules their notes at
// `anchor + offset(i) + lead_time`, and asks the sink for a wake-up at
// `anchor + offset(batch_size)`. When that wake-up fires the next batch is
// generated, while the previous batch is still `lead_time` away from its
// last note. The stream stays gap-free as long as one batch takes less time
// to generate than it takes to play.
//
// The trajectory is continuous: the last symbol sampled in a batch seeds the
// first draw of the next one. Only the very first batch draws its seed from
// the model's phrase-initial symbols (unless `SeedPolicy::RestartEachBatch`).
// The chain advances over whole symbols, never over individual pitches.
//
// States: Idle (constructed) -> Running (after the first batch) -> Stopped.
// Stopped is terminal and reached by `stop` or by any error while
// generating: an empty model or a malformed symbol leaves nothing sensible to
// play, so the scheduler tears the sink down and returns the error.
//
// `generate_batch` takes `&mut self`, so overlapping invocations are
// impossible. The model sits behind an `Arc` and is never mutated.

use endless_prng::ChainRng;
use std::sync::Arc;

use crate::config::{PlaybackConfig, SeedPolicy};
use crate::error::{PlayerError, Result};
use crate::learner::LearnedModel;
use crate::sink::{EventSink, NoteEvent, Timestamp};
use crate::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

/// Carried from one batch to the next while Running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    /// Last symbol sampled; seeds the next batch.
    pub current_seed: Option<Symbol>,
    /// Clock reading the latest batch was anchored at.
    pub anchor_time: Timestamp,
    pub batches: u64,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Running(ScheduleState),
    Stopped,
}

/// Summary of one generated batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub anchor: Timestamp,
    /// The seed the batch started from (`None` means the uniform fallback).
    pub start_seed: Option<Symbol>,
    pub symbols: Vec<Symbol>,
    pub notes: usize,
    pub rests: usize,
    pub next_wakeup: Timestamp,
}

pub struct Scheduler {
    model: Arc<LearnedModel>,
    config: PlaybackConfig,
    rng: ChainRng,
    phase: Phase,
}

impl Scheduler {
    pub fn new(model: Arc<LearnedModel>, config: PlaybackConfig, rng: ChainRng) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            config,
            rng,
            phase: Phase::Idle,
        })
    }

    pub fn state(&self) -> SchedulerState {
        match self.phase {
            Phase::Idle => SchedulerState::Idle,
            Phase::Running(_) => SchedulerState::Running,
            Phase::Stopped => SchedulerState::Stopped,
        }
    }

    /// Carry-over state, present only while Running.
    pub fn schedule_state(&self) -> Option<&ScheduleState> {
        match &self.phase {
            Phase::Running(state) => Some(state),
            _ => None,
        }
    }

    /// Generate one batch and request the next wake-up. The first call
    /// moves the scheduler from Idle to Running.
    pub fn generate_batch(&mut self, sink: &mut impl EventSink) -> Result<BatchReport> {
        let (carried, batches) = match &self.phase {
            Phase::Stopped => return Err(PlayerError::Stopped),
            Phase::Idle => (None, 0),
            Phase::Running(state) => (Some(state.current_seed.clone()), state.batches),
        };
        let start_seed = match carried {
            Some(seed) if self.config.seed_policy == SeedPolicy::Continuous => seed,
            _ => self.initial_seed(),
        };

        let now = sink.now();
        let report = match self.fill_batch(now, start_seed, sink) {
            Ok(report) => report,
            Err(e) => {
                log::error!("batch at {now} ms failed, stopping: {e}");
                self.phase = Phase::Stopped;
                sink.teardown();
                return Err(e);
            }
        };

        self.phase = Phase::Running(ScheduleState {
            current_seed: report.symbols.last().cloned(),
            anchor_time: now,
            batches: batches + 1,
        });
        sink.schedule_wakeup(report.next_wakeup);
        log::debug!(
            "batch {} at {} ms: {} notes, {} rests, next wake-up {} ms",
            batches + 1,
            now,
            report.notes,
            report.rests,
            report.next_wakeup
        );
        Ok(report)
    }

    /// Stop for good and release the sink. Safe to call in any state.
    pub fn stop(&mut self, sink: &mut impl EventSink) {
        if matches!(self.phase, Phase::Stopped) {
            return;
        }
        if let Phase::Running(state) = &self.phase {
            log::info!("stopping after {} batches", state.batches);
        }
        self.phase = Phase::Stopped;
        sink.teardown();
    }

    fn initial_seed(&mut self) -> Option<Symbol> {
        let seed = self.rng.choose(&self.model.initial_seeds).cloned();
        if seed.is_none() {
            log::warn!("model has no initial seeds; starting from a random state");
        }
        seed
    }

    fn fill_batch(
        &mut self,
        now: Timestamp,
        start_seed: Option<Symbol>,
        sink: &mut impl EventSink,
    ) -> Result<BatchReport> {
        let config = &self.config;
        let mut seed = start_seed.clone();
        let mut symbols = Vec::with_capacity(config.batch_size);
        let mut notes = 0;
        let mut rests = 0;

        for i in 0..config.batch_size {
            let next = self.model.table.sample(seed.as_ref(), &mut self.rng)?;
            let slice = next.decode()?;
            let time = now
                .checked_add(config.step_offset_ms(i) + config.lead_time_ms)
                .ok_or(PlayerError::ClockOverflow(now))?;
            if slice.is_rest() {
                rests += 1;
            }
            for &pitch in &slice.pitches {
                sink.schedule_note(NoteEvent {
                    time,
                    channel: config.channel,
                    pitch,
                    duration_ms: config.note_duration_ms,
                    velocity: config.velocity,
                });
                notes += 1;
            }
            symbols.push(next.clone());
            seed = Some(next);
        }

        let next_wakeup = now
            .checked_add(config.batch_span_ms())
            .ok_or(PlayerError::ClockOverflow(now))?;
        Ok(BatchReport {
            anchor: now,
            start_seed,
            symbols,
            notes,
            rests,
            next_wakeup,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ModelError, TransitionTable};
    use crate::learner::PhraseLearner;
    use crate::symbol::SymbolError;

    /// Records what the scheduler asks of it; clock is set by hand.
    #[derive(Default)]
    struct ScriptedSink {
        now: Timestamp,
        notes: Vec<NoteEvent>,
        wakeups: Vec<Timestamp>,
        torn_down: bool,
    }

    impl EventSink for ScriptedSink {
        fn now(&self) -> Timestamp {
            self.now
        }
        fn schedule_note(&mut self, note: NoteEvent) {
            self.notes.push(note);
        }
        fn schedule_wakeup(&mut self, at: Timestamp) {
            self.wakeups.push(at);
        }
        fn teardown(&mut self) {
            self.torn_down = true;
        }
    }

    fn model(phrases: &[&[&str]], tempo_bpm: f64) -> Arc<LearnedModel> {
        let mut learner = PhraseLearner::new();
        for p in phrases {
            let symbols: Vec<Symbol> = p.iter().map(|s| Symbol::from(*s)).collect();
            learner.observe(&symbols);
        }
        Arc::new(learner.finish(tempo_bpm, phrases[0].len()))
    }

    fn config(batch_size: usize) -> PlaybackConfig {
        PlaybackConfig {
            batch_size,
            tempo_bpm: 120.0,
            lead_time_ms: 1_000,
            note_duration_ms: 400,
            channel: 2,
            velocity: 90,
            seed_policy: SeedPolicy::Continuous,
        }
    }

    #[test]
    fn first_batch_schedules_notes_and_wakeup() {
        let m = model(&[&["0,60", "1,60,64", "2"]], 120.0);
        let mut sched = Scheduler::new(m, config(3), ChainRng::new(1)).unwrap();
        let mut sink = ScriptedSink {
            now: 5_000,
            ..Default::default()
        };
        assert_eq!(sched.state(), SchedulerState::Idle);

        let report = sched.generate_batch(&mut sink).unwrap();
        assert_eq!(sched.state(), SchedulerState::Running);

        // Seed "0,60" -> "1,60,64" -> "2" -> "2" (self-loop).
        assert_eq!(report.start_seed, Some(Symbol::from("0,60")));
        let played: Vec<&str> = report.symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(played, vec!["1,60,64", "2", "2"]);
        assert_eq!(report.notes, 2);
        assert_eq!(report.rests, 2);

        assert_eq!(sink.notes.len(), 2);
        for (note, pitch) in sink.notes.iter().zip([60, 64]) {
            assert_eq!(note.time, 5_000 + 1_000);
            assert_eq!(note.pitch, pitch);
            assert_eq!(note.channel, 2);
            assert_eq!(note.velocity, 90);
            assert_eq!(note.duration_ms, 400);
        }
        // 3 steps of 250 ms.
        assert_eq!(sink.wakeups, vec![5_750]);
        assert_eq!(report.next_wakeup, 5_750);

        let state = sched.schedule_state().unwrap();
        assert_eq!(state.current_seed, Some(Symbol::from("2")));
        assert_eq!(state.anchor_time, 5_000);
        assert_eq!(state.batches, 1);
    }

    #[test]
    fn consecutive_batches_continue_the_trajectory() {
        let m = model(
            &[
                &["0,60", "1,62", "2,64", "3,65"],
                &["0,62", "1,", "2,60", "3,62"],
                &["0,64", "1,62", "2,", "3,60"],
            ],
            120.0,
        );
        let cfg = config(4);
        let step = cfg.step_interval_ms() as Timestamp;
        let mut sched = Scheduler::new(m, cfg, ChainRng::new(42)).unwrap();
        let mut sink = ScriptedSink::default();

        let first = sched.generate_batch(&mut sink).unwrap();
        let seed_after_first = sched.schedule_state().unwrap().current_seed.clone();
        assert_eq!(seed_after_first.as_ref(), first.symbols.last());

        sink.now = first.next_wakeup;
        let notes_before = sink.notes.len();
        let second = sched.generate_batch(&mut sink).unwrap();

        assert_eq!(second.start_seed, seed_after_first);
        assert_eq!(second.anchor, first.anchor + 4 * step);
        let first_step_of_second = second.anchor + 1_000;
        assert_eq!(first_step_of_second, first.anchor + 4 * step + 1_000);
        for note in &sink.notes[notes_before..] {
            assert!(note.time >= first_step_of_second);
            assert!(note.time < first_step_of_second + 4 * step);
        }
        assert_eq!(sched.schedule_state().unwrap().batches, 2);
    }

    #[test]
    fn same_seed_same_stream() {
        let m = model(&[&["0,60", "1,62", "2,64"], &["0,64", "1,62", "2,60"]], 100.0);
        let run = |seed: u64| {
            let mut sched = Scheduler::new(m.clone(), config(6), ChainRng::new(seed)).unwrap();
            let mut sink = ScriptedSink::default();
            for _ in 0..5 {
                let r = sched.generate_batch(&mut sink).unwrap();
                sink.now = r.next_wakeup;
            }
            sink.notes
        };
        assert_eq!(run(9), run(9));
    }

    #[test]
    fn restart_policy_redraws_phrase_initial_seed() {
        let m = model(&[&["0,60", "1,62"], &["0,67", "1,65"]], 120.0);
        let cfg = PlaybackConfig {
            seed_policy: SeedPolicy::RestartEachBatch,
            ..config(3)
        };
        let mut sched = Scheduler::new(m.clone(), cfg, ChainRng::new(4)).unwrap();
        let mut sink = ScriptedSink::default();
        for _ in 0..10 {
            let r = sched.generate_batch(&mut sink).unwrap();
            let start = r.start_seed.expect("seed drawn from initial set");
            assert!(m.initial_seeds.contains(&start));
            sink.now = r.next_wakeup;
        }
    }

    #[test]
    fn empty_model_stops_the_scheduler() {
        let m = Arc::new(LearnedModel {
            table: TransitionTable::new(),
            initial_seeds: Vec::new(),
            tempo_bpm: 120.0,
            phrase_length: 4,
        });
        let mut sched = Scheduler::new(m, config(4), ChainRng::new(0)).unwrap();
        let mut sink = ScriptedSink::default();

        let err = sched.generate_batch(&mut sink).unwrap_err();
        assert!(matches!(err, PlayerError::Model(ModelError::Empty)));
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(sink.torn_down);
        assert!(sink.wakeups.is_empty());
        assert!(matches!(sched.generate_batch(&mut sink), Err(PlayerError::Stopped)));
    }

    #[test]
    fn malformed_symbol_stops_the_scheduler() {
        let mut table = TransitionTable::new();
        table.add(Symbol::from("0,60"), Symbol::from("1,sixty"));
        let m = Arc::new(LearnedModel {
            table,
            initial_seeds: vec![Symbol::from("0,60")],
            tempo_bpm: 120.0,
            phrase_length: 2,
        });
        let mut sched = Scheduler::new(m, config(2), ChainRng::new(0)).unwrap();
        let mut sink = ScriptedSink::default();

        let err = sched.generate_batch(&mut sink).unwrap_err();
        assert!(matches!(err, PlayerError::Symbol(SymbolError::Malformed { .. })));
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(sink.torn_down);
    }

    #[test]
    fn stop_is_terminal_and_idempotent() {
        let m = model(&[&["0,60", "1,62"]], 120.0);
        let mut sched = Scheduler::new(m, config(2), ChainRng::new(0)).unwrap();
        let mut sink = ScriptedSink::default();
        sched.generate_batch(&mut sink).unwrap();
        sched.stop(&mut sink);
        sched.stop(&mut sink);
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(sched.schedule_state().is_none());
        assert!(sink.torn_down);
        assert!(matches!(sched.generate_batch(&mut sink), Err(PlayerError::Stopped)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let m = model(&[&["0,60", "1,62"]], 120.0);
        assert!(matches!(
            Scheduler::new(m.clone(), config(0), ChainRng::new(0)),
            Err(PlayerError::Config(_))
        ));
        let glacial = PlaybackConfig {
            tempo_bpm: 1e-300,
            ..config(3)
        };
        assert!(matches!(
            Scheduler::new(m, glacial, ChainRng::new(0)),
            Err(PlayerError::Config(_))
        ));
    }

    #[test]
    fn clock_near_its_end_stops_instead_of_wrapping() {
        let m = model(&[&["0,60", "1,62"]], 120.0);
        let mut sched = Scheduler::new(m, config(2), ChainRng::new(0)).unwrap();
        let mut sink = ScriptedSink {
            now: Timestamp::MAX - 10,
            ..Default::default()
        };

        let err = sched.generate_batch(&mut sink).unwrap_err();
        assert!(matches!(err, PlayerError::ClockOverflow(_)));
        assert_eq!(sched.state(), SchedulerState::Stopped);
        assert!(sink.torn_down);
        assert!(sink.wakeups.is_empty());
    }
}
