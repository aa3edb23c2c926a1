// Phrase learning: phrases of symbols -> transition table + seed set.
//
// Every adjacent pair inside a phrase becomes one observation in the
// transition table. The last symbol of each phrase also gets a self-loop, so
// any symbol that ends a phrase still has a successor and the weighted
// sampling path never meets a row with nothing in it. Phrase-initial symbols
// are collected as the seeds a new trajectory may start from.
//
// The result, `LearnedModel`, is what playback consumes. It is saved and
// loaded as JSON: the table in row form (order preserved, see chain.rs), the
// seed list, and the tempo and phrase length the performance was quantized at.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chain::{Snapshot, TransitionTable};
use crate::error::Result;
use crate::quantize::{Performance, QuantizedPerformance, quantize};
use crate::symbol::Symbol;

/// Accumulates phrases into a table and a seed set.
#[derive(Debug, Default)]
pub struct PhraseLearner {
    table: TransitionTable,
    initial_seeds: Vec<Symbol>,
    phrases_seen: usize,
}

impl PhraseLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one phrase. An empty phrase contributes nothing.
    pub fn observe(&mut self, phrase: &[Symbol]) {
        let (Some(first), Some(last)) = (phrase.first(), phrase.last()) else {
            return;
        };
        if !self.initial_seeds.contains(first) {
            self.initial_seeds.push(first.clone());
        }
        for pair in phrase.windows(2) {
            self.table.add(pair[0].clone(), pair[1].clone());
        }
        // Terminal self-loop: the phrase's last symbol always has a successor.
        self.table.add(last.clone(), last.clone());
        self.phrases_seen += 1;
    }

    pub fn phrases_seen(&self) -> usize {
        self.phrases_seen
    }

    pub fn finish(self, tempo_bpm: f64, phrase_length: usize) -> LearnedModel {
        log::info!(
            "learned {} phrases: {} states, {} transitions, {} initial seeds",
            self.phrases_seen,
            self.table.len(),
            self.table.transition_count(),
            self.initial_seeds.len()
        );
        LearnedModel {
            table: self.table,
            initial_seeds: self.initial_seeds,
            tempo_bpm,
            phrase_length,
        }
    }
}

/// Learn a model from a quantized performance.
pub fn learn(performance: &QuantizedPerformance) -> LearnedModel {
    let mut learner = PhraseLearner::new();
    for phrase in &performance.phrases {
        learner.observe(phrase);
    }
    learner.finish(performance.tempo_bpm, performance.phrase_length)
}

/// Load a saved model, or quantize and learn a performance file. Performance
/// files are told apart by their `header` object.
pub fn load_or_learn(path: &Path, track: usize) -> Result<LearnedModel> {
    let data = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&data)?;
    if value.get("header").is_some() {
        let perf: Performance = serde_json::from_value(value)?;
        if let Some(name) = &perf.header.name {
            log::info!("performance: {name}");
        }
        let quantized = quantize(&perf, track)?;
        Ok(learn(&quantized))
    } else {
        Ok(serde_json::from_value(value)?)
    }
}

/// A trained chain and everything playback needs to start from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedModel {
    pub table: TransitionTable,
    /// Phrase-initial symbols, deduplicated, in first-seen order.
    pub initial_seeds: Vec<Symbol>,
    pub tempo_bpm: f64,
    pub phrase_length: usize,
}

impl LearnedModel {
    /// Rebuild from a count snapshot, replaying each count into a fresh table.
    pub fn from_snapshot(
        snapshot: &Snapshot,
        initial_seeds: Vec<Symbol>,
        tempo_bpm: f64,
        phrase_length: usize,
    ) -> Self {
        LearnedModel {
            table: TransitionTable::from_snapshot(snapshot),
            initial_seeds,
            tempo_bpm,
            phrase_length,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let model: LearnedModel = serde_json::from_str(&data)?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use endless_prng::ChainRng;

    fn phrase(symbols: &[&str]) -> Vec<Symbol> {
        symbols.iter().map(|s| Symbol::from(*s)).collect()
    }

    #[test]
    fn single_phrase_transitions() {
        let mut learner = PhraseLearner::new();
        learner.observe(&phrase(&["0,60", "1,60,64", "2"]));
        let model = learner.finish(120.0, 3);

        let snap = model.table.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[&Symbol::from("0,60")][&Symbol::from("1,60,64")], 1);
        assert_eq!(snap[&Symbol::from("1,60,64")][&Symbol::from("2")], 1);
        assert_eq!(snap[&Symbol::from("2")][&Symbol::from("2")], 1);
        assert_eq!(snap[&Symbol::from("0,60")].len(), 1);
        assert_eq!(model.initial_seeds, phrase(&["0,60"]));

        let mut rng = ChainRng::new(1);
        for _ in 0..100 {
            let next = model.table.sample(Some(&Symbol::from("0,60")), &mut rng).unwrap();
            assert_eq!(next.as_str(), "1,60,64");
            let next = model.table.sample(Some(&Symbol::from("2")), &mut rng).unwrap();
            assert_eq!(next.as_str(), "2");
        }
    }

    #[test]
    fn every_learned_symbol_has_a_successor() {
        let phrases = [
            phrase(&["0,60", "1,62", "2,64", "3,"]),
            phrase(&["0,60", "1,", "2,64", "3,67"]),
            phrase(&["0,55", "1,62", "2,", "3,67"]),
        ];
        let mut learner = PhraseLearner::new();
        for p in &phrases {
            learner.observe(p);
        }
        let model = learner.finish(100.0, 4);

        let mut rng = ChainRng::new(8);
        for p in &phrases {
            for s in p {
                let successors = model.table.successors(s).expect("learned symbol has a row");
                for _ in 0..20 {
                    let next = model.table.sample(Some(s), &mut rng).unwrap();
                    assert!(successors.iter().any(|t| t.to == next));
                }
            }
        }
        assert_eq!(model.initial_seeds, phrase(&["0,60", "0,55"]));
    }

    #[test]
    fn repeated_phrase_doubles_counts() {
        let p = phrase(&["0,60", "1,62"]);
        let mut learner = PhraseLearner::new();
        learner.observe(&p);
        learner.observe(&p);
        assert_eq!(learner.phrases_seen(), 2);
        let model = learner.finish(120.0, 2);
        assert_eq!(model.table.total(&Symbol::from("0,60")), Some(2));
        assert_eq!(model.table.total(&Symbol::from("1,62")), Some(2));
        assert_eq!(model.initial_seeds.len(), 1);
    }

    #[test]
    fn empty_and_single_symbol_phrases() {
        let mut learner = PhraseLearner::new();
        learner.observe(&[]);
        assert_eq!(learner.phrases_seen(), 0);
        learner.observe(&phrase(&["0,"]));
        let model = learner.finish(120.0, 1);
        assert_eq!(model.table.len(), 1);
        assert_eq!(model.table.successors(&Symbol::from("0,")).unwrap()[0].count, 1);
        assert_eq!(model.initial_seeds, phrase(&["0,"]));
    }

    #[test]
    fn learn_from_quantized_performance() {
        let q = QuantizedPerformance {
            tempo_bpm: 96.0,
            phrase_length: 2,
            phrases: vec![phrase(&["0,60", "1,"]), phrase(&["0,62", "1,"])],
        };
        let model = learn(&q);
        assert_eq!(model.tempo_bpm, 96.0);
        assert_eq!(model.phrase_length, 2);
        assert_eq!(model.table.total(&Symbol::from("1,")), Some(2));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let mut learner = PhraseLearner::new();
        learner.observe(&phrase(&["0,60", "1,62", "2,"]));
        learner.observe(&phrase(&["0,64", "1,62", "2,60"]));
        let model = learner.finish(110.0, 3);

        let path = std::env::temp_dir().join(format!("endless_model_{}.json", std::process::id()));
        model.save(&path).unwrap();
        let loaded = LearnedModel::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.table.rows(), model.table.rows());
        assert_eq!(loaded.initial_seeds, model.initial_seeds);
        assert_eq!(loaded.tempo_bpm, 110.0);
        assert_eq!(loaded.phrase_length, 3);
    }

    #[test]
    fn load_or_learn_accepts_both_file_kinds() {
        let dir = std::env::temp_dir();
        let perf_path = dir.join(format!("endless_perf_{}.json", std::process::id()));
        let model_path = dir.join(format!("endless_saved_{}.json", std::process::id()));

        let perf = r#"{
            "header": { "bpm": 120 },
            "duration": 1.0,
            "phraseLength": 2,
            "tracks": [ {}, { "notes": [ { "midi": 60, "time": 0.0 }, { "midi": 62, "time": 0.5 } ] } ]
        }"#;
        std::fs::write(&perf_path, perf).unwrap();
        let learned = load_or_learn(&perf_path, 1).unwrap();
        assert_eq!(learned.initial_seeds, phrase(&["0,60", "0,62"]));
        assert_eq!(learned.phrase_length, 2);

        learned.save(&model_path).unwrap();
        let reloaded = load_or_learn(&model_path, 1).unwrap();
        assert_eq!(reloaded.table.rows(), learned.table.rows());

        let _ = std::fs::remove_file(&perf_path);
        let _ = std::fs::remove_file(&model_path);
    }

    #[test]
    fn snapshot_rebuild_matches() {
        let mut learner = PhraseLearner::new();
        learner.observe(&phrase(&["0,60", "1,62", "2,"]));
        let model = learner.finish(120.0, 3);
        let rebuilt = LearnedModel::from_snapshot(
            &model.table.snapshot(),
            model.initial_seeds.clone(),
            model.tempo_bpm,
            model.phrase_length,
        );
        assert_eq!(rebuilt.table.snapshot(), model.table.snapshot());
    }
}
