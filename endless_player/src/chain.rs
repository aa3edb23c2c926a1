// First-order Markov chain over symbols.
//
// `TransitionTable` records how often each symbol was followed by each other
// symbol during learning and samples successors in proportion to those
// counts. It is built once by learner.rs and is read-only for the whole of
// playback, where scheduler.rs shares it behind an `Arc`.
//
// Layout: one `Row` per `from` symbol, kept in first-seen order, each holding
// its successors in first-seen order plus a cached total. An `FxHashMap`
// indexes rows by symbol. Insertion order matters: the weighted walk resolves
// boundary ties by order, and the uniform fallback indexes rows by position,
// so a fixed PRNG seed replays the same choices only if order is stable
// (including across a save/load through serde).
//
// Two sampling paths:
// - Known seed: draw `r` uniformly from `[0, total]` (inclusive) and walk the
//   successors subtracting counts until `r` drops to zero or below.
// - No seed, or a seed the chain never saw: pick a row uniformly, then one of
//   its successors uniformly, ignoring counts. This asymmetry is deliberate
//   and kept as-is; see DESIGN.md.

use endless_prng::ChainRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

use crate::symbol::Symbol;

/// Counts keyed by `from` then `to`, as returned by `snapshot()`.
pub type Snapshot = BTreeMap<Symbol, BTreeMap<Symbol, u32>>;

/// Column width used by `render_matrix`.
const MATRIX_COLUMN_WIDTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("transition table is empty; nothing to sample")]
    Empty,
    /// A row with no successors. Rows are only created by `add`, so this
    /// indicates a corrupted table rather than a learning outcome.
    #[error("symbol {0} has no successors")]
    DeadEnd(Symbol),
}

/// One observed `from -> to` edge and how many times it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub to: Symbol,
    pub count: u32,
}

/// All successors of one `from` symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub from: Symbol,
    pub successors: Vec<Transition>,
    /// Sum of `successors[..].count`; rebuilt on deserialize.
    #[serde(skip)]
    total: u64,
}

impl Row {
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Row>", into = "Vec<Row>")]
pub struct TransitionTable {
    rows: Vec<Row>,
    index: FxHashMap<Symbol, usize>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of `from` followed by `to`.
    pub fn add(&mut self, from: Symbol, to: Symbol) {
        self.add_count(from, to, 1);
    }

    /// Record `count` observations at once. Equivalent to calling `add`
    /// `count` times; a zero count records nothing and creates no row.
    pub fn add_count(&mut self, from: Symbol, to: Symbol, count: u32) {
        if count == 0 {
            return;
        }
        let row_idx = match self.index.get(&from) {
            Some(&idx) => idx,
            None => {
                let idx = self.rows.len();
                self.index.insert(from.clone(), idx);
                self.rows.push(Row {
                    from,
                    successors: Vec::new(),
                    total: 0,
                });
                idx
            }
        };
        let row = &mut self.rows[row_idx];
        match row.successors.iter_mut().find(|t| t.to == to) {
            Some(t) => t.count += count,
            None => row.successors.push(Transition { to, count }),
        }
        row.total += u64::from(count);
    }

    /// Draw the symbol that follows `seed`.
    ///
    /// Known seeds use the count-weighted walk. `None` and unseen seeds fall
    /// back to a uniform pick of row, then a uniform pick of successor.
    pub fn sample(&self, seed: Option<&Symbol>, rng: &mut ChainRng) -> Result<Symbol, ModelError> {
        let Some(row) = seed.and_then(|s| self.row(s)) else {
            if let Some(s) = seed {
                log::debug!("seed {s} not in chain; restarting from a random state");
            }
            return self.sample_uniform(rng);
        };

        let r = rng.range_u64_inclusive(0, row.total);
        pick_weighted(&row.successors, r)
            .cloned()
            .ok_or_else(|| ModelError::DeadEnd(row.from.clone()))
    }

    fn sample_uniform(&self, rng: &mut ChainRng) -> Result<Symbol, ModelError> {
        let row = rng.choose(&self.rows).ok_or(ModelError::Empty)?;
        rng.choose(&row.successors)
            .map(|t| t.to.clone())
            .ok_or_else(|| ModelError::DeadEnd(row.from.clone()))
    }

    pub fn row(&self, from: &Symbol) -> Option<&Row> {
        self.index.get(from).map(|&idx| &self.rows[idx])
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn successors(&self, from: &Symbol) -> Option<&[Transition]> {
        self.row(from).map(|r| r.successors.as_slice())
    }

    pub fn total(&self, from: &Symbol) -> Option<u64> {
        self.row(from).map(Row::total)
    }

    pub fn contains(&self, from: &Symbol) -> bool {
        self.index.contains_key(from)
    }

    /// Number of distinct `from` symbols.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of observations across all rows.
    pub fn transition_count(&self) -> u64 {
        self.rows.iter().map(Row::total).sum()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.rows
            .iter()
            .map(|row| {
                let succ = row
                    .successors
                    .iter()
                    .map(|t| (t.to.clone(), t.count))
                    .collect();
                (row.from.clone(), succ)
            })
            .collect()
    }

    /// Rebuild a table by replaying every count in a snapshot. Row and
    /// successor order follow the snapshot's sorted key order.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut table = Self::new();
        for (from, successors) in snapshot {
            for (to, &count) in successors {
                table.add_count(from.clone(), to.clone(), count);
            }
        }
        table
    }

    /// Fixed-width text grid of counts: one line per `from` symbol, one
    /// column per successor symbol (first `limit` distinct successors in
    /// first-seen order).
    pub fn render_matrix(&self, limit: usize) -> String {
        let mut columns: Vec<&Symbol> = Vec::new();
        for row in &self.rows {
            for t in &row.successors {
                if !columns.contains(&&t.to) {
                    columns.push(&t.to);
                }
            }
        }
        columns.truncate(limit);

        let w = MATRIX_COLUMN_WIDTH;
        let mut out = format!("{:<w$}", "");
        for col in &columns {
            let _ = write!(out, "{:<w$}", col.as_str());
        }
        out.push('\n');
        for row in &self.rows {
            let _ = write!(out, "{:<w$}", row.from.as_str());
            for col in &columns {
                let count = row
                    .successors
                    .iter()
                    .find(|t| &t.to == *col)
                    .map_or(0, |t| t.count);
                let _ = write!(out, "{count:<w$}");
            }
            out.push('\n');
        }
        out
    }
}

/// Walk `successors` in order, subtracting each count from `r`, and return
/// the first one at which the running value reaches zero or below.
///
/// `r` is expected in `[0, total]`. Values past the total fall off the end
/// and yield `None`.
fn pick_weighted(successors: &[Transition], mut r: u64) -> Option<&Symbol> {
    for t in successors {
        let count = u64::from(t.count);
        if r <= count {
            return Some(&t.to);
        }
        r -= count;
    }
    None
}

impl From<Vec<Row>> for TransitionTable {
    fn from(rows: Vec<Row>) -> Self {
        let mut table = Self::new();
        for row in rows {
            for t in row.successors {
                table.add_count(row.from.clone(), t.to, t.count);
            }
        }
        table
    }
}

impl From<TransitionTable> for Vec<Row> {
    fn from(table: TransitionTable) -> Self {
        table.rows
    }
}
