// Symbols: the tokens the Markov chain walks over.
//
// A symbol encodes one quantized time slice as `<position>(,<pitch>)*`, where
// `position` is the slice's index within its phrase and each pitch is a MIDI
// key number. A slice with no pitches is a rest. Quantization writes rests
// with a trailing delimiter (`"3,"`), but the bare form (`"3"`) decodes the
// same way because empty pitch fields are skipped.
//
// Symbols compare by their encoded string. `"1,60,64"` and `"1,64,60"` are
// different symbols even though they sound the same; the chain only learns
// what it was shown.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Field separator inside an encoded symbol.
pub const DELIMITER: char = ',';

/// Highest MIDI key number a pitch field may carry.
pub const MAX_PITCH: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("malformed symbol {symbol:?}: {reason}")]
    Malformed { symbol: String, reason: String },
}

/// An encoded time slice. Cheap to compare and hash; cloned freely.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

/// The content of a symbol once its fields are parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub position: usize,
    /// Empty for a rest.
    pub pitches: Vec<u8>,
}

impl Slice {
    pub fn is_rest(&self) -> bool {
        self.pitches.is_empty()
    }
}

impl Symbol {
    /// Wrap an encoded string without checking it. Malformed strings are
    /// caught when the symbol is decoded for playback.
    pub fn new(encoded: impl Into<String>) -> Self {
        Symbol(encoded.into())
    }

    /// Encode a slice the way quantization does: position, then each pitch,
    /// with a trailing delimiter when there are no pitches.
    pub fn from_slice(position: usize, pitches: &[u8]) -> Self {
        let mut encoded = position.to_string();
        encoded.push(DELIMITER);
        let joined = pitches
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        encoded.push_str(&joined);
        Symbol(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the fields. The leading field is the position; every other
    /// non-empty field must be a pitch in `0..=127`.
    pub fn decode(&self) -> Result<Slice, SymbolError> {
        let mut fields = self.0.split(DELIMITER);
        let head = fields.next().unwrap_or_default();
        let position = head
            .trim()
            .parse::<usize>()
            .map_err(|_| self.malformed(format!("position field {head:?} is not an index")))?;

        let mut pitches = Vec::new();
        for field in fields {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let pitch = field
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= MAX_PITCH)
                .ok_or_else(|| self.malformed(format!("pitch field {field:?} is not 0..=127")))?;
            pitches.push(pitch);
        }

        Ok(Slice { position, pitches })
    }

    fn malformed(&self, reason: String) -> SymbolError {
        SymbolError::Malformed {
            symbol: self.0.clone(),
            reason,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
