use crate::codec::{Codec, DecodeMode, REPLACEMENT};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Heuristic for "this decode looks like real text".
///
/// A strict decode is plausible when enough characters of the target script appear early on.
/// A lossy decode is plausible when at least a given share of its characters survived intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlausibilityPolicy {
    pub window: usize,
    pub min_script_chars: usize,
    pub min_valid_ratio: f32,
    pub script: RangeInclusive<char>,
}

impl Default for PlausibilityPolicy {
    fn default() -> Self {
        Self {
            window: 100,
            min_script_chars: 5,
            min_valid_ratio: 0.5,
            script: '\u{4E00}'..='\u{9FFF}',
        }
    }
}

/// How a fallback codec turned out to be readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readable {
    Strict,
    Lossy,
}

impl PlausibilityPolicy {
    pub fn strict_plausible(&self, text: &str) -> bool {
        text.chars()
            .take(self.window)
            .filter(|c| self.script.contains(c))
            .count()
            >= self.min_script_chars
    }

    pub fn lossy_plausible(&self, text: &str) -> bool {
        let total = text.chars().count();
        if total == 0 {
            return false;
        }
        let valid = text.chars().filter(|&c| c != REPLACEMENT).count();
        valid as f32 / total as f32 >= self.min_valid_ratio
    }

    /// Decode `sample` strictly, falling back to a lossy decode only when the strict one fails.
    pub fn probe(&self, codec: Codec, sample: &[u8]) -> Option<Readable> {
        match codec.decode(sample, DecodeMode::Strict, false) {
            Ok(text) => self.strict_plausible(&text).then_some(Readable::Strict),
            Err(_) => codec
                .decode(sample, DecodeMode::Replace, false)
                .ok()
                .filter(|text| self.lossy_plausible(text))
                .map(|_| Readable::Lossy),
        }
    }
}
