//! Trace category bitmask.

use std::fmt;

/// Trace categories and their bits, in display order.
pub const TRACE_BITS: [(&str, u32); 5] = [
    ("flow", 1),
    ("global", 2),
    ("local", 4),
    ("keyword", 8),
    ("slow", 16),
];

/// Which trace categories are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceMask(pub u32);

impl TraceMask {
    /// Nothing traced.
    pub const OFF: TraceMask = TraceMask(0);

    /// Bit for a category word. `off`/`none` are the empty mask.
    pub fn word_bits(word: &str) -> Option<u32> {
        let word = word.to_ascii_lowercase();
        if word == "off" || word == "none" {
            return Some(0);
        }
        TRACE_BITS
            .iter()
            .find(|(name, _)| *name == word)
            .map(|&(_, bit)| bit)
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Names of the enabled categories. Unknown bits are ignored.
    pub fn words(self) -> Vec<&'static str> {
        TRACE_BITS
            .iter()
            .filter(|&&(_, bit)| self.0 & bit != 0)
            .map(|&(name, _)| name)
            .collect()
    }
}

impl fmt::Display for TraceMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = self.words();
        if words.is_empty() {
            f.write_str("off")
        } else {
            f.write_str(&words.join(" "))
        }
    }
}
