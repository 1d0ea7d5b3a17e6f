use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open range `(low, high]` of raw record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    low: i64,
    high: i64,
}

impl IdRange {
    pub const fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    /// Exclusive lower bound: the last id already processed.
    pub fn low(&self) -> i64 {
        self.low
    }

    /// Inclusive upper bound.
    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    pub fn contains(&self, id: i64) -> bool {
        id > self.low && id <= self.high
    }

    /// Number of ids covered by the range (not the number of rows in it).
    pub fn span(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.high.abs_diff(self.low)
        }
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.low, self.high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_when_high_not_above_low() {
        assert!(IdRange::new(5, 5).is_empty());
        assert!(IdRange::new(5, 3).is_empty());
        assert!(!IdRange::new(0, 1).is_empty());
        assert_eq!(IdRange::new(5, 3).span(), 0);
    }

    #[test]
    fn test_contains_is_half_open() {
        let range = IdRange::new(3, 6);
        assert!(!range.contains(3));
        assert!(range.contains(4));
        assert!(range.contains(6));
        assert!(!range.contains(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(IdRange::new(1, 9).to_string(), "(1, 9]");
    }
}
