//! Replication timestamps.

use std::fmt;

/// A replication timestamp: seconds since the epoch plus an ordinal that
/// orders operations within the same second.
///
/// Ordering is lexicographic on `(secs, inc)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Seconds since the Unix epoch.
    pub secs: u32,
    /// Increment within the second.
    pub inc: u32,
}

impl Timestamp {
    /// Creates a timestamp.
    #[must_use]
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    /// Returns true for the all-zero timestamp.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.secs == 0 && self.inc == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.secs, self.inc)
    }
}

impl From<(u32, u32)> for Timestamp {
    fn from((secs, inc): (u32, u32)) -> Self {
        Self::new(secs, inc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_secs_then_inc() {
        assert!(Timestamp::new(90, 0) < Timestamp::new(100, 2));
        assert!(Timestamp::new(100, 1) < Timestamp::new(100, 2));
        assert!(Timestamp::new(101, 0) > Timestamp::new(100, 2));
    }

    #[test]
    fn display() {
        assert_eq!(Timestamp::new(100, 2).to_string(), "100:2");
        assert!(Timestamp::default().is_null());
    }
}
