//! Statistics and telemetry types
//!
//! The engine never pushes telemetry anywhere. It records
//! [`CommitRecord`]s per thread; an external collector (the power/CPU
//! telemetry job) drains them asynchronously and correlates them with
//! OS-level samples after the fact.

use serde::{Deserialize, Serialize};

/// One committed transaction, as seen by external telemetry.
///
/// Timestamps are nanoseconds since the runtime's epoch (monotonic clock,
/// not wall time). `level` is the number of admitted transactions observed
/// when this one began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Begin of the successful attempt, ns since runtime start.
    pub start_ns: u64,
    /// Commit completion, ns since runtime start.
    pub end_ns: u64,
    /// Concurrency level at begin.
    pub level: usize,
}

impl CommitRecord {
    /// Duration of the committed attempt in nanoseconds.
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let rec = CommitRecord {
            start_ns: 100,
            end_ns: 350,
            level: 3,
        };
        assert_eq!(rec.duration_ns(), 250);
    }

    #[test]
    fn test_duration_saturates() {
        let rec = CommitRecord {
            start_ns: 10,
            end_ns: 5,
            level: 0,
        };
        assert_eq!(rec.duration_ns(), 0);
    }
}
