//! Connection intervals in epoch seconds.

use serde::{Deserialize, Serialize};

/// A connection interval `[start, end)` in epoch seconds.
///
/// No ordering is enforced between `start` and `end`: a malformed upstream
/// record yields a zero or negative length rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Length in seconds. Negative for malformed intervals.
    pub const fn seconds(&self) -> i64 {
        self.end - self.start
    }

    /// Intersects with a bounded window, treating `end == 0` as still open.
    ///
    /// The start is raised to `window_start`; an open end, or one past
    /// `window_end`, becomes `window_end`.
    pub fn clamp_to(self, window_start: i64, window_end: i64) -> Self {
        let start = self.start.max(window_start);
        let end = if self.end == 0 || self.end > window_end {
            window_end
        } else {
            self.end
        };
        Self { start, end }
    }
}

/// Total seconds covered by the union of `intervals`.
///
/// Overlapping and adjacent intervals are merged before summing, so time
/// reported by two connections of the same listener is counted once.
pub fn union_seconds(intervals: &[Interval]) -> i64 {
    let mut sorted = intervals.to_vec();
    sorted.sort_by_key(|i| i.start);

    let mut merged: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        if let Some(last) = merged.last_mut() {
            if interval.start <= last.end {
                last.end = last.end.max(interval.end);
                continue;
            }
        }
        merged.push(interval);
    }

    merged.iter().map(Interval::seconds).sum()
}
