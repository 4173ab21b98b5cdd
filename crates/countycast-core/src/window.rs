//! Half-open date windows and dataset splits.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// A `[start, end)` span of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Create a window; `start` must be strictly before `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> PipelineResult<Self> {
        if start >= end {
            return Err(PipelineError::Config(format!(
                "empty date window {start}..{end}: start must precede end"
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of days in the window.
    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days().max(0) as usize
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Zero-based position of `date` inside the window.
    pub fn offset_of(&self, date: NaiveDate) -> Option<usize> {
        self.contains(date)
            .then(|| (date - self.start).num_days() as usize)
    }

    /// Date at `offset` days after the window start.
    pub fn day(&self, offset: usize) -> NaiveDate {
        self.start + Duration::days(offset as i64)
    }

    /// Iterate over every day in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        self.start.iter_days().take(self.num_days())
    }

    /// True when the two windows share at least one day.
    pub fn overlaps(&self, other: &DateWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Role a window plays in an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitKind {
    Train,
    Val,
    Test,
}

impl SplitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitKind::Train => "train",
            SplitKind::Val => "val",
            SplitKind::Test => "test",
        }
    }

    /// Only the train split owns its normalization statistics.
    pub fn owns_normalization(&self) -> bool {
        matches!(self, SplitKind::Train)
    }
}

/// A contiguous window tagged with its split role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSplit {
    pub kind: SplitKind,
    pub window: DateWindow,
}
