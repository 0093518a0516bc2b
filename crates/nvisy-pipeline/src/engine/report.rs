//! Run identifiers and reports.

use std::str::FromStr;
use std::sync::Arc;

use derive_more::{Debug, Display, From, Into};
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Unique identifier of one driver run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Debug, Display, From, Into)]
#[debug("{_0}")]
#[display("{_0}")]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new time-ordered run ID.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[inline]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// A row that failed under the continue policy.
#[derive(Debug, Clone)]
pub struct RowFailure {
    /// Ordinal of the failed row.
    pub ordinal: usize,
    /// Registration position of the binding that surfaced the failure.
    pub binding: usize,
    /// Output field of that binding, if it writes one.
    pub field: Option<String>,
    /// Label of the node bound there.
    pub node: String,
    /// Underlying failure.
    pub cause: Arc<PipelineError>,
}

impl RowFailure {
    /// Converts the failure into the error returned when the run aborts.
    pub fn into_error(self) -> PipelineError {
        PipelineError::RowFailed {
            ordinal: self.ordinal,
            binding: self.binding,
            field: self.field,
            cause: self.cause,
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Rows pulled from the origin.
    pub rows_read: usize,
    /// Records handed to the consumer.
    pub records_written: usize,
    /// Rows dropped by a gating binding.
    pub rows_skipped: usize,
    /// Rows that failed and were skipped.
    pub failures: Vec<RowFailure>,
    /// Whether a stop signal ended the run.
    pub stopped: bool,
    /// Whether cancellation ended the run.
    pub cancelled: bool,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub finished_at: Timestamp,
}

impl RunReport {
    pub(crate) fn start(run_id: RunId) -> Self {
        let now = Timestamp::now();
        Self {
            run_id,
            rows_read: 0,
            records_written: 0,
            rows_skipped: 0,
            failures: Vec::new(),
            stopped: false,
            cancelled: false,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Timestamp::now();
    }

    /// Wall-clock duration of the run.
    pub fn duration(&self) -> SignedDuration {
        self.finished_at.duration_since(self.started_at)
    }

    /// Returns whether every row was processed without failure.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
