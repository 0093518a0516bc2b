//! Resolution outcomes other than a value.

use std::sync::Arc;

use serde_json::Value;

use crate::error::PipelineError;

/// Result of resolving a node for one row.
pub type Resolution = Result<Value, Interrupt>;

/// Anything that stops a node from producing a value.
///
/// `Skip` and `Stop` are control outcomes and are never reported as errors.
/// Every variant is cheap to clone so the row cache can hand out copies.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// Intentional omission of the consuming field, or of the whole row when
    /// it reaches a gating binding.
    Skip,
    /// Request to end the run after the current row; the row is not written.
    Stop,
    /// The node failed.
    Error(Arc<PipelineError>),
}

impl Interrupt {
    /// Returns whether this is a skip signal.
    #[inline]
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// Returns whether this is a stop signal.
    #[inline]
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }

    /// Returns the underlying error, if this interrupt is a failure.
    pub fn error(&self) -> Option<&Arc<PipelineError>> {
        match self {
            Self::Error(error) => Some(error),
            Self::Skip | Self::Stop => None,
        }
    }
}

impl From<PipelineError> for Interrupt {
    fn from(error: PipelineError) -> Self {
        Self::Error(Arc::new(error))
    }
}
