//! Pipeline error types.

use std::sync::Arc;

use strum::{AsRefStr, IntoStaticStr};
use thiserror::Error;

use crate::node::NodeToken;

/// Type alias for boxed dynamic errors that can be sent across threads.
///
/// Collaborators (row producers, record sinks, transform functions) report
/// their failures through this type; the pipeline wraps it with the row and
/// node that were being processed.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pipeline operations.
pub type PipelineResult<T, E = PipelineError> = Result<T, E>;

/// Categories of errors that can occur while building or running a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// A node's transform or fetch failed for one row.
    Resolution,
    /// Repeater lengths disagreed or a repeater was not a sequence.
    Arity,
    /// Structural misuse of the graph or the driver.
    Usage,
    /// The origin failed to produce the next row.
    Origin,
    /// The record consumer rejected a write or failed to finalize.
    Consumer,
    /// A row failed and the driver aborted the run.
    Row,
}

/// Failure raised while a node resolves for one row.
#[derive(Debug, Error)]
#[error("node `{label}` ({token}) failed{}: {source}", on_row(.ordinal))]
pub struct ResolutionError {
    /// Identity token of the failing node.
    pub token: NodeToken,
    /// Human-readable description of the failing node.
    pub label: String,
    /// Row ordinal, absent when resolved outside of an origin row.
    pub ordinal: Option<usize>,
    /// Underlying cause reported by the transform or fetch.
    #[source]
    pub source: BoxedError,
}

fn on_row(ordinal: &Option<usize>) -> String {
    ordinal
        .map(|ordinal| format!(" on row {ordinal}"))
        .unwrap_or_default()
}

/// Errors that can occur while building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A node failed to resolve.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Repeater sequences did not line up.
    #[error("arity mismatch{}: {message}", on_row(.ordinal))]
    Arity {
        /// Row ordinal, if the mismatch was detected while processing a row.
        ordinal: Option<usize>,
        /// Error message.
        message: String,
    },

    /// The graph or driver was used incorrectly.
    #[error("invalid pipeline usage: {0}")]
    Usage(String),

    /// The origin failed to produce a row.
    #[error("origin failed to produce row {ordinal}: {source}")]
    Origin {
        /// Ordinal of the row that was being fetched.
        ordinal: usize,
        /// Error reported by the row producer.
        #[source]
        source: BoxedError,
    },

    /// The record consumer failed.
    #[error("record consumer failed: {0}")]
    Consumer(#[source] BoxedError),

    /// A row failed under the abort policy.
    #[error("row {ordinal}, {} failed: {cause}", in_binding(.binding, .field))]
    RowFailed {
        /// Ordinal of the failed row.
        ordinal: usize,
        /// Registration position of the binding that surfaced the failure.
        binding: usize,
        /// Output field of that binding, if it writes one.
        field: Option<String>,
        /// Underlying failure.
        #[source]
        cause: Arc<PipelineError>,
    },
}

fn in_binding(binding: &usize, field: &Option<String>) -> String {
    match field {
        Some(field) => format!("field `{field}`"),
        None => format!("binding #{binding}"),
    }
}

impl PipelineError {
    /// Creates a new usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Creates a new arity error for the given row.
    pub fn arity(ordinal: Option<usize>, message: impl Into<String>) -> Self {
        Self::Arity {
            ordinal,
            message: message.into(),
        }
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Arity { .. } => ErrorKind::Arity,
            Self::Usage(_) => ErrorKind::Usage,
            Self::Origin { .. } => ErrorKind::Origin,
            Self::Consumer(_) => ErrorKind::Consumer,
            Self::RowFailed { .. } => ErrorKind::Row,
        }
    }

    /// Returns the error kind as a string.
    pub fn kind_str(&self) -> &'static str {
        self.kind().into()
    }

    /// Returns the row ordinal this error is attached to, if any.
    pub fn ordinal(&self) -> Option<usize> {
        match self {
            Self::Resolution(error) => error.ordinal,
            Self::Arity { ordinal, .. } => *ordinal,
            Self::Origin { ordinal, .. } | Self::RowFailed { ordinal, .. } => Some(*ordinal),
            Self::Usage(_) | Self::Consumer(_) => None,
        }
    }

    /// Returns whether the error is confined to a single row.
    ///
    /// Row-scoped errors are subject to the driver's failure policy; all
    /// others abort the run.
    pub fn is_row_scoped(&self) -> bool {
        matches!(self.kind(), ErrorKind::Resolution | ErrorKind::Arity)
    }
}
