//! Per-row resolution scope.

use std::collections::{HashMap, HashSet};

use super::signal::{Interrupt, Resolution};
use super::token::NodeToken;
use crate::error::{BoxedError, PipelineError, ResolutionError};
use crate::source::{Origin, RowHandle, RowProducer};

/// The origin row a context was opened for.
#[derive(Clone, Copy)]
pub struct ActiveRow<'r> {
    /// 0-based position of the row in the origin's sequence.
    pub ordinal: usize,
    /// Handle produced by the origin for this row.
    pub handle: &'r RowHandle,
    /// Token of the origin source driving the run.
    pub origin: NodeToken,
    /// Producer used to load and fetch from the row.
    pub producer: &'r dyn RowProducer,
}

impl std::fmt::Debug for ActiveRow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRow")
            .field("ordinal", &self.ordinal)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Scope holding the memoized resolutions for one row.
///
/// Created by the driver when a row begins and dropped before the next row
/// is fetched, so nothing cached here outlives its row. Each worker that
/// resolves rows owns its own context.
pub struct RowContext<'r> {
    row: Option<ActiveRow<'r>>,
    cache: HashMap<NodeToken, Resolution>,
    in_flight: HashSet<NodeToken>,
    evaluations: usize,
}

impl<'r> RowContext<'r> {
    /// Opens a context for one row produced by `origin`.
    pub fn new(ordinal: usize, handle: &'r RowHandle, origin: &'r Origin) -> Self {
        Self::with_row(Some(ActiveRow {
            ordinal,
            handle,
            origin: origin.token(),
            producer: origin.producer(),
        }))
    }

    /// Opens a context that is not attached to any origin row.
    ///
    /// Row-independent nodes (constants, computed sources and chains built
    /// on them) resolve normally; anything that needs the row fails with a
    /// usage error.
    pub fn detached() -> Self {
        Self::with_row(None)
    }

    fn with_row(row: Option<ActiveRow<'r>>) -> Self {
        Self {
            row,
            cache: HashMap::new(),
            in_flight: HashSet::new(),
            evaluations: 0,
        }
    }

    /// Returns the row ordinal, if attached to a row.
    #[inline]
    pub fn ordinal(&self) -> Option<usize> {
        self.row.map(|row| row.ordinal)
    }

    /// Returns the active row or a usage error when detached.
    pub fn active_row(&self) -> Result<ActiveRow<'r>, PipelineError> {
        self.row.ok_or_else(|| {
            PipelineError::usage("node requires an origin row but no row is being processed")
        })
    }

    /// Number of node evaluations performed in this context.
    #[inline]
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Number of cached resolutions.
    #[inline]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Returns whether a resolution is cached for the token.
    #[inline]
    pub fn is_cached(&self, token: NodeToken) -> bool {
        self.cache.contains_key(&token)
    }

    /// Builds a failure interrupt for a node in this row.
    pub fn failure(
        &self,
        token: NodeToken,
        label: impl Into<String>,
        source: impl Into<BoxedError>,
    ) -> Interrupt {
        Interrupt::from(PipelineError::from(ResolutionError {
            token,
            label: label.into(),
            ordinal: self.ordinal(),
            source: source.into(),
        }))
    }

    pub(crate) fn cached(&self, token: NodeToken) -> Option<Resolution> {
        self.cache.get(&token).cloned()
    }

    pub(crate) fn store(&mut self, token: NodeToken, resolution: Resolution) {
        self.cache.insert(token, resolution);
    }

    pub(crate) fn enter(&mut self, token: NodeToken, label: &str) -> Result<(), PipelineError> {
        if !self.in_flight.insert(token) {
            return Err(PipelineError::usage(format!(
                "cycle detected while resolving node `{label}` ({token})"
            )));
        }
        self.evaluations += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self, token: NodeToken) {
        self.in_flight.remove(&token);
    }
}

impl std::fmt::Debug for RowContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowContext")
            .field("row", &self.row)
            .field("cached", &self.cache.len())
            .field("evaluations", &self.evaluations)
            .finish()
    }
}
