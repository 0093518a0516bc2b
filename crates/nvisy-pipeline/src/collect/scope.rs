//! Staged collector registration.

use super::{Collector, Slot};
use crate::adapt::IntoSource;
use crate::error::PipelineResult;

/// Open registration scope of a [`Collector`].
///
/// Slots registered here are staged and become visible only when the scope
/// is closed. Dropping the scope on any other path discards them and leaves
/// the collector open.
#[must_use = "dropping the scope without calling `close` discards its slots"]
pub struct CollectorScope<'c> {
    collector: &'c Collector,
    staged: Vec<Slot>,
    finished: bool,
}

impl<'c> CollectorScope<'c> {
    pub(super) fn new(collector: &'c Collector) -> Self {
        Self {
            collector,
            staged: Vec::new(),
            finished: false,
        }
    }

    /// Number of staged slots.
    #[inline]
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    /// Stages the next positional slot.
    pub fn push(&mut self, upstream: impl IntoSource) -> PipelineResult<()> {
        let slot = self.collector.prepare(None, upstream, false)?;
        self.staged.push(slot);
        Ok(())
    }

    /// Stages the next positional slot, yielding `null` on failure or skip.
    pub fn push_optional(&mut self, upstream: impl IntoSource) -> PipelineResult<()> {
        let slot = self.collector.prepare(None, upstream, true)?;
        self.staged.push(slot);
        Ok(())
    }

    /// Stages a named slot.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        upstream: impl IntoSource,
    ) -> PipelineResult<()> {
        let slot = self.collector.prepare(Some(name.into()), upstream, false)?;
        self.staged.push(slot);
        Ok(())
    }

    /// Stages a named slot, yielding `null` on failure or skip.
    pub fn insert_optional(
        &mut self,
        name: impl Into<String>,
        upstream: impl IntoSource,
    ) -> PipelineResult<()> {
        let slot = self.collector.prepare(Some(name.into()), upstream, true)?;
        self.staged.push(slot);
        Ok(())
    }

    /// Commits the staged slots and closes the collector.
    pub fn close(mut self) -> PipelineResult<()> {
        self.finished = true;
        let staged = std::mem::take(&mut self.staged);
        self.collector.finish_scope(staged)
    }
}

impl Drop for CollectorScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.collector.abandon_scope(self.staged.len());
        }
    }
}

impl std::fmt::Debug for CollectorScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorScope")
            .field("collector", &self.collector.token())
            .field("staged", &self.staged.len())
            .finish()
    }
}
