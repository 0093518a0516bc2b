//! Pipeline assembly.

use crate::adapt::IntoRecordSink;
use crate::error::{PipelineError, PipelineResult};
use crate::sink::{RecordSink, Sink};
use crate::source::Origin;

/// An origin, its output bindings and the record consumer.
///
/// Each pipeline owns exactly one binding set and one consumer; attaching a
/// second of either is a usage error.
pub struct Pipeline {
    origin: Origin,
    sink: Option<Sink>,
    consumer: Option<Box<dyn RecordSink>>,
}

impl Pipeline {
    /// Creates a pipeline driven by `origin`.
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            sink: None,
            consumer: None,
        }
    }

    /// Returns the origin.
    #[inline]
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Returns the attached binding set.
    #[inline]
    pub fn sink(&self) -> Option<&Sink> {
        self.sink.as_ref()
    }

    /// Returns whether a record consumer is attached.
    #[inline]
    pub fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    /// Attaches the binding set.
    pub fn attach_sink(&mut self, sink: Sink) -> PipelineResult<()> {
        if self.sink.is_some() {
            return Err(PipelineError::usage("pipeline already has a sink"));
        }
        self.sink = Some(sink);
        Ok(())
    }

    /// Attaches the record consumer.
    pub fn attach_consumer(&mut self, consumer: impl IntoRecordSink) -> PipelineResult<()> {
        if self.consumer.is_some() {
            return Err(PipelineError::usage("pipeline already has a record consumer"));
        }
        self.consumer = Some(consumer.into_record_sink());
        Ok(())
    }

    /// Builder form of [`attach_sink`](Self::attach_sink).
    pub fn with_sink(mut self, sink: Sink) -> PipelineResult<Self> {
        self.attach_sink(sink)?;
        Ok(self)
    }

    /// Builder form of [`attach_consumer`](Self::attach_consumer).
    pub fn with_consumer(mut self, consumer: impl IntoRecordSink) -> PipelineResult<Self> {
        self.attach_consumer(consumer)?;
        Ok(self)
    }

    pub(crate) fn into_parts(self) -> PipelineResult<(Origin, Sink, Box<dyn RecordSink>)> {
        let sink = self
            .sink
            .ok_or_else(|| PipelineError::usage("pipeline has no sink attached"))?;
        let consumer = self
            .consumer
            .ok_or_else(|| PipelineError::usage("pipeline has no record consumer attached"))?;
        Ok((self.origin, sink, consumer))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("origin", &self.origin)
            .field("sink", &self.sink)
            .field("consumer", &self.consumer.is_some())
            .finish()
    }
}
