//! Convenient re-exports for building pipelines.

pub use crate::adapt::{IntoRecordSink, IntoSource, IntoTransform};
pub use crate::collect::Collector;
pub use crate::engine::{
    Driver, DriverConfig, DriverConfigBuilder, FailurePolicy, Pipeline, RunReport,
};
pub use crate::error::{BoxedError, PipelineError, PipelineResult};
pub use crate::node::{Node, RowContext};
pub use crate::sink::{JsonLinesSink, MemorySink, Record, RecordSink, Sink};
pub use crate::source::{IterSource, KeyedSource, Origin, RowProducer, Source};
pub use crate::transform::{Flow, OnFail, Transform, builtin};
