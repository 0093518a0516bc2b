//! Conversion traits resolved while the graph is being built.
//!
//! Three narrow traits let builder methods accept several argument kinds
//! without runtime type inspection:
//! - [`IntoSource`]: anything that can feed a binding or a collector slot
//! - [`IntoTransform`]: anything that can be attached with `then`
//! - [`IntoRecordSink`]: anything that can consume records

use serde_json::Value;

use crate::collect::Collector;
use crate::error::BoxedError;
use crate::node::Node;
use crate::sink::RecordSink;
use crate::source::Source;
use crate::transform::Transform;

/// Conversion into a [`Source`].
///
/// Plain values become constant sources; nodes and collectors are presented
/// as sources without changing their identity.
pub trait IntoSource {
    /// Performs the conversion.
    fn into_source(self) -> Source;
}

impl IntoSource for Source {
    fn into_source(self) -> Source {
        self
    }
}

impl IntoSource for &Source {
    fn into_source(self) -> Source {
        self.clone()
    }
}

impl IntoSource for Node {
    fn into_source(self) -> Source {
        Source::from_node(self)
    }
}

impl IntoSource for &Node {
    fn into_source(self) -> Source {
        Source::from_node(self.clone())
    }
}

impl IntoSource for Collector {
    fn into_source(self) -> Source {
        Source::from_node(self.node().clone())
    }
}

impl IntoSource for &Collector {
    fn into_source(self) -> Source {
        Source::from_node(self.node().clone())
    }
}

impl IntoSource for Value {
    fn into_source(self) -> Source {
        Source::constant(self)
    }
}

/// Conversion into a [`Transform`].
///
/// Closures are named after their type, which is enough to tell them apart
/// in diagnostics.
pub trait IntoTransform {
    /// Performs the conversion.
    fn into_transform(self) -> Transform;
}

impl IntoTransform for Transform {
    fn into_transform(self) -> Transform {
        self
    }
}

impl<F> IntoTransform for F
where
    F: Fn(Value) -> Result<Value, BoxedError> + Send + Sync + 'static,
{
    fn into_transform(self) -> Transform {
        Transform::new(std::any::type_name::<F>(), self)
    }
}

/// Conversion into a boxed [`RecordSink`].
pub trait IntoRecordSink {
    /// Performs the conversion.
    fn into_record_sink(self) -> Box<dyn RecordSink>;
}

impl<T> IntoRecordSink for T
where
    T: RecordSink + 'static,
{
    fn into_record_sink(self) -> Box<dyn RecordSink> {
        Box::new(self)
    }
}
