//! Output bindings, records and record consumers.
//!
//! A [`Sink`] is the set of output bindings a driver resolves for every row.
//! Each binding maps an output field to a node:
//! - [`Sink::put`]: one value per row
//! - [`Sink::put_each`]: a sequence per row, fanned out into one record per
//!   element
//! - [`Sink::put_nowhere`]: resolved for side effects and discarded
//! - [`Sink::gate`]: a skip reaching it drops the whole row

mod consumer;
mod record;

pub use consumer::{JsonLinesSink, MemorySink, RecordSink};
pub use record::Record;

use crate::adapt::IntoSource;
use crate::error::{PipelineError, PipelineResult};
use crate::node::Node;

/// How the driver treats a binding's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// One value per row, written under the field name.
    Field,
    /// A sequence per row, written one element per record.
    Repeat,
    /// Resolved and discarded.
    Discard,
    /// Resolved and discarded; a skip drops the row.
    Gate,
}

/// A node bound to an output field.
#[derive(Debug, Clone)]
pub struct Binding {
    field: Option<String>,
    node: Node,
    kind: BindingKind,
}

impl Binding {
    /// Output field name, absent for discarded and gating bindings.
    #[inline]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Node resolved for this binding.
    #[inline]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Binding kind.
    #[inline]
    pub fn kind(&self) -> BindingKind {
        self.kind
    }
}

/// The set of output bindings of a pipeline.
///
/// Built once before any row is processed; registration order is the field
/// order of every produced record.
#[derive(Debug, Clone, Default)]
pub struct Sink {
    bindings: Vec<Binding>,
}

impl Sink {
    /// Creates an empty binding set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a one-value-per-row binding for `field`.
    pub fn put(&mut self, field: impl Into<String>) -> Anchor<'_> {
        Anchor::new(self, Some(field.into()), BindingKind::Field)
    }

    /// Starts a repeater binding for `field`.
    ///
    /// The bound node must resolve to an array. All repeaters of a row must
    /// have the same length; the row yields one record per element.
    pub fn put_each(&mut self, field: impl Into<String>) -> Anchor<'_> {
        Anchor::new(self, Some(field.into()), BindingKind::Repeat)
    }

    /// Starts a binding resolved for side effects only.
    pub fn put_nowhere(&mut self) -> Anchor<'_> {
        Anchor::new(self, None, BindingKind::Discard)
    }

    /// Starts a row-gating binding.
    pub fn gate(&mut self) -> Anchor<'_> {
        Anchor::new(self, None, BindingKind::Gate)
    }

    /// Returns the bindings in registration order.
    #[inline]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Iterates over output field names in registration order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().filter_map(Binding::field)
    }

    /// Returns whether any binding fans out.
    pub fn has_repeaters(&self) -> bool {
        self.bindings.iter().any(|b| b.kind == BindingKind::Repeat)
    }

    /// Number of bindings.
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns whether no binding is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Pending binding returned by the [`Sink`] registration methods.
#[must_use = "a binding is only registered once `attach` is called"]
#[derive(Debug)]
pub struct Anchor<'s> {
    sink: &'s mut Sink,
    field: Option<String>,
    kind: BindingKind,
}

impl<'s> Anchor<'s> {
    fn new(sink: &'s mut Sink, field: Option<String>, kind: BindingKind) -> Self {
        Self { sink, field, kind }
    }

    /// Binds `upstream` and registers the binding.
    pub fn attach(self, upstream: impl IntoSource) -> PipelineResult<()> {
        if let Some(field) = &self.field
            && self.sink.fields().any(|existing| existing == field.as_str())
        {
            return Err(PipelineError::usage(format!(
                "output field `{field}` is already bound"
            )));
        }

        self.sink.bindings.push(Binding {
            field: self.field,
            node: upstream.into_source().into_node(),
            kind: self.kind,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ErrorKind;
    use crate::source::Source;

    #[test]
    fn test_registration_order_is_field_order() {
        let mut sink = Sink::new();
        sink.put("b").attach(json!(1)).unwrap();
        sink.put_nowhere().attach(json!(2)).unwrap();
        sink.put_each("a").attach(json!([1])).unwrap();

        assert_eq!(sink.fields().collect::<Vec<_>>(), ["b", "a"]);
        assert_eq!(sink.len(), 3);
        assert!(sink.has_repeaters());
    }

    #[test]
    fn test_duplicate_field_is_usage_error() {
        let mut sink = Sink::new();
        let source = Source::constant(json!({"a": 1}));
        sink.put("a").attach(source.take("a")).unwrap();

        let error = sink.put_each("a").attach(source.take("a")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Usage);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_unnamed_bindings_never_collide() {
        let mut sink = Sink::new();
        sink.put_nowhere().attach(json!(1)).unwrap();
        sink.put_nowhere().attach(json!(2)).unwrap();
        sink.gate().attach(json!(3)).unwrap();

        assert_eq!(sink.fields().count(), 0);
        assert_eq!(sink.bindings()[2].kind(), BindingKind::Gate);
    }
}
