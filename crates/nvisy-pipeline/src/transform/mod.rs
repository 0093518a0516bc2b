//! Transform functions and the chain nodes that apply them.
//!
//! This module provides:
//! - [`Transform`]: A named single-input, single-output function
//! - [`Flow`]: What a transform hands downstream (value, skip or stop)
//! - [`Chain`]: The node applying a transform to its upstream value
//! - [`Guard`], [`OnFail`]: Failure handling attached to a node
//! - [`builtin`]: Small item transforms

pub mod builtin;
mod guard;

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;

pub use guard::{Guard, OnFail};

use crate::error::BoxedError;
use crate::node::{Interrupt, Node, NodeToken, Resolution, Resolve, RowContext, next_serial};

/// Tracing target for transform application.
const TRACING_TARGET: &str = "nvisy_pipeline::transform";

/// Output of a transform for one value.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Hand the value downstream.
    Emit(Value),
    /// Intentionally omit the consuming field (or row, at a gate).
    Skip,
    /// End the run after the current row.
    Stop,
}

impl From<Value> for Flow {
    fn from(value: Value) -> Self {
        Self::Emit(value)
    }
}

type TransformFn = Arc<dyn Fn(Value) -> Result<Flow, BoxedError> + Send + Sync>;

/// A named single-argument function applied lazily on pull.
///
/// Every constructed transform gets a fresh serial; cloning keeps it, so a
/// cloned transform attached to the same parent yields the same chain node.
#[derive(Clone)]
pub struct Transform {
    name: Cow<'static, str>,
    serial: u64,
    func: TransformFn,
}

impl Transform {
    /// Creates a transform that always emits a value or fails.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, BoxedError> + Send + Sync + 'static,
    {
        Self::signal(name, move |value| func(value).map(Flow::Emit))
    }

    /// Creates a transform that may also skip or stop.
    pub fn signal<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Flow, BoxedError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            serial: next_serial(),
            func: Arc::new(func),
        }
    }

    /// Returns the transform name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies the transform to one value.
    pub fn apply(&self, value: Value) -> Result<Flow, BoxedError> {
        (self.func)(value)
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

/// Node wrapping one upstream node and one transform.
pub struct Chain {
    parent: Node,
    transform: Transform,
}

impl Chain {
    /// Attaches `transform` downstream of `parent`.
    pub fn attach(parent: Node, transform: Transform) -> Node {
        let token = NodeToken::derive("chain")
            .with_parent(parent.token())
            .with(transform.name())
            .with(&transform.serial)
            .finish();
        Node::new(token, Self { parent, transform })
    }
}

impl Resolve for Chain {
    fn label(&self) -> String {
        format!("then({})", self.transform.name())
    }

    fn upstream(&self) -> Vec<Node> {
        vec![self.parent.clone()]
    }

    fn evaluate(&self, token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        let input = self.parent.resolve(ctx)?;
        match self.transform.apply(input) {
            Ok(Flow::Emit(value)) => Ok(value),
            Ok(Flow::Skip) => {
                tracing::trace!(
                    target: TRACING_TARGET,
                    transform = self.transform.name(),
                    ordinal = ?ctx.ordinal(),
                    "Transform skipped"
                );
                Err(Interrupt::Skip)
            }
            Ok(Flow::Stop) => {
                tracing::debug!(
                    target: TRACING_TARGET,
                    transform = self.transform.name(),
                    ordinal = ?ctx.ordinal(),
                    "Transform requested stop"
                );
                Err(Interrupt::Stop)
            }
            Err(source) => Err(ctx.failure(token, self.label(), source)),
        }
    }
}
