//! Sources: the leaves of the pipeline graph.
//!
//! This module provides:
//! - [`Source`]: A leaf node supporting keyed and indexed extraction
//! - [`Origin`]: The source that drives row iteration for a run
//! - [`RowProducer`]: Capability implemented by origin collaborators
//! - [`IterSource`], [`KeyedSource`]: In-memory producers

mod memory;
mod producer;

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;

pub use memory::{IterSource, KeyedSource};
pub use producer::{FetchError, RowHandle, RowProducer, lookup};

use crate::adapt::IntoTransform;
use crate::error::{BoxedError, PipelineError};
use crate::node::{Node, NodeToken, Resolution, Resolve, RowContext};

/// What a [`Source`] reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The origin row of the run.
    Origin,
    /// A value fixed at construction time.
    Constant,
    /// A value produced by a factory once per row.
    Computed,
    /// Any other node presented as a source.
    Adapted,
}

/// A leaf of the pipeline graph.
///
/// Every source is a node; `take` and `take_index` derive extraction nodes
/// whose tokens depend only on this source's token and the key, so taking
/// the same key twice yields nodes that share one cache entry.
#[derive(Debug, Clone)]
pub struct Source {
    node: Node,
    kind: SourceKind,
}

impl Source {
    /// Creates a source that yields `value` for every row.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let token = NodeToken::derive("constant")
            .with(&value.to_string())
            .finish();
        Self {
            node: Node::new(token, Constant { value }),
            kind: SourceKind::Constant,
        }
    }

    /// Creates a source whose value is produced by `factory` once per row.
    pub fn computed<F>(name: impl Into<Cow<'static, str>>, factory: F) -> Self
    where
        F: Fn() -> Result<Value, BoxedError> + Send + Sync + 'static,
    {
        let name = name.into();
        let token = NodeToken::derive("computed")
            .with(&*name)
            .with_serial()
            .finish();
        Self {
            node: Node::new(
                token,
                Computed {
                    name,
                    factory: Arc::new(factory),
                },
            ),
            kind: SourceKind::Computed,
        }
    }

    /// Presents an existing node as a source.
    pub fn from_node(node: Node) -> Self {
        Self {
            node,
            kind: SourceKind::Adapted,
        }
    }

    /// Returns the source kind.
    #[inline]
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Returns the node behind this source.
    #[inline]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Consumes the source and returns its node.
    #[inline]
    pub fn into_node(self) -> Node {
        self.node
    }

    /// Returns a node fetching field `key` from this source's value.
    pub fn take(&self, key: impl Into<String>) -> Node {
        extract(self.node.clone(), key.into(), self.kind == SourceKind::Origin)
    }

    /// Returns a node producing the current row's index.
    ///
    /// The index is the 0-based row ordinal unless the origin supplies an
    /// explicit index for the row.
    pub fn take_index(&self) -> Node {
        let token = NodeToken::derive("take_index")
            .with_parent(self.node.token())
            .finish();
        Node::new(
            token,
            TakeIndex {
                parent: self.node.clone(),
                via_origin: self.kind == SourceKind::Origin,
            },
        )
    }

    /// Attaches a transform directly to this source.
    pub fn then(&self, transform: impl IntoTransform) -> Node {
        self.node.then(transform)
    }
}

/// The source driving row iteration for one run.
///
/// Pairs a [`RowProducer`] with the source node that exposes its rows. Nodes
/// taken from an origin resolve only inside a row context opened for that
/// same origin.
pub struct Origin {
    producer: Box<dyn RowProducer>,
    source: Source,
}

impl Origin {
    /// Creates an origin over the given producer.
    pub fn new(producer: impl RowProducer + 'static) -> Self {
        let token = NodeToken::derive("origin").with_serial().finish();
        Self {
            producer: Box::new(producer),
            source: Source {
                node: Node::new(token, OriginRow),
                kind: SourceKind::Origin,
            },
        }
    }

    /// Returns the origin's identity token.
    #[inline]
    pub fn token(&self) -> NodeToken {
        self.source.node.token()
    }

    /// Returns the source exposing the origin's rows.
    #[inline]
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Returns a node fetching field `key` from the current row.
    pub fn take(&self, key: impl Into<String>) -> Node {
        self.source.take(key)
    }

    /// Returns a node producing the current row's index.
    pub fn take_index(&self) -> Node {
        self.source.take_index()
    }

    /// Keys the producer declares, if any.
    pub fn keys(&self) -> Option<Vec<String>> {
        self.producer.keys()
    }

    /// Returns the underlying producer.
    pub fn producer(&self) -> &dyn RowProducer {
        self.producer.as_ref()
    }

    pub(crate) fn next_row(&mut self) -> Result<Option<RowHandle>, BoxedError> {
        self.producer.next_row()
    }
}

impl std::fmt::Debug for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origin")
            .field("token", &self.token())
            .field("size_hint", &self.producer.size_hint())
            .finish_non_exhaustive()
    }
}

/// Builds a keyed extraction node below `parent`.
///
/// Extractions going through the producer's `fetch` and plain lookups on
/// the same parent and key are different nodes.
pub(crate) fn extract(parent: Node, key: String, via_origin: bool) -> Node {
    let token = NodeToken::derive("take")
        .with_parent(parent.token())
        .with(key.as_str())
        .with(&via_origin)
        .finish();
    Node::new(
        token,
        Take {
            parent,
            key,
            via_origin,
        },
    )
}

struct OriginRow;

impl Resolve for OriginRow {
    fn label(&self) -> String {
        "origin".into()
    }

    fn upstream(&self) -> Vec<Node> {
        Vec::new()
    }

    fn evaluate(&self, token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        let row = ctx.active_row()?;
        if row.origin != token {
            return Err(PipelineError::usage(format!(
                "origin {token} is not the origin driving row {}",
                row.ordinal
            ))
            .into());
        }

        row.producer
            .load(row.handle)
            .map_err(|source| ctx.failure(token, self.label(), source))
    }
}

struct Constant {
    value: Value,
}

impl Resolve for Constant {
    fn label(&self) -> String {
        format!("constant({})", self.value)
    }

    fn upstream(&self) -> Vec<Node> {
        Vec::new()
    }

    fn evaluate(&self, _token: NodeToken, _ctx: &mut RowContext<'_>) -> Resolution {
        Ok(self.value.clone())
    }
}

type Factory = Arc<dyn Fn() -> Result<Value, BoxedError> + Send + Sync>;

struct Computed {
    name: Cow<'static, str>,
    factory: Factory,
}

impl Resolve for Computed {
    fn label(&self) -> String {
        format!("computed({})", self.name)
    }

    fn upstream(&self) -> Vec<Node> {
        Vec::new()
    }

    fn evaluate(&self, token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        (self.factory)().map_err(|source| ctx.failure(token, self.label(), source))
    }
}

struct Take {
    parent: Node,
    key: String,
    via_origin: bool,
}

impl Resolve for Take {
    fn label(&self) -> String {
        format!("take({:?})", self.key)
    }

    fn upstream(&self) -> Vec<Node> {
        vec![self.parent.clone()]
    }

    fn evaluate(&self, token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        let record = self.parent.resolve(ctx)?;
        let fetched = if self.via_origin {
            let row = ctx.active_row()?;
            row.producer.fetch(&record, &self.key)
        } else {
            lookup(&record, &self.key).map_err(BoxedError::from)
        };

        fetched.map_err(|source| ctx.failure(token, self.label(), source))
    }
}

struct TakeIndex {
    parent: Node,
    via_origin: bool,
}

impl Resolve for TakeIndex {
    fn label(&self) -> String {
        "take_index".into()
    }

    fn upstream(&self) -> Vec<Node> {
        vec![self.parent.clone()]
    }

    fn evaluate(&self, _token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        let row = ctx.active_row()?;
        if self.via_origin && row.origin != self.parent.token() {
            return Err(PipelineError::usage(format!(
                "origin {} is not the origin driving row {}",
                self.parent.token(),
                row.ordinal
            ))
            .into());
        }

        Ok(row
            .handle
            .index()
            .cloned()
            .unwrap_or_else(|| Value::from(row.ordinal)))
    }
}
