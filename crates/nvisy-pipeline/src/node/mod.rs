//! Node abstraction, identity and per-row memoization.
//!
//! This module provides the core of the evaluation engine:
//! - [`Node`]: Cheap, clonable handle to a value-producing unit
//! - [`Resolve`]: The work a node performs for one row
//! - [`NodeToken`]: Structural identity used as the memoization key
//! - [`RowContext`]: Per-row scope holding the memoization cache
//! - [`Interrupt`]: Skip, stop and failure outcomes

mod context;
mod signal;
mod token;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

pub use context::{ActiveRow, RowContext};
pub use signal::{Interrupt, Resolution};
pub use token::{NodeToken, TokenHasher, next_serial};

use crate::adapt::IntoTransform;
use crate::error::PipelineResult;
use crate::transform::{Chain, Guard, OnFail, builtin};

/// Tracing target for node resolution.
const TRACING_TARGET: &str = "nvisy_pipeline::node";

/// Work performed by a node for the current row.
///
/// Implementations never memoize themselves: [`Node::resolve`] guarantees
/// that [`Resolve::evaluate`] runs at most once per row context.
pub trait Resolve: Send + Sync {
    /// Human-readable description used in diagnostics.
    fn label(&self) -> String;

    /// Nodes this node pulls from.
    fn upstream(&self) -> Vec<Node>;

    /// Produces this node's value for the row held by `ctx`.
    ///
    /// `token` is the node's own identity, used when reporting failures.
    fn evaluate(&self, token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution;

    /// Checks that the node is ready to run, before the first row.
    fn validate(&self) -> PipelineResult<()> {
        Ok(())
    }
}

/// Handle to a node in the pipeline graph.
///
/// Cloning a handle shares the node: every clone carries the same token and
/// therefore the same per-row cache entry.
#[derive(Clone)]
pub struct Node {
    token: NodeToken,
    inner: Arc<dyn Resolve>,
}

impl Node {
    /// Wraps a [`Resolve`] implementation under the given token.
    pub fn new(token: NodeToken, inner: impl Resolve + 'static) -> Self {
        Self::from_arc(token, Arc::new(inner))
    }

    /// Wraps an already shared [`Resolve`] implementation.
    pub fn from_arc(token: NodeToken, inner: Arc<dyn Resolve>) -> Self {
        Self { token, inner }
    }

    /// Returns the node's identity token.
    #[inline]
    pub fn token(&self) -> NodeToken {
        self.token
    }

    /// Returns the node's diagnostic label.
    pub fn label(&self) -> String {
        self.inner.label()
    }

    /// Returns the nodes this node pulls from.
    pub fn upstream(&self) -> Vec<Node> {
        self.inner.upstream()
    }

    /// Checks that the node is ready to run.
    ///
    /// Only this node is checked, not its upstream.
    pub fn validate(&self) -> PipelineResult<()> {
        self.inner.validate()
    }

    /// Resolves the node for the row held by `ctx`.
    ///
    /// The first call in a row evaluates the node and caches the outcome,
    /// including failures and signals. Later calls return the cached copy.
    pub fn resolve(&self, ctx: &mut RowContext<'_>) -> Resolution {
        if let Some(cached) = ctx.cached(self.token) {
            tracing::trace!(
                target: TRACING_TARGET,
                token = %self.token,
                "Cache hit"
            );
            return cached;
        }

        ctx.enter(self.token, &self.inner.label())?;
        let resolution = self.inner.evaluate(self.token, ctx);
        ctx.leave(self.token);

        tracing::trace!(
            target: TRACING_TARGET,
            token = %self.token,
            ordinal = ?ctx.ordinal(),
            ok = resolution.is_ok(),
            "Node evaluated"
        );

        ctx.store(self.token, resolution.clone());
        resolution
    }

    /// Returns whether `token` appears anywhere upstream of this node.
    pub fn depends_on(&self, token: NodeToken) -> bool {
        let mut seen = HashSet::new();
        let mut stack = self.upstream();
        while let Some(node) = stack.pop() {
            if node.token == token {
                return true;
            }
            if seen.insert(node.token) {
                stack.extend(node.upstream());
            }
        }
        false
    }

    /// Attaches a transform downstream of this node.
    pub fn then(&self, transform: impl IntoTransform) -> Node {
        Chain::attach(self.clone(), transform.into_transform())
    }

    /// Extracts a member (or numeric array index) from this node's value.
    pub fn take(&self, key: impl Into<String>) -> Node {
        crate::source::extract(self.clone(), key.into(), false)
    }

    /// Handles resolution failures of this node according to `on_fail`.
    pub fn guard(&self, on_fail: OnFail) -> Node {
        Guard::attach(self.clone(), on_fail)
    }

    /// Replaces a `null` value with `value`.
    pub fn or_default(&self, value: impl Into<Value>) -> Node {
        self.then(builtin::default_value(value))
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("token", &self.token)
            .field("label", &self.inner.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::source::Source;
    use crate::transform::Transform;

    fn counted(counter: &Arc<AtomicUsize>, name: &'static str) -> Transform {
        let counter = Arc::clone(counter);
        Transform::new(name, move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    #[test]
    fn test_shared_node_evaluates_once_per_row() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = Source::constant(json!(5)).then(counted(&calls, "shared"));
        let left = shared.then(Transform::new("left", |v| Ok(json!([v, "l"]))));
        let right = shared.then(Transform::new("right", |v| Ok(json!([v, "r"]))));

        let mut ctx = RowContext::detached();
        assert_eq!(left.resolve(&mut ctx).unwrap(), json!([5, "l"]));
        assert_eq!(right.resolve(&mut ctx).unwrap(), json!([5, "r"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_chain_resolves_identically_without_rerun() {
        let f_calls = Arc::new(AtomicUsize::new(0));
        let g_calls = Arc::new(AtomicUsize::new(0));
        let chain = Source::constant(json!(1))
            .then(counted(&f_calls, "f"))
            .then(counted(&g_calls, "g"));

        let mut ctx = RowContext::detached();
        let first = chain.resolve(&mut ctx).unwrap();
        let second = chain.resolve(&mut ctx).unwrap();

        assert_eq!(first, second);
        assert_eq!(f_calls.load(Ordering::SeqCst), 1);
        assert_eq!(g_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_cached_and_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let failing = Source::constant(json!("x")).then(Transform::new("explode", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fails".into())
        }));

        let mut ctx = RowContext::detached();
        assert!(failing.resolve(&mut ctx).unwrap_err().error().is_some());
        assert!(failing.resolve(&mut ctx).unwrap_err().error().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fresh_context_reevaluates() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = Source::constant(json!(1)).then(counted(&calls, "per_row"));

        for _ in 0..3 {
            let mut ctx = RowContext::detached();
            node.resolve(&mut ctx).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_depends_on_walks_ancestry() {
        let root = Source::constant(json!({"a": 1}));
        let leaf = root.take("a").then(Transform::new("id", Ok));

        assert!(leaf.depends_on(root.node().token()));
        assert!(!root.node().depends_on(leaf.token()));
    }

    #[test]
    fn test_clones_share_token() {
        let node = Source::constant(json!(1)).then(Transform::new("id", Ok));
        let captured = node.clone();

        assert_eq!(node, captured);
        assert_eq!(node.token(), captured.token());
    }
}
