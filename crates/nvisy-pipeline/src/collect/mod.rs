//! Collectors converging several upstream nodes into one value.
//!
//! A [`Collector`] owns an ordered list of slots. Each slot is an upstream
//! node registered by position or by name. Once closed, the collector is a
//! node like any other: resolving it resolves every slot in registration
//! order and composes the results into a list, a map, or the output of a
//! caller-supplied combine function.

mod scope;

use std::borrow::Cow;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::{Map, Value};

pub use scope::CollectorScope;

use crate::adapt::IntoSource;
use crate::error::{BoxedError, ErrorKind, PipelineError, PipelineResult};
use crate::node::{Interrupt, Node, NodeToken, Resolution, Resolve, RowContext};

/// Tracing target for collector operations.
const TRACING_TARGET: &str = "nvisy_pipeline::collect";

type CombineFn =
    Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> Result<Value, BoxedError> + Send + Sync>;

/// Composition rule of a collector.
#[derive(Clone)]
enum Shape {
    List,
    Map,
    Combine(Cow<'static, str>, CombineFn),
}

impl Shape {
    fn tag(&self) -> &str {
        match self {
            Self::List => "list",
            Self::Map => "map",
            Self::Combine(name, _) => &**name,
        }
    }
}

/// One registered upstream.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    name: Option<String>,
    node: Node,
    optional: bool,
}

impl Slot {
    fn key(&self, position: usize) -> String {
        self.name.clone().unwrap_or_else(|| position.to_string())
    }
}

#[derive(Debug, Default)]
struct Slots {
    entries: Vec<Slot>,
    closed: bool,
    scope_open: bool,
    fingerprint: Option<NodeToken>,
}

struct State {
    token: NodeToken,
    shape: Shape,
    slots: RwLock<Slots>,
}

impl State {
    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Node converging multiple upstream nodes into one composite value.
#[derive(Clone)]
pub struct Collector {
    node: Node,
    state: Arc<State>,
}

impl Collector {
    /// Creates a collector producing an array of its slot values.
    pub fn list() -> Self {
        Self::with_shape(Shape::List)
    }

    /// Creates a collector producing an object keyed by slot name.
    pub fn map() -> Self {
        Self::with_shape(Shape::Map)
    }

    /// Creates a collector passing its slot values to `combine`.
    ///
    /// Positional slots arrive in registration order as the first argument,
    /// named slots as the second.
    pub fn combine<F>(name: impl Into<Cow<'static, str>>, combine: F) -> Self
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> Result<Value, BoxedError>
            + Send
            + Sync
            + 'static,
    {
        Self::with_shape(Shape::Combine(name.into(), Arc::new(combine)))
    }

    fn with_shape(shape: Shape) -> Self {
        let token = NodeToken::derive("collector")
            .with(shape.tag())
            .with_serial()
            .finish();
        let state = Arc::new(State {
            token,
            shape,
            slots: RwLock::new(Slots::default()),
        });
        let node = Node::new(
            token,
            Converge {
                state: Arc::clone(&state),
            },
        );
        Self { node, state }
    }

    /// Returns the collector's identity token.
    #[inline]
    pub fn token(&self) -> NodeToken {
        self.state.token
    }

    /// Returns the node exposing the composite value.
    #[inline]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Number of committed slots.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns whether no slot has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether the collector has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// Hash of the sorted `(slot, upstream token)` pairs, once closed.
    pub fn fingerprint(&self) -> Option<NodeToken> {
        self.state.read().fingerprint
    }

    /// Registers the next positional slot.
    pub fn push(&self, upstream: impl IntoSource) -> PipelineResult<()> {
        let slot = self.prepare(None, upstream, false)?;
        self.commit(vec![slot])
    }

    /// Registers the next positional slot, yielding `null` on failure or skip.
    pub fn push_optional(&self, upstream: impl IntoSource) -> PipelineResult<()> {
        let slot = self.prepare(None, upstream, true)?;
        self.commit(vec![slot])
    }

    /// Registers a named slot.
    pub fn insert(&self, name: impl Into<String>, upstream: impl IntoSource) -> PipelineResult<()> {
        let slot = self.prepare(Some(name.into()), upstream, false)?;
        self.commit(vec![slot])
    }

    /// Registers a named slot, yielding `null` on failure or skip.
    pub fn insert_optional(
        &self,
        name: impl Into<String>,
        upstream: impl IntoSource,
    ) -> PipelineResult<()> {
        let slot = self.prepare(Some(name.into()), upstream, true)?;
        self.commit(vec![slot])
    }

    /// Closes the collector; no more slots may be registered afterwards.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> PipelineResult<()> {
        let mut slots = self.state.write();
        if slots.scope_open {
            return Err(PipelineError::usage(format!(
                "collector {} cannot close while a scope is open",
                self.state.token
            )));
        }
        seal(self.state.token, &mut slots);
        Ok(())
    }

    /// Opens a registration scope.
    ///
    /// Slots staged in the scope become visible when
    /// [`CollectorScope::close`] is called, which also closes the collector.
    /// Dropping the scope without closing it discards the staged slots.
    pub fn scope(&self) -> PipelineResult<CollectorScope<'_>> {
        let mut slots = self.state.write();
        if slots.closed {
            return Err(self.closed_error());
        }
        if slots.scope_open {
            return Err(PipelineError::usage(format!(
                "collector {} already has an open scope",
                self.state.token
            )));
        }
        slots.scope_open = true;
        Ok(CollectorScope::new(self))
    }

    /// Opens a scope, populates it with `build` and closes it.
    ///
    /// If `build` fails, the staged slots are discarded and the collector
    /// stays open.
    pub fn with_scope<F>(&self, build: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut CollectorScope<'_>) -> PipelineResult<()>,
    {
        let mut scope = self.scope()?;
        build(&mut scope)?;
        scope.close()
    }

    /// Validates an upstream before it is staged or committed.
    pub(crate) fn prepare(
        &self,
        name: Option<String>,
        upstream: impl IntoSource,
        optional: bool,
    ) -> PipelineResult<Slot> {
        let node = upstream.into_source().into_node();
        self.check_acyclic(&node)?;
        Ok(Slot {
            name,
            node,
            optional,
        })
    }

    /// Appends slots to the committed list, rejecting closed collectors.
    pub(crate) fn commit(&self, staged: Vec<Slot>) -> PipelineResult<()> {
        let mut slots = self.state.write();
        if slots.closed {
            return Err(self.closed_error());
        }
        if slots.scope_open {
            return Err(PipelineError::usage(format!(
                "collector {} has an open scope; register through it",
                self.state.token
            )));
        }
        append(&self.state.shape, &mut slots.entries, staged)
    }

    /// Commits a scope's staged slots and closes the collector.
    ///
    /// Staged slots are checked again, since other collectors may have been
    /// wired to this one while the scope was open.
    pub(crate) fn finish_scope(&self, staged: Vec<Slot>) -> PipelineResult<()> {
        if let Err(error) = staged.iter().try_for_each(|slot| self.check_acyclic(&slot.node)) {
            self.abandon_scope(staged.len());
            return Err(error);
        }

        let mut slots = self.state.write();
        slots.scope_open = false;
        append(&self.state.shape, &mut slots.entries, staged)?;
        seal(self.state.token, &mut slots);
        Ok(())
    }

    /// Releases the scope without committing.
    pub(crate) fn abandon_scope(&self, discarded: usize) {
        self.state.write().scope_open = false;
        tracing::debug!(
            target: TRACING_TARGET,
            collector = %self.state.token,
            discarded,
            "Collector scope dropped without closing"
        );
    }

    fn check_acyclic(&self, node: &Node) -> PipelineResult<()> {
        let token = self.state.token;
        if node.token() == token || node.depends_on(token) {
            return Err(PipelineError::usage(format!(
                "node `{}` depends on collector {token} and cannot feed it",
                node.label()
            )));
        }
        Ok(())
    }

    fn closed_error(&self) -> PipelineError {
        PipelineError::usage(format!(
            "collector {} is closed and accepts no more slots",
            self.state.token
        ))
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.state.read();
        f.debug_struct("Collector")
            .field("token", &self.state.token)
            .field("shape", &self.state.shape.tag())
            .field("slots", &slots.entries.len())
            .field("closed", &slots.closed)
            .finish()
    }
}

fn append(shape: &Shape, entries: &mut Vec<Slot>, staged: Vec<Slot>) -> PipelineResult<()> {
    let mut names: Vec<&String> = entries.iter().filter_map(|e| e.name.as_ref()).collect();
    for slot in &staged {
        match (shape, &slot.name) {
            (Shape::List, Some(name)) => {
                return Err(PipelineError::usage(format!(
                    "list collector cannot take named slot `{name}`"
                )));
            }
            (Shape::Map, None) => {
                return Err(PipelineError::usage("map collector requires named slots"));
            }
            (_, Some(name)) if names.contains(&name) => {
                return Err(PipelineError::usage(format!(
                    "collector slot `{name}` registered twice"
                )));
            }
            (_, Some(name)) => names.push(name),
            (_, None) => {}
        }
    }

    entries.extend(staged);
    Ok(())
}

fn seal(token: NodeToken, slots: &mut Slots) {
    if slots.closed {
        return;
    }

    let mut pairs: Vec<(String, NodeToken)> = slots
        .entries
        .iter()
        .enumerate()
        .map(|(position, slot)| (slot.key(position), slot.node.token()))
        .collect();
    pairs.sort();

    let fingerprint = pairs
        .iter()
        .fold(NodeToken::derive("fingerprint"), |hasher, pair| hasher.with(pair))
        .finish();

    slots.closed = true;
    slots.fingerprint = Some(fingerprint);

    tracing::debug!(
        target: TRACING_TARGET,
        collector = %token,
        slots = slots.entries.len(),
        fingerprint = %fingerprint,
        "Collector closed"
    );
}

fn unclosed(token: NodeToken) -> PipelineError {
    PipelineError::usage(format!(
        "collector {token} is used before its registration was closed"
    ))
}

struct Converge {
    state: Arc<State>,
}

impl Resolve for Converge {
    fn label(&self) -> String {
        format!("collect({})", self.state.shape.tag())
    }

    fn upstream(&self) -> Vec<Node> {
        self.state
            .read()
            .entries
            .iter()
            .map(|slot| slot.node.clone())
            .collect()
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.state.read().closed {
            return Ok(());
        }
        Err(unclosed(self.state.token))
    }

    fn evaluate(&self, token: NodeToken, ctx: &mut RowContext<'_>) -> Resolution {
        let (entries, closed) = {
            let slots = self.state.read();
            (slots.entries.clone(), slots.closed)
        };

        if !closed {
            return Err(unclosed(token).into());
        }

        let mut values = Vec::with_capacity(entries.len());
        for slot in &entries {
            let value = match slot.node.resolve(ctx) {
                Ok(value) => value,
                Err(Interrupt::Skip) if slot.optional => Value::Null,
                Err(Interrupt::Error(error))
                    if slot.optional && error.kind() == ErrorKind::Resolution =>
                {
                    Value::Null
                }
                Err(interrupt) => return Err(interrupt),
            };
            values.push(value);
        }

        match &self.state.shape {
            Shape::List => Ok(Value::Array(values)),
            Shape::Map => {
                let map: Map<String, Value> = entries
                    .iter()
                    .enumerate()
                    .map(|(position, slot)| slot.key(position))
                    .zip(values)
                    .collect();
                Ok(Value::Object(map))
            }
            Shape::Combine(_, combine) => {
                let mut positional = Vec::new();
                let mut named = Map::new();
                for (slot, value) in entries.iter().zip(values) {
                    match &slot.name {
                        Some(name) => {
                            named.insert(name.clone(), value);
                        }
                        None => positional.push(value),
                    }
                }
                combine(positional, named)
                    .map_err(|source| ctx.failure(token, self.label(), source))
            }
        }
    }
}
