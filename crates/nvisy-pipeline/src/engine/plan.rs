//! Static execution plan built before the first row.

use std::collections::HashMap;

use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{PipelineError, PipelineResult};
use crate::node::{Node, NodeToken};
use crate::sink::Sink;

/// A node as recorded in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    /// Identity token of the node.
    pub token: NodeToken,
    /// Diagnostic label of the node.
    pub label: String,
}

/// Directed acyclic graph of every node reachable from a sink's bindings.
///
/// Edges point from an upstream node to the node pulling from it.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    graph: DiGraph<PlanNode, ()>,
    indices: HashMap<NodeToken, NodeIndex>,
    order: Vec<NodeToken>,
}

impl Plan {
    /// Builds the plan for a binding set.
    ///
    /// Fails with a usage error when the graph has a cycle or when a
    /// reachable node is not ready to run, such as an open collector.
    pub fn build(sink: &Sink) -> PipelineResult<Self> {
        let mut plan = Self::default();
        for binding in sink.bindings() {
            plan.visit(binding.node())?;
        }

        if is_cyclic_directed(&plan.graph) {
            return Err(PipelineError::usage("cycle detected in pipeline graph"));
        }

        plan.order = toposort(&plan.graph, None)
            .map_err(|_| PipelineError::usage("cycle detected in pipeline graph"))?
            .into_iter()
            .map(|index| plan.graph[index].token)
            .collect();

        Ok(plan)
    }

    fn visit(&mut self, root: &Node) -> PipelineResult<()> {
        if self.indices.contains_key(&root.token()) {
            return Ok(());
        }

        root.validate()?;
        let root_index = self.insert(root);
        let mut stack = vec![(root.clone(), root_index)];
        while let Some((node, index)) = stack.pop() {
            for upstream in node.upstream() {
                let upstream_index = match self.indices.get(&upstream.token()) {
                    Some(known) => *known,
                    None => {
                        upstream.validate()?;
                        let inserted = self.insert(&upstream);
                        stack.push((upstream, inserted));
                        inserted
                    }
                };
                self.graph.update_edge(upstream_index, index, ());
            }
        }
        Ok(())
    }

    fn insert(&mut self, node: &Node) -> NodeIndex {
        let index = self.graph.add_node(PlanNode {
            token: node.token(),
            label: node.label(),
        });
        self.indices.insert(node.token(), index);
        index
    }

    /// Number of distinct nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of upstream edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns whether the plan contains the node.
    pub fn contains(&self, token: NodeToken) -> bool {
        self.indices.contains_key(&token)
    }

    /// Returns the plan entry for a node.
    pub fn node(&self, token: NodeToken) -> Option<&PlanNode> {
        self.indices.get(&token).map(|index| &self.graph[*index])
    }

    /// Tokens in an order where every node follows its upstream nodes.
    #[inline]
    pub fn evaluation_order(&self) -> &[NodeToken] {
        &self.order
    }

    /// Returns a reference to the underlying petgraph.
    pub fn inner(&self) -> &DiGraph<PlanNode, ()> {
        &self.graph
    }
}
