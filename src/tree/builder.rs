//! Incremental pre-order construction of derivation trees.
//!
//! The fuzzer and the parser both emit nodes depth-first, which is exactly
//! the arena order, so building is a push per node with no re-layout.

use std::sync::Arc;

use super::{DerivationTree, Node, NodeId};
use crate::symbol::{NonTerminal, Symbol};

#[derive(Debug, Default)]
pub(crate) struct TreeBuilder {
    nodes: Vec<Node>,
    open: Vec<NodeId>,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Nodes emitted so far.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Starts a node under the innermost open node.
    pub(crate) fn open(&mut self, symbol: Symbol) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent = self.open.last().copied();
        self.nodes.push(Node::new(symbol, parent));
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        self.open.push(id);
        id
    }

    /// Finishes the innermost open node.
    pub(crate) fn close(&mut self) {
        if let Some(id) = self.open.pop() {
            self.nodes[id.0].size = self.nodes.len() - id.0;
        }
    }

    /// Emits a childless node.
    pub(crate) fn leaf(&mut self, symbol: Symbol) -> NodeId {
        let id = self.open(symbol);
        self.close();
        id
    }

    /// Copies a finished tree in as a child of the innermost open node.
    pub(crate) fn graft(&mut self, tree: &DerivationTree) -> NodeId {
        let offset = self.nodes.len();
        let parent = self.open.last().copied();
        for (i, node) in tree.nodes.iter().enumerate() {
            let node_parent = if i == 0 {
                parent
            } else {
                node.parent.map(|p| NodeId(p.0 + offset))
            };
            self.nodes.push(node.rebased(offset, node_parent));
        }
        let id = NodeId(offset);
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    #[allow(dead_code)]
    pub(crate) fn set_read_only(&mut self, id: NodeId) {
        self.nodes[id.0].read_only = true;
    }

    #[allow(dead_code)]
    pub(crate) fn set_sources(&mut self, id: NodeId, sources: Vec<DerivationTree>) {
        self.nodes[id.0].sources = sources;
    }

    pub(crate) fn set_parties(&mut self, id: NodeId, sender: Option<Arc<str>>, recipient: Option<Arc<str>>) {
        let node = &mut self.nodes[id.0];
        node.sender = sender;
        node.recipient = recipient;
    }

    /// Symbols of the currently open nodes, outermost first.
    pub(crate) fn open_symbols(&self) -> impl Iterator<Item = &NonTerminal> + '_ {
        self.open
            .iter()
            .filter_map(|id| self.nodes[id.0].symbol.as_non_terminal())
    }

    /// Copy of the most recently finished node labelled `symbol`.
    pub(crate) fn last_finished(&self, symbol: &NonTerminal) -> Option<DerivationTree> {
        let index = self.nodes.iter().rposition(|node| {
            node.size > 0 && node.symbol.as_non_terminal() == Some(symbol)
        })?;
        let end = index + self.nodes[index].size;
        let mut nodes: Vec<Node> = self.nodes[index..end]
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let parent = if i == 0 {
                    None
                } else {
                    node.parent.map(|p| NodeId(p.0 - index))
                };
                node.rebased(0, parent)
            })
            .collect();
        for node in &mut nodes {
            for child in &mut node.children {
                child.0 -= index;
            }
        }
        Some(DerivationTree::from_nodes(nodes))
    }

    /// Closes anything still open and hashes the result.
    ///
    /// # Panics
    ///
    /// Panics if nothing was emitted.
    pub(crate) fn finish(mut self) -> DerivationTree {
        while !self.open.is_empty() {
            self.close();
        }
        assert!(!self.nodes.is_empty(), "finishing an empty tree");
        DerivationTree::from_nodes(self.nodes)
    }
}
