//! Derivation trees.
//!
//! A [`DerivationTree`] stores its nodes in a flat arena laid out in
//! pre-order: the root is always [`NodeId::ROOT`], every subtree occupies a
//! contiguous index range, and structurally identical trees have identical
//! layouts. Node ids are therefore stable across clones and across trees
//! with the same shape, which lets fitness results that name failing nodes be
//! cached by tree hash and reapplied to any equal tree.
//!
//! Every edit re-lays the arena and marks the edited node and its ancestors
//! dirty; hashes are recomputed bottom-up for dirty nodes only. Hashes are
//! purely structural, so an edit followed by its inverse restores the
//! original hash.
//!
//! ```
//! use evogram::{DerivationTree, NonTerminal, Terminal};
//!
//! let digit = |d: &str| {
//!     DerivationTree::new(NonTerminal::new("digit"), [DerivationTree::leaf(Terminal::text(d))])
//! };
//! let mut tree = DerivationTree::new(NonTerminal::new("start"), [digit("1"), digit("0")]);
//! assert_eq!(tree.to_text(), "10");
//!
//! let before = tree.structural_hash();
//! let second = tree.children(tree.root())[1];
//! let old = tree.subtree(second);
//! tree.replace_subtree(second, &digit("7"));
//! assert_eq!(tree.to_text(), "17");
//! tree.replace_subtree(second, &old);
//! assert_eq!(tree.structural_hash(), before);
//! ```

mod builder;
mod serialize;

pub(crate) use builder::TreeBuilder;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::symbol::{NonTerminal, Symbol, Terminal};

/// Index of a node within a [`DerivationTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The root of every tree.
    pub const ROOT: NodeId = NodeId(0);

    /// Position of this node in pre-order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Node {
    symbol: Symbol,
    children: SmallVec<[NodeId; 4]>,
    parent: Option<NodeId>,
    /// Number of nodes in this subtree, including itself. Zero while a
    /// builder still has the node open.
    size: usize,
    read_only: bool,
    sources: Vec<DerivationTree>,
    sender: Option<Arc<str>>,
    recipient: Option<Arc<str>>,
    /// `None` marks the node dirty.
    hash: Option<u64>,
}

impl Node {
    fn new(symbol: Symbol, parent: Option<NodeId>) -> Self {
        Self {
            symbol,
            children: SmallVec::new(),
            parent,
            size: 0,
            read_only: false,
            sources: Vec::new(),
            sender: None,
            recipient: None,
            hash: None,
        }
    }

    /// Copy of this node with every id moved by `offset`.
    fn rebased(&self, offset: usize, parent: Option<NodeId>) -> Self {
        let mut node = self.clone();
        for child in &mut node.children {
            child.0 += offset;
        }
        node.parent = parent;
        node
    }
}

/// A concrete parse/derivation tree.
///
/// Interior nodes carry non-terminals; leaves carry concrete text, byte or
/// bit terminals. Nodes may also carry a read-only flag (set on generator
/// output), the source trees a generated value was computed from, and the
/// sender/recipient party names of protocol messages.
#[derive(Debug, Clone)]
pub struct DerivationTree {
    nodes: Vec<Node>,
}

impl DerivationTree {
    /// A single-node tree.
    #[must_use]
    pub fn leaf(symbol: impl Into<Symbol>) -> Self {
        Self::new(symbol, [])
    }

    /// A tree with `symbol` at the root and the given children in order.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, children: impl IntoIterator<Item = DerivationTree>) -> Self {
        let mut builder = TreeBuilder::new();
        builder.open(symbol.into());
        for child in children {
            builder.graft(&child);
        }
        builder.close();
        builder.finish()
    }

    /// A leaf holding literal text.
    #[must_use]
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::leaf(Terminal::text(value))
    }

    /// A leaf holding a literal byte string.
    #[must_use]
    pub fn bytes(value: impl AsRef<[u8]>) -> Self {
        Self::leaf(Terminal::bytes(value))
    }

    /// A leaf holding one bit.
    #[must_use]
    pub fn bit(value: bool) -> Self {
        Self::leaf(Terminal::Bit(value))
    }

    /// Builds from an arena that is already in canonical pre-order.
    fn from_nodes(nodes: Vec<Node>) -> Self {
        let mut tree = Self { nodes };
        tree.rehash();
        tree
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Total number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Symbol at `id`.
    #[must_use]
    pub fn symbol(&self, id: NodeId) -> &Symbol {
        &self.nodes[id.0].symbol
    }

    /// Non-terminal at `id`, if the node is interior.
    #[must_use]
    pub fn non_terminal(&self, id: NodeId) -> Option<&NonTerminal> {
        self.symbol(id).as_non_terminal()
    }

    /// Children of `id` in order.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Parent of `id`; `None` for the root.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    /// Number of nodes in the subtree rooted at `id`.
    #[must_use]
    pub fn subtree_size(&self, id: NodeId) -> usize {
        self.nodes[id.0].size
    }

    /// Whether `id` lies in the subtree rooted at `ancestor` (inclusive).
    #[must_use]
    pub fn is_within(&self, ancestor: NodeId, id: NodeId) -> bool {
        id.0 >= ancestor.0 && id.0 < ancestor.0 + self.nodes[ancestor.0].size
    }

    /// All node ids in pre-order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(NodeId)
    }

    /// `id` and all its descendants in pre-order.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        (id.0..id.0 + self.nodes[id.0].size).map(NodeId)
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), |&p| self.parent(p))
    }

    /// Number of edges between the root and `id`.
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).count()
    }

    /// Whether `id` is read-only.
    #[must_use]
    pub fn is_read_only(&self, id: NodeId) -> bool {
        self.nodes[id.0].read_only
    }

    /// Sets the read-only flag of one node.
    pub fn set_read_only(&mut self, id: NodeId, read_only: bool) {
        self.nodes[id.0].read_only = read_only;
    }

    /// Sets the read-only flag of `id` and all its descendants.
    pub fn set_all_read_only(&mut self, id: NodeId, read_only: bool) {
        let range = id.0..id.0 + self.nodes[id.0].size;
        for node in &mut self.nodes[range] {
            node.read_only = read_only;
        }
    }

    /// Trees a generated value at `id` was computed from.
    #[must_use]
    pub fn sources(&self, id: NodeId) -> &[DerivationTree] {
        &self.nodes[id.0].sources
    }

    /// Replaces the source trees of `id`.
    pub fn set_sources(&mut self, id: NodeId, sources: Vec<DerivationTree>) {
        self.nodes[id.0].sources = sources;
    }

    /// Sending party of the message rooted at `id`.
    #[must_use]
    pub fn sender(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].sender.as_deref()
    }

    /// Receiving party of the message rooted at `id`.
    #[must_use]
    pub fn recipient(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].recipient.as_deref()
    }

    /// Sets sender and recipient of the message rooted at `id`.
    pub fn set_parties(&mut self, id: NodeId, sender: Option<Arc<str>>, recipient: Option<Arc<str>>) {
        let node = &mut self.nodes[id.0];
        node.sender = sender;
        node.recipient = recipient;
    }

    /// Structural hash of the subtree at `id`.
    #[must_use]
    pub fn hash_of(&self, id: NodeId) -> u64 {
        self.nodes[id.0].hash.unwrap_or_default()
    }

    /// Structural hash of the whole tree.
    #[must_use]
    pub fn structural_hash(&self) -> u64 {
        self.hash_of(NodeId::ROOT)
    }

    /// Copy of the subtree rooted at `id` as a standalone tree.
    ///
    /// Flags, sources and party names are preserved.
    #[must_use]
    pub fn subtree(&self, id: NodeId) -> DerivationTree {
        let start = id.0;
        let end = start + self.nodes[start].size;
        let nodes = self.nodes[start..end]
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let parent = if i == 0 {
                    None
                } else {
                    node.parent.map(|p| NodeId(p.0 - start))
                };
                let mut copy = node.rebased(0, parent);
                for child in &mut copy.children {
                    child.0 -= start;
                }
                copy
            })
            .collect();
        Self { nodes }
    }

    /// Replaces the subtree at `id` with a copy of `replacement`.
    ///
    /// Ids of nodes before `id` in pre-order are unchanged; ids after the
    /// replaced range shift by the size difference.
    pub fn replace_subtree(&mut self, id: NodeId, replacement: &DerivationTree) {
        let node = &self.nodes[id.0];
        let (remove, parent) = (node.size, node.parent);
        self.splice(id.0, remove, &replacement.nodes, parent);
        self.rehash();
    }

    /// Copy of this tree with the subtree at `id` replaced.
    #[must_use]
    pub fn replaced(&self, id: NodeId, replacement: &DerivationTree) -> DerivationTree {
        let mut copy = self.clone();
        copy.replace_subtree(id, replacement);
        copy
    }

    /// Appends a copy of `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: &DerivationTree) -> NodeId {
        let index = self.nodes[parent.0].children.len();
        self.insert_child(parent, index, child)
    }

    /// Inserts a copy of `child` at position `index` among `parent`'s
    /// children. An index past the end appends.
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: &DerivationTree) -> NodeId {
        let siblings = &self.nodes[parent.0].children;
        let index = index.min(siblings.len());
        let at = siblings
            .get(index)
            .map_or(parent.0 + self.nodes[parent.0].size, |s| s.0);
        self.splice(at, 0, &child.nodes, Some(parent));
        self.nodes[parent.0].children.insert(index, NodeId(at));
        self.rehash();
        NodeId(at)
    }

    /// Removes and returns the child at position `index` of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, index: usize) -> Option<DerivationTree> {
        let child = *self.nodes[parent.0].children.get(index)?;
        let removed = self.subtree(child);
        self.nodes[parent.0].children.remove(index);
        self.splice(child.0, removed.nodes.len(), &[], Some(parent));
        self.rehash();
        Some(removed)
    }

    /// Replaces all children of `id`.
    pub fn set_children(&mut self, id: NodeId, children: &[DerivationTree]) {
        let remove = self.nodes[id.0].size - 1;
        self.nodes[id.0].children.clear();
        self.splice(id.0 + 1, remove, &[], Some(id));
        let mut at = id.0 + 1;
        for child in children {
            self.splice(at, 0, &child.nodes, Some(id));
            self.nodes[id.0].children.push(NodeId(at));
            at += child.nodes.len();
        }
        self.rehash();
    }

    /// Swaps the subtree at `a_id` in `a` with the subtree at `b_id` in `b`.
    pub fn swap_subtrees(a: &mut DerivationTree, a_id: NodeId, b: &mut DerivationTree, b_id: NodeId) {
        let from_a = a.subtree(a_id);
        let from_b = b.subtree(b_id);
        a.replace_subtree(a_id, &from_b);
        b.replace_subtree(b_id, &from_a);
    }

    /// All nodes labelled `symbol` in the subtree at `id`, in pre-order,
    /// including `id` itself.
    #[must_use]
    pub fn find_all(&self, id: NodeId, symbol: &NonTerminal) -> Vec<NodeId> {
        self.descendants(id)
            .filter(|&n| self.non_terminal(n) == Some(symbol))
            .collect()
    }

    /// Direct children of `id` labelled `symbol`.
    #[must_use]
    pub fn find_direct(&self, id: NodeId, symbol: &NonTerminal) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&n| self.non_terminal(n) == Some(symbol))
            .collect()
    }

    /// Number of terminal leaves in the subtree at `id`.
    #[must_use]
    pub fn count_terminals(&self, id: NodeId) -> usize {
        self.descendants(id)
            .filter(|&n| self.symbol(n).is_terminal())
            .count()
    }

    /// Re-lays the arena: drops `remove` nodes starting at `at`, inserts
    /// `insert` (itself a pre-order arena rooted at index 0) in their place
    /// under `parent`, and shifts every reference past the removed range.
    ///
    /// The caller fixes the parent's child list and calls [`Self::rehash`].
    fn splice(&mut self, at: usize, remove: usize, insert: &[Node], parent: Option<NodeId>) {
        let old_end = at + remove;
        let added = insert.len();
        let shift = |id: NodeId| {
            if id.0 >= old_end {
                NodeId(id.0 - remove + added)
            } else {
                id
            }
        };

        let (head, rest) = self.nodes.split_at_mut(at);
        for node in head.iter_mut().chain(rest[remove..].iter_mut()) {
            for child in &mut node.children {
                *child = shift(*child);
            }
            node.parent = node.parent.map(shift);
        }

        let rebased = insert.iter().enumerate().map(|(i, node)| {
            let node_parent = if i == 0 {
                parent
            } else {
                node.parent.map(|p| NodeId(p.0 + at))
            };
            node.rebased(at, node_parent)
        });
        self.nodes.splice(at..old_end, rebased);

        let mut current = parent;
        while let Some(p) = current {
            let node = &mut self.nodes[p.0];
            node.size = node.size - remove + added;
            node.hash = None;
            current = node.parent;
        }
    }

    /// Recomputes hashes of dirty nodes. Children follow their parent in
    /// pre-order, so a reverse sweep sees every child before its parent.
    fn rehash(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            if self.nodes[i].hash.is_some() {
                continue;
            }
            let node = &self.nodes[i];
            let hash = node_hash(
                &node.symbol,
                node.children
                    .iter()
                    .map(|c| self.nodes[c.0].hash.unwrap_or_default()),
            );
            self.nodes[i].hash = Some(hash);
        }
    }
}

/// Structural hash of a node from its symbol and its children's hashes.
pub(crate) fn node_hash(symbol: &Symbol, children: impl ExactSizeIterator<Item = u64>) -> u64 {
    let mut hasher = FxHasher::default();
    symbol.hash(&mut hasher);
    hasher.write_usize(children.len());
    for child in children {
        hasher.write_u64(child);
    }
    hasher.finish()
}

impl PartialEq for DerivationTree {
    /// Structural equality: same symbols in the same shape. Flags, sources
    /// and party names are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.structural_hash() == other.structural_hash()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(a, b)| a.symbol == b.symbol && a.children.len() == b.children.len())
    }
}

impl Eq for DerivationTree {}

impl Hash for DerivationTree {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

impl fmt::Display for DerivationTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
