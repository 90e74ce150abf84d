//! Locating subtrees a constraint talks about.

use std::fmt;

use crate::symbol::NonTerminal;
use crate::tree::{DerivationTree, NodeId};

/// Quantifier variables bound so far, innermost last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    bindings: Vec<(NonTerminal, NodeId)>,
}

impl Scope {
    /// Scope with no quantifier bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this scope with `symbol` bound to `node`.
    #[must_use]
    pub fn with(&self, symbol: NonTerminal, node: NodeId) -> Self {
        let mut next = self.clone();
        next.bindings.push((symbol, node));
        next
    }

    /// Innermost binding of `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &NonTerminal) -> Option<NodeId> {
        self.bindings
            .iter()
            .rev()
            .find(|(s, _)| s == symbol)
            .map(|&(_, id)| id)
    }

    /// True outside every quantifier.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// A query selecting nodes of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Search {
    /// Every node labelled with the symbol, at any depth, or the node the
    /// scope binds to it.
    Descendants(NonTerminal),
    /// Direct children of the root with the symbol, or the bound node.
    Children(NonTerminal),
    /// Direct children with `symbol` of every node `base` finds.
    Child {
        /// Nodes to look under.
        base: Box<Search>,
        /// Label of the children.
        symbol: NonTerminal,
    },
    /// Descendants with `symbol` of every node `base` finds.
    Descendant {
        /// Nodes to look under.
        base: Box<Search>,
        /// Label of the descendants.
        symbol: NonTerminal,
    },
}

impl Search {
    /// `<symbol>` anywhere in the tree.
    #[must_use]
    pub fn descendants(symbol: impl Into<NonTerminal>) -> Self {
        Self::Descendants(symbol.into())
    }

    /// `<symbol>` directly below the root.
    #[must_use]
    pub fn children(symbol: impl Into<NonTerminal>) -> Self {
        Self::Children(symbol.into())
    }

    /// `<symbol>` directly below every node this search finds.
    #[must_use]
    pub fn child(self, symbol: impl Into<NonTerminal>) -> Self {
        Self::Child {
            base: Box::new(self),
            symbol: symbol.into(),
        }
    }

    /// `<symbol>` anywhere below every node this search finds.
    #[must_use]
    pub fn descendant(self, symbol: impl Into<NonTerminal>) -> Self {
        Self::Descendant {
            base: Box::new(self),
            symbol: symbol.into(),
        }
    }

    /// The symbol of the nodes this search returns.
    #[must_use]
    pub fn symbol(&self) -> &NonTerminal {
        match self {
            Self::Descendants(symbol)
            | Self::Children(symbol)
            | Self::Child { symbol, .. }
            | Self::Descendant { symbol, .. } => symbol,
        }
    }

    /// Matching nodes of `tree`, in pre-order.
    #[must_use]
    pub fn find(&self, tree: &DerivationTree, scope: &Scope) -> Vec<NodeId> {
        match self {
            Self::Descendants(symbol) => match scope.get(symbol) {
                Some(bound) => vec![bound],
                None => tree.find_all(tree.root(), symbol),
            },
            Self::Children(symbol) => match scope.get(symbol) {
                Some(bound) => vec![bound],
                None => tree.find_direct(tree.root(), symbol),
            },
            Self::Child { base, symbol } => base
                .find(tree, scope)
                .into_iter()
                .flat_map(|id| tree.find_direct(id, symbol))
                .collect(),
            Self::Descendant { base, symbol } => {
                let mut found: Vec<NodeId> = base
                    .find(tree, scope)
                    .into_iter()
                    .flat_map(|id| {
                        tree.find_all(id, symbol)
                            .into_iter()
                            .filter(move |&d| d != id)
                    })
                    .collect();
                // nested bases can reach the same node twice
                found.sort_unstable();
                found.dedup();
                found
            }
        }
    }
}

impl fmt::Display for Search {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Descendants(symbol) => write!(f, "{symbol}"),
            Self::Children(symbol) => write!(f, ".{symbol}"),
            Self::Child { base, symbol } => write!(f, "{base}.{symbol}"),
            Self::Descendant { base, symbol } => write!(f, "{base}..{symbol}"),
        }
    }
}
