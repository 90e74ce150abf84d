//! k-path coverage: how many chains of `k` nested non-terminals the grammar
//! allows, and how many of those a set of trees exercises.

use std::collections::BTreeSet;

use super::Grammar;
use crate::symbol::NonTerminal;
use crate::tree::{DerivationTree, NodeId};

/// A chain of non-terminals, each derived directly from the previous one.
pub type KPath = Vec<NonTerminal>;

impl Grammar {
    /// Every k-path the grammar can derive. `k == 0` yields nothing.
    #[must_use]
    pub fn k_paths(&self, k: usize) -> BTreeSet<KPath> {
        let mut paths: BTreeSet<KPath> = if k == 0 {
            BTreeSet::new()
        } else {
            self.rules.keys().map(|s| vec![s.clone()]).collect()
        };
        for _ in 1..k {
            paths = paths
                .into_iter()
                .flat_map(|path| {
                    let last = path.last().and_then(|s| self.rule(s));
                    let successors: BTreeSet<NonTerminal> = last
                        .map(|body| body.referenced_non_terminals().into_iter().cloned().collect())
                        .unwrap_or_default();
                    successors.into_iter().map(move |next| {
                        let mut extended = path.clone();
                        extended.push(next);
                        extended
                    })
                })
                .collect();
        }
        paths
    }

    /// Fraction of the grammar's k-paths that occur in `trees`.
    ///
    /// Returns 1.0 when the grammar has no k-paths.
    #[must_use]
    pub fn coverage(&self, trees: &[DerivationTree], k: usize) -> f64 {
        let all = self.k_paths(k);
        if all.is_empty() {
            return 1.0;
        }
        let covered: BTreeSet<KPath> = trees.iter().flat_map(|t| tree_k_paths(t, k)).collect();
        let hit = all.intersection(&covered).count();
        #[allow(clippy::cast_precision_loss)] // path counts stay far below 2^52
        let ratio = hit as f64 / all.len() as f64;
        ratio
    }
}

/// k-paths occurring in a tree, following parent/child edges between
/// non-terminal nodes.
#[must_use]
pub fn tree_k_paths(tree: &DerivationTree, k: usize) -> BTreeSet<KPath> {
    fn extend(tree: &DerivationTree, id: NodeId, k: usize, path: &mut KPath, out: &mut BTreeSet<KPath>) {
        let Some(symbol) = tree.non_terminal(id) else {
            return;
        };
        path.push(symbol.clone());
        if path.len() == k {
            out.insert(path.clone());
        } else {
            for &child in tree.children(id) {
                extend(tree, child, k, path, out);
            }
        }
        path.pop();
    }

    let mut out = BTreeSet::new();
    if k == 0 {
        return out;
    }
    for id in tree.node_ids() {
        extend(tree, id, k, &mut Vec::with_capacity(k), &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{GrammarBuilder, GrammarNode};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn grammar() -> Grammar {
        GrammarBuilder::new()
            .rule(
                "start",
                GrammarNode::alt([GrammarNode::non_terminal("a"), GrammarNode::non_terminal("b")]),
            )
            .rule("a", GrammarNode::text("a"))
            .rule("b", GrammarNode::text("b"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_k_paths() {
        let g = grammar();
        assert_eq!(g.k_paths(1).len(), 3);
        let two = g.k_paths(2);
        assert_eq!(two.len(), 2);
        assert!(two.contains(&vec![NonTerminal::new("start"), NonTerminal::new("a")]));
        assert!(g.k_paths(3).is_empty());
    }

    #[test]
    fn test_coverage_grows_with_more_trees() {
        let g = grammar();
        let a = DerivationTree::new(
            NonTerminal::new("start"),
            [DerivationTree::new(NonTerminal::new("a"), [DerivationTree::text("a")])],
        );
        let b = DerivationTree::new(
            NonTerminal::new("start"),
            [DerivationTree::new(NonTerminal::new("b"), [DerivationTree::text("b")])],
        );
        let half = g.coverage(std::slice::from_ref(&a), 2);
        let full = g.coverage(&[a, b], 2);
        assert!((half - 0.5).abs() < 1e-9);
        assert!((full - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fuzzed_trees_only_contain_grammar_paths() {
        let g = grammar();
        let mut rng = SmallRng::seed_from_u64(4);
        let all = g.k_paths(2);
        for _ in 0..10 {
            let tree = g.fuzz(g.start(), 10, &mut rng).unwrap();
            assert!(tree_k_paths(&tree, 2).is_subset(&all));
        }
    }
}
