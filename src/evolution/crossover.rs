//! Type-safe subtree crossover.
//!
//! Two parents exchange subtrees rooted at the same non-terminal, so both
//! offspring stay derivable from the grammar without re-parsing.

use std::collections::BTreeSet;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::symbol::NonTerminal;
use crate::tree::{DerivationTree, NodeId};

/// Configuration for crossover.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverConfig {
    /// Probability that a parent pair is recombined rather than copied.
    pub crossover_rate: f64,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self { crossover_rate: 0.8 }
    }
}

/// Non-root interior nodes open to recombination.
fn candidates(tree: &DerivationTree) -> impl Iterator<Item = (NodeId, &NonTerminal)> + '_ {
    tree.node_ids()
        .skip(1)
        .filter(|&id| !tree.is_read_only(id))
        .filter_map(|id| tree.non_terminal(id).map(|nt| (id, nt)))
}

fn nodes_labelled(tree: &DerivationTree, symbol: &NonTerminal) -> Vec<NodeId> {
    candidates(tree)
        .filter(|(_, nt)| *nt == symbol)
        .map(|(id, _)| id)
        .collect()
}

/// Swaps a randomly chosen pair of same-symbol subtrees between copies of
/// the parents.
///
/// Only non-root, writable interior nodes take part. When the parents
/// share no such symbol, unchanged copies are returned.
#[must_use]
pub fn type_safe_crossover<R: Rng + ?Sized>(
    parent1: &DerivationTree,
    parent2: &DerivationTree,
    rng: &mut R,
) -> (DerivationTree, DerivationTree) {
    let left: BTreeSet<&NonTerminal> = candidates(parent1).map(|(_, nt)| nt).collect();
    let right: BTreeSet<&NonTerminal> = candidates(parent2).map(|(_, nt)| nt).collect();
    let common: Vec<&NonTerminal> = left.intersection(&right).copied().collect();
    if common.is_empty() {
        return (parent1.clone(), parent2.clone());
    }

    let symbol = common[rng.gen_range(0..common.len())];
    let in_first = nodes_labelled(parent1, symbol);
    let in_second = nodes_labelled(parent2, symbol);
    let a = in_first[rng.gen_range(0..in_first.len())];
    let b = in_second[rng.gen_range(0..in_second.len())];

    let mut child1 = parent1.clone();
    let mut child2 = parent2.clone();
    DerivationTree::swap_subtrees(&mut child1, a, &mut child2, b);
    (child1, child2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{Grammar, GrammarBuilder, GrammarNode};
    use crate::parser::{ParseInput, ParseMode};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn two_digits() -> Grammar {
        GrammarBuilder::new()
            .rule(
                "start",
                GrammarNode::seq([GrammarNode::non_terminal("digit"), GrammarNode::non_terminal("digit")]),
            )
            .rule("digit", GrammarNode::alt(["1", "2", "8", "9"].map(GrammarNode::text)))
            .build()
            .unwrap()
    }

    fn in_language(grammar: &Grammar, tree: &DerivationTree) -> bool {
        let text = tree.to_text();
        grammar
            .parse(ParseInput::text(&text), grammar.start(), ParseMode::Complete)
            .any(|parsed| &parsed == tree)
    }

    fn pair(x: &str, y: &str) -> DerivationTree {
        DerivationTree::new(
            NonTerminal::new("start"),
            [
                DerivationTree::new(NonTerminal::new("digit"), [DerivationTree::text(x)]),
                DerivationTree::new(NonTerminal::new("digit"), [DerivationTree::text(y)]),
            ],
        )
    }

    #[test]
    fn test_swaps_same_symbol() {
        let mut rng = SmallRng::seed_from_u64(3);
        let p1 = pair("1", "2");
        let p2 = pair("8", "9");
        let (c1, c2) = type_safe_crossover(&p1, &p2, &mut rng);
        let mut all: Vec<char> = format!("{}{}", c1.to_text(), c2.to_text()).chars().collect();
        all.sort_unstable();
        assert_eq!(all, vec!['1', '2', '8', '9']);
        assert_eq!(c1.to_text().len(), 2);
        assert_ne!((c1.to_text(), c2.to_text()), (p1.to_text(), p2.to_text()));
        let grammar = two_digits();
        assert!(in_language(&grammar, &p1));
        assert!(in_language(&grammar, &c1), "{}", c1.to_text());
        assert!(in_language(&grammar, &c2), "{}", c2.to_text());
    }

    #[test]
    fn test_children_of_fuzzed_parents_reparse() {
        let grammar = two_digits();
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..30 {
            let p1 = grammar.fuzz(grammar.start(), 10, &mut rng).unwrap();
            let p2 = grammar.fuzz(grammar.start(), 10, &mut rng).unwrap();
            let (c1, c2) = type_safe_crossover(&p1, &p2, &mut rng);
            assert!(in_language(&grammar, &c1), "{}", c1.to_text());
            assert!(in_language(&grammar, &c2), "{}", c2.to_text());
        }
    }

    #[test]
    fn test_no_common_symbol() {
        let mut rng = SmallRng::seed_from_u64(3);
        let p1 = pair("1", "2");
        let p2 = DerivationTree::new(NonTerminal::new("start"), [DerivationTree::text("x")]);
        let (c1, c2) = type_safe_crossover(&p1, &p2, &mut rng);
        assert_eq!(c1, p1);
        assert_eq!(c2, p2);
    }

    #[test]
    fn test_read_only_nodes_are_kept() {
        let mut rng = SmallRng::seed_from_u64(5);
        let mut p1 = pair("1", "2");
        for child in p1.children(NodeId::ROOT).to_vec() {
            p1.set_all_read_only(child, true);
        }
        let p2 = pair("8", "9");
        for _ in 0..10 {
            let (c1, _) = type_safe_crossover(&p1, &p2, &mut rng);
            assert_eq!(c1.to_text(), "12");
        }
    }
}
