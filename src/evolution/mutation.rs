//! Subtree regeneration.
//!
//! A mutation replaces one interior node with a fresh derivation of the
//! same non-terminal. Nodes blamed by a failed constraint are preferred
//! targets; otherwise any writable interior node may be picked.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::constraint::FailingTree;
use crate::grammar::Grammar;
use crate::symbol::NonTerminal;
use crate::tree::{DerivationTree, NodeId};

/// Configuration for mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Probability that an offspring is mutated.
    pub mutation_rate: f64,
    /// Regeneration attempts before an individual is left unchanged.
    pub max_mutation_attempts: usize,
    /// Apply equality repair suggestions before mutating.
    pub repair_suggestions: bool,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            mutation_rate: 0.2,
            max_mutation_attempts: 10,
            repair_suggestions: true,
        }
    }
}

fn is_target(tree: &DerivationTree, id: NodeId) -> bool {
    id.index() < tree.node_count() && tree.non_terminal(id).is_some() && !tree.is_read_only(id)
}

fn pick_target<R: Rng + ?Sized>(tree: &DerivationTree, failing: &[FailingTree], rng: &mut R) -> Option<NodeId> {
    let blamed: Vec<NodeId> = failing
        .iter()
        .map(|f| f.node)
        .filter(|&id| is_target(tree, id))
        .collect();
    if !blamed.is_empty() {
        return Some(blamed[rng.gen_range(0..blamed.len())]);
    }
    let writable: Vec<NodeId> = tree.node_ids().filter(|&id| is_target(tree, id)).collect();
    if writable.is_empty() {
        None
    } else {
        Some(writable[rng.gen_range(0..writable.len())])
    }
}

/// Returns a mutated copy of `tree`, or an unchanged copy when every
/// attempt failed or reproduced the original.
///
/// `failing` lists nodes of `tree` blamed by its last evaluation. The
/// replacement is generated with the node's ancestors as context and a
/// budget of whatever `max_nodes` leaves after the rest of the tree.
#[must_use]
pub fn mutate<R: Rng + ?Sized>(
    tree: &DerivationTree,
    grammar: &Grammar,
    failing: &[FailingTree],
    config: &MutationConfig,
    max_nodes: usize,
    rng: &mut R,
) -> DerivationTree {
    let original = tree.structural_hash();
    for _ in 0..config.max_mutation_attempts.max(1) {
        let Some(target) = pick_target(tree, failing, rng) else {
            break;
        };
        let Some(symbol) = tree.non_terminal(target).cloned() else {
            break;
        };
        let mut context: Vec<NonTerminal> = tree
            .ancestors(target)
            .filter_map(|id| tree.non_terminal(id).cloned())
            .collect();
        context.reverse();
        let rest = tree.node_count() - tree.subtree_size(target);
        let budget = max_nodes.saturating_sub(rest).max(1);

        match grammar.fuzz_in_context(&symbol, &context, budget, rng) {
            Ok(replacement) => {
                let mutated = tree.replaced(target, &replacement);
                if mutated.structural_hash() != original {
                    return mutated;
                }
            }
            Err(error) => trace!(%symbol, %error, "mutation attempt failed"),
        }
    }
    tree.clone()
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
                GrammarNode::seq(vec![GrammarNode::non_terminal("digit"), GrammarNode::non_terminal("digit")]),
            )
            .rule("digit", GrammarNode::char_range('0', '9'))
            .build()
            .unwrap()
    }

    #[test]
    fn test_mutation_stays_in_language() {
        let grammar = grammar();
        let mut rng = SmallRng::seed_from_u64(11);
        let tree = grammar.fuzz(&NonTerminal::new("start"), 10, &mut rng).unwrap();
        let config = MutationConfig::default();
        let mut changed = 0;
        for _ in 0..20 {
            let mutated = mutate(&tree, &grammar, &[], &config, 10, &mut rng);
            let text = mutated.to_text();
            assert_eq!(text.len(), 2);
            assert!(text.chars().all(|c| c.is_ascii_digit()));
            if mutated != tree {
                changed += 1;
            }
        }
        assert!(changed > 0);
    }

    #[test]
    fn test_failing_node_is_preferred() {
        let grammar = grammar();
        let mut rng = SmallRng::seed_from_u64(2);
        let tree = DerivationTree::new(
            NonTerminal::new("start"),
            [
                DerivationTree::new(NonTerminal::new("digit"), [DerivationTree::text("1")]),
                DerivationTree::new(NonTerminal::new("digit"), [DerivationTree::text("2")]),
            ],
        );
        let second = tree.children(NodeId::ROOT)[1];
        let failing = [FailingTree {
            node: second,
            constraint: "digit == 7".into(),
            suggestions: Vec::new(),
        }];
        for _ in 0..20 {
            let mutated = mutate(&tree, &grammar, &failing, &MutationConfig::default(), 10, &mut rng);
            assert!(mutated.to_text().starts_with('1'));
        }
    }

    #[test]
    fn test_read_only_tree_is_unchanged() {
        let grammar = grammar();
        let mut rng = SmallRng::seed_from_u64(4);
        let mut tree = grammar.fuzz(&NonTerminal::new("start"), 10, &mut rng).unwrap();
        tree.set_all_read_only(NodeId::ROOT, true);
        let mutated = mutate(&tree, &grammar, &[], &MutationConfig::default(), 10, &mut rng);
        assert_eq!(mutated, tree);
    }
}
