//! Property-based tests over recursive, ambiguous grammars.
//!
//! Every generated tree must show up in the forest of its own text, and so
//! must every crossover child.
//!
//! Run with: cargo test --release prop_ambiguous

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::SmallRng;

use evogram::{DerivationTree, Grammar, GrammarBuilder, GrammarNode, ParseInput, ParseMode, type_safe_crossover};

/// `<start> ::= <start> <start> | "a"`: one tree per bracketing.
fn pairs() -> Grammar {
    GrammarBuilder::new()
        .rule(
            "start",
            GrammarNode::alt([
                GrammarNode::seq([GrammarNode::non_terminal("start"), GrammarNode::non_terminal("start")]),
                GrammarNode::text("a"),
            ]),
        )
        .build()
        .unwrap()
}

/// Infix arithmetic without precedence: `1+2*3` has two trees.
fn expressions() -> Grammar {
    GrammarBuilder::new()
        .rule(
            "start",
            GrammarNode::alt([
                GrammarNode::seq([
                    GrammarNode::non_terminal("start"),
                    GrammarNode::non_terminal("op"),
                    GrammarNode::non_terminal("start"),
                ]),
                GrammarNode::seq([GrammarNode::text("("), GrammarNode::non_terminal("start"), GrammarNode::text(")")]),
                GrammarNode::non_terminal("digit"),
            ]),
        )
        .rule("op", GrammarNode::alt([GrammarNode::text("+"), GrammarNode::text("*")]))
        .rule("digit", GrammarNode::char_range('0', '9'))
        .build()
        .unwrap()
}

fn fuzz(grammar: &Grammar, seed: u64) -> DerivationTree {
    grammar.fuzz(grammar.start(), 20, &mut SmallRng::seed_from_u64(seed)).unwrap()
}

fn forest(grammar: &Grammar, text: &str) -> Vec<DerivationTree> {
    grammar.parse(ParseInput::text(text), grammar.start(), ParseMode::Complete).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A fuzzed bracketing is one of the forest's trees.
    #[test]
    fn prop_pairs_roundtrip(seed in any::<u64>()) {
        let grammar = pairs();
        let tree = fuzz(&grammar, seed);
        let text = tree.to_text();
        prop_assume!(text.len() <= 8);
        let trees = forest(&grammar, &text);
        prop_assert!(trees.contains(&tree), "{} missing from {} trees", text, trees.len());
    }

    /// A fuzzed expression is one of the forest's trees.
    #[test]
    fn prop_expressions_roundtrip(seed in any::<u64>()) {
        let grammar = expressions();
        let tree = fuzz(&grammar, seed);
        let text = tree.to_text();
        prop_assume!(text.len() <= 11);
        let trees = forest(&grammar, &text);
        prop_assert!(!trees.is_empty());
        prop_assert!(trees.contains(&tree), "{} missing from {} trees", text, trees.len());
    }

    /// Crossover children keep their exact shape under re-parsing.
    #[test]
    fn prop_crossover_children_reparse(a in any::<u64>(), b in any::<u64>(), seed in any::<u64>()) {
        let grammar = expressions();
        let p1 = fuzz(&grammar, a);
        let p2 = fuzz(&grammar, b);
        let mut rng = SmallRng::seed_from_u64(seed);
        let (c1, c2) = type_safe_crossover(&p1, &p2, &mut rng);
        for child in [c1, c2] {
            let text = child.to_text();
            prop_assume!(text.len() <= 11);
            let trees = forest(&grammar, &text);
            prop_assert!(trees.contains(&child), "{} missing from {} trees", text, trees.len());
        }
    }
}
