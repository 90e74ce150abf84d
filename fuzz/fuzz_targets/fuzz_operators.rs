#![no_main]

use arbitrary::Arbitrary;
use evogram::{
    Grammar, GrammarBuilder, GrammarNode, MutationConfig, ParseInput, ParseMode, mutate, type_safe_crossover,
};
use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::sync::OnceLock;

/// Structured input for operator fuzzing.
#[derive(Arbitrary, Debug)]
struct OperatorInput {
    /// Seeds for the two parents.
    parent_seeds: (u64, u64),
    /// Seed for crossover and mutation choices.
    op_seed: u64,
    /// Node budget (capped).
    max_nodes: u8,
}

fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        GrammarBuilder::new()
            .rule(
                "start",
                GrammarNode::alt([
                    GrammarNode::seq([
                        GrammarNode::text("("),
                        GrammarNode::non_terminal("start"),
                        GrammarNode::text(","),
                        GrammarNode::non_terminal("start"),
                        GrammarNode::text(")"),
                    ]),
                    GrammarNode::non_terminal("leaf"),
                ]),
            )
            .rule("leaf", GrammarNode::plus(GrammarNode::char_range('a', 'c')))
            .build()
            .expect("fuzz grammar is valid")
    })
}

fn in_language(grammar: &Grammar, text: &str) -> bool {
    grammar
        .parse(ParseInput::text(text), grammar.start(), ParseMode::Complete)
        .next()
        .is_some()
}

fuzz_target!(|input: OperatorInput| {
    let grammar = grammar();
    let max_nodes = usize::from(input.max_nodes).clamp(8, 120);
    let fuzz = |seed| grammar.fuzz(grammar.start(), max_nodes, &mut SmallRng::seed_from_u64(seed));
    let (Ok(p1), Ok(p2)) = (fuzz(input.parent_seeds.0), fuzz(input.parent_seeds.1)) else {
        return;
    };

    let mut rng = SmallRng::seed_from_u64(input.op_seed);
    let (c1, c2) = type_safe_crossover(&p1, &p2, &mut rng);
    assert!(in_language(grammar, &c1.to_text()), "crossover left the language");
    assert!(in_language(grammar, &c2.to_text()), "crossover left the language");

    let mutant = mutate(&c1, grammar, &[], &MutationConfig::default(), max_nodes, &mut rng);
    assert!(in_language(grammar, &mutant.to_text()), "mutation left the language");
});
