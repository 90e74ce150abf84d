//! Benchmarks for fitness evaluation and evolution.

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use evogram::{
    Comparator, Constraint, EvolutionConfig, Evaluator, Grammar, GrammarBuilder, GrammarNode, Objective, Search,
    ValueExpr, evolve,
};
use rand::SeedableRng;
use rand::rngs::SmallRng;

fn records() -> Grammar {
    GrammarBuilder::new()
        .rule(
            "start",
            GrammarNode::repeat(GrammarNode::non_terminal("record"), 1, Some(8)),
        )
        .rule(
            "record",
            GrammarNode::seq([
                GrammarNode::non_terminal("id"),
                GrammarNode::text("="),
                GrammarNode::non_terminal("value"),
                GrammarNode::text(";"),
            ]),
        )
        .rule("id", GrammarNode::char_range('a', 'z'))
        .rule("value", GrammarNode::repeat(GrammarNode::char_range('0', '9'), 1, Some(3)))
        .build()
        .expect("benchmark grammar is valid")
}

/// Every record value lies in `100..=500`.
fn bounded_values() -> Objective {
    let value = || vec![("v".into(), Search::descendants("record").child("value"))];
    Objective::Hard(Constraint::forall(
        "record",
        Search::descendants("record"),
        Constraint::chain(
            value(),
            vec![
                ValueExpr::constant(100_i64),
                ValueExpr::var("v").int(),
                ValueExpr::constant(500_i64),
            ],
            vec![Comparator::LessEqual, Comparator::LessEqual],
        )
        .expect("two comparators for three operands"),
    ))
}

fn bench_evaluate_population(c: &mut Criterion) {
    let grammar = records();
    let mut rng = SmallRng::seed_from_u64(42);
    let population: Vec<_> = (0..200)
        .map(|_| grammar.fuzz(grammar.start(), 60, &mut rng).expect("fuzzing succeeds"))
        .collect();
    let objectives = [bounded_values()];

    for (name, parallel) in [("evaluate_sequential", false), ("evaluate_parallel", true)] {
        c.bench_function(name, |b| {
            b.iter(|| {
                // fresh evaluator so the cache does not short-circuit
                let mut evaluator = Evaluator::new(&objectives);
                black_box(evaluator.evaluate_population(black_box(&population), parallel))
            });
        });
    }
}

fn bench_evolve(c: &mut Criterion) {
    let grammar = records();
    let objectives = [bounded_values()];
    let config = EvolutionConfig {
        population_size: 50,
        max_generations: 20,
        desired_solutions: 5,
        max_nodes: 60,
        ..EvolutionConfig::default()
    };
    let mut group = c.benchmark_group("evolve");
    group.sample_size(10);
    group.bench_function("records_20_generations", |b| {
        b.iter(|| black_box(evolve(&grammar, &objectives, black_box(&config))));
    });
    group.finish();
}

criterion_group!(benches, bench_evaluate_population, bench_evolve);
criterion_main!(benches);
