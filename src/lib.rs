#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Evogram: grammar-based test input generation under constraints.
//!
//! A [`Grammar`] describes the shape of valid inputs: text, bytes or
//! individual bits. From it the crate can
//! - derive random [`DerivationTree`]s ([`Grammar::fuzz`]),
//! - parse existing inputs back into trees ([`Grammar::parse`]), including
//!   incomplete prefixes,
//! - score trees against [`Constraint`]s and [`SoftGoal`]s, and
//! - [`evolve`] populations of trees until enough of them satisfy every
//!   hard constraint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Evolutionary engine          │
//! ├──────────────────┬──────────────────┤
//! │  Constraints &   │   Chart parser   │
//! │  fitness model   │                  │
//! ├──────────────────┴──────────────────┤
//! │   Grammar, symbols, derivation trees│
//! └─────────────────────────────────────┘
//! ```
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod constraint;
pub mod error;
pub mod evolution;
pub mod grammar;
pub mod parser;
pub mod symbol;
pub mod tree;

pub use error::{EvalError, EvolutionError, GenerationError, GrammarError, GrammarResult};

// Re-export the main types at crate root for convenience
pub use constraint::{
    Comparator, Constraint, FailingTree, Fitness, Predicate, RankEstimator, Scope, Search, SoftGoal,
    Suggestion, Value, ValueExpr,
};
pub use evolution::{
    CrossoverConfig, Evaluation, Evaluator, EvolutionConfig, EvolutionStats, FitnessSummary, GenerationStats,
    MutationConfig, Objective, PopulationManager, SelectionConfig, TerminationPolicy, evolve, mutate,
    type_safe_crossover,
};
pub use grammar::{
    Bound, DynamicBound, GeneratedValue, Generator, Grammar, GrammarBuilder, GrammarNode,
};
pub use parser::{Parse, ParseInput, ParseMode, Parser, ParserConfig};
pub use symbol::{NonTerminal, Symbol, Terminal};
pub use tree::{DerivationTree, NodeId};
