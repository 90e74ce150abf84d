//! Evolutionary search for trees that satisfy constraints.
//!
//! [`evolve`] starts from random derivations of the start symbol and
//! breeds them generation by generation: the fittest survive as elites,
//! tournament-selected pairs exchange same-symbol subtrees, and offspring
//! have blamed subtrees regenerated. Every operator works on derivation
//! trees directly, so individuals never leave the grammar's language.
//!
//! ```
//! use evogram::{
//!     Comparator, Constraint, EvolutionConfig, GrammarBuilder, GrammarNode, Objective, Search,
//!     ValueExpr, evolve,
//! };
//!
//! let grammar = GrammarBuilder::new()
//!     .rule("start", GrammarNode::seq([GrammarNode::non_terminal("digit"), GrammarNode::non_terminal("digit")]))
//!     .rule("digit", GrammarNode::char_range('0', '9'))
//!     .build()
//!     .unwrap();
//! let above_50 = Constraint::compare(
//!     vec![("s".into(), Search::descendants("start"))],
//!     ValueExpr::var("s").int(),
//!     Comparator::Greater,
//!     ValueExpr::constant(50_i64),
//! );
//! let config = EvolutionConfig {
//!     population_size: 20,
//!     max_generations: 50,
//!     desired_solutions: 1,
//!     ..EvolutionConfig::default()
//! };
//!
//! let (solutions, _stats) = evolve(&grammar, &[Objective::Hard(above_50)], &config).unwrap();
//! assert!(solutions[0].to_text().parse::<u32>().unwrap() > 50);
//! ```

mod crossover;
mod engine;
mod evaluation;
mod mutation;
mod population;
mod selection;

pub use crossover::{CrossoverConfig, type_safe_crossover};
pub use engine::{EvolutionConfig, EvolutionStats, GenerationStats, TerminationPolicy, evolve};
pub use evaluation::{Evaluation, Evaluator, FitnessSummary, Objective};
pub use mutation::{MutationConfig, mutate};
pub use population::PopulationManager;
pub use selection::{SelectionConfig, SelectionResult, select_parents};
