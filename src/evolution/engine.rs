//! The generational loop.
//!
//! Each generation is evaluated, solutions are collected, and the next
//! generation is bred from elites plus recombined and mutated offspring,
//! deduplicated and topped up with fresh derivations.

// Stats and timing use float conversions
#![allow(clippy::cast_precision_loss, clippy::too_many_lines)]

use std::path::Path;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::constraint::FailingTree;
use crate::error::{EvolutionError, GenerationError};
use crate::evolution::crossover::{CrossoverConfig, type_safe_crossover};
use crate::evolution::evaluation::{Evaluation, Evaluator, FitnessSummary, Objective};
use crate::evolution::mutation::{MutationConfig, mutate};
use crate::evolution::population::PopulationManager;
use crate::evolution::selection::{SelectionConfig, select_parents};
use crate::grammar::Grammar;
use crate::symbol::NonTerminal;
use crate::tree::DerivationTree;

/// What to return when a run ends with fewer solutions than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationPolicy {
    /// Fail with [`EvolutionError::NotConverged`].
    Strict,
    /// Top up the solutions with the fittest remaining individuals.
    BestEffort,
    /// Return only the solutions found, possibly none.
    PerfectOnly,
}

/// Configuration for an evolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Individuals per generation.
    pub population_size: usize,
    /// Breeding rounds before giving up.
    pub max_generations: usize,
    /// Solutions wanted; the run stops once this many are found.
    pub desired_solutions: usize,
    /// Symbol every individual derives from.
    pub start_symbol: String,
    /// Soft node budget per individual.
    pub max_nodes: usize,
    /// RNG seed for reproducibility.
    pub seed: u64,
    /// Selection configuration.
    pub selection: SelectionConfig,
    /// Crossover configuration.
    pub crossover: CrossoverConfig,
    /// Mutation configuration.
    pub mutation: MutationConfig,
    /// Outcome when too few solutions were found.
    pub termination: TerminationPolicy,
    /// Hard-constraint score at which an individual counts as a solution.
    pub success_threshold: f64,
    /// Wall-clock limit for the whole run.
    pub max_duration: Option<Duration>,
    /// Evaluate individuals on the rayon pool.
    pub parallel: bool,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 100,
            max_generations: 500,
            desired_solutions: 10,
            start_symbol: "start".to_owned(),
            max_nodes: 200,
            seed: 42,
            selection: SelectionConfig::default(),
            crossover: CrossoverConfig::default(),
            mutation: MutationConfig::default(),
            termination: TerminationPolicy::PerfectOnly,
            success_threshold: 1.0,
            max_duration: None,
            parallel: true,
        }
    }
}

fn check_rate(name: &str, rate: f64) -> Result<(), EvolutionError> {
    if (0.0..=1.0).contains(&rate) {
        Ok(())
    } else {
        Err(EvolutionError::InvalidConfig(format!("{name} must lie in [0, 1], got {rate}")))
    }
}

impl EvolutionConfig {
    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// [`EvolutionError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<(), EvolutionError> {
        let positive = [
            ("population_size", self.population_size),
            ("desired_solutions", self.desired_solutions),
            ("max_nodes", self.max_nodes),
            ("selection.tournament_size", self.selection.tournament_size),
            ("mutation.max_mutation_attempts", self.mutation.max_mutation_attempts),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(EvolutionError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.start_symbol.is_empty() {
            return Err(EvolutionError::InvalidConfig("start_symbol is empty".to_owned()));
        }
        check_rate("selection.elitism_rate", self.selection.elitism_rate)?;
        check_rate("crossover.crossover_rate", self.crossover.crossover_rate)?;
        check_rate("mutation.mutation_rate", self.mutation.mutation_rate)?;
        if !(self.success_threshold > 0.0 && self.success_threshold <= 1.0) {
            return Err(EvolutionError::InvalidConfig(format!(
                "success_threshold must lie in (0, 1], got {}",
                self.success_threshold
            )));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration. Missing fields take
    /// their default.
    ///
    /// # Errors
    ///
    /// [`EvolutionError::Config`] for malformed JSON,
    /// [`EvolutionError::InvalidConfig`] for unusable values.
    pub fn from_json_str(json: &str) -> Result<Self, EvolutionError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// [`EvolutionError::Io`] if the file cannot be read, otherwise as
    /// [`Self::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EvolutionError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// Statistics for a single generation.
#[derive(Debug, Clone, Copy)]
pub struct GenerationStats {
    /// Generation number, zero for the initial population.
    pub generation: usize,
    /// Best combined fitness in this generation.
    pub best_fitness: f64,
    /// Mean combined fitness.
    pub mean_fitness: f64,
    /// Mean score over hard constraints alone.
    pub mean_hard_fitness: f64,
    /// Individuals in this generation satisfying every hard constraint.
    pub successes: usize,
    /// Distinct solutions found so far.
    pub solutions: usize,
}

/// Overall statistics from an evolution run.
#[derive(Debug, Clone)]
pub struct EvolutionStats {
    /// Statistics per generation.
    pub generations: Vec<GenerationStats>,
    /// Best fitness achieved.
    pub best_fitness: f64,
    /// Generation where best fitness was first achieved.
    pub best_generation: usize,
    /// Distinct solutions found.
    pub solutions: usize,
    /// Whether the run stopped because enough solutions were found or the
    /// whole population was perfect.
    pub converged: bool,
    /// Total time in seconds.
    pub elapsed_seconds: f64,
}

/// Distinct solutions in discovery order.
#[derive(Debug, Default)]
struct Solutions {
    found: Vec<(DerivationTree, f64)>,
    seen: FxHashSet<u64>,
}

impl Solutions {
    fn collect(&mut self, population: &[DerivationTree], evaluations: &[Evaluation], threshold: f64) {
        for (tree, evaluation) in population.iter().zip(evaluations) {
            if evaluation.hard_fitness >= threshold && self.seen.insert(tree.structural_hash()) {
                self.found.push((tree.clone(), evaluation.fitness));
            }
        }
    }

    fn len(&self) -> usize {
        self.found.len()
    }

    /// Fittest first; ties keep discovery order.
    fn ranked(mut self) -> (Vec<DerivationTree>, FxHashSet<u64>) {
        self.found.sort_by(|a, b| b.1.total_cmp(&a.1));
        (self.found.into_iter().map(|(tree, _)| tree).collect(), self.seen)
    }
}

/// Evolves trees of `grammar` toward satisfying `objectives`.
///
/// Returns up to `desired_solutions` trees, fittest first. When the run
/// ends with fewer solutions, the configured [`TerminationPolicy`] decides
/// between an error, a best-effort top-up, or the solutions alone.
///
/// # Errors
///
/// [`EvolutionError::InvalidConfig`] for an unusable configuration,
/// [`EvolutionError::UndefinedStart`] if the start symbol has no rule,
/// [`EvolutionError::EmptyPopulation`] if nothing could be generated,
/// [`EvolutionError::Generation`] if a generator fails, and
/// [`EvolutionError::NotConverged`] under [`TerminationPolicy::Strict`].
pub fn evolve(
    grammar: &Grammar,
    objectives: &[Objective],
    config: &EvolutionConfig,
) -> Result<(Vec<DerivationTree>, EvolutionStats), EvolutionError> {
    config.validate()?;
    let start_time = Instant::now();
    let deadline = config.max_duration.map(|limit| start_time + limit);

    let start = NonTerminal::new(&config.start_symbol);
    if !grammar.contains(&start) {
        return Err(EvolutionError::UndefinedStart(start));
    }

    let mut rng = SmallRng::seed_from_u64(config.seed);
    let mut manager = PopulationManager::new(grammar, start, config.max_nodes);
    let mut evaluator = Evaluator::new(objectives);

    let mut population = manager.generate_random_population(config.population_size, &mut rng)?;
    if population.is_empty() {
        return Err(EvolutionError::EmptyPopulation);
    }
    if config.mutation.repair_suggestions {
        population = population
            .iter()
            .map(|tree| {
                let evaluation = evaluator.evaluate(tree);
                if evaluation.success {
                    tree.clone()
                } else {
                    manager.fix_individual(tree, &evaluation.failing_trees)
                }
            })
            .collect();
        manager.refill(&mut population, config.population_size, &mut rng)?;
    }

    let mut solutions = Solutions::default();
    let mut gen_stats = Vec::new();
    let mut best_fitness = f64::NEG_INFINITY;
    let mut best_generation = 0;
    let mut generation = 0usize;
    let mut converged = false;
    let mut evaluations;

    loop {
        evaluator.retain_population(&population);
        evaluations = evaluator.evaluate_population(&population, config.parallel);
        let fitness: Vec<f64> = evaluations.iter().map(|e| e.fitness).collect();
        solutions.collect(&population, &evaluations, config.success_threshold);

        let stats = FitnessSummary::from_evaluations(&evaluations);
        gen_stats.push(GenerationStats {
            generation,
            best_fitness: stats.best_fitness,
            mean_fitness: stats.mean_fitness,
            mean_hard_fitness: stats.mean_hard_fitness,
            successes: stats.successes,
            solutions: solutions.len(),
        });
        info!(
            generation,
            best_fitness = stats.best_fitness,
            mean_hard_fitness = stats.mean_hard_fitness,
            successes = stats.successes,
            solutions = solutions.len(),
            "generation evaluated"
        );
        if stats.best_fitness > best_fitness {
            best_fitness = stats.best_fitness;
            best_generation = generation;
        }

        if solutions.len() >= config.desired_solutions || fitness.iter().all(|&f| f >= 1.0) {
            converged = true;
            break;
        }
        if generation >= config.max_generations {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(generation, "time budget exhausted");
            break;
        }

        population = breed(
            &population,
            &evaluations,
            &fitness,
            grammar,
            &mut manager,
            config,
            &mut rng,
        )?;
        if population.is_empty() {
            return Err(EvolutionError::EmptyPopulation);
        }
        generation += 1;
    }

    let found = solutions.len();
    let desired = config.desired_solutions;
    let final_best = evaluations
        .iter()
        .map(|e| e.fitness)
        .fold(f64::NEG_INFINITY, f64::max);
    let (mut result, seen) = solutions.ranked();
    if found < desired {
        match config.termination {
            TerminationPolicy::Strict => {
                return Err(EvolutionError::NotConverged {
                    generations: generation,
                    found,
                    desired,
                    best_fitness: final_best,
                });
            }
            TerminationPolicy::PerfectOnly => {}
            TerminationPolicy::BestEffort => {
                let mut rest: Vec<(&DerivationTree, f64)> = population
                    .iter()
                    .zip(&evaluations)
                    .filter(|(tree, _)| !seen.contains(&tree.structural_hash()))
                    .map(|(tree, e)| (tree, e.fitness))
                    .collect();
                rest.sort_by(|a, b| b.1.total_cmp(&a.1));
                result.extend(rest.into_iter().map(|(tree, _)| tree.clone()));
            }
        }
    }
    result.truncate(desired);

    let elapsed_seconds = start_time.elapsed().as_secs_f64();
    info!(
        generations = generation,
        solutions = found,
        converged,
        elapsed_seconds,
        "evolution finished"
    );

    Ok((
        result,
        EvolutionStats {
            generations: gen_stats,
            best_fitness,
            best_generation,
            solutions: found,
            converged,
            elapsed_seconds,
        },
    ))
}

/// Next generation: elites, then offspring of tournament-selected pairs,
/// deduplicated and topped up with fresh trees.
fn breed(
    population: &[DerivationTree],
    evaluations: &[Evaluation],
    fitness: &[f64],
    grammar: &Grammar,
    manager: &mut PopulationManager<'_>,
    config: &EvolutionConfig,
    rng: &mut SmallRng,
) -> Result<Vec<DerivationTree>, GenerationError> {
    let size = config.population_size;
    let selection = select_parents(fitness, &config.selection, size, rng);

    let mut next: Vec<DerivationTree> = selection
        .elite_indices
        .iter()
        .map(|&i| population[i].clone())
        .collect();

    for &(a, b) in &selection.parent_pairs {
        let crossed = rng.gen_bool(config.crossover.crossover_rate);
        let (child1, child2) = if crossed {
            type_safe_crossover(&population[a], &population[b], rng)
        } else {
            (population[a].clone(), population[b].clone())
        };

        for (mut child, parent) in [(child1, a), (child2, b)] {
            // blame only refers to node ids of an unchanged copy
            let mut failing: &[FailingTree] = if crossed {
                &[]
            } else {
                &evaluations[parent].failing_trees
            };
            if config.mutation.repair_suggestions && !failing.is_empty() {
                let fixed = manager.fix_individual(&child, failing);
                if fixed != child {
                    child = fixed;
                    failing = &[];
                }
            }
            if rng.gen_bool(config.mutation.mutation_rate) {
                child = mutate(&child, grammar, failing, &config.mutation, config.max_nodes, rng);
            }
            next.push(child);
        }
    }

    next.truncate(size);
    manager.refill(&mut next, size, rng)?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Comparator, Constraint, Search, ValueExpr};
    use crate::grammar::{GrammarBuilder, GrammarNode};

    fn two_digits() -> Grammar {
        GrammarBuilder::new()
            .rule(
                "start",
                GrammarNode::seq([GrammarNode::non_terminal("digit"), GrammarNode::non_terminal("digit")]),
            )
            .rule("digit", GrammarNode::char_range('0', '9'))
            .build()
            .unwrap()
    }

    fn above(bound: i64) -> Objective {
        Objective::Hard(Constraint::compare(
            vec![("s".into(), Search::descendants("start"))],
            ValueExpr::var("s").int(),
            Comparator::Greater,
            ValueExpr::constant(bound),
        ))
    }

    fn small_config() -> EvolutionConfig {
        EvolutionConfig {
            population_size: 20,
            max_generations: 50,
            desired_solutions: 1,
            max_nodes: 20,
            seed: 7,
            ..EvolutionConfig::default()
        }
    }

    #[test]
    fn test_finds_solution() {
        let grammar = two_digits();
        let (solutions, stats) = evolve(&grammar, &[above(50)], &small_config()).unwrap();
        assert_eq!(solutions.len(), 1);
        assert!(solutions[0].to_text().parse::<i64>().unwrap() > 50);
        assert!(stats.converged);
        assert!(!stats.generations.is_empty());
    }

    #[test]
    fn test_same_seed_same_result() {
        let grammar = two_digits();
        let config = EvolutionConfig {
            desired_solutions: 5,
            ..small_config()
        };
        let (a, _) = evolve(&grammar, &[above(90)], &config).unwrap();
        let (b, _) = evolve(&grammar, &[above(90)], &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_strict_failure() {
        let grammar = two_digits();
        let config = EvolutionConfig {
            max_generations: 3,
            termination: TerminationPolicy::Strict,
            ..small_config()
        };
        let err = evolve(&grammar, &[above(100)], &config).unwrap_err();
        assert!(matches!(
            err,
            EvolutionError::NotConverged {
                generations: 3,
                found: 0,
                desired: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_best_effort_and_perfect_only() {
        let grammar = two_digits();
        let config = EvolutionConfig {
            max_generations: 2,
            desired_solutions: 4,
            termination: TerminationPolicy::BestEffort,
            ..small_config()
        };
        let (best_effort, stats) = evolve(&grammar, &[above(100)], &config).unwrap();
        assert_eq!(best_effort.len(), 4);
        assert!(!stats.converged);

        let config = EvolutionConfig {
            termination: TerminationPolicy::PerfectOnly,
            ..config
        };
        let (perfect, _) = evolve(&grammar, &[above(100)], &config).unwrap();
        assert!(perfect.is_empty());
    }

    #[test]
    fn test_undefined_start() {
        let grammar = two_digits();
        let config = EvolutionConfig {
            start_symbol: "nope".to_owned(),
            ..small_config()
        };
        assert!(matches!(
            evolve(&grammar, &[], &config),
            Err(EvolutionError::UndefinedStart(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(EvolutionConfig::default().validate().is_ok());
        let bad = EvolutionConfig {
            population_size: 0,
            ..EvolutionConfig::default()
        };
        assert!(matches!(bad.validate(), Err(EvolutionError::InvalidConfig(_))));
        let mut bad = EvolutionConfig::default();
        bad.mutation.mutation_rate = 1.5;
        assert!(bad.validate().is_err());
        let bad = EvolutionConfig {
            success_threshold: 0.0,
            ..EvolutionConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_from_json() {
        let config = EvolutionConfig::from_json_str(
            r#"{"population_size": 30, "termination": "Strict", "selection": {"tournament_size": 2, "elitism_rate": 0.05}}"#,
        )
        .unwrap();
        assert_eq!(config.population_size, 30);
        assert_eq!(config.termination, TerminationPolicy::Strict);
        assert_eq!(config.selection.tournament_size, 2);
        assert_eq!(config.max_generations, EvolutionConfig::default().max_generations);

        assert!(matches!(
            EvolutionConfig::from_json_str("{"),
            Err(EvolutionError::Config(_))
        ));
        assert!(matches!(
            EvolutionConfig::from_json_str(r#"{"desired_solutions": 0}"#),
            Err(EvolutionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evolution.json");
        std::fs::write(&path, r#"{"seed": 99}"#).unwrap();
        assert_eq!(EvolutionConfig::from_json_file(&path).unwrap().seed, 99);
        assert!(matches!(
            EvolutionConfig::from_json_file(dir.path().join("missing.json")),
            Err(EvolutionError::Io(_))
        ));
    }
}
