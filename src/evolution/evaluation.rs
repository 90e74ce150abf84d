//! Scoring individuals against hard constraints and soft goals.
//!
//! Hard constraints decide success. Soft goals only break ties among trees
//! that already satisfy every hard constraint: while any hard constraint
//! fails, the soft share of the score is withheld, so a tree that fails a
//! hard constraint never outranks one that satisfies them all.

// Objective counts are tiny
#![allow(clippy::cast_precision_loss)]

use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::constraint::{Constraint, FailingTree, Fitness, RankEstimator, Scope, SoftGoal};
use crate::tree::DerivationTree;

/// Something the search optimizes for.
#[derive(Debug, Clone)]
pub enum Objective {
    /// Must hold for a tree to count as a solution.
    Hard(Constraint),
    /// Preferred direction for a numeric quantity.
    Soft(SoftGoal),
}

impl From<Constraint> for Objective {
    fn from(constraint: Constraint) -> Self {
        Self::Hard(constraint)
    }
}

impl From<SoftGoal> for Objective {
    fn from(goal: SoftGoal) -> Self {
        Self::Soft(goal)
    }
}

/// The verdict on one individual.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Combined score in `[0, 1]`.
    pub fitness: f64,
    /// Mean score over hard constraints alone; one if there are none.
    pub hard_fitness: f64,
    /// Every hard constraint holds.
    pub success: bool,
    /// Nodes blamed by failed hard constraints.
    pub failing_trees: Vec<FailingTree>,
}

/// How close one population came, split into its hard and combined scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitnessSummary {
    /// Best combined score.
    pub best_fitness: f64,
    /// Mean combined score.
    pub mean_fitness: f64,
    /// Best score over hard constraints alone.
    pub best_hard_fitness: f64,
    /// Mean score over hard constraints alone.
    pub mean_hard_fitness: f64,
    /// Individuals satisfying every hard constraint, duplicates included.
    pub successes: usize,
}

impl FitnessSummary {
    /// Summarizes `evaluations`; all zero for an empty population.
    #[must_use]
    pub fn from_evaluations(evaluations: &[Evaluation]) -> Self {
        if evaluations.is_empty() {
            return Self {
                best_fitness: 0.0,
                mean_fitness: 0.0,
                best_hard_fitness: 0.0,
                mean_hard_fitness: 0.0,
                successes: 0,
            };
        }
        let n = evaluations.len() as f64;
        let best = |score: fn(&Evaluation) -> f64| evaluations.iter().map(score).fold(f64::NEG_INFINITY, f64::max);
        let mean = |score: fn(&Evaluation) -> f64| evaluations.iter().map(score).sum::<f64>() / n;
        Self {
            best_fitness: best(|e| e.fitness),
            mean_fitness: mean(|e| e.fitness),
            best_hard_fitness: best(|e| e.hard_fitness),
            mean_hard_fitness: mean(|e| e.hard_fitness),
            successes: evaluations.iter().filter(|e| e.success).count(),
        }
    }
}

/// Evaluates trees against a fixed list of objectives.
///
/// Hard-constraint results are memoized per constraint and tree hash, so
/// individuals that survive unchanged across generations are not
/// re-evaluated. [`Evaluator::retain_population`] drops results for trees
/// that are no longer alive. Soft goals are normalized by one [`RankEstimator`] each,
/// fed with every value observed during population evaluation.
#[derive(Debug)]
pub struct Evaluator<'o> {
    hard: Vec<&'o Constraint>,
    soft: Vec<&'o SoftGoal>,
    cache: DashMap<(usize, u64), Fitness>,
    estimators: Vec<RankEstimator>,
}

impl<'o> Evaluator<'o> {
    /// Splits `objectives` into hard constraints and soft goals.
    #[must_use]
    pub fn new(objectives: &'o [Objective]) -> Self {
        let mut hard = Vec::new();
        let mut soft = Vec::new();
        for objective in objectives {
            match objective {
                Objective::Hard(constraint) => hard.push(constraint),
                Objective::Soft(goal) => soft.push(goal),
            }
        }
        Self {
            estimators: vec![RankEstimator::default(); soft.len()],
            hard,
            soft,
            cache: DashMap::new(),
        }
    }

    /// Number of memoized constraint results.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Forgets memoized results of every tree not in `population`.
    pub fn retain_population(&self, population: &[DerivationTree]) {
        let live: FxHashSet<u64> = population.iter().map(DerivationTree::structural_hash).collect();
        self.cache.retain(|&(_, hash), _| live.contains(&hash));
    }

    /// Hard-constraint part of the evaluation.
    fn hard_fitness(&self, tree: &DerivationTree) -> (f64, bool, Vec<FailingTree>) {
        if self.hard.is_empty() {
            return (1.0, true, Vec::new());
        }
        let hash = tree.structural_hash();
        let mut total = 0.0;
        let mut success = true;
        let mut failing_trees = Vec::new();
        for (index, constraint) in self.hard.iter().enumerate() {
            let fitness = self
                .cache
                .entry((index, hash))
                .or_insert_with(|| constraint.fitness(tree, &Scope::new()))
                .clone();
            total += fitness.score();
            success &= fitness.success;
            failing_trees.extend(fitness.failing_trees);
        }
        (total / self.hard.len() as f64, success, failing_trees)
    }

    fn soft_values(&self, tree: &DerivationTree) -> Vec<Option<f64>> {
        self.soft.iter().map(|goal| goal.value(tree)).collect()
    }

    fn combine(&self, hard_fitness: f64, success: bool, failing_trees: Vec<FailingTree>, soft: &[Option<f64>]) -> Evaluation {
        let h = self.hard.len() as f64;
        let s = self.soft.len() as f64;
        let fitness = if self.soft.is_empty() {
            hard_fitness
        } else {
            let soft_score = self
                .soft
                .iter()
                .zip(&self.estimators)
                .zip(soft)
                .map(|((goal, estimator), value)| value.map_or(0.0, |v| goal.score(v, estimator)))
                .sum::<f64>()
                / s;
            if self.hard.is_empty() {
                soft_score
            } else if hard_fitness < 1.0 {
                hard_fitness * h / (h + s)
            } else {
                (h + soft_score * s) / (h + s)
            }
        };
        Evaluation {
            fitness,
            hard_fitness,
            success,
            failing_trees,
        }
    }

    /// Evaluates one tree. Soft goals are scored against the values seen so
    /// far without recording this tree's.
    #[must_use]
    pub fn evaluate(&self, tree: &DerivationTree) -> Evaluation {
        let (hard, success, failing) = self.hard_fitness(tree);
        let soft = self.soft_values(tree);
        self.combine(hard, success, failing, &soft)
    }

    /// Evaluates a whole population, optionally in parallel.
    ///
    /// Soft values are recorded in population order before scoring, so
    /// results do not depend on thread scheduling.
    pub fn evaluate_population(&mut self, population: &[DerivationTree], parallel: bool) -> Vec<Evaluation> {
        let this = &*self;
        let raw: Vec<_> = if parallel {
            population
                .par_iter()
                .map(|tree| (this.hard_fitness(tree), this.soft_values(tree)))
                .collect()
        } else {
            population
                .iter()
                .map(|tree| (this.hard_fitness(tree), this.soft_values(tree)))
                .collect()
        };
        for (_, soft) in &raw {
            for (estimator, value) in self.estimators.iter_mut().zip(soft) {
                if let Some(v) = value {
                    estimator.observe(*v);
                }
            }
        }
        raw.into_iter()
            .map(|((hard, success, failing), soft)| self.combine(hard, success, failing, &soft))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Comparator, Search, ValueExpr};
    use crate::symbol::NonTerminal;

    fn number(n: &str) -> DerivationTree {
        DerivationTree::new(NonTerminal::new("start"), [DerivationTree::text(n)])
    }

    fn above(bound: i64) -> Objective {
        Objective::Hard(Constraint::compare(
            vec![("n".into(), Search::descendants("start"))],
            ValueExpr::var("n").int(),
            Comparator::Greater,
            ValueExpr::constant(bound),
        ))
    }

    fn bigger() -> Objective {
        Objective::Soft(SoftGoal::maximize(
            vec![("n".into(), Search::descendants("start"))],
            ValueExpr::var("n").int(),
        ))
    }

    #[test]
    fn test_hard_only() {
        let objectives = [above(50)];
        let mut evaluator = Evaluator::new(&objectives);
        let results = evaluator.evaluate_population(&[number("73"), number("20")], false);
        assert!(results[0].success);
        assert!((results[0].fitness - 1.0).abs() < f64::EPSILON);
        assert!(!results[1].success);
        assert!(results[1].fitness < 1.0);
        assert_eq!(results[1].failing_trees.len(), 1);
    }

    #[test]
    fn test_summary_splits_hard_and_combined() {
        let objectives = [above(50), bigger()];
        let mut evaluator = Evaluator::new(&objectives);
        let results = evaluator.evaluate_population(&[number("73"), number("90"), number("20")], false);
        let summary = FitnessSummary::from_evaluations(&results);
        assert_eq!(summary.successes, 2);
        assert!((summary.best_hard_fitness - 1.0).abs() < f64::EPSILON);
        assert!(summary.mean_hard_fitness >= 2.0 / 3.0);
        assert!(summary.mean_hard_fitness < 1.0);
        assert!(summary.mean_fitness <= summary.best_fitness);
        assert!(summary.best_fitness <= 1.0);

        let empty = FitnessSummary::from_evaluations(&[]);
        assert_eq!(empty.successes, 0);
        assert!(empty.best_fitness.abs() < f64::EPSILON);
    }

    #[test]
    fn test_cache_is_reused() {
        let objectives = [above(50), above(10)];
        let mut evaluator = Evaluator::new(&objectives);
        let population = [number("73"), number("73"), number("5")];
        evaluator.evaluate_population(&population, true);
        // two distinct trees, two constraints
        assert_eq!(evaluator.cached(), 4);
        evaluator.evaluate_population(&population, true);
        assert_eq!(evaluator.cached(), 4);
    }

    #[test]
    fn test_cache_follows_live_population() {
        let objectives = [above(50), above(10)];
        let mut evaluator = Evaluator::new(&objectives);
        for generation in 0..50 {
            // every generation keeps one survivor and breeds nine new trees
            let population: Vec<_> = std::iter::once(number("73"))
                .chain((0..9).map(|i| number(&(generation * 9 + i + 100).to_string())))
                .collect();
            evaluator.retain_population(&population);
            evaluator.evaluate_population(&population, true);
            assert!(evaluator.cached() <= population.len() * objectives.len());
        }
        assert_eq!(evaluator.cached(), 20);

        evaluator.retain_population(&[number("73")]);
        assert_eq!(evaluator.cached(), 2);
    }

    #[test]
    fn test_hard_dominates_soft() {
        let objectives = [above(50), bigger()];
        let mut evaluator = Evaluator::new(&objectives);
        let population = [number("51"), number("50"), number("49"), number("1")];
        let results = evaluator.evaluate_population(&population, false);
        // "51" satisfies the hard constraint with the smallest soft value;
        // it still beats every tree that fails it
        for failed in &results[1..] {
            assert!(results[0].fitness > failed.fitness);
        }
    }

    #[test]
    fn test_soft_breaks_ties() {
        let objectives = [above(50), bigger()];
        let mut evaluator = Evaluator::new(&objectives);
        let results = evaluator.evaluate_population(&[number("60"), number("90")], false);
        assert!(results[0].success && results[1].success);
        assert!(results[1].fitness > results[0].fitness);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let objectives = [above(50), bigger()];
        let population: Vec<_> = (0..40).map(|i| number(&(i * 7 % 100).to_string())).collect();
        let sequential = Evaluator::new(&objectives).evaluate_population(&population, false);
        let parallel = Evaluator::new(&objectives).evaluate_population(&population, true);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_no_objectives() {
        let mut evaluator = Evaluator::new(&[]);
        let results = evaluator.evaluate_population(&[number("1")], false);
        assert!(results[0].success);
        assert!((results[0].fitness - 1.0).abs() < f64::EPSILON);
    }
}
