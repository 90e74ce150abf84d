//! Parent selection.
//!
//! Elitism carries the fittest individuals over unchanged; the remaining
//! parents are picked by tournament.

// Elite counts are computed in floating point
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration for selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Number of individuals competing in each tournament.
    pub tournament_size: usize,
    /// Fraction of the population carried over unchanged.
    pub elitism_rate: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            tournament_size: 5,
            elitism_rate: 0.1,
        }
    }
}

impl SelectionConfig {
    /// Number of elites for a population of `size`: at least one whenever
    /// the rate is positive.
    #[must_use]
    pub fn elite_count(&self, size: usize) -> usize {
        if self.elitism_rate <= 0.0 || size == 0 {
            return 0;
        }
        ((self.elitism_rate * size as f64) as usize).clamp(1, size)
    }
}

/// Indices chosen for the next generation.
#[derive(Debug)]
pub struct SelectionResult {
    /// Individuals carried over unchanged, fittest first.
    pub elite_indices: Vec<usize>,
    /// Parents for recombination; each pair yields two offspring.
    pub parent_pairs: Vec<(usize, usize)>,
}

/// Selects elites and enough parent pairs to fill a population of
/// `target_size`.
#[must_use]
pub fn select_parents<R: Rng + ?Sized>(
    fitness: &[f64],
    config: &SelectionConfig,
    target_size: usize,
    rng: &mut R,
) -> SelectionResult {
    let elite_count = config.elite_count(target_size).min(fitness.len());
    let elite_indices = select_elite(fitness, elite_count);

    let pairs_needed = target_size.saturating_sub(elite_count).div_ceil(2);
    let mut parent_pairs = Vec::with_capacity(pairs_needed);
    if !fitness.is_empty() {
        for _ in 0..pairs_needed {
            let p1 = tournament_select(fitness, config.tournament_size, rng);
            let p2 = tournament_select(fitness, config.tournament_size, rng);
            parent_pairs.push((p1, p2));
        }
    }

    SelectionResult {
        elite_indices,
        parent_pairs,
    }
}

/// The `count` fittest indices, best first. Ties keep population order.
fn select_elite(fitness: &[f64], count: usize) -> Vec<usize> {
    let mut indexed: Vec<(usize, f64)> = fitness.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    indexed.into_iter().take(count).map(|(i, _)| i).collect()
}

/// Samples `k` individuals uniformly and returns the fittest.
fn tournament_select<R: Rng + ?Sized>(fitness: &[f64], k: usize, rng: &mut R) -> usize {
    let pop_size = fitness.len();
    let k = k.clamp(1, pop_size.max(1));
    let mut best_idx = rng.gen_range(0..pop_size);
    let mut best_fitness = fitness[best_idx];

    for _ in 1..k {
        let idx = rng.gen_range(0..pop_size);
        if fitness[idx] > best_fitness {
            best_idx = idx;
            best_fitness = fitness[idx];
        }
    }

    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_tournament_favours_solved_trees() {
        let mut rng = SmallRng::seed_from_u64(42);
        // hard-constraint shares: one tree satisfies all four constraints
        let fitness = [0.25, 0.5, 1.0, 0.0, 0.75];

        let mut wins = [0usize; 5];
        for _ in 0..1000 {
            wins[tournament_select(&fitness, 3, &mut rng)] += 1;
        }

        assert!(wins[2] > wins[4]);
        assert!(wins[4] > wins[3]);
    }

    #[test]
    fn test_tied_solutions_keep_population_order() {
        let fitness = [1.0, 0.5, 1.0, 1.0];
        assert_eq!(select_elite(&fitness, 2), vec![0, 2]);
        assert_eq!(select_elite(&fitness, 9), vec![0, 2, 3, 1]);
    }

    #[test]
    fn test_elite_count() {
        let config = SelectionConfig {
            tournament_size: 3,
            elitism_rate: 0.1,
        };
        assert_eq!(config.elite_count(50), 5);
        assert_eq!(config.elite_count(5), 1);
        assert_eq!(config.elite_count(0), 0);
        let none = SelectionConfig {
            elitism_rate: 0.0,
            ..config
        };
        assert_eq!(none.elite_count(50), 0);
    }

    #[test]
    fn test_select_parents_for_refilled_population() {
        let mut rng = SmallRng::seed_from_u64(123);
        // four survivors, seven slots in the next generation
        let fitness = [0.2, 1.0, 0.6, 0.9];
        let config = SelectionConfig {
            tournament_size: 2,
            elitism_rate: 0.3,
        };

        let result = select_parents(&fitness, &config, 7, &mut rng);

        assert_eq!(result.elite_indices, vec![1, 3]);
        assert_eq!(result.parent_pairs.len(), 3);
        assert!(result.parent_pairs.iter().all(|&(a, b)| a < 4 && b < 4));
    }

    #[test]
    fn test_select_parents_empty() {
        let mut rng = SmallRng::seed_from_u64(1);
        let result = select_parents(&[], &SelectionConfig::default(), 10, &mut rng);
        assert!(result.elite_indices.is_empty());
        assert!(result.parent_pairs.is_empty());
    }
}
