//! Optimization goals and their normalization against observed values.

// Sample sizes are far below 2^52
#![allow(clippy::cast_precision_loss)]

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constraint::expr::{Bindings, ValueExpr};
use crate::constraint::search::{Scope, Search};
use crate::constraint::combinations;
use crate::tree::DerivationTree;

/// Direction of a soft goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Goal {
    /// Larger values are better.
    Maximize,
    /// Smaller values are better.
    Minimize,
}

/// A numeric quantity to push up or down once hard constraints hold.
#[derive(Debug, Clone)]
pub struct SoftGoal {
    /// Whether to maximize or minimize.
    pub goal: Goal,
    /// Variables the expression reads.
    pub searches: Vec<(Arc<str>, Search)>,
    /// The quantity.
    pub expr: ValueExpr,
}

impl SoftGoal {
    /// Goal preferring larger values of `expr`.
    #[must_use]
    pub fn maximize(searches: Vec<(Arc<str>, Search)>, expr: ValueExpr) -> Self {
        Self {
            goal: Goal::Maximize,
            searches,
            expr,
        }
    }

    /// Goal preferring smaller values of `expr`.
    #[must_use]
    pub fn minimize(searches: Vec<(Arc<str>, Search)>, expr: ValueExpr) -> Self {
        Self {
            goal: Goal::Minimize,
            searches,
            expr,
        }
    }

    /// Mean value of the expression over all combinations of matches.
    /// `None` if nothing matched or no combination evaluated.
    #[must_use]
    pub fn value(&self, tree: &DerivationTree) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for vars in combinations(&self.searches, tree, &Scope::new()) {
            let bindings = Bindings::new(tree, &vars);
            match self.expr.eval(&bindings).and_then(|v| v.to_float()) {
                Ok(x) if x.is_finite() => {
                    sum += x;
                    count += 1;
                }
                Ok(_) => {}
                Err(error) => warn!(goal = %self, %error, "soft goal evaluation failed"),
            }
        }
        (count > 0).then(|| sum / count as f64)
    }

    /// Normalized score of `value` given the values seen so far.
    #[must_use]
    pub fn score(&self, value: f64, estimator: &RankEstimator) -> f64 {
        let rank = estimator.rank(value);
        match self.goal {
            Goal::Maximize => rank,
            Goal::Minimize => 1.0 - rank,
        }
    }
}

impl fmt::Display for SoftGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.goal {
            Goal::Maximize => "maximizing",
            Goal::Minimize => "minimizing",
        };
        write!(f, "{verb} {}", self.expr)
    }
}

/// Default number of observations an estimator keeps.
pub const DEFAULT_ESTIMATOR_CAPACITY: usize = 1024;

/// Percentile ranks against a bounded, sorted sample of observed values.
///
/// When the sample overflows, every other value is dropped, so the sample
/// keeps the shape of the whole history. Updates depend only on the order
/// of observations, which makes scores reproducible for a fixed seed.
#[derive(Debug, Clone)]
pub struct RankEstimator {
    sorted: Vec<f64>,
    capacity: usize,
}

impl Default for RankEstimator {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_ESTIMATOR_CAPACITY)
    }
}

impl RankEstimator {
    /// Estimator keeping at most `capacity` samples (at least two).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sorted: Vec::with_capacity(capacity + 1),
            capacity: capacity.max(2),
        }
    }

    /// Records one value; non-finite values are ignored.
    pub fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let at = self.sorted.partition_point(|&x| x < value);
        self.sorted.insert(at, value);
        if self.sorted.len() > self.capacity {
            let mut index = 0;
            self.sorted.retain(|_| {
                index += 1;
                index % 2 == 1
            });
        }
    }

    /// Fraction of the sample below `value`, counting ties as half.
    /// One half while nothing has been observed.
    #[must_use]
    pub fn rank(&self, value: f64) -> f64 {
        if self.sorted.is_empty() {
            return 0.5;
        }
        let below = self.sorted.partition_point(|&x| x < value);
        let not_above = self.sorted.partition_point(|&x| x <= value);
        let ties = not_above - below;
        (below as f64 + ties as f64 / 2.0) / self.sorted.len() as f64
    }

    /// Samples currently kept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    /// True until a finite value has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::NonTerminal;

    #[test]
    fn test_rank_counts_ties_half() {
        let mut estimator = RankEstimator::default();
        for x in [1.0, 2.0, 2.0, 3.0] {
            estimator.observe(x);
        }
        assert!((estimator.rank(2.0) - 0.5).abs() < 1e-12);
        assert!(estimator.rank(0.0).abs() < 1e-12);
        assert!((estimator.rank(10.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_capacity_is_bounded_and_deterministic() {
        let mut a = RankEstimator::with_capacity(16);
        let mut b = RankEstimator::with_capacity(16);
        for i in 0..1000 {
            let x = f64::from((i * 37) % 101);
            a.observe(x);
            b.observe(x);
        }
        assert!(a.len() <= 16);
        assert!((a.rank(50.0) - b.rank(50.0)).abs() < f64::EPSILON);
        // the sample still spans the observed range
        assert!(a.rank(50.0) > 0.2 && a.rank(50.0) < 0.8);
    }

    #[test]
    fn test_goal_direction() {
        let mut estimator = RankEstimator::default();
        for x in 0..10 {
            estimator.observe(f64::from(x));
        }
        let expr = ValueExpr::var("n").int();
        let up = SoftGoal::maximize(vec![("n".into(), Search::descendants("n"))], expr.clone());
        let down = SoftGoal::minimize(vec![("n".into(), Search::descendants("n"))], expr);
        assert!(up.score(9.5, &estimator) > up.score(0.5, &estimator));
        assert!(down.score(0.5, &estimator) > down.score(9.5, &estimator));
    }

    #[test]
    fn test_value_is_mean_over_matches() {
        let tree = DerivationTree::new(
            NonTerminal::new("start"),
            [
                DerivationTree::new(NonTerminal::new("n"), [DerivationTree::text("2")]),
                DerivationTree::new(NonTerminal::new("n"), [DerivationTree::text("4")]),
            ],
        );
        let goal = SoftGoal::maximize(vec![("n".into(), Search::descendants("n"))], ValueExpr::var("n").int());
        assert_eq!(goal.value(&tree), Some(3.0));
        let absent = SoftGoal::maximize(vec![("m".into(), Search::descendants("m"))], ValueExpr::var("m").int());
        assert_eq!(absent.value(&tree), None);
    }
}
