//! Fitness of a tree against a constraint.

// Counts are small; the ratios are scores, not exact quantities
#![allow(clippy::cast_precision_loss)]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constraint::Comparator;
use crate::constraint::value::Value;
use crate::tree::NodeId;

/// Which operand of a comparison a failing node was read by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Left of the comparator.
    Left,
    /// Right of the comparator.
    Right,
}

/// A value that would make a failing comparison hold if the failing node
/// produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// The comparison that failed.
    pub op: Comparator,
    /// The value the node should have.
    pub value: Value,
    /// Operand the node was read by.
    pub side: Side,
}

/// A node blamed for a failed constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct FailingTree {
    /// The node, in the evaluated tree.
    pub node: NodeId,
    /// Rendering of the constraint that failed.
    pub constraint: Arc<str>,
    /// Repairs for this node, possibly none.
    pub suggestions: Vec<Suggestion>,
}

/// How well a tree satisfies a constraint.
///
/// `solved` of `total` checks passed; `partial` carries the credit of
/// failed checks that came close. The score stays below one unless every
/// check passed.
#[derive(Debug, Clone, PartialEq)]
pub struct Fitness {
    /// Checks that passed.
    pub solved: usize,
    /// Checks performed.
    pub total: usize,
    /// Summed credit of failed checks, each below one.
    pub partial: f64,
    /// Whether the constraint holds.
    pub success: bool,
    /// Nodes blamed for failed checks.
    pub failing_trees: Vec<FailingTree>,
}

impl Fitness {
    /// A single check that passed.
    #[must_use]
    pub fn solved() -> Self {
        Self {
            solved: 1,
            total: 1,
            partial: 0.0,
            success: true,
            failing_trees: Vec::new(),
        }
    }

    /// Nothing checked yet.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            solved: 0,
            total: 0,
            partial: 0.0,
            success: true,
            failing_trees: Vec::new(),
        }
    }

    /// Score in `[0, 1]`.
    #[must_use]
    pub fn score(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        if self.success && self.solved >= self.total {
            return 1.0;
        }
        ((self.solved as f64 + self.partial) / self.total as f64).min(1.0)
    }

    /// Adds the counts and failing trees of `other`. Success is left to
    /// the caller.
    pub(crate) fn absorb(&mut self, other: Fitness) {
        self.solved += other.solved;
        self.total += other.total;
        self.partial += other.partial;
        self.failing_trees.extend(other.failing_trees);
    }

    /// Marks every check as passed.
    pub(crate) fn saturate(&mut self) {
        self.solved = self.total;
        self.partial = 0.0;
        self.success = true;
    }
}
