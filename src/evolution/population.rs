//! Building, repairing and refilling populations.

use rand::Rng;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::constraint::{Comparator, FailingTree, Value};
use crate::error::GenerationError;
use crate::grammar::Grammar;
use crate::parser::{ParseInput, ParseMode, Parser};
use crate::symbol::{NonTerminal, Terminal};
use crate::tree::{DerivationTree, NodeId};

/// Fresh derivations attempted per missing individual before giving up.
const DUPLICATE_BUDGET_FACTOR: usize = 10;

/// Generates individuals for one start symbol and applies repairs.
#[derive(Debug)]
pub struct PopulationManager<'g> {
    grammar: &'g Grammar,
    parser: Parser<'g>,
    start: NonTerminal,
    max_nodes: usize,
}

impl<'g> PopulationManager<'g> {
    /// Manager deriving `start` with a soft budget of `max_nodes` per tree.
    #[must_use]
    pub fn new(grammar: &'g Grammar, start: NonTerminal, max_nodes: usize) -> Self {
        Self {
            grammar,
            parser: Parser::new(grammar),
            start,
            max_nodes,
        }
    }

    /// Symbol every individual derives from.
    #[must_use]
    pub fn start(&self) -> &NonTerminal {
        &self.start
    }

    /// Generates up to `size` distinct trees.
    ///
    /// # Errors
    ///
    /// [`GenerationError`] if the start symbol is undefined or a generator
    /// fails.
    pub fn generate_random_population<R: Rng + ?Sized>(
        &self,
        size: usize,
        rng: &mut R,
    ) -> Result<Vec<DerivationTree>, GenerationError> {
        let mut population = Vec::with_capacity(size);
        self.refill(&mut population, size, rng)?;
        Ok(population)
    }

    /// Drops duplicates from `population` and tops it up to `size` with
    /// fresh trees.
    ///
    /// At most ten attempts are made per missing individual; when they are
    /// used up the population stays smaller and a warning is logged.
    ///
    /// # Errors
    ///
    /// [`GenerationError`] if the start symbol is undefined or a generator
    /// fails.
    pub fn refill<R: Rng + ?Sized>(
        &self,
        population: &mut Vec<DerivationTree>,
        size: usize,
        rng: &mut R,
    ) -> Result<(), GenerationError> {
        let mut seen = FxHashSet::default();
        population.retain(|tree| seen.insert(tree.structural_hash()));
        population.truncate(size);

        let missing = size - population.len();
        let mut attempts = missing * DUPLICATE_BUDGET_FACTOR;
        while population.len() < size && attempts > 0 {
            attempts -= 1;
            let tree = self.grammar.fuzz(&self.start, self.max_nodes, rng)?;
            if seen.insert(tree.structural_hash()) {
                population.push(tree);
            }
        }
        if population.len() < size {
            warn!(
                wanted = size,
                got = population.len(),
                "duplicate budget exhausted; population shrinks"
            );
        }
        Ok(())
    }

    /// Applies equality suggestions of `failing` to a copy of `tree`.
    ///
    /// Each suggested value is parsed as the blamed node's non-terminal and
    /// grafted in place when it parses. Read-only nodes and values that do
    /// not parse are skipped.
    #[must_use]
    pub fn fix_individual(&mut self, tree: &DerivationTree, failing: &[FailingTree]) -> DerivationTree {
        let mut repairs: Vec<(NodeId, &Value)> = failing
            .iter()
            .flat_map(|f| {
                f.suggestions
                    .iter()
                    .filter(|s| s.op == Comparator::Equal)
                    .map(move |s| (f.node, &s.value))
            })
            .filter(|&(id, _)| {
                id.index() < tree.node_count() && tree.non_terminal(id).is_some() && !tree.is_read_only(id)
            })
            .collect();
        // later nodes first, so earlier ids stay valid after a graft
        repairs.sort_by(|a, b| b.0.cmp(&a.0));
        repairs.dedup_by_key(|(id, _)| *id);

        let mut fixed = tree.clone();
        for (id, value) in repairs {
            let Some(symbol) = fixed.non_terminal(id).cloned() else {
                continue;
            };
            let Some(input) = repair_input(&fixed, id, value) else {
                continue;
            };
            match self.parser.parse_one(&input, &symbol, ParseMode::Complete) {
                Some(mut replacement) => {
                    self.grammar.populate_sources(&mut replacement);
                    fixed.replace_subtree(id, &replacement);
                }
                None => debug!(%symbol, %value, "suggested value does not parse"),
            }
        }
        fixed
    }
}

/// Raw input a node would need to produce `value`.
///
/// Integers suggested for a bit-only node keep the node's current width;
/// values that do not fit are dropped.
fn repair_input(tree: &DerivationTree, id: NodeId, value: &Value) -> Option<ParseInput<'static>> {
    let bit_only = tree
        .descendants(id)
        .filter_map(|n| tree.symbol(n).as_terminal())
        .all(Terminal::is_bit);
    match value {
        Value::Int(n) if bit_only => {
            let width = tree.bits_at(id).len();
            let bits = format!("{n:0width$b}");
            if bits.len() > width {
                return None;
            }
            ParseInput::bits(&bits)
        }
        Value::Text(s) => Some(ParseInput::owned(s.clone().into_bytes())),
        Value::Bytes(b) => Some(ParseInput::owned(b.clone())),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => Some(ParseInput::owned(value.to_string().into_bytes())),
    }
}
