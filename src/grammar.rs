//! Grammars: rules, generators, priming and generation.
//!
//! A [`Grammar`] is assembled with a [`GrammarBuilder`], which validates
//! every reference, primes distances to completion and compiles the rule
//! table used by the parser. After `build` the grammar is immutable and can
//! be shared freely across threads.
//!
//! # Example
//!
//! ```
//! use evogram::{GrammarBuilder, GrammarNode, NonTerminal, ParseInput, ParseMode};
//! use rand::SeedableRng;
//! use rand::rngs::SmallRng;
//!
//! let grammar = GrammarBuilder::new()
//!     .rule("start", GrammarNode::plus(GrammarNode::non_terminal("digit")))
//!     .rule("digit", GrammarNode::char_range('0', '9'))
//!     .build()
//!     .unwrap();
//!
//! let mut rng = SmallRng::seed_from_u64(42);
//! let tree = grammar.fuzz(grammar.start(), 20, &mut rng).unwrap();
//! let text = tree.to_text();
//!
//! let parsed = grammar
//!     .parse(ParseInput::text(&text), grammar.start(), ParseMode::Complete)
//!     .next()
//!     .unwrap();
//! assert_eq!(parsed, tree);
//! ```

mod analysis;
mod coverage;
mod fuzz;
mod generator;
mod node;
mod regex_gen;

pub use coverage::{KPath, tree_k_paths};
pub use generator::{GeneratedValue, Generator};
pub use node::{Bound, DynamicBound, GrammarNode, INFINITE_DISTANCE, NodeKind, NonTerminalRef, Repetition};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::error::{GenerationError, GrammarError, GrammarResult};
use crate::parser::RuleTable;
use crate::symbol::{NonTerminal, Terminal};
use crate::tree::{DerivationTree, NodeId};

/// Default cap on extra copies produced for unbounded repetitions.
pub const DEFAULT_MAX_REPETITIONS: usize = 5;

/// Default hard ceiling on the nodes of one generated tree.
pub const DEFAULT_MAX_TREE_NODES: usize = 100_000;

/// Collects rules and generators, then validates them into a [`Grammar`].
#[derive(Debug)]
pub struct GrammarBuilder {
    rules: BTreeMap<NonTerminal, GrammarNode>,
    generators: BTreeMap<NonTerminal, Generator>,
    start: NonTerminal,
    max_repetitions: usize,
    max_tree_nodes: usize,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            generators: BTreeMap::new(),
            start: NonTerminal::new("start"),
            max_repetitions: DEFAULT_MAX_REPETITIONS,
            max_tree_nodes: DEFAULT_MAX_TREE_NODES,
        }
    }
}

impl GrammarBuilder {
    /// Empty builder whose start symbol is `<start>`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the rule for `name`.
    #[must_use]
    pub fn rule(mut self, name: impl Into<NonTerminal>, body: GrammarNode) -> Self {
        self.rules.insert(name.into(), body);
        self
    }

    /// Attaches a generator to `name`.
    #[must_use]
    pub fn generator(mut self, name: impl Into<NonTerminal>, generator: Generator) -> Self {
        self.generators.insert(name.into(), generator);
        self
    }

    /// Sets the start symbol.
    #[must_use]
    pub fn start(mut self, name: impl Into<NonTerminal>) -> Self {
        self.start = name.into();
        self
    }

    /// Sets the cap on extra copies of unbounded repetitions during
    /// generation.
    #[must_use]
    pub fn max_repetitions(mut self, max: usize) -> Self {
        self.max_repetitions = max;
        self
    }

    /// Sets the hard ceiling on nodes per generated tree. Unlike the soft
    /// budget passed to [`Grammar::fuzz`], exceeding it is an error.
    #[must_use]
    pub fn max_tree_nodes(mut self, max: usize) -> Self {
        self.max_tree_nodes = max;
        self
    }

    /// Validates, primes and compiles the grammar.
    ///
    /// # Errors
    ///
    /// - [`GrammarError::UndefinedStart`] / [`GrammarError::UndefinedNonTerminal`]
    ///   for dangling references.
    /// - [`GrammarError::InvalidRepetition`] for inconsistent bounds.
    /// - [`GrammarError::GeneratorWithoutRule`] / [`GrammarError::GeneratorCycle`]
    ///   for bad generators.
    /// - [`GrammarError::Unproductive`] for rules that cannot derive a
    ///   finite string.
    pub fn build(self) -> GrammarResult<Grammar> {
        let Self {
            mut rules,
            generators,
            start,
            max_repetitions,
            max_tree_nodes,
        } = self;

        analysis::validate(&rules, &generators, &start)?;
        let distances = analysis::prime(&mut rules);
        if let Some((symbol, _)) = distances.iter().filter(|(_, d)| **d == INFINITE_DISTANCE).min() {
            return Err(GrammarError::Unproductive(symbol.clone()));
        }

        let reachable = analysis::reachable(&rules, &generators, &start);
        for symbol in rules.keys().filter(|s| !reachable.contains(*s)) {
            warn!(%symbol, "rule is unreachable from the start symbol");
        }

        let table = Arc::new(RuleTable::compile(&rules));
        Ok(Grammar {
            rules,
            distances,
            generators,
            start,
            max_repetitions,
            max_tree_nodes,
            table,
        })
    }
}

/// A validated, primed grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: BTreeMap<NonTerminal, GrammarNode>,
    distances: FxHashMap<NonTerminal, usize>,
    generators: BTreeMap<NonTerminal, Generator>,
    start: NonTerminal,
    max_repetitions: usize,
    max_tree_nodes: usize,
    table: Arc<RuleTable>,
}

impl Grammar {
    /// The start symbol.
    #[must_use]
    pub fn start(&self) -> &NonTerminal {
        &self.start
    }

    /// The rule body of `symbol`.
    #[must_use]
    pub fn rule(&self, symbol: &NonTerminal) -> Option<&GrammarNode> {
        self.rules.get(symbol)
    }

    /// All rules, ordered by name.
    pub fn rules(&self) -> impl Iterator<Item = (&NonTerminal, &GrammarNode)> + '_ {
        self.rules.iter()
    }

    /// Whether `symbol` has a rule.
    #[must_use]
    pub fn contains(&self, symbol: &NonTerminal) -> bool {
        self.rules.contains_key(symbol)
    }

    /// Generator attached to `symbol`.
    #[must_use]
    pub fn generator(&self, symbol: &NonTerminal) -> Option<&Generator> {
        self.generators.get(symbol)
    }

    /// Distance to completion of `symbol`.
    #[must_use]
    pub fn distance(&self, symbol: &NonTerminal) -> usize {
        self.distances.get(symbol).copied().unwrap_or(INFINITE_DISTANCE)
    }

    pub(crate) fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Generates a random tree for `symbol` with roughly `max_nodes` nodes.
    ///
    /// # Errors
    ///
    /// [`GenerationError`] if `symbol` is undefined or a generator fails.
    pub fn fuzz<R: Rng + ?Sized>(
        &self,
        symbol: &NonTerminal,
        max_nodes: usize,
        rng: &mut R,
    ) -> Result<DerivationTree, GenerationError> {
        self.fuzz_in_context(symbol, &[], max_nodes, rng)
    }

    /// Like [`Self::fuzz`], for a subtree whose ancestors carry `context`
    /// (outermost first). Generators depending on any of them are skipped.
    ///
    /// # Errors
    ///
    /// [`GenerationError`] if `symbol` is undefined or a generator fails.
    pub fn fuzz_in_context<R: Rng + ?Sized>(
        &self,
        symbol: &NonTerminal,
        context: &[NonTerminal],
        max_nodes: usize,
        rng: &mut R,
    ) -> Result<DerivationTree, GenerationError> {
        if !self.contains(symbol) {
            return Err(GenerationError::UndefinedNonTerminal(symbol.clone()));
        }
        fuzz::Fuzzer::new(self, rng, context.to_vec(), max_nodes).run(symbol)
    }

    /// Marks the descendants of every generator-owned node read-only, as if
    /// the tree had been produced by [`Self::fuzz`].
    pub fn populate_sources(&self, tree: &mut DerivationTree) {
        let owned: Vec<NodeId> = tree
            .node_ids()
            .filter(|&id| tree.non_terminal(id).is_some_and(|nt| self.generators.contains_key(nt)))
            .collect();
        for id in owned {
            for child in tree.children(id).to_vec() {
                tree.set_all_read_only(child, true);
            }
        }
    }

    fn terminals(&self) -> Vec<&Terminal> {
        let mut found = Vec::new();
        for body in self.rules.values() {
            body.walk(&mut |node| {
                if let NodeKind::Terminal(t) = node.kind() {
                    found.push(t);
                }
            });
        }
        found
    }

    /// Whether any rule uses a bit terminal.
    #[must_use]
    pub fn contains_bits(&self) -> bool {
        self.terminals().into_iter().any(Terminal::is_bit)
    }

    /// Whether any rule uses a byte terminal.
    #[must_use]
    pub fn contains_bytes(&self) -> bool {
        self.terminals().into_iter().any(Terminal::is_bytes)
    }

    /// Whether any rule uses a text terminal.
    #[must_use]
    pub fn contains_text(&self) -> bool {
        self.terminals()
            .into_iter()
            .any(|t| !t.is_bit() && !t.is_bytes())
    }

    /// Rules that cannot be reached from the start symbol.
    #[must_use]
    pub fn unreachable_rules(&self) -> BTreeSet<NonTerminal> {
        let reachable = analysis::reachable(&self.rules, &self.generators, &self.start);
        self.rules
            .keys()
            .filter(|s| !reachable.contains(*s))
            .cloned()
            .collect()
    }
}
