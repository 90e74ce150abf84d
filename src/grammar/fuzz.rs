//! Random derivation of trees from a grammar under a node budget.
//!
//! The budget is soft: once it runs out, every choice falls back to the
//! alternative with the smallest distance to completion, so generation
//! always terminates but may overshoot by the grammar's minimal completion.
//! Repetition counts read from data can demand far more; the grammar's hard
//! node ceiling turns those into [`GenerationError::NodeLimitExceeded`].

use rand::Rng;
use rand::seq::SliceRandom;

use super::Grammar;
use super::generator::{GeneratedValue, Generator};
use super::node::{GrammarNode, NodeKind, NonTerminalRef};
use super::regex_gen;
use crate::error::GenerationError;
use crate::parser::{ParseInput, ParseMode};
use crate::symbol::{NonTerminal, Symbol, Terminal};
use crate::tree::{DerivationTree, NodeId, TreeBuilder};

/// Converts a distance or size to a signed budget.
fn budget_of(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) struct Fuzzer<'g, 'r, R: ?Sized> {
    grammar: &'g Grammar,
    rng: &'r mut R,
    builder: TreeBuilder,
    /// Non-terminals enclosing the subtree being generated, outermost first.
    context: Vec<NonTerminal>,
    max_nodes: usize,
    /// Symbol the run started from, for error reports.
    root: Option<NonTerminal>,
}

impl<'g, 'r, R: Rng + ?Sized> Fuzzer<'g, 'r, R> {
    pub(crate) fn new(grammar: &'g Grammar, rng: &'r mut R, context: Vec<NonTerminal>, max_nodes: usize) -> Self {
        Self {
            grammar,
            rng,
            builder: TreeBuilder::new(),
            context,
            max_nodes,
            root: None,
        }
    }

    pub(crate) fn run(mut self, symbol: &NonTerminal) -> Result<DerivationTree, GenerationError> {
        let reference = NonTerminalRef {
            symbol: symbol.clone(),
            sender: None,
            recipient: None,
        };
        self.root = Some(symbol.clone());
        let budget = budget_of(self.max_nodes);
        self.non_terminal(&reference, budget)?;
        Ok(self.builder.finish())
    }

    fn node(&mut self, node: &GrammarNode, budget: i64) -> Result<(), GenerationError> {
        match node.kind() {
            NodeKind::Terminal(terminal) => {
                self.check_ceiling(0)?;
                self.terminal(terminal);
                Ok(())
            }
            NodeKind::NonTerminal(reference) => self.non_terminal(reference, budget),
            NodeKind::Alternative(alternatives) => self.alternative(alternatives, budget),
            NodeKind::Concatenation(children) => self.concatenation(node.distance(), children, budget),
            NodeKind::Repetition(_) => self.repetition(node, budget),
        }
    }

    /// Fails if `upcoming` more nodes would push the tree past the ceiling.
    fn check_ceiling(&self, upcoming: usize) -> Result<(), GenerationError> {
        let limit = self.grammar.max_tree_nodes;
        if self.builder.len().saturating_add(upcoming) < limit {
            return Ok(());
        }
        Err(GenerationError::NodeLimitExceeded {
            symbol: self.root.clone().unwrap_or_else(|| NonTerminal::new("start")),
            limit,
        })
    }

    fn terminal(&mut self, terminal: &Terminal) {
        let leaf = match terminal {
            Terminal::Regex(re) => {
                let mut out = Vec::new();
                let max_repeat = u32::try_from(self.grammar.max_repetitions).unwrap_or(u32::MAX);
                regex_gen::generate(re.hir(), max_repeat, self.rng, &mut out);
                if re.is_bytes() {
                    Terminal::bytes(out)
                } else {
                    match String::from_utf8(out) {
                        Ok(text) => Terminal::text(text),
                        Err(e) => Terminal::bytes(e.into_bytes()),
                    }
                }
            }
            other => other.clone(),
        };
        self.builder.leaf(Symbol::Terminal(leaf));
    }

    fn alternative(&mut self, alternatives: &[GrammarNode], budget: i64) -> Result<(), GenerationError> {
        let in_range: Vec<&GrammarNode> = alternatives
            .iter()
            .filter(|a| budget_of(a.distance()) < budget)
            .collect();
        if let Some(choice) = in_range.choose(self.rng) {
            return self.node(choice, budget - 1);
        }
        let shortest = alternatives.iter().map(GrammarNode::distance).min();
        let candidates: Vec<&GrammarNode> = alternatives
            .iter()
            .filter(|a| Some(a.distance()) == shortest)
            .collect();
        match candidates.choose(self.rng) {
            Some(choice) => self.node(choice, 0),
            None => Ok(()),
        }
    }

    fn concatenation(&mut self, distance: usize, children: &[GrammarNode], mut budget: i64) -> Result<(), GenerationError> {
        let mut reserved = budget_of(distance);
        for child in children {
            let before = self.builder.len();
            reserved = reserved.saturating_sub(budget_of(child.distance()));
            if budget_of(child.distance()) >= budget {
                self.node(child, 0)?;
            } else {
                self.node(child, budget.saturating_sub(reserved))?;
            }
            budget -= budget_of(self.builder.len() - before);
        }
        Ok(())
    }

    fn repetition(&mut self, node: &GrammarNode, mut budget: i64) -> Result<(), GenerationError> {
        let NodeKind::Repetition(rep) = node.kind() else {
            return Ok(());
        };
        let (min, max) = rep
            .resolve(|source| self.builder.last_finished(source))
            .unwrap_or_else(|| {
                tracing::debug!(repetition = %node, "dynamic bound unavailable, using fixed parts");
                let min = rep.min().fixed().unwrap_or(0);
                (min, Some(min))
            });
        // each copy adds at least one node
        self.check_ceiling(min)?;
        let upper = max.unwrap_or_else(|| min.saturating_add(self.grammar.max_repetitions));
        let goal = self.rng.gen_range(min..=upper.max(min));

        let child = rep.node();
        let mut reserved = budget_of(node.distance());
        for count in 0..goal {
            let before = self.builder.len();
            if budget_of(child.distance()) >= budget {
                if count >= min {
                    break;
                }
                self.node(child, 0)?;
            } else {
                reserved = reserved.saturating_sub(budget_of(child.distance()));
                self.node(child, budget.saturating_sub(reserved))?;
            }
            budget -= budget_of(self.builder.len() - before);
        }
        Ok(())
    }

    fn non_terminal(&mut self, reference: &NonTerminalRef, budget: i64) -> Result<(), GenerationError> {
        let symbol = &reference.symbol;
        if let Some(generator) = self.grammar.generator(symbol) {
            if !generator.dependencies().iter().any(|d| self.on_path(d)) {
                let tree = self.generate(symbol, generator)?;
                let id = self.builder.graft(&tree);
                self.builder
                    .set_parties(id, reference.sender.clone(), reference.recipient.clone());
                return Ok(());
            }
        }

        let body = self
            .grammar
            .rule(symbol)
            .ok_or_else(|| GenerationError::UndefinedNonTerminal(symbol.clone()))?;
        self.check_ceiling(0)?;
        let id = self.builder.open(Symbol::NonTerminal(symbol.clone()));
        self.builder
            .set_parties(id, reference.sender.clone(), reference.recipient.clone());
        self.node(body, budget - 1)?;
        self.builder.close();
        Ok(())
    }

    fn on_path(&self, symbol: &NonTerminal) -> bool {
        self.context.contains(symbol) || self.builder.open_symbols().any(|s| s == symbol)
    }

    /// Fuzzes the generator's dependencies, runs it and parses the result
    /// back under `symbol`.
    fn generate(&mut self, symbol: &NonTerminal, generator: &Generator) -> Result<DerivationTree, GenerationError> {
        let mut context = self.context.clone();
        context.extend(self.builder.open_symbols().cloned());
        context.push(symbol.clone());

        let mut sources = Vec::with_capacity(generator.dependencies().len());
        for dependency in generator.dependencies() {
            let fuzzer = Fuzzer::new(self.grammar, &mut *self.rng, context.clone(), self.max_nodes);
            sources.push(fuzzer.run(dependency)?);
        }

        let value = generator
            .produce(&sources)
            .map_err(|message| GenerationError::GeneratorFailed {
                symbol: symbol.clone(),
                message,
            })?;
        let mut tree = self
            .grammar
            .parse_value(&value, symbol)
            .ok_or_else(|| GenerationError::GeneratedValueUnparseable {
                symbol: symbol.clone(),
                value: value.to_string(),
            })?;
        for child in tree.children(NodeId::ROOT).to_vec() {
            tree.set_all_read_only(child, true);
        }
        tree.set_sources(NodeId::ROOT, sources);
        Ok(tree)
    }
}

impl Grammar {
    /// Parses a generated value as a complete `symbol`.
    pub(crate) fn parse_value(&self, value: &GeneratedValue, symbol: &NonTerminal) -> Option<DerivationTree> {
        let input = match value {
            GeneratedValue::Text(s) => ParseInput::text(s),
            GeneratedValue::Bytes(b) => ParseInput::bytes(b),
            GeneratedValue::Int(n) => ParseInput::owned(n.to_string().into_bytes()),
        };
        self.parse(input, symbol, ParseMode::Complete).next()
    }
}
