//! The Earley recognizer and lazy tree extraction.
//!
//! Columns are indexed by bit offset from the start of the input. Bit
//! terminals scan one column ahead; text, byte and regex terminals scan only
//! from byte-aligned columns and jump eight columns per byte.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::chart::{Column, Cover, ParseNode, ParseState, Rejected};
use super::rules::{Alt, Label, Rule, RuleId, RuleSink, RuleTable, Sym, repetition_alternatives};
use super::{ParseInput, ParseMode, ParserConfig};
use crate::symbol::{NonTerminal, Terminal};
use crate::tree::DerivationTree;

/// Rules materialized while parsing, for repetitions whose bounds depend on
/// earlier input.
#[derive(Debug)]
struct TempRules {
    base: usize,
    rules: Vec<Rule>,
    by_bounds: FxHashMap<(usize, usize, Option<usize>), RuleId>,
}

impl RuleSink for TempRules {
    fn reserve(&mut self) -> RuleId {
        self.rules.push(Rule {
            label: Label::Implicit,
            alternatives: Vec::new(),
        });
        RuleId(self.base + self.rules.len() - 1)
    }

    fn define(&mut self, id: RuleId, alternatives: Vec<Vec<Sym>>) {
        if let Some(rule) = self.rules.get_mut(id.0 - self.base) {
            rule.alternatives = alternatives.into_iter().map(Alt::new).collect();
        }
    }
}

/// A lazy sequence of parse trees.
///
/// Created by [`crate::Grammar::parse`]. The chart is built one column per
/// step and trees are produced only once the final column is reached, one
/// per call to `next`. Equal trees are yielded once.
#[derive(Debug)]
pub struct Parse<'a> {
    table: &'a RuleTable,
    temp: TempRules,
    input: ParseInput<'a>,
    mode: ParseMode,
    config: ParserConfig,
    deadline: Option<Instant>,
    columns: Vec<Option<Box<Column>>>,
    next_column: usize,
    /// Highest column that holds any state.
    frontier: usize,
    pending: VecDeque<DerivationTree>,
    yielded: FxHashSet<u64>,
    max_bit: Option<usize>,
    finished: bool,
}

impl<'a> Parse<'a> {
    pub(crate) fn new(
        table: &'a RuleTable,
        input: ParseInput<'a>,
        start: &NonTerminal,
        mode: ParseMode,
        config: ParserConfig,
    ) -> Self {
        let len = input.bit_len();
        let mut columns = Vec::with_capacity(len + 1);
        columns.resize_with(len + 1, || None);
        let mut parse = Self {
            table,
            temp: TempRules {
                base: table.len(),
                rules: Vec::new(),
                by_bounds: FxHashMap::default(),
            },
            input,
            mode,
            config,
            deadline: config.timeout.map(|t| Instant::now() + t),
            columns,
            next_column: 0,
            frontier: 0,
            pending: VecDeque::new(),
            yielded: FxHashSet::default(),
            max_bit: None,
            finished: false,
        };
        match table.id_of(start) {
            Some(rule) => {
                let root = ParseState::predicted(RuleId::START, Alt::new(vec![Sym::Rule(rule)]), 0);
                parse.add(0, root);
            }
            None => {
                debug!(%start, "parse requested for undefined start symbol");
                parse.finished = true;
            }
        }
        parse
    }

    /// Furthest byte offset any terminal was matched up to, relative to the
    /// start of the input. `None` if nothing matched.
    ///
    /// After a failed complete parse this points at (or just before) the
    /// offending input.
    #[must_use]
    pub fn max_position(&self) -> Option<usize> {
        self.max_bit.map(|bit| bit / 8)
    }

    fn last_column(&self) -> usize {
        self.columns.len() - 1
    }

    fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.table
            .get(id)
            .or_else(|| self.temp.rules.get(id.0.checked_sub(self.temp.base)?))
    }

    fn add(&mut self, column: usize, state: ParseState) {
        let (per_item, per_column) = (self.config.max_states_per_item, self.config.max_states_per_column);
        let slot = self.columns[column].get_or_insert_with(Box::default);
        if let Err(Rejected::ColumnBudget) = slot.add(state, per_item, per_column) {
            debug!(column, "parser column budget exhausted");
        }
        self.frontier = self.frontier.max(column);
    }

    fn column(&self, k: usize) -> Option<&Column> {
        self.columns[k].as_deref()
    }

    fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn note_scan(&mut self, column: usize) {
        self.max_bit = Some(self.max_bit.map_or(column, |m| m.max(column)));
    }

    /// Runs predict / scan / complete on column `k` until no state is added.
    fn process_column(&mut self, k: usize) {
        if self.timed_out() {
            debug!(column = k, "parser deadline reached");
            self.finished = true;
            return;
        }
        let mut i = 0;
        loop {
            let Some(state) = self.column(k).and_then(|c| c.states.get(i)).cloned() else {
                break;
            };
            i += 1;
            if i % 256 == 0 && self.timed_out() {
                debug!(column = k, "parser deadline reached");
                self.finished = true;
                return;
            }
            if state.partial {
                continue;
            }
            match state.next_symbol() {
                None => self.complete(&state, k),
                Some(Sym::Rule(rule) | Sym::Message(rule, _)) => self.predict(&state, *rule, k),
                Some(Sym::Context(index)) => self.predict_context(&state, *index, k),
                Some(Sym::Terminal(terminal)) => self.scan(&state, terminal, k),
            }
        }
    }

    fn predict(&mut self, state: &ParseState, rule: RuleId, k: usize) {
        let alternatives = self.rule(rule).map(|r| r.alternatives.clone()).unwrap_or_default();
        for alt in alternatives {
            self.add(k, ParseState::predicted(rule, alt, k));
        }
        let completed: Vec<(Vec<Arc<ParseNode>>, Cover)> = self
            .column(k)
            .map(|c| c.nullable(rule).to_vec())
            .unwrap_or_default();
        for (children, cover) in completed {
            let next = self.advance_over(state, rule, children, &cover, (k, k));
            self.add(k, next);
        }
    }

    /// Moves `waiting` over `rule`, completed over the columns in `span`:
    /// named rules wrap their children in a node, implicit rules splice
    /// them in.
    fn advance_over(
        &self,
        waiting: &ParseState,
        rule: RuleId,
        children: Vec<Arc<ParseNode>>,
        inner: &[RuleId],
        (from, to): (usize, usize),
    ) -> ParseState {
        match self.rule(rule).map(|r| &r.label) {
            Some(Label::Named(name)) => {
                let parties = match waiting.next_symbol() {
                    Some(Sym::Message(_, reference)) => Some(Arc::clone(reference)),
                    _ => None,
                };
                let node = ParseNode::branch(name.clone(), children, parties);
                waiting.advanced_over([node], rule, inner, from, to)
            }
            _ => waiting.advanced_over(children, rule, inner, from, to),
        }
    }

    fn complete(&mut self, state: &ParseState, k: usize) {
        // cyclic derivations would repeat forever within one column
        if state.lhs == RuleId::START || state.is_cyclic() {
            return;
        }
        if state.start == k {
            if let Some(column) = self.columns[k].as_deref_mut() {
                column.record_nullable(state.lhs, state.children.clone(), state.cover.clone());
            }
        }
        let waiting: Vec<ParseState> = self
            .column(state.start)
            .map(|c| c.waiting_on(state.lhs).cloned().collect())
            .unwrap_or_default();
        for parent in waiting {
            let next = self.advance_over(
                &parent,
                state.lhs,
                state.children.clone(),
                &state.cover,
                (state.start, k),
            );
            self.add(k, next);
        }
    }

    fn scan(&mut self, state: &ParseState, terminal: &Terminal, k: usize) {
        let position = self.input.start_bit() + k;

        if let Terminal::Bit(expected) = terminal {
            if k < self.last_column() && self.input.bit(position) == Some(*expected) {
                self.note_scan(k + 1);
                let next = state.scanned(ParseNode::leaf(terminal.clone()), 1);
                self.add(k + 1, next);
            }
            return;
        }

        if position % 8 != 0 {
            return;
        }
        let rest = self.input.bytes_from(position / 8);
        let complete = terminal.check(rest, false);
        let mut results = Vec::with_capacity(2);
        if let Some(len) = complete {
            results.push((len, false, matched_leaf(terminal, &rest[..len], false)));
        }
        if self.mode == ParseMode::Incomplete && complete.is_none_or(|len| len < rest.len()) {
            if let Some(len) = terminal.check(rest, true).filter(|&len| len > 0 && len == rest.len()) {
                results.push((len, true, matched_leaf(terminal, rest, true)));
            }
        }

        for (len, partial, leaf) in results {
            let column = k + 8 * len;
            self.note_scan(column);
            let next = if partial {
                let mut next = state.clone();
                next.children.push(ParseNode::leaf(leaf));
                next.partial = true;
                next.cover.clear();
                next
            } else {
                state.scanned(ParseNode::leaf(leaf), 8 * len)
            };
            self.add(column, next);
        }
    }

    /// Expands a repetition whose bounds depend on earlier input, now that
    /// the input up to column `k` is known.
    fn predict_context(&mut self, state: &ParseState, index: usize, k: usize) {
        let context = self.table.context(index);
        let Some((min, max)) = context.repetition.resolve(|symbol| self.find_recent(state, symbol)) else {
            debug!(column = k, "dynamic repetition bound unavailable");
            return;
        };
        let key = (index, min, max);
        let rule = if let Some(&rule) = self.temp.by_bounds.get(&key) {
            rule
        } else {
            let alternatives = repetition_alternatives(&mut self.temp, &context.element, min, max);
            let rule = self.temp.implicit(alternatives);
            self.temp.by_bounds.insert(key, rule);
            rule
        };
        let mut symbols = state.alt.symbols.clone();
        symbols[state.dot] = Sym::Rule(rule);
        let mut rewritten = state.clone();
        rewritten.alt = Alt::new(symbols);
        self.add(k, rewritten);
    }

    /// The last node labelled `symbol` matched before `state`'s dot, looking
    /// through the chain of states `state` was predicted from.
    fn find_recent(&self, state: &ParseState, symbol: &NonTerminal) -> Option<DerivationTree> {
        let mut children = &state.children;
        let (mut lhs, mut start) = (state.lhs, state.start);
        let mut visited = FxHashSet::default();
        loop {
            for child in children.iter().rev() {
                if let Some(found) = child.find_last(symbol) {
                    return Some(found.to_tree());
                }
            }
            if lhs == RuleId::START || !visited.insert((lhs, start)) {
                return None;
            }
            let parent = self.column(start)?.waiting_on(lhs).next()?;
            children = &parent.children;
            lhs = parent.lhs;
            start = parent.start;
        }
    }

    /// Collects the trees of the final column.
    fn harvest(&mut self) {
        let last = self.last_column();
        if self.mode == ParseMode::Incomplete {
            self.force_complete(last);
        }
        let roots: Vec<Arc<ParseNode>> = self
            .column(last)
            .map(|c| {
                c.states
                    .iter()
                    .filter(|s| s.lhs == RuleId::START && s.is_finished())
                    .filter_map(|s| s.children.first().cloned())
                    .collect()
            })
            .unwrap_or_default();
        for root in roots {
            if self.yielded.insert(root.hash()) {
                self.pending.push_back(root.to_tree());
            }
        }
    }

    /// Treats every state with children in the last column as complete, so
    /// that prefixes of valid inputs produce trees.
    fn force_complete(&mut self, last: usize) {
        let mut i = 0;
        loop {
            let Some(state) = self.column(last).and_then(|c| c.states.get(i)).cloned() else {
                break;
            };
            i += 1;
            if i % 256 == 0 && self.timed_out() {
                debug!("parser deadline reached while completing prefixes");
                return;
            }
            if state.children.is_empty() || state.lhs == RuleId::START {
                continue;
            }
            let mut forced = state;
            forced.partial = false;
            forced.dot = forced.alt.symbols.len();
            self.complete(&forced, last);
        }
    }
}

/// The leaf recorded for a terminal that matched `matched`.
fn matched_leaf(terminal: &Terminal, matched: &[u8], partial: bool) -> Terminal {
    match terminal {
        Terminal::Text(_) | Terminal::Bytes(_) if !partial => terminal.clone(),
        Terminal::Bytes(_) => Terminal::bytes(matched),
        Terminal::Regex(re) if re.is_bytes() => Terminal::bytes(matched),
        _ => match std::str::from_utf8(matched) {
            Ok(text) => Terminal::text(text),
            Err(_) => Terminal::bytes(matched),
        },
    }
}

impl Iterator for Parse<'_> {
    type Item = DerivationTree;

    fn next(&mut self) -> Option<DerivationTree> {
        loop {
            if let Some(tree) = self.pending.pop_front() {
                return Some(tree);
            }
            if self.finished {
                return None;
            }
            let k = self.next_column;
            if k > self.frontier {
                self.finished = true;
                return None;
            }
            self.process_column(k);
            if self.finished {
                return None;
            }
            if k == self.last_column() {
                self.harvest();
                self.finished = true;
            } else {
                self.next_column += 1;
            }
        }
    }
}
