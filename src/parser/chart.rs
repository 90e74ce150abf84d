//! Earley items, shared parse nodes and chart columns.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::rules::{Alt, RuleId, Sym};
use crate::grammar::NonTerminalRef;
use crate::symbol::{NonTerminal, Symbol, Terminal};
use crate::tree::{DerivationTree, TreeBuilder, node_hash};

/// An immutable parse-tree node shared between Earley items.
#[derive(Debug)]
pub(crate) struct ParseNode {
    symbol: Symbol,
    children: Vec<Arc<ParseNode>>,
    parties: Option<Arc<NonTerminalRef>>,
    /// Same value [`DerivationTree::hash_of`] reports for the converted node.
    hash: u64,
}

impl ParseNode {
    pub(crate) fn leaf(terminal: Terminal) -> Arc<Self> {
        let symbol = Symbol::Terminal(terminal);
        let hash = node_hash(&symbol, std::iter::empty());
        Arc::new(Self {
            symbol,
            children: Vec::new(),
            parties: None,
            hash,
        })
    }

    pub(crate) fn branch(
        symbol: NonTerminal,
        children: Vec<Arc<ParseNode>>,
        parties: Option<Arc<NonTerminalRef>>,
    ) -> Arc<Self> {
        let symbol = Symbol::NonTerminal(symbol);
        let hash = node_hash(&symbol, children.iter().map(|c| c.hash));
        Arc::new(Self {
            symbol,
            children,
            parties,
            hash,
        })
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    /// Most recent node labelled `symbol`: the rightmost subtree is searched
    /// first, innermost match wins.
    pub(crate) fn find_last(self: &Arc<Self>, symbol: &NonTerminal) -> Option<Arc<ParseNode>> {
        for child in self.children.iter().rev() {
            if let Some(found) = child.find_last(symbol) {
                return Some(found);
            }
        }
        (self.symbol.as_non_terminal() == Some(symbol)).then(|| Arc::clone(self))
    }

    pub(crate) fn to_tree(&self) -> DerivationTree {
        let mut builder = TreeBuilder::new();
        self.emit(&mut builder);
        builder.finish()
    }

    fn emit(&self, builder: &mut TreeBuilder) {
        let id = builder.open(self.symbol.clone());
        if let Some(parties) = &self.parties {
            builder.set_parties(id, parties.sender.clone(), parties.recipient.clone());
        }
        for child in &self.children {
            child.emit(builder);
        }
        builder.close();
    }
}

/// Rules completed over exactly the span of the state holding them.
pub(crate) type Cover = SmallVec<[RuleId; 4]>;

/// A dotted rule with the children matched so far.
#[derive(Debug, Clone)]
pub(crate) struct ParseState {
    pub(crate) lhs: RuleId,
    pub(crate) alt: Arc<Alt>,
    pub(crate) dot: usize,
    /// Column the state was predicted in.
    pub(crate) start: usize,
    pub(crate) children: Vec<Arc<ParseNode>>,
    /// The last child only matched a prefix of a terminal at end of input.
    pub(crate) partial: bool,
    /// Rules derived below this state over its whole span so far. A rule
    /// completing over a span it already covers is a cyclic derivation.
    pub(crate) cover: Cover,
}

/// Identity of a state for deduplication.
type StateKey = (RuleId, u64, usize, usize, bool, u64);
/// Identity of a state ignoring its children.
type ItemKey = (RuleId, u64, usize, usize);

impl ParseState {
    pub(crate) fn predicted(lhs: RuleId, alt: Arc<Alt>, start: usize) -> Self {
        Self {
            lhs,
            alt,
            dot: 0,
            start,
            children: Vec::new(),
            partial: false,
            cover: Cover::new(),
        }
    }

    pub(crate) fn next_symbol(&self) -> Option<&Sym> {
        self.alt.symbols.get(self.dot)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.dot >= self.alt.symbols.len() && !self.partial
    }

    /// Copy with the dot moved over one symbol that produced `children`.
    pub(crate) fn advanced(&self, children: impl IntoIterator<Item = Arc<ParseNode>>) -> Self {
        let mut next = self.clone();
        next.dot += 1;
        next.children.extend(children);
        next
    }

    /// Copy with the dot moved over a terminal `width` bits wide.
    pub(crate) fn scanned(&self, leaf: Arc<ParseNode>, width: usize) -> Self {
        let mut next = self.advanced([leaf]);
        if width > 0 {
            next.cover.clear();
        }
        next
    }

    /// Copy with the dot moved over `rule`, completed over columns
    /// `from..to` with `inner` below it.
    pub(crate) fn advanced_over(
        &self,
        children: impl IntoIterator<Item = Arc<ParseNode>>,
        rule: RuleId,
        inner: &[RuleId],
        from: usize,
        to: usize,
    ) -> Self {
        let mut next = self.advanced(children);
        if from != to {
            next.cover.clear();
        }
        if self.start == from {
            next.cover.extend(inner.iter().copied());
            next.cover.push(rule);
        }
        next
    }

    /// Whether the state derives its own rule over its own span.
    pub(crate) fn is_cyclic(&self) -> bool {
        self.cover.contains(&self.lhs)
    }

    fn item_key(&self) -> ItemKey {
        (self.lhs, self.alt.hash, self.dot, self.start)
    }

    fn key(&self) -> StateKey {
        let children = node_hash(
            &Symbol::Terminal(Terminal::Bit(self.partial)),
            self.children.iter().map(|c| c.hash),
        );
        (self.lhs, self.alt.hash, self.dot, self.start, self.partial, children)
    }
}

/// Why a state was not added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejected {
    Duplicate,
    ItemBudget,
    ColumnBudget,
}

/// All states ending at one input position.
#[derive(Debug, Default)]
pub(crate) struct Column {
    pub(crate) states: Vec<ParseState>,
    seen: FxHashSet<StateKey>,
    per_item: FxHashMap<ItemKey, usize>,
    /// States whose next symbol is the given rule.
    waiting: FxHashMap<RuleId, Vec<usize>>,
    /// Children and cover of rules completed without consuming input here.
    nullable: FxHashMap<RuleId, Vec<(Vec<Arc<ParseNode>>, Cover)>>,
}

impl Column {
    pub(crate) fn add(
        &mut self,
        state: ParseState,
        max_per_item: Option<usize>,
        max_states: usize,
    ) -> Result<(), Rejected> {
        let key = state.key();
        if self.seen.contains(&key) {
            return Err(Rejected::Duplicate);
        }
        if self.states.len() >= max_states {
            return Err(Rejected::ColumnBudget);
        }
        if let Some(max_per_item) = max_per_item {
            let count = self.per_item.entry(state.item_key()).or_insert(0);
            if *count >= max_per_item {
                return Err(Rejected::ItemBudget);
            }
            *count += 1;
        }
        self.seen.insert(key);
        if let Some(rule) = state.next_symbol().and_then(Sym::rule) {
            if !state.partial {
                self.waiting.entry(rule).or_default().push(self.states.len());
            }
        }
        self.states.push(state);
        Ok(())
    }

    pub(crate) fn waiting_on(&self, rule: RuleId) -> impl Iterator<Item = &ParseState> + '_ {
        self.waiting
            .get(&rule)
            .into_iter()
            .flatten()
            .map(|&i| &self.states[i])
    }

    pub(crate) fn record_nullable(&mut self, rule: RuleId, children: Vec<Arc<ParseNode>>, cover: Cover) {
        self.nullable.entry(rule).or_default().push((children, cover));
    }

    pub(crate) fn nullable(&self, rule: RuleId) -> &[(Vec<Arc<ParseNode>>, Cover)] {
        self.nullable.get(&rule).map(Vec::as_slice).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(children: Vec<Arc<ParseNode>>) -> ParseState {
        let alt = Alt::new(vec![Sym::Terminal(Terminal::text("a")), Sym::Rule(RuleId(0))]);
        let mut s = ParseState::predicted(RuleId(0), alt, 0);
        s.children = children;
        s
    }

    #[test]
    fn test_column_deduplicates() {
        let mut column = Column::default();
        assert!(column.add(state(vec![]), None, 100).is_ok());
        assert_eq!(column.add(state(vec![]), None, 100), Err(Rejected::Duplicate));
        assert_eq!(column.states.len(), 1);
    }

    #[test]
    fn test_column_item_budget() {
        let mut column = Column::default();
        for i in 0..3 {
            let leaf = ParseNode::leaf(Terminal::text(i.to_string()));
            let _ = column.add(state(vec![leaf]), Some(2), 100);
        }
        assert_eq!(column.states.len(), 2);
    }

    #[test]
    fn test_no_item_budget_by_default() {
        let mut column = Column::default();
        for i in 0..100 {
            let leaf = ParseNode::leaf(Terminal::text(i.to_string()));
            column.add(state(vec![leaf]), None, 1000).unwrap();
        }
        assert_eq!(column.states.len(), 100);
    }

    #[test]
    fn test_cover_tracks_same_span_rules() {
        let alt = Alt::new(vec![Sym::Rule(RuleId(1)), Sym::Rule(RuleId(2))]);
        let waiting = ParseState::predicted(RuleId(0), alt, 3);
        // a unit derivation over 3..5 is recorded
        let over = waiting.advanced_over([], RuleId(1), &[RuleId(7)], 3, 5);
        assert_eq!(over.cover.as_slice(), &[RuleId(7), RuleId(1)]);
        // an empty rule at 5 keeps the span and adds nothing
        let empty = over.advanced_over([], RuleId(2), &[], 5, 5);
        assert_eq!(empty.cover.as_slice(), &[RuleId(7), RuleId(1)]);
        // a later non-empty rule widens the span and clears the cover
        let wider = over.advanced_over([], RuleId(2), &[], 5, 6);
        assert!(wider.cover.is_empty());
        assert!(!wider.is_cyclic());

        let mut looped = ParseState::predicted(RuleId(1), Alt::new(vec![Sym::Rule(RuleId(1))]), 3);
        looped = looped.advanced_over([], RuleId(1), &[], 3, 5);
        assert!(looped.is_cyclic());
    }

    #[test]
    fn test_parse_node_hash_matches_tree() {
        let node = ParseNode::branch(
            NonTerminal::new("start"),
            vec![ParseNode::leaf(Terminal::text("x"))],
            None,
        );
        let tree = node.to_tree();
        assert_eq!(node.hash(), tree.structural_hash());
    }

    #[test]
    fn test_waiting_index() {
        let mut column = Column::default();
        let mut s = state(vec![]);
        s.dot = 1;
        column.add(s, None, 100).unwrap();
        assert_eq!(column.waiting_on(RuleId(0)).count(), 1);
        assert_eq!(column.waiting_on(RuleId(1)).count(), 0);
    }
}
