//! Compilation of grammar nodes into flat Earley rules.
//!
//! Named rules come from the grammar. Nested alternatives and repetitions
//! become implicit rules, whose children are spliced into the enclosing
//! node on completion so parse trees keep the shape the fuzzer produces.
//! Repetitions whose bounds depend on earlier input are compiled to a
//! placeholder that the parser expands once the bounds are known.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};

use crate::grammar::{Bound, GrammarNode, NodeKind, NonTerminalRef, Repetition};
use crate::symbol::{NonTerminal, Terminal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RuleId(pub(crate) usize);

impl RuleId {
    /// The synthetic rule wrapping the requested start symbol.
    pub(crate) const START: RuleId = RuleId(usize::MAX);
}

/// One symbol on a rule's right-hand side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Sym {
    Terminal(Terminal),
    Rule(RuleId),
    /// A rule reference that tags the resulting node with message parties.
    Message(RuleId, Arc<NonTerminalRef>),
    /// A repetition with input-dependent bounds.
    Context(usize),
}

impl Sym {
    pub(crate) fn rule(&self) -> Option<RuleId> {
        match self {
            Self::Rule(id) | Self::Message(id, _) => Some(*id),
            Self::Terminal(_) | Self::Context(_) => None,
        }
    }
}

/// A right-hand side with its precomputed hash.
#[derive(Debug)]
pub(crate) struct Alt {
    pub(crate) symbols: Vec<Sym>,
    pub(crate) hash: u64,
}

impl Alt {
    pub(crate) fn new(symbols: Vec<Sym>) -> Arc<Self> {
        let mut hasher = FxHasher::default();
        symbols.hash(&mut hasher);
        Arc::new(Self {
            symbols,
            hash: hasher.finish(),
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Label {
    Named(NonTerminal),
    Implicit,
}

#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub(crate) label: Label,
    pub(crate) alternatives: Vec<Arc<Alt>>,
}

#[derive(Debug, Clone)]
pub(crate) struct ContextRule {
    pub(crate) repetition: Repetition,
    pub(crate) element: Sym,
}

/// Destination for rules created while compiling repetitions.
pub(crate) trait RuleSink {
    fn reserve(&mut self) -> RuleId;
    fn define(&mut self, id: RuleId, alternatives: Vec<Vec<Sym>>);

    fn implicit(&mut self, alternatives: Vec<Vec<Sym>>) -> RuleId {
        let id = self.reserve();
        self.define(id, alternatives);
        id
    }
}

/// Alternatives deriving `element` between `min` and `max` times, each
/// count in exactly one way.
pub(crate) fn repetition_alternatives(
    sink: &mut impl RuleSink,
    element: &Sym,
    min: usize,
    max: Option<usize>,
) -> Vec<Vec<Sym>> {
    let mut sequence = vec![element.clone(); min];
    match max {
        None => {
            // S ::= ε | e S
            let star = sink.reserve();
            sink.define(star, vec![vec![], vec![element.clone(), Sym::Rule(star)]]);
            sequence.push(Sym::Rule(star));
        }
        Some(max) if max < min => return Vec::new(),
        Some(max) => {
            // T_n ::= ε | e T_{n-1}
            let mut tail: Option<RuleId> = None;
            for _ in min..max {
                let mut step = vec![element.clone()];
                step.extend(tail.map(Sym::Rule));
                tail = Some(sink.implicit(vec![vec![], step]));
            }
            sequence.extend(tail.map(Sym::Rule));
        }
    }
    vec![sequence]
}

/// All rules of a grammar in parser form.
#[derive(Debug, Default)]
pub(crate) struct RuleTable {
    rules: Vec<Rule>,
    by_name: FxHashMap<NonTerminal, RuleId>,
    contexts: Vec<ContextRule>,
}

impl RuleSink for RuleTable {
    fn reserve(&mut self) -> RuleId {
        self.rules.push(Rule {
            label: Label::Implicit,
            alternatives: Vec::new(),
        });
        RuleId(self.rules.len() - 1)
    }

    fn define(&mut self, id: RuleId, alternatives: Vec<Vec<Sym>>) {
        self.rules[id.0].alternatives = alternatives.into_iter().map(Alt::new).collect();
    }
}

impl RuleTable {
    pub(crate) fn compile(rules: &BTreeMap<NonTerminal, GrammarNode>) -> Self {
        let mut table = Self::default();
        for name in rules.keys() {
            table.rules.push(Rule {
                label: Label::Named(name.clone()),
                alternatives: Vec::new(),
            });
            table.by_name.insert(name.clone(), RuleId(table.rules.len() - 1));
        }
        for (name, body) in rules {
            let alternatives = table.alternatives(body);
            let id = table.by_name[name];
            table.define(id, alternatives);
        }
        table
    }

    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0)
    }

    pub(crate) fn id_of(&self, name: &NonTerminal) -> Option<RuleId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn context(&self, index: usize) -> &ContextRule {
        &self.contexts[index]
    }

    fn alternatives(&mut self, node: &GrammarNode) -> Vec<Vec<Sym>> {
        match node.kind() {
            NodeKind::Terminal(t) => vec![vec![Sym::Terminal(t.clone())]],
            NodeKind::NonTerminal(reference) => vec![vec![self.reference(reference)]],
            NodeKind::Alternative(children) => {
                let mut all = Vec::new();
                for child in children {
                    all.extend(self.alternatives(child));
                }
                all
            }
            NodeKind::Concatenation(children) => {
                let mut sequence = Vec::new();
                for child in children {
                    let mut alts = self.alternatives(child);
                    if alts.len() == 1 {
                        sequence.append(&mut alts[0]);
                    } else {
                        sequence.push(Sym::Rule(self.implicit(alts)));
                    }
                }
                vec![sequence]
            }
            NodeKind::Repetition(rep) => {
                let element = self.element(rep.node());
                if rep.is_dynamic() {
                    self.contexts.push(ContextRule {
                        repetition: rep.clone(),
                        element,
                    });
                    return vec![vec![Sym::Context(self.contexts.len() - 1)]];
                }
                let min = rep.min().fixed().unwrap_or(0);
                let max = rep.max().and_then(Bound::fixed);
                repetition_alternatives(self, &element, min, max)
            }
        }
    }

    /// A single symbol standing for `node`.
    fn element(&mut self, node: &GrammarNode) -> Sym {
        let mut alts = self.alternatives(node);
        if alts.len() == 1 && alts[0].len() == 1 {
            alts[0].remove(0)
        } else {
            Sym::Rule(self.implicit(alts))
        }
    }

    fn reference(&self, reference: &NonTerminalRef) -> Sym {
        // validation guarantees the rule exists
        let id = self.by_name.get(&reference.symbol).copied().unwrap_or(RuleId::START);
        if reference.sender.is_some() || reference.recipient.is_some() {
            Sym::Message(id, Arc::new(reference.clone()))
        } else {
            Sym::Rule(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(entries: Vec<(&str, GrammarNode)>) -> RuleTable {
        let rules: BTreeMap<_, _> = entries
            .into_iter()
            .map(|(n, b)| (NonTerminal::new(n), b))
            .collect();
        RuleTable::compile(&rules)
    }

    #[test]
    fn test_alternatives_flatten_into_rule() {
        let table = compile(vec![(
            "start",
            GrammarNode::alt([GrammarNode::text("a"), GrammarNode::text("b")]),
        )]);
        let start = table.id_of(&NonTerminal::new("start")).unwrap();
        assert_eq!(table.get(start).unwrap().alternatives.len(), 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_nested_alternative_becomes_implicit_rule() {
        let table = compile(vec![(
            "start",
            GrammarNode::seq([
                GrammarNode::text("x"),
                GrammarNode::alt([GrammarNode::text("a"), GrammarNode::text("b")]),
            ]),
        )]);
        assert_eq!(table.len(), 2);
        assert!(matches!(table.get(RuleId(1)).unwrap().label, Label::Implicit));
    }

    #[test]
    fn test_bounded_repetition_chain() {
        let mut table = RuleTable::default();
        let alts = repetition_alternatives(&mut table, &Sym::Terminal(Terminal::text("a")), 1, Some(3));
        assert_eq!(alts.len(), 1);
        // one mandatory element plus the optional tail
        assert_eq!(alts[0].len(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_inverted_bounds_have_no_alternatives() {
        let mut table = RuleTable::default();
        let alts = repetition_alternatives(&mut table, &Sym::Terminal(Terminal::text("a")), 3, Some(1));
        assert!(alts.is_empty());
    }
}
