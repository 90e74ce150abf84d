//! Grammar right-hand sides.

use std::fmt;
use std::sync::Arc;

use crate::error::GrammarResult;
use crate::symbol::{NonTerminal, Terminal};
use crate::tree::DerivationTree;

/// Distance value for nodes that cannot (yet) derive a finite string.
pub const INFINITE_DISTANCE: usize = usize::MAX;

/// One node of a rule body.
///
/// Every node carries its distance to completion: the minimum number of
/// derivation steps needed to turn it into terminals. It starts out
/// infinite and is filled in when the owning grammar is built.
#[derive(Debug, Clone)]
pub struct GrammarNode {
    kind: NodeKind,
    distance: usize,
}

/// Shape of a [`GrammarNode`].
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A terminal.
    Terminal(Terminal),
    /// A reference to another rule.
    NonTerminal(NonTerminalRef),
    /// Exactly one of the alternatives.
    Alternative(Vec<GrammarNode>),
    /// All children in order. Empty means epsilon.
    Concatenation(Vec<GrammarNode>),
    /// The child repeated between `min` and `max` times.
    Repetition(Repetition),
}

/// A non-terminal occurrence, optionally tagged with message parties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonTerminalRef {
    /// The referenced rule.
    pub symbol: NonTerminal,
    /// Party sending this message.
    pub sender: Option<Arc<str>>,
    /// Party receiving this message.
    pub recipient: Option<Arc<str>>,
}

/// Repetition bounds and body.
#[derive(Debug, Clone)]
pub struct Repetition {
    pub(crate) node: Box<GrammarNode>,
    pub(crate) min: Bound,
    /// `None` is unbounded.
    pub(crate) max: Option<Bound>,
}

impl Repetition {
    /// Repeated body.
    #[must_use]
    pub fn node(&self) -> &GrammarNode {
        &self.node
    }

    /// Lower bound.
    #[must_use]
    pub fn min(&self) -> &Bound {
        &self.min
    }

    /// Upper bound, `None` if unbounded.
    #[must_use]
    pub fn max(&self) -> Option<&Bound> {
        self.max.as_ref()
    }

    /// Whether either bound depends on earlier parts of the tree.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self.min, Bound::Dynamic(_)) || matches!(self.max, Some(Bound::Dynamic(_)))
    }

    /// Resolves both bounds, looking dynamic sources up with `lookup`.
    ///
    /// Returns `None` when a dynamic source is missing or its value cannot
    /// be computed.
    pub(crate) fn resolve(
        &self,
        mut lookup: impl FnMut(&NonTerminal) -> Option<DerivationTree>,
    ) -> Option<(usize, Option<usize>)> {
        let min = self.min.resolve(&mut lookup)?;
        let max = match &self.max {
            Some(bound) => Some(bound.resolve(&mut lookup)?),
            None => None,
        };
        Some((min, max))
    }
}

/// A repetition bound.
#[derive(Debug, Clone)]
pub enum Bound {
    /// A constant.
    Fixed(usize),
    /// Computed from an earlier subtree.
    Dynamic(DynamicBound),
}

impl Bound {
    /// The constant, if fixed.
    #[must_use]
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Self::Fixed(n) => Some(*n),
            Self::Dynamic(_) => None,
        }
    }

    fn resolve(&self, lookup: &mut impl FnMut(&NonTerminal) -> Option<DerivationTree>) -> Option<usize> {
        match self {
            Self::Fixed(n) => Some(*n),
            Self::Dynamic(bound) => bound.evaluate(&lookup(bound.source())?),
        }
    }
}

impl From<usize> for Bound {
    fn from(n: usize) -> Self {
        Self::Fixed(n)
    }
}

type BoundFn = dyn Fn(&DerivationTree) -> Option<usize> + Send + Sync;

/// A bound computed from the most recent subtree labelled `source`.
///
/// ```
/// use evogram::{DynamicBound, NodeId};
///
/// // `<byte>{int(<len>)}`
/// let bound = DynamicBound::new("len", |t| t.int_at(NodeId::ROOT).and_then(|n| usize::try_from(n).ok()));
/// assert_eq!(bound.source().name(), "<len>");
/// ```
#[derive(Clone)]
pub struct DynamicBound {
    source: NonTerminal,
    compute: Arc<BoundFn>,
}

impl DynamicBound {
    /// Creates a bound reading `source`.
    pub fn new(
        source: impl Into<NonTerminal>,
        compute: impl Fn(&DerivationTree) -> Option<usize> + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: source.into(),
            compute: Arc::new(compute),
        }
    }

    /// The non-terminal the bound reads.
    #[must_use]
    pub fn source(&self) -> &NonTerminal {
        &self.source
    }

    /// Computes the bound from a subtree labelled [`Self::source`].
    #[must_use]
    pub fn evaluate(&self, tree: &DerivationTree) -> Option<usize> {
        (self.compute)(tree)
    }
}

impl fmt::Debug for DynamicBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicBound")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl GrammarNode {
    fn from_kind(kind: NodeKind) -> Self {
        Self {
            kind,
            distance: INFINITE_DISTANCE,
        }
    }

    /// Any terminal.
    #[must_use]
    pub fn terminal(terminal: Terminal) -> Self {
        Self::from_kind(NodeKind::Terminal(terminal))
    }

    /// Literal text.
    #[must_use]
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::terminal(Terminal::text(value))
    }

    /// Literal bytes.
    #[must_use]
    pub fn bytes(value: impl AsRef<[u8]>) -> Self {
        Self::terminal(Terminal::bytes(value))
    }

    /// A single bit.
    #[must_use]
    pub fn bit(value: bool) -> Self {
        Self::terminal(Terminal::Bit(value))
    }

    /// A text regex.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GrammarError::InvalidRegex`] if the pattern does not compile.
    pub fn regex(pattern: impl Into<String>) -> GrammarResult<Self> {
        Ok(Self::terminal(Terminal::regex(pattern, false)?))
    }

    /// A byte regex.
    ///
    /// # Errors
    ///
    /// Returns [`crate::GrammarError::InvalidRegex`] if the pattern does not compile.
    pub fn regex_bytes(pattern: impl Into<String>) -> GrammarResult<Self> {
        Ok(Self::terminal(Terminal::regex(pattern, true)?))
    }

    /// A reference to another rule.
    #[must_use]
    pub fn non_terminal(name: impl Into<NonTerminal>) -> Self {
        Self::from_kind(NodeKind::NonTerminal(NonTerminalRef {
            symbol: name.into(),
            sender: None,
            recipient: None,
        }))
    }

    /// A rule reference tagged as a message between two parties.
    #[must_use]
    pub fn message(name: impl Into<NonTerminal>, sender: &str, recipient: Option<&str>) -> Self {
        Self::from_kind(NodeKind::NonTerminal(NonTerminalRef {
            symbol: name.into(),
            sender: Some(Arc::from(sender)),
            recipient: recipient.map(Arc::from),
        }))
    }

    /// Choice between alternatives.
    #[must_use]
    pub fn alt(alternatives: impl IntoIterator<Item = GrammarNode>) -> Self {
        Self::from_kind(NodeKind::Alternative(alternatives.into_iter().collect()))
    }

    /// Sequence.
    #[must_use]
    pub fn seq(children: impl IntoIterator<Item = GrammarNode>) -> Self {
        Self::from_kind(NodeKind::Concatenation(children.into_iter().collect()))
    }

    /// The empty sequence.
    #[must_use]
    pub fn epsilon() -> Self {
        Self::seq([])
    }

    /// `node{min,max}`; `max: None` is unbounded.
    #[must_use]
    pub fn repeat(node: GrammarNode, min: usize, max: Option<usize>) -> Self {
        Self::repeat_bounds(node, Bound::Fixed(min), max.map(Bound::Fixed))
    }

    /// Repetition with arbitrary (possibly dynamic) bounds.
    #[must_use]
    pub fn repeat_bounds(node: GrammarNode, min: Bound, max: Option<Bound>) -> Self {
        Self::from_kind(NodeKind::Repetition(Repetition {
            node: Box::new(node),
            min,
            max,
        }))
    }

    /// `node*`
    #[must_use]
    pub fn star(node: GrammarNode) -> Self {
        Self::repeat(node, 0, None)
    }

    /// `node+`
    #[must_use]
    pub fn plus(node: GrammarNode) -> Self {
        Self::repeat(node, 1, None)
    }

    /// `node?`
    #[must_use]
    pub fn option(node: GrammarNode) -> Self {
        Self::repeat(node, 0, Some(1))
    }

    /// One character from the inclusive range, e.g. `'0'..='9'`.
    #[must_use]
    pub fn char_range(low: char, high: char) -> Self {
        Self::alt((low..=high).map(|c| Self::text(c.to_string())))
    }

    /// One byte from the inclusive range.
    #[must_use]
    pub fn byte_range(low: u8, high: u8) -> Self {
        Self::alt((low..=high).map(|b| Self::bytes([b])))
    }

    /// Shape of this node.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Minimum derivation steps to reach terminals.
    #[must_use]
    pub fn distance(&self) -> usize {
        self.distance
    }

    /// Calls `f` on this node and every node below it, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a GrammarNode)) {
        f(self);
        match &self.kind {
            NodeKind::Alternative(children) | NodeKind::Concatenation(children) => {
                for child in children {
                    child.walk(f);
                }
            }
            NodeKind::Repetition(rep) => rep.node.walk(f),
            NodeKind::Terminal(_) | NodeKind::NonTerminal(_) => {}
        }
    }

    /// Non-terminals referenced anywhere below this node, in walk order.
    #[must_use]
    pub fn referenced_non_terminals(&self) -> Vec<&NonTerminal> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if let NodeKind::NonTerminal(r) = &node.kind {
                found.push(&r.symbol);
            }
        });
        found
    }

    /// Recomputes distances bottom-up from the current rule distances.
    ///
    /// Arithmetic saturates at [`INFINITE_DISTANCE`].
    pub(crate) fn update_distance(&mut self, rule_distance: &impl Fn(&NonTerminal) -> usize) -> usize {
        self.distance = match &mut self.kind {
            NodeKind::Terminal(_) => 1,
            NodeKind::NonTerminal(r) => rule_distance(&r.symbol).saturating_add(1),
            NodeKind::Alternative(children) => children
                .iter_mut()
                .map(|c| c.update_distance(rule_distance))
                .min()
                .unwrap_or(INFINITE_DISTANCE)
                .saturating_add(1),
            NodeKind::Concatenation(children) => children
                .iter_mut()
                .map(|c| c.update_distance(rule_distance))
                .fold(0usize, usize::saturating_add)
                .saturating_add(1),
            NodeKind::Repetition(rep) => {
                let child = rep.node.update_distance(rule_distance);
                let min = rep.min.fixed().unwrap_or(0);
                if min == 0 {
                    1
                } else {
                    child.saturating_mul(min).saturating_add(1)
                }
            }
        };
        self.distance
    }
}

impl fmt::Display for GrammarNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn nested(node: &GrammarNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match node.kind {
                NodeKind::Alternative(_) | NodeKind::Concatenation(_) => write!(f, "({node})"),
                _ => write!(f, "{node}"),
            }
        }

        match &self.kind {
            NodeKind::Terminal(t) => write!(f, "{t}"),
            NodeKind::NonTerminal(r) => match (&r.sender, &r.recipient) {
                (Some(s), Some(to)) => write!(f, "<{s}:{to}:{}>", r.symbol.name().trim_matches(['<', '>'])),
                (Some(s), None) => write!(f, "<{s}:{}>", r.symbol.name().trim_matches(['<', '>'])),
                _ => write!(f, "{}", r.symbol),
            },
            NodeKind::Alternative(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{child}")?;
                }
                Ok(())
            }
            NodeKind::Concatenation(children) if children.is_empty() => f.write_str("\"\""),
            NodeKind::Concatenation(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    nested(child, f)?;
                }
                Ok(())
            }
            NodeKind::Repetition(rep) => {
                nested(&rep.node, f)?;
                match (&rep.min, &rep.max) {
                    (Bound::Fixed(0), None) => f.write_str("*"),
                    (Bound::Fixed(1), None) => f.write_str("+"),
                    (Bound::Fixed(0), Some(Bound::Fixed(1))) => f.write_str("?"),
                    (min, max) => {
                        let show = |b: &Bound| match b {
                            Bound::Fixed(n) => n.to_string(),
                            Bound::Dynamic(d) => format!("f({})", d.source()),
                        };
                        let max = max.as_ref().map(show).unwrap_or_default();
                        write!(f, "{{{},{max}}}", show(min))
                    }
                }
            }
        }
    }
}
