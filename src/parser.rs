//! Chart parsing of text, bytes and bit strings into derivation trees.
//!
//! [`Grammar::parse`] returns a lazy [`Parse`] iterator. No successful parse
//! is not an error: the iterator is simply empty and
//! [`Parse::max_position`] tells how far the input was understood.
//!
//! ```
//! use evogram::{GrammarBuilder, GrammarNode, ParseInput, ParseMode};
//!
//! let grammar = GrammarBuilder::new()
//!     .rule("start", GrammarNode::seq([GrammarNode::text("ab"), GrammarNode::text("c")]))
//!     .build()
//!     .unwrap();
//!
//! let mut forest = grammar.parse(ParseInput::text("abx"), grammar.start(), ParseMode::Complete);
//! assert!(forest.next().is_none());
//! assert_eq!(forest.max_position(), Some(2));
//!
//! let prefix = grammar.parse(ParseInput::text("a"), grammar.start(), ParseMode::Incomplete);
//! assert_eq!(prefix.count(), 1);
//! ```

mod chart;
mod earley;
mod rules;

pub use earley::Parse;
pub(crate) use rules::RuleTable;

use std::borrow::Cow;
use std::collections::VecDeque;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::grammar::Grammar;
use crate::symbol::NonTerminal;
use crate::tree::DerivationTree;

/// Whether trees must cover the whole input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParseMode {
    /// Only trees spanning the entire input are produced.
    Complete,
    /// The input may be a prefix of a valid input. Terminals at the end may
    /// match partially and unfinished rules are closed early.
    Incomplete,
}

/// Safety budgets for pathological grammars.
///
/// The defaults never drop a tree on their own: every derivation of an
/// ambiguous input is kept unless a column overflows or the timeout hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Parse states kept per dotted rule and origin. Bounds ambiguity at
    /// the cost of dropping trees; unbounded when `None`.
    pub max_states_per_item: Option<usize>,
    /// Parse states kept per column.
    pub max_states_per_column: usize,
    /// Wall-clock limit for building the chart.
    pub timeout: Option<Duration>,
    /// Forests a [`Parser`] keeps before evicting the oldest.
    pub cache_capacity: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_states_per_item: None,
            max_states_per_column: 100_000,
            timeout: None,
            cache_capacity: 1024,
        }
    }
}

/// Input to the parser: a byte buffer and the bit range to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseInput<'a> {
    data: Cow<'a, [u8]>,
    start_bit: usize,
    end_bit: usize,
}

impl<'a> ParseInput<'a> {
    /// UTF-8 text.
    #[must_use]
    pub fn text(text: &'a str) -> Self {
        Self::bytes(text.as_bytes())
    }

    /// Raw bytes.
    #[must_use]
    pub fn bytes(bytes: &'a [u8]) -> Self {
        Self {
            end_bit: bytes.len() * 8,
            data: Cow::Borrowed(bytes),
            start_bit: 0,
        }
    }

    /// Starts parsing `offset` bits into the buffer.
    #[must_use]
    pub fn with_start_bit(mut self, offset: usize) -> Self {
        self.start_bit = offset.min(self.end_bit);
        self
    }

    /// Number of bits to parse.
    #[must_use]
    pub fn bit_len(&self) -> usize {
        self.end_bit - self.start_bit
    }

    pub(crate) fn start_bit(&self) -> usize {
        self.start_bit
    }

    /// Bit at absolute position `position`, most significant bit first.
    pub(crate) fn bit(&self, position: usize) -> Option<bool> {
        if position >= self.end_bit {
            return None;
        }
        let byte = self.data.get(position / 8)?;
        Some((byte >> (7 - position % 8)) & 1 == 1)
    }

    /// Remaining whole bytes from byte offset `offset`.
    pub(crate) fn bytes_from(&self, offset: usize) -> &[u8] {
        let end = (self.end_bit / 8).min(self.data.len());
        self.data.get(offset..end).unwrap_or_default()
    }
}

impl ParseInput<'static> {
    /// Owned bytes.
    #[must_use]
    pub fn owned(bytes: Vec<u8>) -> Self {
        Self {
            end_bit: bytes.len() * 8,
            data: Cow::Owned(bytes),
            start_bit: 0,
        }
    }

    /// A string of `0` and `1` characters, one bit each. Returns `None` on
    /// any other character.
    #[must_use]
    pub fn bits(bits: &str) -> Option<Self> {
        let mut data = vec![0u8; bits.len().div_ceil(8)];
        for (i, c) in bits.chars().enumerate() {
            match c {
                '0' => {}
                '1' => data[i / 8] |= 0x80 >> (i % 8),
                _ => return None,
            }
        }
        Some(Self {
            data: Cow::Owned(data),
            start_bit: 0,
            end_bit: bits.len(),
        })
    }

    /// The serialized form of `tree`: its bits when it has bit leaves,
    /// otherwise its bytes.
    #[must_use]
    pub fn from_tree(tree: &DerivationTree) -> Self {
        if tree.contains_bits() {
            // to_bits only ever yields '0' and '1'
            Self::bits(&tree.to_bits()).unwrap_or_else(|| Self::owned(Vec::new()))
        } else {
            Self::owned(tree.to_bytes())
        }
    }
}

impl Grammar {
    /// Parses `input` starting from `start` with default budgets.
    ///
    /// An undefined `start` yields an empty forest.
    #[must_use]
    pub fn parse<'a>(&'a self, input: ParseInput<'a>, start: &NonTerminal, mode: ParseMode) -> Parse<'a> {
        self.parse_with(input, start, mode, ParserConfig::default())
    }

    /// Parses `input` with explicit budgets.
    #[must_use]
    pub fn parse_with<'a>(
        &'a self,
        input: ParseInput<'a>,
        start: &NonTerminal,
        mode: ParseMode,
        config: ParserConfig,
    ) -> Parse<'a> {
        if !self.contains(start) {
            warn!(%start, "parse requested for undefined start symbol");
        }
        Parse::new(self.table(), input, start, mode, config)
    }
}

type CacheKey = (Vec<u8>, usize, usize, NonTerminal, ParseMode);

/// A parser that memoizes whole forests per input.
///
/// Useful when the same inputs are parsed repeatedly, for instance when
/// checking generated values or re-validating a population. At most
/// [`ParserConfig::cache_capacity`] forests are kept; the oldest goes first.
#[derive(Debug)]
pub struct Parser<'g> {
    grammar: &'g Grammar,
    config: ParserConfig,
    cache: FxHashMap<CacheKey, (Vec<DerivationTree>, Option<usize>)>,
    /// Cache keys in insertion order.
    order: VecDeque<CacheKey>,
    max_position: Option<usize>,
}

impl<'g> Parser<'g> {
    /// Parser for `grammar` with default budgets.
    #[must_use]
    pub fn new(grammar: &'g Grammar) -> Self {
        Self::with_config(grammar, ParserConfig::default())
    }

    /// Parser for `grammar` with explicit budgets and cache size.
    #[must_use]
    pub fn with_config(grammar: &'g Grammar, config: ParserConfig) -> Self {
        Self {
            grammar,
            config,
            cache: FxHashMap::default(),
            order: VecDeque::new(),
            max_position: None,
        }
    }

    /// All trees for `input`, computed once per distinct input while it
    /// stays cached.
    pub fn parse_forest(&mut self, input: &ParseInput<'_>, start: &NonTerminal, mode: ParseMode) -> &[DerivationTree] {
        let key = (input.data.to_vec(), input.start_bit, input.end_bit, start.clone(), mode);
        if !self.cache.contains_key(&key) {
            while self.cache.len() >= self.config.cache_capacity.max(1) {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.cache.remove(&oldest);
            }
            let (grammar, config) = (self.grammar, self.config);
            let mut forest = grammar.parse_with(input.clone(), start, mode, config);
            let trees: Vec<_> = forest.by_ref().collect();
            let max_position = forest.max_position();
            self.order.push_back(key.clone());
            self.cache.insert(key.clone(), (trees, max_position));
        }
        match self.cache.get(&key) {
            Some((trees, max_position)) => {
                self.max_position = *max_position;
                trees
            }
            None => &[],
        }
    }

    /// First tree for `input`, if any.
    pub fn parse_one(&mut self, input: &ParseInput<'_>, start: &NonTerminal, mode: ParseMode) -> Option<DerivationTree> {
        self.parse_forest(input, start, mode).first().cloned()
    }

    /// Furthest byte offset reached by the most recent parse.
    #[must_use]
    pub fn max_position(&self) -> Option<usize> {
        self.max_position
    }

    /// Number of forests currently cached.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Drops every cached forest.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.order.clear();
    }
}
