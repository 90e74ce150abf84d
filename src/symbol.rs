//! Grammar symbols: non-terminals and the four kinds of terminal.
//!
//! Symbols are cheap to clone (everything heavy sits behind an `Arc`) and
//! hash structurally, so two grammars built from the same text produce
//! symbols that compare and hash equal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use regex_automata::dfa::{Automaton, dense};
use regex_automata::nfa::thompson;
use regex_automata::util::syntax;
use regex_automata::{Anchored, Input};
use regex_syntax::hir::Hir;

use crate::error::{GrammarError, GrammarResult};

/// A named grammar symbol such as `<digit>`.
///
/// Names are normalized to carry angle brackets, so `NonTerminal::new("digit")`
/// and `NonTerminal::new("<digit>")` are the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NonTerminal(Arc<str>);

impl NonTerminal {
    /// Creates a non-terminal, adding angle brackets when missing.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        if name.starts_with('<') && name.ends_with('>') && name.len() >= 2 {
            Self(Arc::from(name))
        } else {
            Self(Arc::from(format!("<{name}>")))
        }
    }

    /// Full name including angle brackets.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NonTerminal {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A compiled regular-expression terminal.
///
/// Holds three views of the same pattern: an anchored matcher for complete
/// matches, a dense DFA for deciding whether a truncated input could still be
/// extended into a match, and the HIR used to generate random instances.
/// Patterns the DFA cannot express (Unicode word boundaries) still match
/// completely but never match as a prefix.
pub struct RegexTerminal {
    pattern: String,
    bytes: bool,
    matcher: regex::bytes::Regex,
    prefix_dfa: Option<dense::DFA<Vec<u32>>>,
    hir: Hir,
}

impl RegexTerminal {
    /// Compiles `pattern`. When `bytes` is set the pattern matches raw bytes
    /// with Unicode mode disabled; otherwise it matches UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::InvalidRegex`] if the pattern does not parse.
    pub fn new(pattern: impl Into<String>, bytes: bool) -> GrammarResult<Self> {
        let pattern = pattern.into();
        let invalid = |message: String| GrammarError::InvalidRegex {
            pattern: pattern.clone(),
            message,
        };

        let matcher = regex::bytes::RegexBuilder::new(&format!("^(?:{pattern})"))
            .unicode(!bytes)
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        let prefix_dfa = dense::Builder::new()
            .syntax(syntax::Config::new().unicode(!bytes).utf8(!bytes))
            .thompson(thompson::Config::new().utf8(!bytes))
            .build(&pattern)
            .inspect_err(|e| tracing::debug!(%pattern, error = %e, "no prefix automaton"))
            .ok();

        let hir = regex_syntax::ParserBuilder::new()
            .unicode(!bytes)
            .utf8(!bytes)
            .build()
            .parse(&pattern)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            pattern,
            bytes,
            matcher,
            prefix_dfa,
            hir,
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether this terminal matches raw bytes rather than text.
    #[must_use]
    pub fn is_bytes(&self) -> bool {
        self.bytes
    }

    pub(crate) fn hir(&self) -> &Hir {
        &self.hir
    }

    /// Length of the longest anchored match at the start of `word`.
    fn match_len(&self, word: &[u8]) -> Option<usize> {
        self.matcher.find(word).map(|m| m.end())
    }

    /// True when `word` is a prefix of some string in the language.
    fn viable_prefix(&self, word: &[u8]) -> bool {
        let Some(dfa) = &self.prefix_dfa else {
            return false;
        };
        let input = Input::new(word).anchored(Anchored::Yes);
        let Ok(mut state) = dfa.start_state_forward(&input) else {
            return false;
        };
        for &byte in word {
            state = dfa.next_state(state, byte);
            if dfa.is_dead_state(state) || dfa.is_quit_state(state) {
                return false;
            }
        }
        true
    }
}

impl fmt::Debug for RegexTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexTerminal")
            .field("pattern", &self.pattern)
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl PartialEq for RegexTerminal {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes && self.pattern == other.pattern
    }
}

impl Eq for RegexTerminal {}

impl Hash for RegexTerminal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
        self.bytes.hash(state);
    }
}

/// A terminal symbol.
///
/// Regex terminals only appear in grammars. Derivation trees always hold the
/// concrete text or bytes a regex matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminal {
    /// A literal UTF-8 string.
    Text(Arc<str>),
    /// A literal byte string.
    Bytes(Arc<[u8]>),
    /// A regular expression over text or bytes.
    Regex(Arc<RegexTerminal>),
    /// A single bit.
    Bit(bool),
}

impl Terminal {
    /// Literal text terminal.
    #[must_use]
    pub fn text(value: impl AsRef<str>) -> Self {
        Self::Text(Arc::from(value.as_ref()))
    }

    /// Literal byte terminal.
    #[must_use]
    pub fn bytes(value: impl AsRef<[u8]>) -> Self {
        Self::Bytes(Arc::from(value.as_ref()))
    }

    /// Compiled regex terminal.
    ///
    /// # Errors
    ///
    /// Returns [`GrammarError::InvalidRegex`] for patterns that do not compile.
    pub fn regex(pattern: impl Into<String>, bytes: bool) -> GrammarResult<Self> {
        Ok(Self::Regex(Arc::new(RegexTerminal::new(pattern, bytes)?)))
    }

    /// Whether this is a bit terminal.
    #[must_use]
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Bit(_))
    }

    /// Whether this is a regex terminal.
    #[must_use]
    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }

    /// Whether values of this terminal are raw bytes.
    #[must_use]
    pub fn is_bytes(&self) -> bool {
        match self {
            Self::Bytes(_) => true,
            Self::Regex(re) => re.is_bytes(),
            Self::Text(_) | Self::Bit(_) => false,
        }
    }

    /// Raw bytes of a literal terminal.
    #[must_use]
    pub fn literal_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(s) => Some(s.as_bytes()),
            Self::Bytes(b) => Some(b),
            Self::Regex(_) | Self::Bit(_) => None,
        }
    }

    /// Tries to match this terminal at the start of `word`.
    ///
    /// Returns the number of bytes consumed. With `incomplete` set, a
    /// non-empty `word` that is only a proper prefix of a literal, or a viable
    /// prefix of a regex match, also matches and consumes all of `word`.
    /// Bit terminals never match byte input; see [`Terminal::check_bit`].
    #[must_use]
    pub fn check(&self, word: &[u8], incomplete: bool) -> Option<usize> {
        match self {
            Self::Text(_) | Self::Bytes(_) => {
                let literal = self.literal_bytes()?;
                if word.starts_with(literal) {
                    Some(literal.len())
                } else if incomplete && !word.is_empty() && literal.starts_with(word) {
                    Some(word.len())
                } else {
                    None
                }
            }
            Self::Regex(re) => {
                if incomplete && !word.is_empty() && re.viable_prefix(word) {
                    Some(word.len())
                } else {
                    re.match_len(word)
                }
            }
            Self::Bit(_) => None,
        }
    }

    /// Whether a bit terminal accepts `bit`.
    #[must_use]
    pub fn check_bit(&self, bit: bool) -> bool {
        matches!(self, Self::Bit(b) if *b == bit)
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "b\"{}\"", b.escape_ascii()),
            Self::Regex(re) if re.is_bytes() => write!(f, "rb{:?}", re.pattern()),
            Self::Regex(re) => write!(f, "r{:?}", re.pattern()),
            Self::Bit(b) => write!(f, "{}", u8::from(*b)),
        }
    }
}

/// Any grammar symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A terminal.
    Terminal(Terminal),
    /// A non-terminal.
    NonTerminal(NonTerminal),
}

impl Symbol {
    /// Whether this is a terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }

    /// Whether this is a non-terminal.
    #[must_use]
    pub fn is_non_terminal(&self) -> bool {
        matches!(self, Self::NonTerminal(_))
    }

    /// The non-terminal, if this is one.
    #[must_use]
    pub fn as_non_terminal(&self) -> Option<&NonTerminal> {
        match self {
            Self::NonTerminal(nt) => Some(nt),
            Self::Terminal(_) => None,
        }
    }

    /// The terminal, if this is one.
    #[must_use]
    pub fn as_terminal(&self) -> Option<&Terminal> {
        match self {
            Self::Terminal(t) => Some(t),
            Self::NonTerminal(_) => None,
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal(t) => t.fmt(f),
            Self::NonTerminal(nt) => nt.fmt(f),
        }
    }
}

impl From<NonTerminal> for Symbol {
    fn from(nt: NonTerminal) -> Self {
        Self::NonTerminal(nt)
    }
}

impl From<Terminal> for Symbol {
    fn from(t: Terminal) -> Self {
        Self::Terminal(t)
    }
}
