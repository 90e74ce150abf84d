//! Generator callbacks attached to non-terminals.

use std::fmt;
use std::sync::Arc;

use crate::symbol::NonTerminal;
use crate::tree::DerivationTree;

/// Value produced by a [`Generator`]. It is parsed under the generator's
/// own rule before being placed in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedValue {
    /// Text input.
    Text(String),
    /// Binary input.
    Bytes(Vec<u8>),
    /// An integer rendered in decimal.
    Int(i64),
}

impl From<String> for GeneratedValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for GeneratedValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for GeneratedValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<i64> for GeneratedValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl fmt::Display for GeneratedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "{}", b.escape_ascii()),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

type ProduceFn = dyn Fn(&[DerivationTree]) -> Result<GeneratedValue, String> + Send + Sync;

/// Computes a non-terminal's value from freshly generated dependency trees.
///
/// ```
/// use evogram::{GeneratedValue, Generator, NodeId};
///
/// // <len> := str(len(<payload>))
/// let generator = Generator::new(["payload".into()], |deps| {
///     Ok(GeneratedValue::Int(deps[0].to_bytes().len() as i64))
/// });
/// assert_eq!(generator.dependencies().len(), 1);
/// ```
#[derive(Clone)]
pub struct Generator {
    dependencies: Vec<NonTerminal>,
    produce: Arc<ProduceFn>,
}

impl Generator {
    /// A generator reading the given dependencies, in order.
    pub fn new(
        dependencies: impl IntoIterator<Item = NonTerminal>,
        produce: impl Fn(&[DerivationTree]) -> Result<GeneratedValue, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            dependencies: dependencies.into_iter().collect(),
            produce: Arc::new(produce),
        }
    }

    /// Dependencies passed to the callback, in order.
    #[must_use]
    pub fn dependencies(&self) -> &[NonTerminal] {
        &self.dependencies
    }

    /// Runs the callback.
    ///
    /// # Errors
    ///
    /// Whatever message the callback returns.
    pub fn produce(&self, sources: &[DerivationTree]) -> Result<GeneratedValue, String> {
        (self.produce)(sources)
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
