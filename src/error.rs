//! Error types for grammar construction, generation, evaluation and evolution.
//!
//! Parsing never fails: an input that does not match simply yields no trees.
//! Everything else reports through one of the enums below.

use thiserror::Error;

use crate::symbol::NonTerminal;

/// Result type alias for grammar construction.
pub type GrammarResult<T> = Result<T, GrammarError>;

/// Errors raised while building or priming a grammar.
///
/// These are fatal: a grammar that fails to build is never handed to the
/// parser or the fuzzer.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// A rule body references a non-terminal that has no rule.
    #[error("undefined non-terminal {symbol} referenced from {referenced_from}")]
    UndefinedNonTerminal {
        /// The missing symbol.
        symbol: NonTerminal,
        /// The rule whose body mentions it.
        referenced_from: NonTerminal,
    },

    /// The configured start symbol has no rule.
    #[error("start symbol {0} is not defined")]
    UndefinedStart(NonTerminal),

    /// A rule can never derive a finite string.
    #[error("non-terminal {0} cannot derive any finite string")]
    Unproductive(NonTerminal),

    /// Repetition bounds are inconsistent.
    #[error("invalid repetition in {rule}: min {min}, max {max}")]
    InvalidRepetition {
        /// Rule containing the repetition.
        rule: NonTerminal,
        /// Lower bound.
        min: usize,
        /// Upper bound.
        max: usize,
    },

    /// A regular-expression terminal failed to compile.
    #[error("invalid regex terminal {pattern:?}: {message}")]
    InvalidRegex {
        /// The pattern as written.
        pattern: String,
        /// Compiler diagnostic.
        message: String,
    },

    /// Generator dependencies form a cycle.
    #[error("generator dependency cycle through {0}")]
    GeneratorCycle(NonTerminal),

    /// A generator is attached to a symbol with no rule.
    #[error("generator attached to undefined non-terminal {0}")]
    GeneratorWithoutRule(NonTerminal),
}

/// Errors raised while producing trees from a grammar.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The requested symbol has no rule.
    #[error("cannot generate undefined non-terminal {0}")]
    UndefinedNonTerminal(NonTerminal),

    /// A generator callback returned an error.
    #[error("generator for {symbol} failed: {message}")]
    GeneratorFailed {
        /// The generated symbol.
        symbol: NonTerminal,
        /// Message returned by the callback.
        message: String,
    },

    /// A generated value does not parse under its own symbol.
    #[error("generated value {value:?} for {symbol} does not parse")]
    GeneratedValueUnparseable {
        /// The generated symbol.
        symbol: NonTerminal,
        /// Textual rendering of the value.
        value: String,
    },

    /// A derivation grew past the grammar's hard node ceiling, typically
    /// because a repetition bound read from data is huge.
    #[error("derivation of {symbol} exceeds {limit} nodes")]
    NodeLimitExceeded {
        /// The symbol being generated.
        symbol: NonTerminal,
        /// The ceiling that was hit.
        limit: usize,
    },
}

/// Errors raised while evaluating constraints and value expressions.
///
/// Evaluation errors are local: the evaluator logs them and scores the
/// offending combination as zero instead of aborting.
#[derive(Debug, Error)]
pub enum EvalError {
    /// An expression names a variable that no search binds.
    #[error("unbound variable {0}")]
    UnboundVariable(String),

    /// Operands have incompatible types.
    #[error("type mismatch: cannot apply {op} to {left} and {right}")]
    TypeMismatch {
        /// Operator or function being applied.
        op: String,
        /// Type name of the left operand.
        left: &'static str,
        /// Type name of the right operand.
        right: &'static str,
    },

    /// A conversion such as `int(...)` failed.
    #[error("cannot convert {value:?} to {target}")]
    Conversion {
        /// Offending value, rendered as text.
        value: String,
        /// Target type name.
        target: &'static str,
    },

    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// A user function reported an error.
    #[error("function {name} failed: {message}")]
    Function {
        /// Function name.
        name: String,
        /// Message returned by the function.
        message: String,
    },
}

/// Errors raised by the evolutionary engine.
#[derive(Debug, Error)]
pub enum EvolutionError {
    /// The configuration is unusable.
    #[error("invalid evolution config: {0}")]
    InvalidConfig(String),

    /// The start symbol named in the configuration is not a grammar rule.
    #[error("start symbol {0} is not defined in the grammar")]
    UndefinedStart(NonTerminal),

    /// No individual could be generated at all.
    #[error("initial population is empty")]
    EmptyPopulation,

    /// The run ended without enough solutions under a strict policy.
    #[error(
        "no convergence after {generations} generations: {found}/{desired} solutions, best fitness {best_fitness:.4}"
    )]
    NotConverged {
        /// Generations executed.
        generations: usize,
        /// Solutions found.
        found: usize,
        /// Solutions requested.
        desired: usize,
        /// Best fitness observed in the final population.
        best_fitness: f64,
    },

    /// Tree generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Configuration file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid JSON for the expected shape.
    #[error("config parse error: {0}")]
    Config(#[from] serde_json::Error),
}
