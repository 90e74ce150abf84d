//! Value expressions over bound subtrees.

use std::fmt;
use std::sync::Arc;

use crate::constraint::value::Value;
use crate::error::EvalError;
use crate::symbol::Terminal;
use crate::tree::{DerivationTree, NodeId};

/// Variables bound to nodes of one tree.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'t> {
    tree: &'t DerivationTree,
    vars: &'t [(Arc<str>, NodeId)],
}

impl<'t> Bindings<'t> {
    /// Variables bound to nodes of `tree`.
    #[must_use]
    pub fn new(tree: &'t DerivationTree, vars: &'t [(Arc<str>, NodeId)]) -> Self {
        Self { tree, vars }
    }

    /// The tree the variables point into.
    #[must_use]
    pub fn tree(&self) -> &'t DerivationTree {
        self.tree
    }

    /// Node bound to `name`.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.vars.iter().find(|(n, _)| &**n == name).map(|&(_, id)| id)
    }

    /// The subtree bound to `name`, as a standalone tree.
    #[must_use]
    pub fn subtree(&self, name: &str) -> Option<DerivationTree> {
        self.node(name).map(|id| self.tree.subtree(id))
    }

    /// The value of the node bound to `name`: bytes for binary subtrees,
    /// text otherwise.
    ///
    /// # Errors
    ///
    /// [`EvalError::UnboundVariable`] if nothing is bound to `name`.
    pub fn value(&self, name: &str) -> Result<Value, EvalError> {
        let id = self.require(name)?;
        Ok(if self.tree.is_binary_at(id) {
            Value::Bytes(self.tree.bytes_at(id))
        } else {
            Value::Text(self.tree.text_at(id))
        })
    }

    fn require(&self, name: &str) -> Result<NodeId, EvalError> {
        self.node(name)
            .ok_or_else(|| EvalError::UnboundVariable(name.to_string()))
    }
}

/// Arithmetic on values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// Sum, or concatenation of text and bytes.
    Add,
    /// Difference.
    Sub,
    /// Product.
    Mul,
    /// Quotient; integer division truncates.
    Div,
    /// Remainder.
    Mod,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }

    fn apply(self, left: &Value, right: &Value) -> Result<Value, EvalError> {
        match (self, left, right) {
            (Self::Add, Value::Text(a), Value::Text(b)) => Ok(Value::Text(format!("{a}{b}"))),
            (Self::Add, Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([a.as_slice(), b].concat())),
            (_, Value::Int(a), Value::Int(b)) => self.integer(*a, *b),
            (_, Value::Int(_) | Value::Float(_) | Value::Bool(_), Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
                let (a, b) = (left.to_float()?, right.to_float()?);
                Ok(Value::Float(match self {
                    Self::Add => a + b,
                    Self::Sub => a - b,
                    Self::Mul => a * b,
                    Self::Div => a / b,
                    Self::Mod => a % b,
                }))
            }
            _ => Err(EvalError::TypeMismatch {
                op: self.symbol().to_string(),
                left: left.type_name(),
                right: right.type_name(),
            }),
        }
    }

    fn integer(self, a: i64, b: i64) -> Result<Value, EvalError> {
        let result = match self {
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::Mul => a.wrapping_mul(b),
            Self::Div => a.checked_div(b).ok_or(EvalError::DivisionByZero)?,
            Self::Mod => a.checked_rem(b).ok_or(EvalError::DivisionByZero)?,
        };
        Ok(Value::Int(result))
    }
}

type Function = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A named user function.
#[derive(Clone)]
pub struct NamedFn {
    name: Arc<str>,
    call: Arc<Function>,
}

impl NamedFn {
    /// Wraps `call` under a display name.
    #[must_use]
    pub fn new(name: &str, call: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NamedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedFn").field("name", &self.name).finish_non_exhaustive()
    }
}

/// An expression producing a [`Value`] from bound subtrees.
#[derive(Debug, Clone)]
pub enum ValueExpr {
    /// A literal.
    Const(Value),
    /// The text (or bytes) of a bound node.
    Var(Arc<str>),
    /// Integer reading. On a variable this reads bit-only subtrees as base 2.
    Int(Box<ValueExpr>),
    /// Floating-point reading.
    Float(Box<ValueExpr>),
    /// Text rendering.
    Str(Box<ValueExpr>),
    /// Length in characters, bytes or bits.
    Len(Box<ValueExpr>),
    /// Arithmetic.
    Binary(BinOp, Box<ValueExpr>, Box<ValueExpr>),
    /// A user function over the argument values.
    Call(NamedFn, Vec<ValueExpr>),
}

impl ValueExpr {
    /// The node bound to `name`.
    #[must_use]
    pub fn var(name: &str) -> Self {
        Self::Var(name.into())
    }

    /// A literal value.
    #[must_use]
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Const(value.into())
    }

    /// Reads this value as an integer.
    #[must_use]
    pub fn int(self) -> Self {
        Self::Int(Box::new(self))
    }

    /// Reads this value as a float.
    #[must_use]
    pub fn float(self) -> Self {
        Self::Float(Box::new(self))
    }

    /// Renders this value as text.
    #[must_use]
    pub fn str(self) -> Self {
        Self::Str(Box::new(self))
    }

    /// Length of this value.
    #[must_use]
    pub fn len(self) -> Self {
        Self::Len(Box::new(self))
    }

    /// `self op rhs`.
    #[must_use]
    pub fn binary(self, op: BinOp, rhs: ValueExpr) -> Self {
        Self::Binary(op, Box::new(self), Box::new(rhs))
    }

    /// Applies `function` to `args`.
    #[must_use]
    pub fn call(function: NamedFn, args: Vec<ValueExpr>) -> Self {
        Self::Call(function, args)
    }

    /// The variable this expression reads, if it reads exactly one.
    ///
    /// Repairs are only suggested for such expressions, where changing the
    /// one subtree is known to change the value.
    #[must_use]
    pub fn single_var(&self) -> Option<&str> {
        match self {
            Self::Var(name) => Some(name),
            Self::Int(inner) | Self::Float(inner) | Self::Str(inner) => inner.single_var(),
            _ => None,
        }
    }

    /// Evaluates against `bindings`.
    ///
    /// # Errors
    ///
    /// Any [`EvalError`] raised by a conversion, an operator or a function.
    pub fn eval(&self, bindings: &Bindings<'_>) -> Result<Value, EvalError> {
        match self {
            Self::Const(value) => Ok(value.clone()),
            Self::Var(name) => bindings.value(name),
            Self::Int(inner) => {
                if let Self::Var(name) = &**inner {
                    let id = bindings.require(name)?;
                    if let Some(n) = bindings.tree().int_at(id) {
                        return Ok(Value::Int(n));
                    }
                }
                Ok(Value::Int(inner.eval(bindings)?.to_int()?))
            }
            Self::Float(inner) => Ok(Value::Float(inner.eval(bindings)?.to_float()?)),
            Self::Str(inner) => Ok(match inner.eval(bindings)? {
                Value::Text(s) => Value::Text(s),
                Value::Bytes(b) => Value::Text(b.iter().map(|&byte| char::from(byte)).collect()),
                other => Value::Text(other.to_string()),
            }),
            Self::Len(inner) => {
                if let Self::Var(name) = &**inner {
                    let id = bindings.require(name)?;
                    let tree = bindings.tree();
                    let only_bits = tree
                        .descendants(id)
                        .filter_map(|n| tree.symbol(n).as_terminal())
                        .all(Terminal::is_bit);
                    if only_bits {
                        return Ok(Value::Int(len_value(tree.bits_at(id).len())));
                    }
                }
                match inner.eval(bindings)? {
                    Value::Text(s) => Ok(Value::Int(len_value(s.chars().count()))),
                    Value::Bytes(b) => Ok(Value::Int(len_value(b.len()))),
                    other => Err(EvalError::TypeMismatch {
                        op: "len".to_string(),
                        left: other.type_name(),
                        right: "none",
                    }),
                }
            }
            Self::Binary(op, left, right) => op.apply(&left.eval(bindings)?, &right.eval(bindings)?),
            Self::Call(function, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.eval(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                (function.call)(&values).map_err(|message| EvalError::Function {
                    name: function.name.to_string(),
                    message,
                })
            }
        }
    }
}

fn len_value(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(value) => write!(f, "{value}"),
            Self::Var(name) => write!(f, "{name}"),
            Self::Int(inner) => write!(f, "int({inner})"),
            Self::Float(inner) => write!(f, "float({inner})"),
            Self::Str(inner) => write!(f, "str({inner})"),
            Self::Len(inner) => write!(f, "len({inner})"),
            Self::Binary(op, left, right) => write!(f, "({left} {} {right})", op.symbol()),
            Self::Call(function, args) => {
                write!(f, "{}(", function.name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::NonTerminal;

    fn number(text: &str) -> DerivationTree {
        DerivationTree::new(NonTerminal::new("number"), [DerivationTree::text(text)])
    }

    fn vars(name: &str) -> Vec<(Arc<str>, NodeId)> {
        vec![(name.into(), NodeId::ROOT)]
    }

    #[test]
    fn test_int_of_var() {
        let tree = number("73");
        let vars = vars("n");
        let bindings = Bindings::new(&tree, &vars);
        let expr = ValueExpr::var("n").int();
        assert_eq!(expr.eval(&bindings).unwrap(), Value::Int(73));
        let sum = expr.binary(BinOp::Add, ValueExpr::constant(7_i64));
        assert_eq!(sum.eval(&bindings).unwrap(), Value::Int(80));
    }

    #[test]
    fn test_bits_read_base_two() {
        let tree = DerivationTree::new(
            NonTerminal::new("field"),
            [DerivationTree::bit(true), DerivationTree::bit(false), DerivationTree::bit(true)],
        );
        let vars = vars("f");
        let bindings = Bindings::new(&tree, &vars);
        assert_eq!(ValueExpr::var("f").int().eval(&bindings).unwrap(), Value::Int(5));
        assert_eq!(ValueExpr::var("f").len().eval(&bindings).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_errors() {
        let tree = number("x");
        let vars = vars("n");
        let bindings = Bindings::new(&tree, &vars);
        assert!(matches!(
            ValueExpr::var("m").eval(&bindings),
            Err(EvalError::UnboundVariable(_))
        ));
        assert!(matches!(
            ValueExpr::var("n").int().eval(&bindings),
            Err(EvalError::Conversion { .. })
        ));
        let div = ValueExpr::constant(1_i64).binary(BinOp::Div, ValueExpr::constant(0_i64));
        assert!(matches!(div.eval(&bindings), Err(EvalError::DivisionByZero)));
        let mixed = ValueExpr::var("n").binary(BinOp::Sub, ValueExpr::constant(1_i64));
        assert!(matches!(mixed.eval(&bindings), Err(EvalError::TypeMismatch { .. })));
    }

    #[test]
    fn test_function_call() {
        let tree = number("abc");
        let vars = vars("n");
        let bindings = Bindings::new(&tree, &vars);
        let upper = NamedFn::new("upper", |args| match args {
            [Value::Text(s)] => Ok(Value::Text(s.to_uppercase())),
            _ => Err("expected one string".to_string()),
        });
        let expr = ValueExpr::call(upper.clone(), vec![ValueExpr::var("n")]);
        assert_eq!(expr.eval(&bindings).unwrap(), Value::from("ABC"));
        assert_eq!(expr.to_string(), "upper(n)");
        let bad = ValueExpr::call(upper, vec![]);
        assert!(matches!(bad.eval(&bindings), Err(EvalError::Function { .. })));
    }

    #[test]
    fn test_single_var() {
        assert_eq!(ValueExpr::var("x").int().single_var(), Some("x"));
        let sum = ValueExpr::var("x").binary(BinOp::Add, ValueExpr::var("y"));
        assert_eq!(sum.single_var(), None);
    }
}
