//! Values computed from trees, their comparison and distance.

// Distances are approximate by nature
#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// A value an expression evaluates to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Truth value.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// Text, compared by code point.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "str",
            Self::Bytes(_) => "bytes",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(n) => Some(*n as f64),
            Self::Float(x) => Some(*x),
            Self::Text(_) | Self::Bytes(_) => None,
        }
    }

    /// Converts to an integer: numbers truncate, text is parsed as decimal
    /// and bytes are read big-endian.
    ///
    /// # Errors
    ///
    /// [`EvalError::Conversion`] if the value has no integer reading.
    pub fn to_int(&self) -> Result<i64, EvalError> {
        let fail = || EvalError::Conversion {
            value: self.to_string(),
            target: "int",
        };
        match self {
            Self::Bool(b) => Ok(i64::from(*b)),
            Self::Int(n) => Ok(*n),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(x) if x.is_finite() => Ok(x.trunc() as i64),
            Self::Float(_) => Err(fail()),
            Self::Text(s) => s.trim().parse().map_err(|_| fail()),
            Self::Bytes(b) if b.len() <= 8 => {
                let mut buf = [0u8; 8];
                buf[8 - b.len()..].copy_from_slice(b);
                i64::try_from(u64::from_be_bytes(buf)).map_err(|_| fail())
            }
            Self::Bytes(_) => Err(fail()),
        }
    }

    /// Converts to a float.
    ///
    /// # Errors
    ///
    /// [`EvalError::Conversion`] if the value has no numeric reading.
    pub fn to_float(&self) -> Result<f64, EvalError> {
        match self {
            Self::Text(s) => s.trim().parse().map_err(|_| EvalError::Conversion {
                value: s.clone(),
                target: "float",
            }),
            Self::Bytes(_) => Ok(self.to_int()? as f64),
            _ => self.as_f64().ok_or_else(|| EvalError::Conversion {
                value: self.to_string(),
                target: "float",
            }),
        }
    }

    /// Equality across kinds: numbers compare numerically, everything else
    /// only equals its own kind.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Ordering between values of compatible kinds.
    ///
    /// # Errors
    ///
    /// [`EvalError::TypeMismatch`] for kinds that have no common order,
    /// such as text against a number.
    pub fn order(&self, other: &Self, op: &str) -> Result<Ordering, EvalError> {
        let mismatch = || EvalError::TypeMismatch {
            op: op.to_string(),
            left: self.type_name(),
            right: other.type_name(),
        };
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Ok(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Ok(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            _ => {
                let (a, b) = self.as_f64().zip(other.as_f64()).ok_or_else(mismatch)?;
                a.partial_cmp(&b).ok_or_else(mismatch)
            }
        }
    }

    /// How far apart two values are: absolute difference for numbers, edit
    /// distance for text and bytes. `None` for unrelated kinds.
    #[must_use]
    pub fn distance(&self, other: &Self) -> Option<f64> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => {
                let a: Vec<char> = a.chars().collect();
                let b: Vec<char> = b.chars().collect();
                Some(edit_distance(&a, &b) as f64)
            }
            (Self::Bytes(a), Self::Bytes(b)) => Some(edit_distance(a, b) as f64),
            (Self::Int(a), Self::Int(b)) => Some(a.abs_diff(*b) as f64),
            _ => {
                let (a, b) = self.as_f64().zip(other.as_f64())?;
                Some((a - b).abs())
            }
        }
    }
}

/// Partial credit for a comparison that failed by `distance`.
///
/// Strictly below one half and non-increasing in `distance`, so a failed
/// comparison never scores like a solved one and closer misses score
/// higher.
#[must_use]
pub fn partial_fitness(distance: f64) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    0.5 * (1.0 - (distance / 10.0).tanh())
}

/// Levenshtein distance.
fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitute = previous[j] + usize::from(x != y);
            current[j + 1] = substitute.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => {
                f.write_str("b\"")?;
                for byte in b {
                    write!(f, "\\x{byte:02x}")?;
                }
                f.write_str("\"")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}
