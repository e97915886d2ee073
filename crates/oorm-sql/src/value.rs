//! Runtime values for query parameters and row data.

use std::fmt;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// A runtime SQL value.
///
/// Used for bound parameters and decoded row data. Maps to MySQL types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL
    Null,

    /// Boolean (TINYINT)
    Bool(bool),

    /// Signed integer (TINYINT..BIGINT)
    I64(i64),

    /// Unsigned integer (TINYINT UNSIGNED..BIGINT UNSIGNED)
    U64(u64),

    /// Floating point (FLOAT, DOUBLE)
    F64(f64),

    /// Exact numeric (DECIMAL)
    Decimal(Decimal),

    /// Text (VARCHAR, TEXT, ...)
    String(String),

    /// Binary data (BLOB, VARBINARY)
    Bytes(Vec<u8>),

    /// DATETIME / TIMESTAMP
    Time(NaiveDateTime),

    /// JSON document, kept as its serialized text.
    Json(String),
}

/// A hashable projection of a [`Value`], used to match keys across rows.
///
/// Integers of either signedness compare equal when they hold the same number,
/// so an `u32` local key finds rows whose foreign key decoded as `i64`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i128),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this is a NULL value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for NULL and for the zero value of each type
    /// (`false`, `0`, `""`, empty bytes).
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::I64(n) => *n == 0,
            Value::U64(n) => *n == 0,
            Value::F64(n) => *n == 0.0,
            Value::Decimal(d) => d.is_zero(),
            Value::String(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Time(_) => false,
            Value::Json(s) => s.is_empty() || s == "null",
        }
    }

    /// Key used to group rows by this value. NULL has no key.
    pub fn key(&self) -> Option<Key> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(b) => Key::Int(i128::from(*b)),
            Value::I64(n) => Key::Int(i128::from(*n)),
            Value::U64(n) => Key::Int(i128::from(*n)),
            Value::String(s) | Value::Json(s) => Key::Text(s.clone()),
            Value::Bytes(b) => Key::Bytes(b.clone()),
            other => Key::Text(other.to_string()),
        })
    }

    /// Best-effort conversion to a signed integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::I64(n) => Some(*n),
            Value::U64(n) => i64::try_from(*n).ok(),
            Value::F64(n) if n.fract() == 0.0 => Some(*n as i64),
            Value::Decimal(d) => d.trunc().to_string().parse().ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Best-effort conversion to an unsigned integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Bool(b) => Some(u64::from(*b)),
            Value::I64(n) => u64::try_from(*n).ok(),
            Value::U64(n) => Some(*n),
            Value::F64(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as u64),
            Value::Decimal(d) => d.trunc().to_string().parse().ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Best-effort conversion to a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I64(n) => Some(*n as f64),
            Value::U64(n) => Some(*n as f64),
            Value::F64(n) => Some(*n),
            Value::Decimal(d) => d.to_string().parse().ok(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Time(_) => "time",
            Value::Json(_) => "json",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", u8::from(*b)),
            Value::I64(n) => write!(f, "{n}"),
            Value::U64(n) => write!(f, "{n}"),
            Value::F64(n) => write!(f, "{n}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::String(s) | Value::Json(s) => write!(f, "{s}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Time(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S%.3f")),
        }
    }
}

macro_rules! from_int {
    ($variant:ident: $($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

from_int!(I64: i8, i16, i32, i64);
from_int!(U64: u8, u16, u32, u64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F64(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_and_unsigned_keys_match() {
        assert_eq!(Value::from(7u32).key(), Value::from(7i64).key());
        assert_ne!(Value::from(7u32).key(), Value::from("7x").key());
        assert_eq!(Value::Null.key(), None);
    }

    #[test]
    fn zero_values() {
        assert!(Value::from(0u64).is_zero());
        assert!(Value::from("").is_zero());
        assert!(Value::from(false).is_zero());
        assert!(Value::Json("null".into()).is_zero());
        assert!(!Value::from(1i8).is_zero());
        assert!(!Value::from("a").is_zero());
    }

    #[test]
    fn lenient_integer_reads() {
        assert_eq!(Value::from(true).as_u64(), Some(1));
        assert_eq!(Value::from(-1i64).as_u64(), None);
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::from(3.0f64).as_i64(), Some(3));
    }
}
