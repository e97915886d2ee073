//! How Rust field types map onto columns.

use std::fmt;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use facet::{Def, Facet, Shape, Type, UserType};
use facet_core::StructKind;
use facet_reflect::{Partial, Peek};
use oorm_sql::Value;
use rust_decimal::Decimal;

use crate::{Cardinality, DataType, SchemaError};

/// Leaf types stored natively in one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scalar {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Decimal,
    String,
    DateTime,
    DateTimeUtc,
    Date,
}

impl Scalar {
    pub(crate) fn of(shape: &'static Shape) -> Option<Scalar> {
        let scalar = if shape == bool::SHAPE {
            Scalar::Bool
        } else if shape == i8::SHAPE {
            Scalar::I8
        } else if shape == i16::SHAPE {
            Scalar::I16
        } else if shape == i32::SHAPE {
            Scalar::I32
        } else if shape == i64::SHAPE {
            Scalar::I64
        } else if shape == u8::SHAPE {
            Scalar::U8
        } else if shape == u16::SHAPE {
            Scalar::U16
        } else if shape == u32::SHAPE {
            Scalar::U32
        } else if shape == u64::SHAPE {
            Scalar::U64
        } else if shape == f32::SHAPE {
            Scalar::F32
        } else if shape == f64::SHAPE {
            Scalar::F64
        } else if shape == Decimal::SHAPE {
            Scalar::Decimal
        } else if shape == String::SHAPE {
            Scalar::String
        } else if shape == NaiveDateTime::SHAPE {
            Scalar::DateTime
        } else if shape == DateTime::<Utc>::SHAPE {
            Scalar::DateTimeUtc
        } else if shape == NaiveDate::SHAPE {
            Scalar::Date
        } else {
            return None;
        };
        Some(scalar)
    }

    pub(crate) fn data_type(self) -> DataType {
        match self {
            Scalar::Bool => DataType::Bool,
            Scalar::I8 | Scalar::I16 | Scalar::I32 | Scalar::I64 => DataType::Int,
            Scalar::U8 | Scalar::U16 | Scalar::U32 | Scalar::U64 => DataType::Uint,
            Scalar::F32 | Scalar::F64 | Scalar::Decimal => DataType::Float,
            Scalar::String => DataType::String,
            Scalar::DateTime | Scalar::DateTimeUtc | Scalar::Date => DataType::Time,
        }
    }

    /// Natural bit width for numbers, fractional-second precision for times.
    pub(crate) fn size(self) -> u32 {
        match self {
            Scalar::Bool | Scalar::I8 | Scalar::U8 => 8,
            Scalar::I16 | Scalar::U16 => 16,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 32,
            Scalar::I64 | Scalar::U64 | Scalar::F64 | Scalar::Decimal => 64,
            Scalar::DateTime | Scalar::DateTimeUtc => 3,
            Scalar::String | Scalar::Date => 0,
        }
    }

    /// Precision spec for exact numerics.
    pub(crate) fn decimal(self) -> Option<&'static str> {
        match self {
            Scalar::Decimal => Some("20,6"),
            _ => None,
        }
    }

    fn zero(self) -> Value {
        match self.data_type() {
            DataType::Bool => Value::Bool(false),
            DataType::Int => Value::I64(0),
            DataType::Uint => Value::U64(0),
            DataType::Float if self == Scalar::Decimal => Value::Decimal(Decimal::ZERO),
            DataType::Float => Value::F64(0.0),
            DataType::String => Value::String(String::new()),
            DataType::Time => Value::Time(NaiveDateTime::default()),
            DataType::Json => Value::Null,
        }
    }

    fn read(self, peek: Peek<'_, '_>) -> Result<Value, SchemaError> {
        Ok(match self {
            Scalar::Bool => Value::Bool(*peek.get::<bool>()?),
            Scalar::I8 => Value::I64(i64::from(*peek.get::<i8>()?)),
            Scalar::I16 => Value::I64(i64::from(*peek.get::<i16>()?)),
            Scalar::I32 => Value::I64(i64::from(*peek.get::<i32>()?)),
            Scalar::I64 => Value::I64(*peek.get::<i64>()?),
            Scalar::U8 => Value::U64(u64::from(*peek.get::<u8>()?)),
            Scalar::U16 => Value::U64(u64::from(*peek.get::<u16>()?)),
            Scalar::U32 => Value::U64(u64::from(*peek.get::<u32>()?)),
            Scalar::U64 => Value::U64(*peek.get::<u64>()?),
            Scalar::F32 => Value::F64(f64::from(*peek.get::<f32>()?)),
            Scalar::F64 => Value::F64(*peek.get::<f64>()?),
            Scalar::Decimal => Value::Decimal(*peek.get::<Decimal>()?),
            Scalar::String => Value::String(peek.get::<String>()?.clone()),
            Scalar::DateTime => Value::Time(*peek.get::<NaiveDateTime>()?),
            Scalar::DateTimeUtc => Value::Time(peek.get::<DateTime<Utc>>()?.naive_utc()),
            Scalar::Date => Value::Time(peek.get::<NaiveDate>()?.and_time(NaiveTime::MIN)),
        })
    }

    /// Normalize a value to the variant [`read`](Self::read) produces.
    fn coerce(self, value: &Value) -> Result<Value, SchemaError> {
        Ok(match self {
            Scalar::Bool => Value::Bool(to_bool(value)?),
            Scalar::I8 => Value::I64(to_int::<i8>(value, "i8")?.into()),
            Scalar::I16 => Value::I64(to_int::<i16>(value, "i16")?.into()),
            Scalar::I32 => Value::I64(to_int::<i32>(value, "i32")?.into()),
            Scalar::I64 => Value::I64(to_int::<i64>(value, "i64")?),
            Scalar::U8 => Value::U64(to_uint::<u8>(value, "u8")?.into()),
            Scalar::U16 => Value::U64(to_uint::<u16>(value, "u16")?.into()),
            Scalar::U32 => Value::U64(to_uint::<u32>(value, "u32")?.into()),
            Scalar::U64 => Value::U64(to_uint::<u64>(value, "u64")?),
            Scalar::F32 | Scalar::F64 => Value::F64(to_float(value)?),
            Scalar::Decimal => Value::Decimal(to_decimal(value)?),
            Scalar::String => Value::String(to_string(value)?),
            Scalar::DateTime | Scalar::DateTimeUtc => Value::Time(to_datetime(value)?),
            Scalar::Date => Value::Time(to_date(value)?.and_time(NaiveTime::MIN)),
        })
    }

    fn write(
        self,
        partial: Partial<'static, false>,
        value: &Value,
    ) -> Result<Partial<'static, false>, SchemaError> {
        Ok(match self {
            Scalar::Bool => partial.set(to_bool(value)?)?,
            Scalar::I8 => partial.set(to_int::<i8>(value, "i8")?)?,
            Scalar::I16 => partial.set(to_int::<i16>(value, "i16")?)?,
            Scalar::I32 => partial.set(to_int::<i32>(value, "i32")?)?,
            Scalar::I64 => partial.set(to_int::<i64>(value, "i64")?)?,
            Scalar::U8 => partial.set(to_uint::<u8>(value, "u8")?)?,
            Scalar::U16 => partial.set(to_uint::<u16>(value, "u16")?)?,
            Scalar::U32 => partial.set(to_uint::<u32>(value, "u32")?)?,
            Scalar::U64 => partial.set(to_uint::<u64>(value, "u64")?)?,
            Scalar::F32 => partial.set(to_float(value)? as f32)?,
            Scalar::F64 => partial.set(to_float(value)?)?,
            Scalar::Decimal => partial.set(to_decimal(value)?)?,
            Scalar::String => partial.set(to_string(value)?)?,
            Scalar::DateTime => partial.set(to_datetime(value)?)?,
            Scalar::DateTimeUtc => partial.set(to_datetime(value)?.and_utc())?,
            Scalar::Date => partial.set(to_date(value)?)?,
        })
    }
}

// ============================================================================
// Value conversions
// ============================================================================

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn to_bool(value: &Value) -> Result<bool, SchemaError> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => other
            .as_i64()
            .map(|n| n != 0)
            .ok_or_else(|| SchemaError::mismatch("bool", other)),
    }
}

fn to_int<T: TryFrom<i64>>(value: &Value, name: &'static str) -> Result<T, SchemaError> {
    value
        .as_i64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| SchemaError::mismatch(name, value))
}

fn to_uint<T: TryFrom<u64>>(value: &Value, name: &'static str) -> Result<T, SchemaError> {
    value
        .as_u64()
        .and_then(|n| T::try_from(n).ok())
        .ok_or_else(|| SchemaError::mismatch(name, value))
}

fn to_float(value: &Value) -> Result<f64, SchemaError> {
    value
        .as_f64()
        .ok_or_else(|| SchemaError::mismatch("float", value))
}

fn to_decimal(value: &Value) -> Result<Decimal, SchemaError> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::I64(n) => Ok(Decimal::from(*n)),
        Value::U64(n) => Ok(Decimal::from(*n)),
        Value::F64(n) => Decimal::try_from(*n).map_err(|_| SchemaError::mismatch("decimal", value)),
        Value::String(s) => s
            .parse()
            .map_err(|_| SchemaError::mismatch("decimal", value)),
        _ => Err(SchemaError::mismatch("decimal", value)),
    }
}

fn to_string(value: &Value) -> Result<String, SchemaError> {
    match value {
        Value::String(s) | Value::Json(s) => Ok(s.clone()),
        Value::Bytes(b) => {
            String::from_utf8(b.clone()).map_err(|_| SchemaError::mismatch("string", value))
        }
        Value::Null => Err(SchemaError::mismatch("string", value)),
        other => Ok(other.to_string()),
    }
}

fn to_datetime(value: &Value) -> Result<NaiveDateTime, SchemaError> {
    match value {
        Value::Time(t) => Ok(*t),
        Value::String(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
            .map_err(|_| SchemaError::mismatch("datetime", value)),
        _ => Err(SchemaError::mismatch("datetime", value)),
    }
}

fn to_date(value: &Value) -> Result<NaiveDate, SchemaError> {
    if let Value::String(s) = value
        && s.len() == 10
    {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| SchemaError::mismatch("date", value));
    }
    to_datetime(value).map(|t| t.date())
}

fn json_text(value: &Value) -> Result<&[u8], SchemaError> {
    match value {
        Value::Json(s) | Value::String(s) => Ok(s.as_bytes()),
        Value::Bytes(b) => Ok(b),
        other => Err(SchemaError::mismatch("json", other)),
    }
}

/// NULL, or a JSON document that is just `null`.
fn is_null_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Json(s) => s.trim() == "null",
        _ => false,
    }
}

// ============================================================================
// Storage
// ============================================================================

/// How one column is read from and written to a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Storage {
    Native { scalar: Scalar, nullable: bool },
    /// A JSON document. `wrapped` fields are [`Json`] wrappers.
    Json { nullable: bool, wrapped: bool },
}

impl Storage {
    pub(crate) fn nullable(self) -> bool {
        match self {
            Storage::Native { nullable, .. } | Storage::Json { nullable, .. } => nullable,
        }
    }

    /// Value of a column that was never loaded.
    pub(crate) fn zero(self) -> Value {
        match self {
            Storage::Native {
                scalar,
                nullable: false,
            } => scalar.zero(),
            _ => Value::Null,
        }
    }

    pub(crate) fn coerce(self, value: &Value) -> Result<Value, SchemaError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            Storage::Native { scalar, .. } => scalar.coerce(value),
            Storage::Json { .. } => {
                let text = std::str::from_utf8(json_text(value)?)
                    .map_err(|_| SchemaError::mismatch("json", value))?;
                Ok(Value::Json(text.to_owned()))
            }
        }
    }

    /// Read the field `peek` points at.
    pub(crate) fn read(self, peek: Peek<'_, '_>) -> Result<Value, SchemaError> {
        let peek = if self.nullable() {
            match peek.into_option()?.value() {
                Some(inner) => inner,
                None => return Ok(Value::Null),
            }
        } else {
            peek
        };
        match self {
            Storage::Native { scalar, .. } => scalar.read(peek),
            Storage::Json { wrapped, .. } => {
                let peek = if wrapped {
                    peek.into_struct()?
                        .field(0)
                        .map_err(|e| SchemaError::FieldAccess(e.to_string()))?
                } else {
                    peek
                };
                let text = facet_json::peek_to_string(peek)
                    .map_err(|e| SchemaError::Json(e.to_string()))?;
                Ok(Value::Json(text))
            }
        }
    }

    /// Fill the field `partial` points at. NULL leaves the type's default.
    pub(crate) fn write(
        self,
        partial: Partial<'static, false>,
        value: &Value,
    ) -> Result<Partial<'static, false>, SchemaError> {
        let null = match self {
            Storage::Native { .. } => value.is_null(),
            Storage::Json { .. } => is_null_json(value),
        };
        if null {
            return Ok(partial.set_default()?);
        }

        let mut partial = partial;
        if self.nullable() {
            partial = partial.begin_some()?;
        }
        partial = match self {
            Storage::Native { scalar, .. } => scalar.write(partial, value)?,
            Storage::Json { wrapped, .. } => {
                if wrapped {
                    partial = partial.begin_nth_field(0)?;
                }
                partial = facet_json::from_slice_into(json_text(value)?, partial)
                    .map_err(|e| SchemaError::Json(e.to_string()))?;
                if wrapped {
                    partial = partial.end()?;
                }
                partial
            }
        };
        if self.nullable() {
            partial = partial.end()?;
        }
        Ok(partial)
    }
}

// ============================================================================
// Field classification
// ============================================================================

/// What a record field holds, judged from its shape.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FieldKind {
    Column(Storage),
    /// `Option<R>` or `Vec<R>` of a record type `R`.
    Records {
        cardinality: Cardinality,
        shape: &'static Shape,
    },
}

pub(crate) fn classify(shape: &'static Shape) -> FieldKind {
    let (inner, nullable) = unwrap_option(shape);
    if let Some(scalar) = Scalar::of(inner) {
        return FieldKind::Column(Storage::Native { scalar, nullable });
    }
    if nullable && is_record(inner) {
        return FieldKind::Records {
            cardinality: Cardinality::One,
            shape: inner,
        };
    }
    if matches!(&shape.def, Def::List(_))
        && let Some(item) = shape.inner
        && is_record(item)
    {
        return FieldKind::Records {
            cardinality: Cardinality::Many,
            shape: item,
        };
    }
    FieldKind::Column(Storage::Json {
        nullable,
        wrapped: inner.decl_id == Json::<()>::SHAPE.decl_id,
    })
}

/// Unwrap `Option<T>` to get the inner type and nullability.
pub(crate) fn unwrap_option(shape: &'static Shape) -> (&'static Shape, bool) {
    if shape.decl_id == Option::<()>::SHAPE.decl_id
        && let Some(inner) = shape.inner
    {
        return (inner, true);
    }
    (shape, false)
}

/// A plain struct with named fields that is not a column type of its own.
pub(crate) fn is_record(shape: &'static Shape) -> bool {
    matches!(&shape.ty, Type::User(UserType::Struct(s)) if s.kind == StructKind::Struct)
        && Scalar::of(shape).is_none()
        && shape.decl_id != Json::<()>::SHAPE.decl_id
}

// ============================================================================
// Json wrapper
// ============================================================================

/// A wrapper that stores any `Facet` type in a JSON column.
///
/// Collections and maps are stored as JSON automatically; `Json<T>` covers
/// plain structs that are not records.
#[derive(Clone, PartialEq, Eq, Facet)]
#[repr(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Create a new `Json` wrapper around the given value.
    #[inline]
    pub fn new(value: T) -> Self {
        Json(value)
    }

    /// Unwrap the inner value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Json<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Json<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> From<T> for Json<T> {
    #[inline]
    fn from(value: T) -> Self {
        Json(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: Default> Default for Json<T> {
    fn default() -> Self {
        Json(T::default())
    }
}
