//! Column types and values.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ProtocolError;

/// Column type as declared by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// `Bool`, one byte.
    Bool,
    /// `UInt8`.
    UInt8,
    /// `UInt16`.
    UInt16,
    /// `UInt32`.
    UInt32,
    /// `UInt64`.
    UInt64,
    /// `Int8`.
    Int8,
    /// `Int16`.
    Int16,
    /// `Int32`.
    Int32,
    /// `Int64`.
    Int64,
    /// `Float32`.
    Float32,
    /// `Float64`.
    Float64,
    /// Variable-length `String`.
    String,
    /// `FixedString(N)`, zero-padded to `N` bytes.
    FixedString(usize),
    /// `Date`, days since the Unix epoch as `u16`.
    Date,
    /// `DateTime`, seconds since the Unix epoch as `u32`.
    DateTime,
    /// `Nullable(T)`.
    Nullable(Box<ColumnType>),
}

impl ColumnType {
    /// Convert `value` into the representation stored for this type.
    ///
    /// Integers are converted across widths when the value fits; everything
    /// else must already match.
    pub fn coerce(&self, value: Value) -> Result<Value, Value> {
        match (self, value) {
            (Self::Nullable(_), Value::Null) => Ok(Value::Null),
            (Self::Nullable(inner), value) => inner.coerce(value),
            (Self::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Self::Bool, value) => match value.as_i128() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(value),
            },
            (Self::UInt8, v) => int_into(v, Value::UInt8),
            (Self::UInt16, v) => int_into(v, Value::UInt16),
            (Self::UInt32, v) => int_into(v, Value::UInt32),
            (Self::UInt64, v) => int_into(v, Value::UInt64),
            (Self::Int8, v) => int_into(v, Value::Int8),
            (Self::Int16, v) => int_into(v, Value::Int16),
            (Self::Int32, v) => int_into(v, Value::Int32),
            (Self::Int64, v) => int_into(v, Value::Int64),
            (Self::Float32, Value::Float32(f)) => Ok(Value::Float32(f)),
            (Self::Float64, Value::Float64(f)) => Ok(Value::Float64(f)),
            (Self::Float64, Value::Float32(f)) => Ok(Value::Float64(f64::from(f))),
            (Self::String, Value::String(s)) => Ok(Value::String(s)),
            (Self::FixedString(n), Value::String(s)) if s.len() <= *n => Ok(Value::String(s)),
            (Self::Date, Value::Date(d)) if date_in_range(d) => Ok(Value::Date(d)),
            (Self::DateTime, Value::DateTime(t)) if datetime_in_range(t) => Ok(Value::DateTime(t)),
            (_, value) => Err(value),
        }
    }

    /// Whether the column allows `NULL`.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    /// The value written for `NULL` rows and padding.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::UInt8 => Value::UInt8(0),
            Self::UInt16 => Value::UInt16(0),
            Self::UInt32 => Value::UInt32(0),
            Self::UInt64 => Value::UInt64(0),
            Self::Int8 => Value::Int8(0),
            Self::Int16 => Value::Int16(0),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::Float32 => Value::Float32(0.0),
            Self::Float64 => Value::Float64(0.0),
            Self::String | Self::FixedString(_) => Value::String(String::new()),
            Self::Date => Value::Date(NaiveDate::default()),
            Self::DateTime => Value::DateTime(DateTime::<Utc>::default()),
            Self::Nullable(inner) => inner.default_value(),
        }
    }
}

fn date_in_range(date: NaiveDate) -> bool {
    let days = date.signed_duration_since(NaiveDate::default()).num_days();
    (0..=i64::from(u16::MAX)).contains(&days)
}

fn datetime_in_range(time: DateTime<Utc>) -> bool {
    (0..=i64::from(u32::MAX)).contains(&time.timestamp())
}

fn int_into<T>(value: Value, wrap: fn(T) -> Value) -> Result<Value, Value>
where
    T: TryFrom<i128>,
{
    match value.as_i128().and_then(|n| T::try_from(n).ok()) {
        Some(n) => Ok(wrap(n)),
        None => Err(value),
    }
}

impl FromStr for ColumnType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = strip_wrapper(s, "Nullable") {
            return Ok(Self::Nullable(Box::new(inner.parse()?)));
        }
        if let Some(len) = strip_wrapper(s, "FixedString") {
            let len = len
                .trim()
                .parse()
                .map_err(|_| ProtocolError::UnsupportedType(s.to_string()))?;
            return Ok(Self::FixedString(len));
        }
        // DateTime('Europe/Moscow') carries a display time zone only
        if strip_wrapper(s, "DateTime").is_some() {
            return Ok(Self::DateTime);
        }
        match s {
            "Bool" => Ok(Self::Bool),
            "UInt8" => Ok(Self::UInt8),
            "UInt16" => Ok(Self::UInt16),
            "UInt32" => Ok(Self::UInt32),
            "UInt64" => Ok(Self::UInt64),
            "Int8" => Ok(Self::Int8),
            "Int16" => Ok(Self::Int16),
            "Int32" => Ok(Self::Int32),
            "Int64" => Ok(Self::Int64),
            "Float32" => Ok(Self::Float32),
            "Float64" => Ok(Self::Float64),
            "String" => Ok(Self::String),
            "Date" => Ok(Self::Date),
            "DateTime" => Ok(Self::DateTime),
            _ => Err(ProtocolError::UnsupportedType(s.to_string())),
        }
    }
}

fn strip_wrapper<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("Bool"),
            Self::UInt8 => f.write_str("UInt8"),
            Self::UInt16 => f.write_str("UInt16"),
            Self::UInt32 => f.write_str("UInt32"),
            Self::UInt64 => f.write_str("UInt64"),
            Self::Int8 => f.write_str("Int8"),
            Self::Int16 => f.write_str("Int16"),
            Self::Int32 => f.write_str("Int32"),
            Self::Int64 => f.write_str("Int64"),
            Self::Float32 => f.write_str("Float32"),
            Self::Float64 => f.write_str("Float64"),
            Self::String => f.write_str("String"),
            Self::FixedString(n) => write!(f, "FixedString({n})"),
            Self::Date => f.write_str("Date"),
            Self::DateTime => f.write_str("DateTime"),
            Self::Nullable(inner) => write!(f, "Nullable({inner})"),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `NULL`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Timestamp with second precision.
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::UInt8(_) => "UInt8",
            Self::UInt16(_) => "UInt16",
            Self::UInt32(_) => "UInt32",
            Self::UInt64(_) => "UInt64",
            Self::Int8(_) => "Int8",
            Self::Int16(_) => "Int16",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Float32(_) => "Float32",
            Self::Float64(_) => "Float64",
            Self::String(_) => "String",
            Self::Date(_) => "Date",
            Self::DateTime(_) => "DateTime",
        }
    }

    /// Integer value widened to `i128`, if this is an integer.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Self::UInt8(n) => Some(n.into()),
            Self::UInt16(n) => Some(n.into()),
            Self::UInt32(n) => Some(n.into()),
            Self::UInt64(n) => Some(n.into()),
            Self::Int8(n) => Some(n.into()),
            Self::Int16(n) => Some(n.into()),
            Self::Int32(n) => Some(n.into()),
            Self::Int64(n) => Some(n.into()),
            _ => None,
        }
    }

    /// Whether this is `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

macro_rules! impl_from_for_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_from_for_value! {
    bool => Bool,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    NaiveDate => Date,
    DateTime<Utc> => DateTime,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
