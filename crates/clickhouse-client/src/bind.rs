//! Client-side parameter binding.
//!
//! Placeholders are replaced with SQL literals before the query is sent:
//!
//! - `?` takes the next positional argument
//! - `$N` takes positional argument `N` (1-based)
//! - `@name` takes the named argument `name`
//!
//! Placeholders inside string literals, quoted identifiers and comments are
//! left alone.

use ch_protocol::Value;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Error;

/// A query argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Consumed by `?` or `$N`.
    Positional(Value),
    /// Consumed by `@name`.
    Named(String, Value),
}

/// Build a named argument for `@name` placeholders.
pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Arg {
    Arg::Named(name.into(), value.into())
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Positional(value)
    }
}

macro_rules! impl_from_for_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Self::Positional(Value::from(v))
                }
            }
        )*
    };
}

impl_from_for_arg!(
    bool,
    u8,
    u16,
    u32,
    u64,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    &str,
    NaiveDate,
    DateTime<Utc>,
);

impl<T: Into<Value>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        Self::Positional(Value::from(v))
    }
}

/// Render `value` as a SQL literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::UInt8(n) => n.to_string(),
        Value::UInt16(n) => n.to_string(),
        Value::UInt32(n) => n.to_string(),
        Value::UInt64(n) => n.to_string(),
        Value::Int8(n) => n.to_string(),
        Value::Int16(n) => n.to_string(),
        Value::Int32(n) => n.to_string(),
        Value::Int64(n) => n.to_string(),
        Value::Float32(f) => f.to_string(),
        Value::Float64(f) => f.to_string(),
        Value::String(s) => quote(s),
        Value::Date(d) => format!("toDate('{}')", d.format("%Y-%m-%d")),
        Value::DateTime(t) => format!("toDateTime('{}', 'UTC')", t.format("%Y-%m-%d %H:%M:%S")),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Substitute `args` into the placeholders of `query`.
///
/// Returns the query unchanged when there are no arguments.
pub fn bind(query: &str, args: &[Arg]) -> Result<String, Error> {
    if args.is_empty() {
        return Ok(query.to_string());
    }

    let positional: Vec<&Value> = args
        .iter()
        .filter_map(|a| match a {
            Arg::Positional(v) => Some(v),
            Arg::Named(..) => None,
        })
        .collect();
    let lookup_named = |name: &str| {
        args.iter().find_map(|a| match a {
            Arg::Named(n, v) if n == name => Some(v),
            _ => None,
        })
    };

    let mut out = String::with_capacity(query.len() + args.len() * 8);
    let mut used = vec![false; positional.len()];
    let mut next = 0;
    let mut chars = query.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let end = quoted_end(query, i, c);
                out.push_str(&query[i..end]);
                skip_to(&mut chars, end);
            }
            '-' if query[i..].starts_with("--") => {
                let end = query[i..].find('\n').map_or(query.len(), |n| i + n);
                out.push_str(&query[i..end]);
                skip_to(&mut chars, end);
            }
            '/' if query[i..].starts_with("/*") => {
                let end = query[i + 2..].find("*/").map_or(query.len(), |n| i + 2 + n + 2);
                out.push_str(&query[i..end]);
                skip_to(&mut chars, end);
            }
            '?' => {
                let value = positional.get(next).ok_or_else(|| {
                    Error::Bind(format!("no argument for placeholder #{}", next + 1))
                })?;
                used[next] = true;
                next += 1;
                out.push_str(&literal(value));
            }
            '$' if query[i + 1..].starts_with(|d: char| d.is_ascii_digit()) => {
                let digits_end = query[i + 1..]
                    .find(|d: char| !d.is_ascii_digit())
                    .map_or(query.len(), |n| i + 1 + n);
                let index: usize = query[i + 1..digits_end].parse().map_err(|_| {
                    Error::Bind(format!("invalid placeholder {}", &query[i..digits_end]))
                })?;
                let value = index
                    .checked_sub(1)
                    .and_then(|n| positional.get(n).map(|v| (n, v)))
                    .ok_or_else(|| Error::Bind(format!("no argument for placeholder ${index}")))?;
                used[value.0] = true;
                out.push_str(&literal(value.1));
                skip_to(&mut chars, digits_end);
            }
            '@' if query[i + 1..].starts_with(|d: char| d.is_ascii_alphabetic() || d == '_') => {
                let name_end = query[i + 1..]
                    .find(|d: char| !(d.is_ascii_alphanumeric() || d == '_'))
                    .map_or(query.len(), |n| i + 1 + n);
                let name = &query[i + 1..name_end];
                let value = lookup_named(name)
                    .ok_or_else(|| Error::Bind(format!("no argument for @{name}")))?;
                out.push_str(&literal(value));
                skip_to(&mut chars, name_end);
            }
            c => out.push(c),
        }
    }

    if let Some(unused) = used.iter().position(|u| !u) {
        return Err(Error::Bind(format!(
            "{} positional arguments supplied, argument #{} is never used",
            positional.len(),
            unused + 1
        )));
    }
    Ok(out)
}

/// Byte offset just past the literal opened by `quote` at `start`.
fn quoted_end(query: &str, start: usize, quote: char) -> usize {
    let bytes = query.as_bytes();
    let q = quote as u8;
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == q => {
                // doubled quote is an escaped quote
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    query.len()
}

fn skip_to(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, end: usize) {
    while chars.next_if(|&(i, _)| i < end).is_some() {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_positional() {
        let sql = bind(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            &[1u32.into(), "x'y".into()],
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = 1 AND b = 'x\\'y'");
    }

    #[test]
    fn test_numbered() {
        let sql = bind("SELECT $2, $1, $2", &[Arg::from(10i64), Arg::from(true)]).unwrap();
        assert_eq!(sql, "SELECT true, 10, true");
    }

    #[test]
    fn test_named() {
        let sql = bind(
            "SELECT * FROM events WHERE day = @day AND user = @user_id",
            &[
                named("user_id", 42u64),
                named("day", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
            ],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM events WHERE day = toDate('2024-03-01') AND user = 42"
        );
    }

    #[test]
    fn test_quotes_and_comments_are_skipped() {
        let sql = bind(
            "SELECT '?', \"@col\", `$1` -- what?\n/* @x ? */ FROM t WHERE a = ?",
            &[Arg::from(Option::<u8>::None)],
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT '?', \"@col\", `$1` -- what?\n/* @x ? */ FROM t WHERE a = NULL"
        );
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let sql = bind("SELECT 'it''s ?', ?", &[1u8.into()]).unwrap();
        assert_eq!(sql, "SELECT 'it''s ?', 1");
    }

    #[test]
    fn test_missing_and_unused_arguments() {
        assert!(matches!(bind("SELECT ?, ?", &[1u8.into()]), Err(Error::Bind(_))));
        assert!(matches!(bind("SELECT $3", &[1u8.into()]), Err(Error::Bind(_))));
        assert!(matches!(bind("SELECT $0", &[1u8.into()]), Err(Error::Bind(_))));
        assert!(matches!(bind("SELECT @missing", &[named("other", 1u8)]), Err(Error::Bind(_))));
        assert!(matches!(bind("SELECT 1", &[1u8.into()]), Err(Error::Bind(_))));
    }

    #[test]
    fn test_no_arguments_leaves_query_untouched() {
        assert_eq!(bind("SELECT ? -- raw", &[]).unwrap(), "SELECT ? -- raw");
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&Value::String("a\\b\n".into())), "'a\\\\b\\n'");
        assert_eq!(literal(&Value::Int8(-3)), "-3");
        assert_eq!(literal(&Value::Float64(1.5)), "1.5");
        let t = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(literal(&Value::DateTime(t)), "toDateTime('1970-01-01 00:00:00', 'UTC')");
    }
}
