//! The handful of statements the mock server understands.
//!
//! Matching is deliberately shallow: keywords are case-insensitive, anything
//! after the recognized shape (`WHERE`, `ENGINE = ...`, `FORMAT ...`) is
//! ignored.

use std::time::Duration;

use ch_protocol::{Column, ColumnType, Value};

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE [IF NOT EXISTS] name (col Type, ...)`.
    CreateTable {
        /// Table name.
        table: String,
        /// Declared columns.
        columns: Vec<Column>,
    },
    /// `DROP TABLE [IF EXISTS] name`.
    DropTable {
        /// Table name.
        table: String,
    },
    /// `INSERT INTO name ...`.
    Insert {
        /// Table name.
        table: String,
    },
    /// `SELECT * FROM name`.
    SelectAll {
        /// Table name.
        table: String,
    },
    /// `SELECT count() FROM name`.
    Count {
        /// Table name.
        table: String,
    },
    /// `SELECT number FROM numbers(N)`.
    Numbers(u64),
    /// `SELECT sleep(seconds)`.
    Sleep(Duration),
    /// `SELECT <literal>`.
    Literal(Value),
    /// `SELECT corrupt()`: the server answers with an invalid packet.
    Corrupt,
    /// Anything else; answered with a syntax error.
    Unknown,
}

/// Classify `query`.
pub fn parse(query: &str) -> Statement {
    let q = query.trim().trim_end_matches(';').trim_end();

    if let Some(rest) = keyword(q, "CREATE TABLE") {
        let rest = keyword(rest, "IF NOT EXISTS").unwrap_or(rest);
        return parse_create(rest).unwrap_or(Statement::Unknown);
    }
    if let Some(rest) = keyword(q, "DROP TABLE") {
        let rest = keyword(rest, "IF EXISTS").unwrap_or(rest);
        return match table_name(rest) {
            Some(table) => Statement::DropTable { table },
            None => Statement::Unknown,
        };
    }
    if let Some(rest) = keyword(q, "INSERT INTO") {
        return match table_name(rest) {
            Some(table) => Statement::Insert { table },
            None => Statement::Unknown,
        };
    }
    let Some(rest) = keyword(q, "SELECT") else {
        return Statement::Unknown;
    };

    for prefix in ["* FROM", "count() FROM", "count(*) FROM", "number FROM numbers("] {
        let Some(tail) = keyword(rest, prefix) else {
            continue;
        };
        return match prefix {
            "* FROM" => table_name(tail).map(|table| Statement::SelectAll { table }),
            "number FROM numbers(" => tail
                .split_once(')')
                .and_then(|(n, _)| n.trim().parse().ok())
                .map(Statement::Numbers),
            _ => table_name(tail).map(|table| Statement::Count { table }),
        }
        .unwrap_or(Statement::Unknown);
    }
    if let Some(tail) = keyword(rest, "sleep(") {
        return tail
            .split_once(')')
            .and_then(|(secs, _)| secs.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map_or(Statement::Unknown, Statement::Sleep);
    }
    if keyword(rest, "corrupt()").is_some() {
        return Statement::Corrupt;
    }
    literal(rest).map_or(Statement::Unknown, Statement::Literal)
}

/// Strip a case-insensitive keyword prefix, returning the rest trimmed.
fn keyword<'a>(s: &'a str, kw: &str) -> Option<&'a str> {
    let head = s.get(..kw.len())?;
    if !head.eq_ignore_ascii_case(kw) {
        return None;
    }
    Some(s[kw.len()..].trim_start())
}

fn table_name(s: &str) -> Option<String> {
    let end = s
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(s.len());
    let name = s[..end].trim_matches('`');
    (!name.is_empty()).then(|| name.to_string())
}

fn parse_create(rest: &str) -> Option<Statement> {
    let table = table_name(rest)?;
    let open = rest.find('(')?;
    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in rest[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let body = &rest[open + 1..close?];

    let mut columns = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                columns.push(column_def(&body[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    columns.push(column_def(&body[start..])?);
    Some(Statement::CreateTable { table, columns })
}

fn column_def(def: &str) -> Option<Column> {
    let (name, ty) = def.trim().split_once(char::is_whitespace)?;
    let ty: ColumnType = ty.trim().parse().ok()?;
    Some(Column::new(name.trim_matches('`'), ty))
}

fn literal(s: &str) -> Option<Value> {
    if s.eq_ignore_ascii_case("NULL") {
        return Some(Value::Null);
    }
    if let Ok(n) = s.parse::<u64>() {
        return Some(Value::UInt64(n));
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(Value::Int64(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Some(Value::Float64(f));
    }
    match s {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => {}
    }
    let inner = s.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '0' => '\0',
            other => other,
        });
    }
    Some(Value::String(out))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table() {
        let stmt = parse(
            "CREATE TABLE IF NOT EXISTS events (id UInt64, name Nullable(String), day Date) ENGINE = Memory",
        );
        let Statement::CreateTable { table, columns } = stmt else {
            unreachable!("expected CREATE TABLE, got {stmt:?}");
        };
        assert_eq!(table, "events");
        assert_eq!(columns.len(), 3);
        assert_eq!(
            columns[1].ty,
            ColumnType::Nullable(Box::new(ColumnType::String))
        );
    }

    #[test]
    fn test_table_statements() {
        assert_eq!(
            parse("insert into t (a, b) VALUES"),
            Statement::Insert { table: "t".into() }
        );
        assert_eq!(
            parse("SELECT * FROM t WHERE a = 1"),
            Statement::SelectAll { table: "t".into() }
        );
        assert_eq!(
            parse("select count() from `t`"),
            Statement::Count { table: "t".into() }
        );
        assert_eq!(
            parse("DROP TABLE IF EXISTS t;"),
            Statement::DropTable { table: "t".into() }
        );
    }

    #[test]
    fn test_generated_results() {
        assert_eq!(
            parse("SELECT number FROM numbers(100)"),
            Statement::Numbers(100)
        );
        assert_eq!(
            parse("SELECT sleep(0.25)"),
            Statement::Sleep(Duration::from_millis(250))
        );
        assert_eq!(parse("SELECT corrupt()"), Statement::Corrupt);
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("SELECT 1"), Statement::Literal(Value::UInt64(1)));
        assert_eq!(parse("SELECT -5"), Statement::Literal(Value::Int64(-5)));
        assert_eq!(parse("SELECT NULL"), Statement::Literal(Value::Null));
        assert_eq!(
            parse("SELECT 'it\\'s'"),
            Statement::Literal(Value::String("it's".into()))
        );
    }

    #[test]
    fn test_unknown() {
        assert_eq!(parse("SELEC 1"), Statement::Unknown);
        assert_eq!(parse("SELECT a, b FROM t"), Statement::Unknown);
        assert_eq!(parse("CREATE TABLE t (a NoSuchType)"), Statement::Unknown);
    }
}
