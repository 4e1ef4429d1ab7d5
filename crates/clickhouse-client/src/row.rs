//! Streaming query results.

use std::ops::DerefMut;
use std::sync::Arc;

use ch_protocol::{Block, ColumnType, Progress, Value};
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::session::{Response, Session};

/// Result column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Zero-based position in the row.
    pub index: usize,
    /// Declared type.
    pub ty: ColumnType,
}

impl Column {
    /// Whether the column may contain `NULL`.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.ty.is_nullable()
    }
}

/// A stream of rows read block by block from a session.
///
/// `S` is either `&mut Session` or a pooled session; in the latter case the
/// session goes back to the pool when the stream is dropped. Dropping the
/// stream before it is exhausted leaves the session errored.
pub struct Rows<S: DerefMut<Target = Session>> {
    session: S,
    columns: Arc<[Column]>,
    block: Block,
    cursor: usize,
    block_rows: usize,
    progress: Progress,
    done: bool,
}

impl<S: DerefMut<Target = Session>> Rows<S> {
    /// Send `query` on `session` and read up to the header block.
    pub(crate) async fn start(mut session: S, query: &str) -> Result<Self> {
        session.begin(crate::state::SessionState::Querying)?;
        if let Err(e) = session.send_query(query).await {
            return Err(session.fail(e));
        }

        let mut rows = Self {
            session,
            columns: Arc::from(Vec::new()),
            block: Block::default(),
            cursor: 0,
            block_rows: 0,
            progress: Progress::default(),
            done: false,
        };
        loop {
            match rows.session.read_response().await {
                Ok(Response::Data(block)) => {
                    rows.load(block)?;
                    return Ok(rows);
                }
                Ok(Response::Progress(p)) => rows.progress.add(p),
                Ok(Response::End) => {
                    rows.end();
                    return Ok(rows);
                }
                Err(e) => {
                    rows.done = true;
                    return Err(rows.session.fail(e));
                }
            }
        }
    }

    /// Result columns. Empty when the query produced no header.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Progress reported by the server so far.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Whether the end of the result has been reached.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done && self.cursor >= self.block_rows
    }

    /// Next row, or `None` at the end of the result.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.cursor < self.block_rows {
                let values = self
                    .block
                    .columns
                    .iter()
                    .map(|c| c.values[self.cursor].clone())
                    .collect();
                self.cursor += 1;
                return Ok(Some(Row {
                    columns: Arc::clone(&self.columns),
                    values,
                }));
            }
            if self.done {
                return Ok(None);
            }
            match self.session.read_response().await {
                Ok(Response::Data(block)) => self.load(block)?,
                Ok(Response::Progress(p)) => self.progress.add(p),
                Ok(Response::End) => self.end(),
                Err(e) => {
                    self.done = true;
                    self.block_rows = 0;
                    return Err(self.session.fail(e));
                }
            }
        }
    }

    /// Read every remaining row.
    pub async fn fetch_all(mut self) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        Ok(out)
    }

    /// Discard the remaining rows so the session can be reused.
    pub async fn finish(mut self) -> Result<()> {
        while self.next().await?.is_some() {}
        Ok(())
    }

    fn load(&mut self, block: Block) -> Result<()> {
        let rows = match block.rows() {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                self.block_rows = 0;
                return Err(self.session.fail(e.into()));
            }
        };
        if self.columns.is_empty() && !block.columns.is_empty() {
            self.columns = block
                .columns
                .iter()
                .enumerate()
                .map(|(index, c)| Column {
                    name: c.name.clone(),
                    index,
                    ty: c.ty.clone(),
                })
                .collect();
        }
        self.block = block;
        self.cursor = 0;
        self.block_rows = rows;
        Ok(())
    }

    fn end(&mut self) {
        self.done = true;
        self.session.finish();
        tracing::trace!(
            connection_id = self.session.id(),
            rows = self.progress.rows,
            "query finished"
        );
    }
}

impl<S: DerefMut<Target = Session>> Drop for Rows<S> {
    fn drop(&mut self) {
        if !self.done {
            self.session.abandon("result stream");
        }
    }
}

impl<S: DerefMut<Target = Session>> std::fmt::Debug for Rows<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns)
            .field("progress", &self.progress)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from column metadata and values.
    pub fn new(columns: impl Into<Arc<[Column]>>, values: Vec<Value>) -> Self {
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Raw values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Iterate over column metadata paired with values.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &Value)> {
        self.columns.iter().zip(self.values.iter())
    }

    /// Consume the row, returning its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Value at `index` converted to `T`.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            Error::Type(format!(
                "column index {index} out of range for {} columns",
                self.values.len()
            ))
        })?;
        T::from_value(value).map_err(|e| match (e, self.columns.get(index)) {
            (Error::Type(msg), Some(column)) => {
                Error::Type(format!("column {}: {msg}", column.name))
            }
            (e, _) => e,
        })
    }

    /// Value of the column called `name` converted to `T`.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::Type(format!("no column named {name:?}")))?;
        self.get(index)
    }

    /// Like [`Row::get`], but `None` when the index is out of range or the
    /// conversion fails.
    #[must_use]
    pub fn try_get<T: FromValue>(&self, index: usize) -> Option<T> {
        self.get(index).ok()
    }
}

/// Conversion from a column value.
pub trait FromValue: Sized {
    /// Convert `value`, failing with [`Error::Type`].
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch<T>(value: &Value, target: &str) -> Result<T> {
    Err(Error::Type(format!(
        "cannot read {} value as {target}",
        value.type_name()
    )))
}

macro_rules! impl_from_value_int {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self> {
                    match value.as_i128() {
                        Some(n) => <$ty>::try_from(n).map_err(|_| {
                            Error::Type(format!("{n} out of range for {}", stringify!($ty)))
                        }),
                        None => mismatch(value, stringify!($ty)),
                    }
                }
            }
        )*
    };
}

impl_from_value_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::UInt8(0) => Ok(false),
            Value::UInt8(1) => Ok(true),
            other => mismatch(other, "bool"),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float32(f) => Ok(*f),
            other => mismatch(other, "f32"),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Float64(f) => Ok(*f),
            Value::Float32(f) => Ok(f64::from(*f)),
            other => mismatch(other, "f64"),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => mismatch(other, "String"),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::DateTime(t) => Ok(t.date_naive()),
            other => mismatch(other, "NaiveDate"),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::DateTime(t) => Ok(*t),
            other => mismatch(other, "DateTime<Utc>"),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
