//! Batched inserts.
//!
//! [`Batch`] buffers rows client-side against the column header returned by
//! the server for an `INSERT` statement and ships them as one data block on
//! [`Batch::send`]. Rows can be appended one at a time or column by column.

use std::ops::DerefMut;
use std::time::Instant;

use ch_protocol::{Block, Column, ProtocolError, Value};

use crate::error::{Error, Result};
use crate::session::{Response, Session};
use crate::state::SessionState;

/// Reject statements that cannot open an insert.
pub(crate) fn check_insert(query: &str) -> Result<()> {
    let trimmed = query.trim_start();
    if trimmed
        .get(..6)
        .is_some_and(|kw| kw.eq_ignore_ascii_case("INSERT"))
    {
        return Ok(());
    }
    Err(Error::Misuse(format!(
        "prepare_batch expects an INSERT statement, got {:?}",
        trimmed.chars().take(32).collect::<String>()
    )))
}

/// An insert in progress.
///
/// The batch holds its session until [`Batch::send`] or [`Batch::abort`].
/// Dropping an unsent batch leaves the session errored, so a pooled session
/// is closed instead of reused.
pub struct Batch<S: DerefMut<Target = Session>> {
    session: Option<S>,
    columns: Vec<Column>,
    sent: bool,
}

impl<S: DerefMut<Target = Session>> Batch<S> {
    pub(crate) async fn prepare(mut session: S, query: &str) -> Result<Self> {
        check_insert(query)?;
        session.begin(SessionState::Batching)?;
        if let Err(e) = session.send_query(query).await {
            return Err(session.fail(e));
        }
        let header = loop {
            match session.read_response().await {
                Ok(Response::Data(block)) => break block,
                Ok(Response::Progress(_)) => {}
                Ok(Response::End) => {
                    let err = ProtocolError::UnexpectedPacket {
                        expected: "insert header",
                        actual: "EndOfStream",
                    };
                    return Err(session.fail(err.into()));
                }
                Err(e) => return Err(session.fail(e)),
            }
        };

        tracing::debug!(
            connection_id = session.id(),
            columns = header.columns.len(),
            "batch prepared"
        );
        Ok(Self {
            session: Some(session),
            columns: header.header().columns,
            sent: false,
        })
    }

    /// Column names in insert order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Prepared columns with the values buffered so far.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Rows buffered so far, taken from the first column.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    /// Whether [`Batch::send`] has been called.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Append one row.
    ///
    /// The row must have one value per column, each convertible to the
    /// column type. On error nothing is appended.
    pub fn append<I, V>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ensure_open()?;
        let values: Vec<Value> = row.into_iter().map(Into::into).collect();
        if values.len() != self.columns.len() {
            return Err(Error::Misuse(format!(
                "row has {} values, insert expects {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let coerced = self
            .columns
            .iter()
            .zip(values)
            .map(|(column, value)| coerce(column, value))
            .collect::<Result<Vec<_>>>()?;
        for (column, value) in self.columns.iter_mut().zip(coerced) {
            column.values.push(value);
        }
        Ok(())
    }

    /// Columnar access to column `index`.
    pub fn column(&mut self, index: usize) -> Result<BatchColumn<'_>> {
        self.ensure_open()?;
        let count = self.columns.len();
        let column = self.columns.get_mut(index).ok_or_else(|| {
            Error::Misuse(format!("column index {index} out of range for {count} columns"))
        })?;
        Ok(BatchColumn { column })
    }

    /// Ship the buffered rows and finish the insert.
    ///
    /// Can be called once. Columns filled to different lengths fail with a
    /// protocol error and close the session, as does an encoded block larger
    /// than [`Options::max_packet_size`](crate::Options::max_packet_size).
    pub async fn send(&mut self) -> Result<()> {
        if self.sent {
            return Err(Error::Misuse("batch has already been sent".into()));
        }
        let Some(mut session) = self.session.take() else {
            return Err(Error::Misuse("batch has been aborted".into()));
        };
        self.sent = true;

        let header = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), c.ty.clone()))
            .collect();
        let block = Block::new(std::mem::replace(&mut self.columns, header));
        let rows = match block.rows() {
            Ok(n) => n,
            Err(e) => return Err(session.fail(e.into())),
        };

        let started = Instant::now();
        match session.send_insert(&block).await {
            Ok(()) => {
                session.finish();
                tracing::debug!(
                    connection_id = session.id(),
                    rows,
                    elapsed = ?started.elapsed(),
                    "batch sent"
                );
                Ok(())
            }
            Err(e) => Err(session.fail(e)),
        }
    }

    /// Give up on the insert without sending. The session is closed.
    pub fn abort(mut self) {
        if let Some(mut session) = self.session.take() {
            session.abandon("batch");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sent {
            return Err(Error::Misuse("batch has already been sent".into()));
        }
        if self.session.is_none() {
            return Err(Error::Misuse("batch has been aborted".into()));
        }
        Ok(())
    }
}

impl<S: DerefMut<Target = Session>> Drop for Batch<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.abandon("batch");
        }
    }
}

impl<S: DerefMut<Target = Session>> std::fmt::Debug for Batch<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("columns", &self.columns.len())
            .field("rows", &self.rows())
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

/// One column of a [`Batch`], for appending values column by column.
#[derive(Debug)]
pub struct BatchColumn<'a> {
    column: &'a mut Column,
}

impl BatchColumn<'_> {
    /// Column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.column.name
    }

    /// Values buffered in this column.
    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    /// Whether the column has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    /// Append `values`. On error nothing is appended.
    pub fn append<I, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let column = &*self.column;
        let coerced = values
            .into_iter()
            .map(|v| coerce(column, v.into()))
            .collect::<Result<Vec<_>>>()?;
        self.column.values.extend(coerced);
        Ok(())
    }
}

fn coerce(column: &Column, value: Value) -> Result<Value> {
    column.ty.coerce(value).map_err(|v| {
        Error::Misuse(format!(
            "column {} of type {} cannot hold a {} value",
            column.name,
            column.ty,
            v.type_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_insert() {
        assert!(check_insert("INSERT INTO t").is_ok());
        assert!(check_insert("  insert into t VALUES").is_ok());
        assert!(matches!(check_insert("SELECT 1"), Err(Error::Misuse(_))));
        assert!(matches!(check_insert("INS"), Err(Error::Misuse(_))));
        assert!(matches!(check_insert(""), Err(Error::Misuse(_))));
    }
}
