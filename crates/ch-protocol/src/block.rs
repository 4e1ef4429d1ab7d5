//! Column-major data blocks.
//!
//! A block carries the column count, the row count, then for each column its
//! name, its type name and the densely packed values. Results stream back as a
//! sequence of blocks; inserts send blocks in the same layout. A block with no
//! rows after an insert statement is the server's column header, and an empty
//! block from the client marks the end of insert data.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};

use crate::error::ProtocolError;
use crate::types::{ColumnType, Value};
use crate::wire::{self, ensure, get_string, get_uvarint, put_string, put_uvarint};

/// Upper bound on rows in one decoded block.
pub const MAX_BLOCK_ROWS: u64 = 1 << 26;

/// Upper bound on columns in one decoded block.
pub const MAX_BLOCK_COLUMNS: u64 = 1 << 16;

/// One column of a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub ty: ColumnType,
    /// Values, one per row.
    pub values: Vec<Value>,
}

impl Column {
    /// Create an empty column.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            values: Vec::new(),
        }
    }

    /// Number of values in the column.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the column has no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A block of columns with equal row counts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    /// Columns in declaration order.
    pub columns: Vec<Column>,
}

impl Block {
    /// Create a block from columns.
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Header-only block: names and types without rows.
    #[must_use]
    pub fn header(&self) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.ty.clone()))
                .collect(),
        }
    }

    /// Row count, checking that all columns agree.
    pub fn rows(&self) -> Result<usize, ProtocolError> {
        let Some(first) = self.columns.first() else {
            return Ok(0);
        };
        let expected = first.len();
        for column in &self.columns[1..] {
            if column.len() != expected {
                return Err(ProtocolError::RowCountMismatch {
                    column: column.name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        Ok(expected)
    }

    /// Whether the block carries no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.first().is_none_or(Column::is_empty)
    }

    /// Iterate over rows as slices of values.
    pub fn row_values(&self, row: usize) -> impl Iterator<Item = &Value> {
        self.columns.iter().filter_map(move |c| c.values.get(row))
    }

    /// Encode the block.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let rows = self.rows()?;
        let mut buf = BytesMut::with_capacity(16 + rows * self.columns.len() * 8);
        put_uvarint(&mut buf, self.columns.len() as u64);
        put_uvarint(&mut buf, rows as u64);
        for column in &self.columns {
            put_string(&mut buf, &column.name);
            put_string(&mut buf, &column.ty.to_string());
            write_column(&mut buf, column)?;
        }
        Ok(buf.freeze())
    }

    /// Decode a block.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        let num_columns = get_uvarint(&mut src)?;
        if num_columns > MAX_BLOCK_COLUMNS {
            return Err(ProtocolError::TooLarge {
                field: "block columns",
                length: num_columns,
                max: MAX_BLOCK_COLUMNS,
            });
        }
        let num_rows = get_uvarint(&mut src)?;
        if num_rows > MAX_BLOCK_ROWS {
            return Err(ProtocolError::TooLarge {
                field: "block rows",
                length: num_rows,
                max: MAX_BLOCK_ROWS,
            });
        }
        let mut columns = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let name = get_string(&mut src)?;
            let ty: ColumnType = get_string(&mut src)?.parse()?;
            let values = read_column(&mut src, &ty, num_rows as usize)?;
            columns.push(Column { name, ty, values });
        }
        Ok(Self { columns })
    }
}

fn write_column(buf: &mut BytesMut, column: &Column) -> Result<(), ProtocolError> {
    if let ColumnType::Nullable(inner) = &column.ty {
        for value in &column.values {
            buf.put_u8(u8::from(value.is_null()));
        }
        let fallback = inner.default_value();
        for value in &column.values {
            let value = if value.is_null() { &fallback } else { value };
            write_value(buf, &column.name, inner, value)?;
        }
        return Ok(());
    }
    for value in &column.values {
        write_value(buf, &column.name, &column.ty, value)?;
    }
    Ok(())
}

fn write_value(
    buf: &mut BytesMut,
    column: &str,
    ty: &ColumnType,
    value: &Value,
) -> Result<(), ProtocolError> {
    match (ty, value) {
        (ColumnType::Bool, Value::Bool(v)) => buf.put_u8(u8::from(*v)),
        (ColumnType::UInt8, Value::UInt8(v)) => buf.put_u8(*v),
        (ColumnType::UInt16, Value::UInt16(v)) => buf.put_u16_le(*v),
        (ColumnType::UInt32, Value::UInt32(v)) => buf.put_u32_le(*v),
        (ColumnType::UInt64, Value::UInt64(v)) => buf.put_u64_le(*v),
        (ColumnType::Int8, Value::Int8(v)) => buf.put_i8(*v),
        (ColumnType::Int16, Value::Int16(v)) => buf.put_i16_le(*v),
        (ColumnType::Int32, Value::Int32(v)) => buf.put_i32_le(*v),
        (ColumnType::Int64, Value::Int64(v)) => buf.put_i64_le(*v),
        (ColumnType::Float32, Value::Float32(v)) => buf.put_f32_le(*v),
        (ColumnType::Float64, Value::Float64(v)) => buf.put_f64_le(*v),
        (ColumnType::String, Value::String(v)) => put_string(buf, v),
        (ColumnType::FixedString(n), Value::String(v)) if v.len() <= *n => {
            buf.put_slice(v.as_bytes());
            buf.put_bytes(0, n - v.len());
        }
        (ColumnType::Date, Value::Date(d)) => {
            let days = d.signed_duration_since(NaiveDate::default()).num_days();
            let days = u16::try_from(days).map_err(|_| mismatch(column, ty, value))?;
            buf.put_u16_le(days);
        }
        (ColumnType::DateTime, Value::DateTime(t)) => {
            let secs = u32::try_from(t.timestamp()).map_err(|_| mismatch(column, ty, value))?;
            buf.put_u32_le(secs);
        }
        _ => return Err(mismatch(column, ty, value)),
    }
    Ok(())
}

fn mismatch(column: &str, ty: &ColumnType, value: &Value) -> ProtocolError {
    ProtocolError::TypeMismatch {
        column: column.to_string(),
        expected: ty.to_string(),
        actual: value.type_name(),
    }
}

fn read_column(
    src: &mut impl Buf,
    ty: &ColumnType,
    rows: usize,
) -> Result<Vec<Value>, ProtocolError> {
    if let ColumnType::Nullable(inner) = ty {
        ensure(src, rows)?;
        let nulls: Vec<bool> = (0..rows).map(|_| src.get_u8() != 0).collect();
        let mut values = read_column(src, inner, rows)?;
        for (value, is_null) in values.iter_mut().zip(nulls) {
            if is_null {
                *value = Value::Null;
            }
        }
        return Ok(values);
    }
    let mut values = Vec::with_capacity(rows.min(1 << 16));
    for _ in 0..rows {
        values.push(read_value(src, ty)?);
    }
    Ok(values)
}

fn read_value(src: &mut impl Buf, ty: &ColumnType) -> Result<Value, ProtocolError> {
    let value = match ty {
        ColumnType::Bool => Value::Bool(wire::get_u8(src)? != 0),
        ColumnType::UInt8 => Value::UInt8(wire::get_u8(src)?),
        ColumnType::UInt16 => {
            ensure(src, 2)?;
            Value::UInt16(src.get_u16_le())
        }
        ColumnType::UInt32 => Value::UInt32(wire::get_u32_le(src)?),
        ColumnType::UInt64 => {
            ensure(src, 8)?;
            Value::UInt64(src.get_u64_le())
        }
        ColumnType::Int8 => {
            ensure(src, 1)?;
            Value::Int8(src.get_i8())
        }
        ColumnType::Int16 => {
            ensure(src, 2)?;
            Value::Int16(src.get_i16_le())
        }
        ColumnType::Int32 => Value::Int32(wire::get_i32_le(src)?),
        ColumnType::Int64 => {
            ensure(src, 8)?;
            Value::Int64(src.get_i64_le())
        }
        ColumnType::Float32 => {
            ensure(src, 4)?;
            Value::Float32(src.get_f32_le())
        }
        ColumnType::Float64 => {
            ensure(src, 8)?;
            Value::Float64(src.get_f64_le())
        }
        ColumnType::String => Value::String(get_string(src)?),
        ColumnType::FixedString(n) => {
            ensure(src, *n)?;
            let raw = src.copy_to_bytes(*n);
            let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            let s = std::str::from_utf8(&raw[..end])
                .map_err(|e| ProtocolError::StringEncoding(e.to_string()))?;
            Value::String(s.to_string())
        }
        ColumnType::Date => {
            ensure(src, 2)?;
            let days = TimeDelta::days(i64::from(src.get_u16_le()));
            Value::Date(NaiveDate::default() + days)
        }
        ColumnType::DateTime => {
            let secs = wire::get_u32_le(src)?;
            let time = DateTime::<Utc>::from_timestamp(i64::from(secs), 0).ok_or(
                ProtocolError::InvalidField {
                    field: "DateTime",
                    value: u64::from(secs),
                },
            )?;
            Value::DateTime(time)
        }
        ColumnType::Nullable(_) => {
            return Err(ProtocolError::UnsupportedType(format!("{ty} inside Nullable")));
        }
    };
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let ts = DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap();
        Block::new(vec![
            Column {
                name: "id".into(),
                ty: ColumnType::UInt64,
                values: vec![Value::UInt64(1), Value::UInt64(2)],
            },
            Column {
                name: "code".into(),
                ty: ColumnType::FixedString(2),
                values: vec![Value::from("RU"), Value::from("D")],
            },
            Column {
                name: "seen".into(),
                ty: ColumnType::Nullable(Box::new(ColumnType::DateTime)),
                values: vec![Value::DateTime(ts), Value::Null],
            },
        ])
    }

    #[test]
    fn test_block_decodes_what_it_encodes() {
        let block = sample_block();
        let decoded = Block::decode(block.encode().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.rows().unwrap(), 2);
    }

    #[test]
    fn test_header_block_is_empty() {
        let header = sample_block().header();
        assert!(header.is_empty());
        assert_eq!(header.columns.len(), 3);
        let decoded = Block::decode(header.encode().unwrap()).unwrap();
        assert_eq!(decoded.columns[1].ty, ColumnType::FixedString(2));
    }

    #[test]
    fn test_encode_rejects_unequal_columns() {
        let mut block = sample_block();
        block.columns[1].values.pop();
        assert!(matches!(
            block.encode(),
            Err(ProtocolError::RowCountMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_encode_rejects_wrong_value_type() {
        let block = Block::new(vec![Column {
            name: "n".into(),
            ty: ColumnType::Int32,
            values: vec![Value::from("x")],
        }]);
        assert!(matches!(
            block.encode(),
            Err(ProtocolError::TypeMismatch { actual: "String", .. })
        ));
    }

    #[test]
    fn test_decode_truncated_block() {
        let encoded = sample_block().encode().unwrap();
        let truncated = encoded.slice(..encoded.len() - 3);
        assert!(matches!(
            Block::decode(truncated),
            Err(ProtocolError::UnexpectedEof)
        ));
    }

    #[test]
    fn test_row_values() {
        let block = sample_block();
        let row: Vec<_> = block.row_values(1).collect();
        assert_eq!(row[0], &Value::UInt64(2));
        assert_eq!(row[2], &Value::Null);
    }
}
