//! Postgres row -> [`Row`] conversion, driven by each column's type name.

use crate::row::{Row, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Column, Row as _, TypeInfo};

/// How a column is read, keyed on `TypeInfo::name()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Date,
    Timestamp,
    TimestampTz,
    Bool,
    Text,
    /// Anything else; read as text when the driver allows it.
    Other,
}

fn column_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "INT2" => ColumnKind::Int2,
        "INT4" => ColumnKind::Int4,
        "INT8" => ColumnKind::Int8,
        "FLOAT4" => ColumnKind::Float4,
        "FLOAT8" => ColumnKind::Float8,
        "NUMERIC" => ColumnKind::Numeric,
        "DATE" => ColumnKind::Date,
        "TIMESTAMP" => ColumnKind::Timestamp,
        "TIMESTAMPTZ" => ColumnKind::TimestampTz,
        "BOOL" => ColumnKind::Bool,
        // `character(n)` reports its display name "CHAR".
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => ColumnKind::Text,
        _ => ColumnKind::Other,
    }
}

pub fn decode_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .map(|col| {
            let kind = column_kind(col.type_info().name());
            (col.name().to_string(), decode_cell(row, col.ordinal(), kind))
        })
        .collect()
}

fn decode_cell(row: &PgRow, idx: usize, kind: ColumnKind) -> Value {
    let value = match kind {
        ColumnKind::Int2 => get::<i16>(row, idx).map(|v| Value::Int(v.into())),
        ColumnKind::Int4 => get::<i32>(row, idx).map(|v| Value::Int(v.into())),
        ColumnKind::Int8 => get::<i64>(row, idx).map(Value::Int),
        ColumnKind::Float4 => get::<f32>(row, idx).map(|v| Value::Float(v.into())),
        ColumnKind::Float8 => get::<f64>(row, idx).map(Value::Float),
        ColumnKind::Numeric => get::<Decimal>(row, idx).map(Value::Decimal),
        ColumnKind::Date => get::<NaiveDate>(row, idx).map(Value::Date),
        ColumnKind::Timestamp => get::<NaiveDateTime>(row, idx).map(Value::DateTime),
        ColumnKind::TimestampTz => {
            get::<DateTime<Utc>>(row, idx).map(|v| Value::DateTime(v.naive_utc()))
        }
        ColumnKind::Bool => get::<bool>(row, idx).map(|v| Value::Text(v.to_string())),
        ColumnKind::Text | ColumnKind::Other => get::<String>(row, idx).map(Value::Text),
    };
    value.unwrap_or(Value::Null)
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}
