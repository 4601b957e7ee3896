//! Tabular query results and their JSON form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{Row, TypeInfo, ValueRef};
use tracing::debug;
use uuid::Uuid;

/// Ordered columns and ordered rows, each row holding one value per column.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name ("records" orientation).
    /// A duplicated column name keeps its last value.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<Map<String, Value>>()
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Array(self.to_records().into_iter().map(Value::Object).collect())
    }

    /// `columns` comes from the statement, so it is known even with no rows.
    pub fn from_pg_rows(columns: Vec<String>, rows: &[PgRow]) -> Self {
        let rows = rows
            .iter()
            .map(|row| (0..row.columns().len()).map(|idx| decode_cell(row, idx)).collect())
            .collect();

        Self { columns, rows }
    }
}

fn decode_cell(row: &PgRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(idx).map(Value::Bool),
        "INT2" => row.try_get::<i16, _>(idx).map(Value::from),
        "INT4" => row.try_get::<i32, _>(idx).map(Value::from),
        "INT8" => row.try_get::<i64, _>(idx).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|f| float_value(f as f64)),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(float_value),
        "NUMERIC" => row.try_get::<BigDecimal, _>(idx).map(|d| decimal_value(&d)),
        "DATE" => row.try_get::<NaiveDate, _>(idx).map(|d| Value::String(d.to_string())),
        "TIME" => row.try_get::<NaiveTime, _>(idx).map(|t| Value::String(t.to_string())),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|t| Value::String(t.to_rfc3339())),
        "UUID" => row.try_get::<Uuid, _>(idx).map(|u| Value::String(u.to_string())),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx),
        _ => row.try_get::<String, _>(idx).map(Value::String),
    };

    decoded.unwrap_or_else(|e| {
        debug!("Could not decode column {} of type {}: {}", idx, type_name, e);
        Value::Null
    })
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// NUMERIC becomes a JSON number when it fits an f64, else its text form.
fn decimal_value(d: &BigDecimal) -> Value {
    let text = d.to_string();
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}
