use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::net::IpAddr;
use std::time::Instant;
use thiserror::Error;
use tokio_postgres::error::ErrorPosition;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::{Client, Row};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::frame::{CellValue, ColumnInfo, DType, Frame, Squeezed};
use crate::template::{Params, QuerySource, SqlEngine, SqlOptions, SqlText};

/// Broad class of a database failure, taken from the SQLSTATE class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Syntax,
    /// Missing or ambiguous objects, permissions.
    Semantic,
    Execution,
    Transaction,
    Connection,
    Unknown,
}

impl ErrorCategory {
    pub fn from_sqlstate(code: &str) -> Self {
        match code.get(..2) {
            Some("42") if matches!(code, "42601" | "42000") => Self::Syntax,
            Some("42") => Self::Semantic,
            Some("22" | "23" | "53" | "54" | "55" | "57") => Self::Execution,
            Some("25" | "40") => Self::Transaction,
            Some("08") => Self::Connection,
            _ => Self::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Syntax => "Syntax error",
            Self::Semantic => "Semantic error",
            Self::Execution => "Execution error",
            Self::Transaction => "Transaction error",
            Self::Connection => "Connection error",
            Self::Unknown => "Database error",
        }
    }
}

/// A failed statement with the server's diagnostics.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {}", .category.label(), .message)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// SQLSTATE, empty for client-side failures.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    /// 1-based line and column in the rendered SQL.
    pub location: Option<(usize, usize)>,
}

impl StructuredError {
    pub fn new(err: &tokio_postgres::Error, sql: &str) -> Self {
        let Some(db) = err.as_db_error() else {
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            return Self::plain(category, err.to_string(), err.source().map(|e| e.to_string()));
        };
        let location = match db.position() {
            Some(ErrorPosition::Original(pos)) => Some(line_col(sql, *pos as usize)),
            _ => None,
        };
        Self {
            category: ErrorCategory::from_sqlstate(db.code().code()),
            code: db.code().code().to_string(),
            message: db.message().to_string(),
            detail: db.detail().map(str::to_string),
            hint: db.hint().map(str::to_string),
            table: db.table().map(str::to_string),
            column: db.column().map(str::to_string),
            location,
        }
    }

    pub fn plain(category: ErrorCategory, message: String, detail: Option<String>) -> Self {
        Self {
            category,
            code: String::new(),
            message,
            detail,
            hint: None,
            table: None,
            column: None,
            location: None,
        }
    }

    /// Multi-line form for the log.
    pub fn report(&self) -> String {
        let mut lines = vec![self.to_string()];
        if let Some((line, col)) = self.location {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  SQLSTATE: {}", self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => lines.push(format!("  Column: {}.{}", table, column)),
            (Some(table), None) => lines.push(format!("  Table: {}", table)),
            _ => {}
        }
        lines.join("\n")
    }
}

/// 1-based line and column of a 1-based byte position.
fn line_col(sql: &str, pos: usize) -> (usize, usize) {
    let target = pos.saturating_sub(1);
    let mut line = 1;
    let mut col = 1;
    for (_, ch) in sql.char_indices().take_while(|(i, _)| *i < target) {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

/// Post-processing applied to a query result.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Text columns to convert to timestamps.
    pub parse_dates: Vec<String>,
    /// Columns to use as the row index.
    pub index_col: Vec<String>,
    /// Explicit casts per column.
    pub dtype: BTreeMap<String, DType>,
    /// Collapse one-column results to a series and 1x1 results to a scalar.
    pub squeeze: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            parse_dates: Vec::new(),
            index_col: Vec::new(),
            dtype: BTreeMap::new(),
            squeeze: true,
        }
    }
}

impl ReadOptions {
    /// Default options that always keep the full frame.
    pub fn unsqueezed() -> Self {
        Self {
            squeeze: false,
            ..Self::default()
        }
    }

    pub fn squeeze(&self, frame: Frame) -> Squeezed {
        if self.squeeze {
            frame.squeeze()
        } else {
            Squeezed::Frame(frame)
        }
    }

    pub fn apply(&self, frame: Frame) -> Result<Frame> {
        let mut frame = frame;
        if !self.parse_dates.is_empty() {
            frame = frame.parse_dates(&self.parse_dates)?;
        }
        for (column, dtype) in &self.dtype {
            frame = frame.cast(column, *dtype)?;
        }
        if !self.index_col.is_empty() {
            frame = frame.set_index(&self.index_col)?;
        }
        Ok(frame)
    }
}

/// Run rendered SQL and collect the rows into a frame.
///
/// Database errors are logged together with the SQL and returned as a
/// [`StructuredError`].
pub async fn run_sql(client: &Client, sql: &SqlText) -> Result<Frame> {
    let start = Instant::now();
    let text = sql.as_str().trim();

    let result = match client.prepare(text).await {
        Ok(statement) => client
            .query(&statement, &[])
            .await
            .map(|rows| (statement, rows)),
        Err(e) => Err(e),
    };

    match result {
        Ok((statement, rows)) => {
            let columns = statement
                .columns()
                .iter()
                .map(|col| ColumnInfo::new(col.name(), col.type_().name()))
                .collect();
            let frame = frame_from_rows(columns, &rows);
            debug!(
                "Fetched {} rows x {} cols in {:?}",
                frame.height(),
                frame.width(),
                start.elapsed()
            );
            Ok(frame)
        }
        Err(e) => {
            let structured = StructuredError::new(&e, text);
            error!("{}\n\n{}", text, structured.report());
            Err(structured.into())
        }
    }
}

/// Render `source` with `params`, run it and post-process the result.
pub async fn execute_query(
    client: &Client,
    engine: &SqlEngine,
    source: impl Into<QuerySource>,
    params: &Params,
    options: &ReadOptions,
) -> Result<Squeezed> {
    let sql = engine.get_sql(source, params, &SqlOptions::default())?;
    let frame = options.apply(run_sql(client, &sql).await?)?;
    Ok(options.squeeze(frame))
}

fn frame_from_rows(columns: Vec<ColumnInfo>, rows: &[Row]) -> Frame {
    let mut result_rows: Vec<Vec<CellValue>> = Vec::with_capacity(rows.len());

    for row in rows {
        let mut row_values: Vec<CellValue> = Vec::with_capacity(columns.len());
        for (i, col) in row.columns().iter().enumerate() {
            row_values.push(extract_value(row, i, col.type_()));
        }
        result_rows.push(row_values);
    }

    let mut frame = Frame {
        columns,
        rows: result_rows,
        index: vec![],
    };
    frame.refresh_widths();
    frame
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> CellValue {
    match row.try_get::<_, CellValue>(idx) {
        Ok(value) => value,
        Err(e) => {
            warn!("Cannot decode {} value in column {}: {}", pg_type.name(), idx, e);
            CellValue::Null
        }
    }
}

type DecodeError = Box<dyn StdError + Sync + Send>;

impl<'a> FromSql<'a> for CellValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        let value = match *ty {
            Type::BOOL => CellValue::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => CellValue::Int16(i16::from_sql(ty, raw)?),
            Type::INT4 => CellValue::Int32(i32::from_sql(ty, raw)?),
            Type::INT8 => CellValue::Int64(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => CellValue::Float32(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => CellValue::Float64(f64::from_sql(ty, raw)?),
            Type::NUMERIC => {
                let decimal = Decimal::from_sql(ty, raw)?;
                decimal
                    .to_f64()
                    .map(CellValue::Float64)
                    .unwrap_or_else(|| CellValue::Text(decimal.to_string()))
            }
            Type::BYTEA => CellValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::DATE => CellValue::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => CellValue::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => CellValue::DateTime(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => CellValue::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => CellValue::Json(serde_json::Value::from_sql(ty, raw)?),
            Type::UUID => CellValue::Text(Uuid::from_sql(ty, raw)?.to_string()),
            Type::INTERVAL => CellValue::Text(interval_text(raw)?),
            Type::INET => CellValue::Text(inet_text(raw, false)?),
            Type::CIDR => CellValue::Text(inet_text(raw, true)?),
            _ if String::accepts(ty) => CellValue::Text(String::from_sql(ty, raw)?),
            _ => match ty.kind() {
                Kind::Array(_) => CellValue::Array(Vec::<CellValue>::from_sql(ty, raw)?),
                // Enums, xml and most extension types send their text form.
                _ => match std::str::from_utf8(raw) {
                    Ok(text) => CellValue::Text(text.to_string()),
                    Err(_) => CellValue::Unknown(format!("<{}>", ty.name())),
                },
            },
        };
        Ok(value)
    }

    fn from_sql_null(_: &Type) -> Result<Self, DecodeError> {
        Ok(CellValue::Null)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// `1 year 2 mons 3 days 04:05:06.5`, like the server's default output.
fn interval_text(raw: &[u8]) -> Result<String, DecodeError> {
    if raw.len() != 16 {
        return Err("invalid interval length".into());
    }
    let micros = i64::from_be_bytes(raw[0..8].try_into()?);
    let days = i32::from_be_bytes(raw[8..12].try_into()?);
    let months = i32::from_be_bytes(raw[12..16].try_into()?);

    let mut parts = Vec::new();
    for (n, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if n != 0 {
            let plural = if n.abs() == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", n, unit, plural));
        }
    }
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let total = micros.unsigned_abs();
        let secs = total / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let fraction = total % 1_000_000;
        if fraction != 0 {
            time.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(time);
    }
    Ok(parts.join(" "))
}

/// `inet` omits a full-length netmask, `cidr` always shows it.
fn inet_text(raw: &[u8], cidr: bool) -> Result<String, DecodeError> {
    let [family, bits, _, _, addr @ ..] = raw else {
        return Err("invalid inet value".into());
    };
    let ip = match (*family, addr.len()) {
        (2, 4) => IpAddr::from(<[u8; 4]>::try_from(addr)?),
        (3, 16) => IpAddr::from(<[u8; 16]>::try_from(addr)?),
        _ => return Err("invalid inet value".into()),
    };
    let full = if ip.is_ipv4() { 32 } else { 128 };
    if cidr || *bits != full {
        Ok(format!("{}/{}", ip, bits))
    } else {
        Ok(ip.to_string())
    }
}
