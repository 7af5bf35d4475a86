//! Filtering result frames with a small query language.
//!
//! ```text
//! text query ──► translate (regex pipeline) ──► sqlparser ──► Predicate ──► row mask
//! ```
//!
//! [`XQuery`] runs several queries in a row (each narrowing the previous
//! result) or side by side (results stacked and deduplicated), and keeps a
//! history of how many rows every step left.
mod expr;
mod translate;

pub use expr::*;
pub use translate::{compile_query, Pipeline};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::frame::{CellValue, Frame};

pub type RowFn = Arc<dyn Fn(&BTreeMap<String, CellValue>) -> bool + Send + Sync>;
pub type NameFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A single filter step.
#[derive(Clone)]
pub enum Query {
    Text(String),
    Mask(Vec<bool>),
    /// Keep rows for which the closure returns true.
    Fn(RowFn),
}

impl Query {
    pub fn text(query: impl Into<String>) -> Self {
        Query::Text(query.into())
    }

    pub fn row_fn(f: impl Fn(&BTreeMap<String, CellValue>) -> bool + Send + Sync + 'static) -> Self {
        Query::Fn(Arc::new(f))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Query::Text(_) => "text",
            Query::Mask(_) => "mask",
            Query::Fn(_) => "fn",
        }
    }

    /// Row mask for `frame`.
    pub fn mask(&self, frame: &Frame) -> Result<Vec<bool>> {
        match self {
            Query::Text(text) => {
                let compiled = compile_query(text)?;
                debug!("Compiled '{}' to '{}'", text, compiled);
                let predicate = parse_predicate(&compiled)?;
                Ok(predicate.evaluate(frame)?)
            }
            Query::Mask(mask) => Ok(mask.clone()),
            Query::Fn(f) => Ok((0..frame.height())
                .map(|i| frame.row_map(i).is_some_and(|row| f(&row)))
                .collect()),
        }
    }

    pub fn apply(&self, frame: &Frame) -> Result<Frame> {
        frame
            .filter(&self.mask(frame)?)
            .with_context(|| format!("Query {} failed", self))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Text(text) => write!(f, "\"{}\"", text),
            Query::Mask(mask) => write!(f, "<mask of {}>", mask.len()),
            Query::Fn(_) => write!(f, "<fn>"),
        }
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::Text(text.to_string())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::Text(text)
    }
}

impl From<Vec<bool>> for Query {
    fn from(mask: Vec<bool>) -> Self {
        Query::Mask(mask)
    }
}

/// Column selection applied to the final result.
#[derive(Clone)]
pub enum Columns {
    Names(Vec<String>),
    Mask(Vec<bool>),
    Predicate(NameFn),
}

impl Columns {
    pub fn apply(&self, frame: &Frame) -> Result<Frame> {
        match self {
            Columns::Names(names) => frame.select(names),
            Columns::Mask(mask) => frame.select_mask(mask),
            Columns::Predicate(f) => {
                let mask: Vec<bool> = frame.column_names().into_iter().map(|n| f(n)).collect();
                frame.select_mask(&mask)
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct XQueryOptions {
    pub columns: Option<Columns>,
    /// Apply every query to the input and stack the results.
    pub parallel: bool,
    /// With `parallel`, add an `xquery` column naming the query each row
    /// came from.
    pub store_keys: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub name: String,
    pub kind: Option<String>,
    pub timestamp: NaiveDateTime,
    pub parallel: bool,
    pub rows: usize,
    pub cols: usize,
}

impl HistoryRecord {
    fn marker(name: &str, frame: &Frame) -> Self {
        Self {
            name: name.to_string(),
            kind: None,
            timestamp: Local::now().naive_local(),
            parallel: false,
            rows: frame.height(),
            cols: frame.width(),
        }
    }

    fn step(query: &Query, parallel: bool, result: &Frame) -> Self {
        Self {
            name: query.to_string(),
            kind: Some(query.kind().to_string()),
            timestamp: Local::now().naive_local(),
            parallel,
            rows: result.height(),
            cols: result.width(),
        }
    }
}

pub const START: &str = "[[ START ]]";
pub const STOP: &str = "[[ STOP ]]";
pub const KEY_COLUMN: &str = "xquery";

/// Runs queries against frames and records their history.
#[derive(Debug, Default)]
pub struct XQuery {
    history: Vec<HistoryRecord>,
    last_shape: (usize, usize),
}

impl XQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&mut self, frame: &Frame, queries: &[Query], options: &XQueryOptions) -> Result<Frame> {
        if self.history.is_empty() {
            self.history.push(HistoryRecord::marker(START, frame));
        }

        let result = if options.parallel {
            self.run_parallel(frame, queries, options.store_keys)?
        } else {
            let mut current = frame.clone();
            for query in queries {
                current = query.apply(&current)?;
                self.history.push(HistoryRecord::step(query, false, &current));
            }
            current
        };

        let result = match &options.columns {
            Some(columns) => columns.apply(&result)?,
            None => result,
        };
        self.last_shape = result.shape();
        Ok(result)
    }

    fn run_parallel(&mut self, frame: &Frame, queries: &[Query], store_keys: bool) -> Result<Frame> {
        if queries.is_empty() {
            return Ok(frame.clone());
        }
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let mut result = query.apply(frame)?;
            self.history.push(HistoryRecord::step(query, true, &result));
            if store_keys {
                let key = vec![CellValue::Text(query.to_string()); result.height()];
                let mut names = vec![KEY_COLUMN.to_string()];
                names.extend(result.column_names().iter().map(|n| n.to_string()));
                result = result.with_column(KEY_COLUMN, key)?.select(&names)?;
            }
            results.push(result);
        }
        let stacked = Frame::concat(&results)?;
        let data_columns: Vec<String> = frame.column_names().iter().map(|n| n.to_string()).collect();
        stacked.drop_duplicates(Some(&data_columns[..]))
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history
    }

    /// History with a STOP record and the row differences between steps.
    pub fn history_frame(&self) -> Frame {
        let mut records = self.history.clone();
        records.push(HistoryRecord {
            name: STOP.to_string(),
            kind: None,
            timestamp: Local::now().naive_local(),
            parallel: false,
            rows: self.last_shape.0,
            cols: self.last_shape.1,
        });

        let first_rows = records.first().map(|r| r.rows as i64).unwrap_or(0);
        let rows = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let previous = i.checked_sub(1).map(|p| &records[p]);
                vec![
                    CellValue::Text(r.name.clone()),
                    r.kind.clone().map(CellValue::Text).unwrap_or(CellValue::Null),
                    CellValue::DateTime(r.timestamp),
                    CellValue::Bool(r.parallel),
                    CellValue::Int64(r.rows as i64),
                    CellValue::Int64(r.cols as i64),
                    previous
                        .map(|p| CellValue::Int64(r.rows as i64 - p.rows as i64))
                        .unwrap_or(CellValue::Null),
                    CellValue::Int64(r.rows as i64 - first_rows),
                    previous
                        .map(|p| {
                            let delta = r.timestamp - p.timestamp;
                            CellValue::Float64(delta.num_microseconds().unwrap_or(0) as f64 / 1e6)
                        })
                        .unwrap_or(CellValue::Null),
                ]
            })
            .collect();
        let names = [
            "name", "qtype", "timestamp", "parallel", "rows", "cols", "diff_prev", "diff_first",
            "timedelta",
        ];
        Frame::new(names.iter().map(|n| n.to_string()).collect(), rows)
    }
}

/// Apply queries to a frame in sequence.
pub fn filter(frame: &Frame, queries: &[&str]) -> Result<Frame> {
    let queries: Vec<Query> = queries.iter().map(|q| Query::from(*q)).collect();
    XQuery::new().run(frame, &queries, &XQueryOptions::default())
}
