use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;

use super::{CellValue, Frame};
use crate::template::ident;

/// File formats a frame can be written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Tsv,
    Json,
    Markdown,
    /// `INSERT` statements
    Sql,
}

pub fn to_csv(frame: &Frame) -> String {
    delimited(frame, Delimiter::Comma)
}

/// Tabs inside values become spaces; nothing is quoted.
pub fn to_tsv(frame: &Frame) -> String {
    delimited(frame, Delimiter::Tab)
}

#[derive(Clone, Copy)]
enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    fn field(self, text: &str) -> Cow<'_, str> {
        match self {
            Delimiter::Comma if text.contains([',', '"', '\n', '\r']) => {
                Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
            }
            Delimiter::Tab if text.contains('\t') => Cow::Owned(text.replace('\t', " ")),
            _ => Cow::Borrowed(text),
        }
    }

    fn separator(self) -> &'static str {
        match self {
            Delimiter::Comma => ",",
            Delimiter::Tab => "\t",
        }
    }
}

fn delimited(frame: &Frame, delimiter: Delimiter) -> String {
    let sep = delimiter.separator();
    let header: Vec<_> = frame.columns.iter().map(|c| delimiter.field(&c.name)).collect();
    let mut output = header.join(sep) + "\n";
    for row in &frame.rows {
        let texts: Vec<String> = row
            .iter()
            .map(|cell| if cell.is_null() { String::new() } else { cell.display() })
            .collect();
        let fields: Vec<_> = texts.iter().map(|t| delimiter.field(t)).collect();
        output += &fields.join(sep);
        output.push('\n');
    }
    output
}

/// Array of records keyed by column name, in column order.
pub fn to_json(frame: &Frame) -> String {
    let records: Vec<serde_json::Value> = frame
        .rows
        .iter()
        .map(|row| {
            let mut obj = serde_json::Map::new();
            for (col, cell) in frame.columns.iter().zip(row) {
                obj.insert(col.name.clone(), cell.to_json());
            }
            serde_json::Value::Object(obj)
        })
        .collect();

    serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
}

/// Read an array of JSON records. Columns appear in first-seen order and
/// missing keys become nulls.
pub fn from_json(text: &str) -> Result<Frame> {
    let records: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(text).context("Expected a JSON array of records")?;
    let mut names: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !names.contains(key) {
                names.push(key.clone());
            }
        }
    }
    let rows = records
        .iter()
        .map(|record| {
            names
                .iter()
                .map(|n| record.get(n).map(CellValue::from_json).unwrap_or(CellValue::Null))
                .collect()
        })
        .collect();
    Ok(Frame::new(names, rows))
}

/// Table name used when a frame is exported as SQL without a target file.
pub const DEFAULT_SQL_TABLE: &str = "result";

/// One multi-row `INSERT` statement for the whole frame.
pub fn to_sql_insert(frame: &Frame, table: &str) -> String {
    if frame.rows.is_empty() || frame.columns.is_empty() {
        return String::new();
    }
    let columns: Vec<String> = frame.columns.iter().map(|c| column_ident(&c.name)).collect();
    let tuples: Vec<String> = frame
        .rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(sql_literal).collect();
            format!("  ({})", values.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES\n{};\n",
        ident(table.to_string()),
        columns.join(", "),
        tuples.join(",\n")
    )
}

fn column_ident(name: &str) -> String {
    if name.contains('.') {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        ident(name.to_string())
    }
}

impl Frame {
    pub fn export(&self, format: ExportFormat, styler: &super::Styler) -> String {
        match format {
            ExportFormat::Csv => to_csv(self),
            ExportFormat::Tsv => to_tsv(self),
            ExportFormat::Json => to_json(self),
            ExportFormat::Markdown => self.to_markdown(styler),
            ExportFormat::Sql => to_sql_insert(self, DEFAULT_SQL_TABLE),
        }
    }

    /// Write the frame to `path`, choosing the format from the extension.
    /// A `.sql` file inserts into a table named after the file stem.
    pub fn write(&self, path: &Path) -> Result<()> {
        let text = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") | Some("txt") => to_csv(self),
            Some("tsv") => to_tsv(self),
            Some("json") => to_json(self),
            Some("md") => self.to_markdown(&super::Styler::default()),
            Some("sql") => {
                let table = path.file_stem().and_then(|s| s.to_str()).unwrap_or(DEFAULT_SQL_TABLE);
                to_sql_insert(self, table)
            }
            other => bail!("Unsupported output extension: {:?}", other),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn read_json(path: &Path) -> Result<Frame> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        from_json(&text)
    }
}

/// Render a value as a SQL literal.
pub fn sql_literal(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => "NULL".into(),
        CellValue::Bool(true) => "TRUE".into(),
        CellValue::Bool(false) => "FALSE".into(),
        CellValue::Float32(_) | CellValue::Float64(_) => match cell.as_f64() {
            Some(f) if f.is_finite() => cell.display(),
            _ => quote_literal(&cell.display()),
        },
        CellValue::Int16(_) | CellValue::Int32(_) | CellValue::Int64(_) => cell.display(),
        CellValue::Bytes(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            format!("'\\x{}'", hex)
        }
        CellValue::Array(items) if !items.is_empty() => {
            let items: Vec<String> = items.iter().map(sql_literal).collect();
            format!("ARRAY[{}]", items.join(", "))
        }
        CellValue::Array(_) => "'{}'".into(),
        CellValue::Text(s) | CellValue::Unknown(s) => quote_literal(s),
        other => quote_literal(&other.display()),
    }
}

/// Single-quote `s`, doubling embedded quotes.
pub fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
