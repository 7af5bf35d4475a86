//! In-memory result sets.
//!
//! A [`Frame`] is the row-oriented table produced by query execution and
//! consumed by the filter DSL, key extraction, tabulation and reports.
mod export;
mod render;
mod value;

pub use export::*;
pub use render::*;
pub use value::*;

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub max_width: usize,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        let max_width = unicode_width::UnicodeWidthStr::width(name.as_str());
        Self {
            name,
            type_name: type_name.into(),
            max_width,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    /// Names of the columns acting as the row index.
    pub index: Vec<String>,
}

/// A single named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<CellValue>,
}

/// Result of [`Frame::squeeze`].
#[derive(Debug, Clone, PartialEq)]
pub enum Squeezed {
    Frame(Frame),
    Series(Series),
    Scalar(CellValue),
}

impl Frame {
    /// Build a frame from column names and rows, inferring type names from the
    /// first non-null value of each column.
    pub fn new(names: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let type_name = rows
                    .iter()
                    .filter_map(|r| r.get(i))
                    .find(|v| !v.is_null())
                    .map(type_name_of)
                    .unwrap_or("unknown");
                ColumnInfo::new(name, type_name)
            })
            .collect();
        let mut frame = Self {
            columns,
            rows,
            index: vec![],
        };
        frame.refresh_widths();
        frame
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a frame from named columns of equal length.
    pub fn from_columns(columns: Vec<(String, Vec<CellValue>)>) -> Result<Self> {
        let height = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, _)) = columns.iter().find(|(_, v)| v.len() != height) {
            bail!("Column '{}' has a different length", name);
        }
        let mut rows = vec![Vec::with_capacity(columns.len()); height];
        let mut names = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            names.push(name);
            for (row, value) in rows.iter_mut().zip(values) {
                row.push(value);
            }
        }
        Ok(Self::new(names, rows))
    }

    pub fn refresh_widths(&mut self) {
        for (i, col) in self.columns.iter_mut().enumerate() {
            col.max_width = self
                .rows
                .iter()
                .filter_map(|r| r.get(i))
                .map(CellValue::display_width)
                .chain(std::iter::once(unicode_width::UnicodeWidthStr::width(
                    col.name.as_str(),
                )))
                .max()
                .unwrap_or(0);
        }
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height(), self.width())
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| anyhow::anyhow!("Unknown column: {}", name))
    }

    pub fn column(&self, name: &str) -> Result<Vec<&CellValue>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    pub fn series(&self, name: &str) -> Result<Series> {
        Ok(Series {
            name: name.to_string(),
            values: self.column(name)?.into_iter().cloned().collect(),
        })
    }

    /// Keep rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<Frame> {
        if mask.len() != self.height() {
            bail!(
                "Mask length {} does not match frame height {}",
                mask.len(),
                self.height()
            );
        }
        let rows = self
            .rows
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(r, _)| r.clone())
            .collect();
        Ok(self.with_rows(rows))
    }

    pub fn take(&self, indices: &[usize]) -> Result<Frame> {
        let rows = indices
            .iter()
            .map(|&i| {
                self.rows
                    .get(i)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("Row {} out of range", i))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.with_rows(rows))
    }

    pub fn head(&self, n: usize) -> Frame {
        self.with_rows(self.rows.iter().take(n).cloned().collect())
    }

    fn with_rows(&self, rows: Vec<Vec<CellValue>>) -> Frame {
        let mut frame = Frame {
            columns: self.columns.clone(),
            rows,
            index: self.index.clone(),
        };
        frame.refresh_widths();
        frame
    }

    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.select_indices(&indices))
    }

    /// Keep columns where `mask` is true.
    pub fn select_mask(&self, mask: &[bool]) -> Result<Frame> {
        if mask.len() != self.width() {
            bail!(
                "Column mask length {} does not match frame width {}",
                mask.len(),
                self.width()
            );
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();
        Ok(self.select_indices(&indices))
    }

    fn select_indices(&self, indices: &[usize]) -> Frame {
        let columns: Vec<ColumnInfo> = indices.iter().map(|&i| self.columns[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
            .collect();
        let index = self
            .index
            .iter()
            .filter(|n| columns.iter().any(|c| &c.name == *n))
            .cloned()
            .collect();
        Frame {
            columns,
            rows,
            index,
        }
    }

    /// Add or replace a column.
    pub fn with_column(&self, name: &str, values: Vec<CellValue>) -> Result<Frame> {
        if values.len() != self.height() {
            bail!(
                "Column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.height()
            );
        }
        let mut frame = self.clone();
        let type_name = values
            .iter()
            .find(|v| !v.is_null())
            .map(type_name_of)
            .unwrap_or("unknown");
        match frame.columns.iter().position(|c| c.name == name) {
            Some(idx) => {
                frame.columns[idx].type_name = type_name.to_string();
                for (row, value) in frame.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                frame.columns.push(ColumnInfo::new(name, type_name));
                for (row, value) in frame.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        frame.refresh_widths();
        Ok(frame)
    }

    /// Mark columns as row index. Index columns move to the front.
    pub fn set_index<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let mut order = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        for i in 0..self.width() {
            if !order.contains(&i) {
                order.push(i);
            }
        }
        let mut frame = self.select_indices(&order);
        frame.index = names.iter().map(|n| n.as_ref().to_string()).collect();
        Ok(frame)
    }

    /// Stack frames with identical columns.
    pub fn concat(frames: &[Frame]) -> Result<Frame> {
        let Some(first) = frames.first() else {
            return Ok(Frame::empty());
        };
        let names = first.column_names();
        let mut rows = Vec::new();
        for frame in frames {
            if frame.column_names() != names {
                bail!("Cannot concatenate frames with different columns");
            }
            rows.extend(frame.rows.iter().cloned());
        }
        Ok(first.with_rows(rows))
    }

    /// Drop repeated rows, comparing only `subset` when given. The first
    /// occurrence is kept.
    pub fn drop_duplicates<S: AsRef<str>>(&self, subset: Option<&[S]>) -> Result<Frame> {
        let indices: Vec<usize> = match subset {
            Some(names) => names
                .iter()
                .map(|n| self.column_index(n.as_ref()))
                .collect::<Result<_>>()?,
            None => (0..self.width()).collect(),
        };
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|row| seen.insert(row_key(row, &indices)))
            .cloned()
            .collect();
        Ok(self.with_rows(rows))
    }

    /// Stable sort on the given columns, ascending, nulls last.
    pub fn sort_by<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            indices
                .iter()
                .map(|&i| a[i].sort_cmp(&b[i]))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(self.with_rows(rows))
    }

    /// Row `i` as a column-name keyed map.
    pub fn row_map(&self, i: usize) -> Option<BTreeMap<String, CellValue>> {
        let row = self.rows.get(i)?;
        Some(
            self.columns
                .iter()
                .zip(row)
                .map(|(c, v)| (c.name.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn cast(&self, name: &str, dtype: DType) -> Result<Frame> {
        let values = self.column(name)?.into_iter().map(|v| v.cast(dtype)).collect();
        self.with_column(name, values)
    }

    /// Convert text columns to timestamps. Values already temporal are kept.
    pub fn parse_dates<S: AsRef<str>>(&self, names: &[S]) -> Result<Frame> {
        let mut frame = self.clone();
        for name in names {
            let values = frame
                .column(name.as_ref())?
                .into_iter()
                .map(|v| match v {
                    CellValue::Text(_) => v.cast(DType::DateTime),
                    other => other.clone(),
                })
                .collect();
            frame = frame.with_column(name.as_ref(), values)?;
        }
        Ok(frame)
    }

    /// Collapse single-column frames into a series and 1x1 frames into a
    /// scalar.
    pub fn squeeze(self) -> Squeezed {
        match self.shape() {
            (1, 1) => Squeezed::Scalar(self.rows[0][0].clone()),
            (_, 1) => Squeezed::Series(Series {
                name: self.columns[0].name.clone(),
                values: self.rows.into_iter().map(|mut r| r.remove(0)).collect(),
            }),
            _ => Squeezed::Frame(self),
        }
    }
}

impl Squeezed {
    /// Expand back into a frame.
    pub fn into_frame(self) -> Frame {
        match self {
            Squeezed::Frame(frame) => frame,
            Squeezed::Series(series) => series.into_frame(),
            Squeezed::Scalar(value) => Frame::new(vec!["value".into()], vec![vec![value]]),
        }
    }
}

impl Series {
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_frame(self) -> Frame {
        let rows = self.values.into_iter().map(|v| vec![v]).collect();
        Frame::new(vec![self.name], rows)
    }
}

pub(crate) fn row_key(row: &[CellValue], indices: &[usize]) -> Vec<String> {
    indices.iter().map(|&i| row[i].key()).collect()
}

fn type_name_of(value: &CellValue) -> &'static str {
    match value {
        CellValue::Null => "unknown",
        CellValue::Bool(_) => "bool",
        CellValue::Int16(_) => "int2",
        CellValue::Int32(_) => "int4",
        CellValue::Int64(_) => "int8",
        CellValue::Float32(_) => "float4",
        CellValue::Float64(_) => "float8",
        CellValue::Text(_) => "text",
        CellValue::Bytes(_) => "bytea",
        CellValue::Date(_) => "date",
        CellValue::Time(_) => "time",
        CellValue::DateTime(_) => "timestamp",
        CellValue::TimestampTz(_) => "timestamptz",
        CellValue::Json(_) => "jsonb",
        CellValue::Array(_) => "array",
        CellValue::Unknown(_) => "unknown",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn students() -> Frame {
        Frame::new(
            vec!["id".into(), "name".into(), "course".into(), "enrolled".into()],
            vec![
                vec![
                    CellValue::Int32(1),
                    CellValue::Text("Alice".into()),
                    CellValue::Text("math".into()),
                    CellValue::Text("2023-09-01".into()),
                ],
                vec![
                    CellValue::Int32(2),
                    CellValue::Text("Bob".into()),
                    CellValue::Text("math".into()),
                    CellValue::Text("2024-02-01".into()),
                ],
                vec![
                    CellValue::Int32(3),
                    CellValue::Null,
                    CellValue::Text("physics".into()),
                    CellValue::Null,
                ],
                vec![
                    CellValue::Int32(2),
                    CellValue::Text("Bob".into()),
                    CellValue::Text("math".into()),
                    CellValue::Text("2024-02-01".into()),
                ],
            ],
        )
    }

    #[test]
    fn test_new_infers_types_and_widths() {
        let frame = students();
        assert_eq!(frame.shape(), (4, 4));
        assert_eq!(frame.columns[0].type_name, "int4");
        assert_eq!(frame.columns[1].type_name, "text");
        assert_eq!(frame.columns[1].max_width, 5);
    }

    #[test]
    fn test_from_columns_rejects_ragged() {
        let result = Frame::from_columns(vec![
            ("a".into(), vec![CellValue::Int32(1)]),
            ("b".into(), vec![]),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_filter_and_mask_length() {
        let frame = students();
        let filtered = frame.filter(&[true, false, true, false]).unwrap();
        assert_eq!(filtered.height(), 2);
        assert!(frame.filter(&[true]).is_err());
    }

    #[test]
    fn test_select_unknown_column() {
        let frame = students();
        assert!(frame.select(&["missing"]).is_err());
        let selected = frame.select(&["name", "id"]).unwrap();
        assert_eq!(selected.column_names(), vec!["name", "id"]);
    }

    #[test]
    fn test_drop_duplicates() {
        let frame = students();
        assert_eq!(frame.drop_duplicates::<&str>(None).unwrap().height(), 3);
        let by_course = frame.drop_duplicates(Some(&["course"][..])).unwrap();
        assert_eq!(by_course.height(), 2);
        assert_eq!(by_course.rows[0][0], CellValue::Int32(1));
    }

    #[test]
    fn test_concat_requires_same_columns() {
        let frame = students();
        let both = Frame::concat(&[frame.clone(), frame.clone()]).unwrap();
        assert_eq!(both.height(), 8);
        let other = frame.select(&["id"]).unwrap();
        assert!(Frame::concat(&[frame, other]).is_err());
    }

    #[test]
    fn test_set_index_moves_columns_first() {
        let frame = students().set_index(&["course"]).unwrap();
        assert_eq!(frame.column_names()[0], "course");
        assert_eq!(frame.index, vec!["course".to_string()]);
    }

    #[test]
    fn test_sort_by() {
        let frame = students().sort_by(&["name"]).unwrap();
        assert_eq!(frame.rows[0][1], CellValue::Text("Alice".into()));
        assert!(frame.rows[3][1].is_null());
    }

    #[test]
    fn test_parse_dates() {
        let frame = students().parse_dates(&["enrolled"]).unwrap();
        assert!(matches!(frame.rows[0][3], CellValue::DateTime(_)));
        assert!(frame.rows[2][3].is_null());
    }

    #[test]
    fn test_squeeze() {
        let frame = students();
        assert!(matches!(frame.clone().squeeze(), Squeezed::Frame(_)));
        match frame.select(&["id"]).unwrap().squeeze() {
            Squeezed::Series(s) => assert_eq!(s.len(), 4),
            other => panic!("Expected series, got {:?}", other),
        }
        let cell = frame.select(&["id"]).unwrap().head(1).squeeze();
        assert_eq!(cell, Squeezed::Scalar(CellValue::Int32(1)));
    }

    #[test]
    fn test_with_column_replaces() {
        let frame = students();
        let replaced = frame
            .with_column("id", vec![CellValue::Null; 4])
            .unwrap();
        assert_eq!(replaced.width(), 4);
        assert!(replaced.rows[0][0].is_null());
        assert!(frame.with_column("x", vec![]).is_err());
    }

    #[test]
    fn test_row_map() {
        let row = students().row_map(0).unwrap();
        assert_eq!(row["name"], CellValue::Text("Alice".into()));
        assert!(students().row_map(10).is_none());
    }
}
