//! Tabulation helpers: counts, totals, percentages and crosstabs.
//!
//! Count tables are frames whose first column is the row label (marked as the
//! frame index) followed by numeric columns.
use anyhow::{bail, Context, Result};
use chrono::Months;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::frame::{CellValue, Frame, Series};

pub const TOTAL_LABEL: &str = "Totaal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Aggregate down the rows, adding a row.
    Index,
    /// Aggregate across the columns, adding a column.
    Columns,
    Both,
}

/// What percentages are relative to in a crosstab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PctBase {
    /// Each row's last column.
    Row,
    /// Each column's last row.
    Column,
    /// The bottom-right cell.
    Grand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggKind {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggKind {
    pub fn label(&self) -> &'static str {
        match self {
            AggKind::Sum => "sum",
            AggKind::Mean => "mean",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Count => "count",
        }
    }

    fn apply(&self, values: &[f64]) -> CellValue {
        if values.is_empty() && *self != AggKind::Count && *self != AggKind::Sum {
            return CellValue::Null;
        }
        let value = match self {
            AggKind::Sum => values.iter().sum(),
            AggKind::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggKind::Count => values.len() as f64,
        };
        CellValue::Float64(value)
    }
}

#[derive(Debug, Clone)]
pub struct ValueCountOptions {
    pub fillna: String,
    pub name: String,
    pub add_pct: bool,
    pub label_pct: String,
    /// Digits to round percentages to; negative leaves them unrounded.
    pub ndigits: i32,
}

impl Default for ValueCountOptions {
    fn default() -> Self {
        Self {
            fillna: "---".to_string(),
            name: "aantal".to_string(),
            add_pct: false,
            label_pct: "pct".to_string(),
            ndigits: -1,
        }
    }
}

/// Count occurrences of each value, most frequent first, with a total row.
pub fn value_counts(series: &Series, options: &ValueCountOptions) -> Result<Frame> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, i64> = HashMap::new();
    for value in &series.values {
        let label = if value.is_null() {
            options.fillna.clone()
        } else {
            value.display()
        };
        let count = counts.entry(label.clone()).or_insert(0);
        if *count == 0 {
            order.push(label);
        }
        *count += 1;
    }
    order.sort_by(|a, b| counts[b].cmp(&counts[a]));

    let rows = order
        .into_iter()
        .map(|label| {
            let n = counts[&label];
            vec![CellValue::Text(label), CellValue::Int64(n)]
        })
        .collect();
    let frame = Frame::new(vec![series.name.clone(), options.name.clone()], rows)
        .set_index(&[series.name.as_str()])?;
    let frame = add_totals(&frame, Axis::Index, TOTAL_LABEL, true)?;
    if options.add_pct {
        add_series_percentages(&frame, &options.name, &options.label_pct, options.ndigits)
    } else {
        Ok(frame)
    }
}

/// Append a total row, column or both.
pub fn add_totals(frame: &Frame, axis: Axis, label: &str, is_discrete: bool) -> Result<Frame> {
    let output = match axis {
        Axis::Index | Axis::Columns => add_agg(frame, AggKind::Sum, axis, Some(label))?,
        Axis::Both => {
            let rows = add_agg(frame, AggKind::Sum, Axis::Index, Some(label))?;
            add_agg(&rows, AggKind::Sum, Axis::Columns, Some(label))?
        }
    };
    if is_discrete {
        discretize(&output)
    } else {
        Ok(output)
    }
}

/// Append an aggregate row (`Axis::Index`) or column (`Axis::Columns`) over
/// the numeric columns. The label defaults to the aggregate's name.
pub fn add_agg(frame: &Frame, agg: AggKind, axis: Axis, label: Option<&str>) -> Result<Frame> {
    let label = label.unwrap_or(agg.label());
    let value_cols = value_columns(frame);
    match axis {
        Axis::Index => {
            let mut row = vec![CellValue::Null; frame.width()];
            let label_cols = label_columns(frame);
            for (n, &i) in label_cols.iter().enumerate() {
                row[i] = CellValue::Text(if n == 0 { label.to_string() } else { String::new() });
            }
            for &i in &value_cols {
                let values: Vec<f64> = frame.rows.iter().filter_map(|r| r[i].as_f64()).collect();
                row[i] = agg.apply(&values);
            }
            let mut out = frame.clone();
            out.rows.push(row);
            out.refresh_widths();
            Ok(out)
        }
        Axis::Columns => {
            let values = frame
                .rows
                .iter()
                .map(|r| {
                    let values: Vec<f64> = value_cols.iter().filter_map(|&i| r[i].as_f64()).collect();
                    agg.apply(&values)
                })
                .collect();
            frame.with_column(label, values)
        }
        Axis::Both => {
            let rows = add_agg(frame, agg, Axis::Index, Some(label))?;
            add_agg(&rows, agg, Axis::Columns, Some(label))
        }
    }
}

/// Percentage column for a single count column, relative to its last row.
pub fn add_series_percentages(
    frame: &Frame,
    column: &str,
    label: &str,
    ndigits: i32,
) -> Result<Frame> {
    let values: Vec<f64> = frame
        .column(column)?
        .iter()
        .map(|v| v.as_f64().unwrap_or(f64::NAN))
        .collect();
    let total = values.last().copied().context("No rows to take percentages of")?;
    let pcts: Vec<f64> = values.iter().map(|v| v / total * 100.0).collect();
    let pcts = round_percentages(&pcts, ndigits);
    frame.with_column(label, pcts.into_iter().map(CellValue::Float64).collect())
}

/// Counts and percentages side by side. Count columns are prefixed with
/// `label_n`, percentage columns with `label_pct`.
pub fn add_percentages(
    frame: &Frame,
    base: PctBase,
    label_n: &str,
    label_pct: &str,
    ndigits: i32,
) -> Result<Frame> {
    let value_cols = value_columns(frame);
    if value_cols.is_empty() || frame.is_empty() {
        bail!("No numeric values to take percentages of");
    }
    let last_row = frame.height() - 1;
    let last_col = *value_cols.last().unwrap_or(&0);
    let cell = |r: usize, c: usize| frame.rows[r][c].as_f64().unwrap_or(f64::NAN);

    let mut out = frame.select_mask(
        &(0..frame.width())
            .map(|i| !value_cols.contains(&i))
            .collect::<Vec<_>>(),
    )?;
    let mut pct_columns = Vec::new();
    for &c in &value_cols {
        let name = &frame.columns[c].name;
        let pcts: Vec<f64> = (0..frame.height())
            .map(|r| {
                let total = match base {
                    PctBase::Grand => cell(last_row, last_col),
                    PctBase::Column => cell(last_row, c),
                    PctBase::Row => cell(r, last_col),
                };
                cell(r, c) / total * 100.0
            })
            .collect();
        let values = frame.rows.iter().map(|row| row[c].clone()).collect();
        out = out.with_column(&format!("{}_{}", label_n, name), values)?;
        pct_columns.push((format!("{}_{}", label_pct, name), round_percentages(&pcts, ndigits)));
    }
    for (name, pcts) in pct_columns {
        out = out.with_column(&name, pcts.into_iter().map(CellValue::Float64).collect())?;
    }
    Ok(out)
}

/// Round so the rounded values still add up to the rounded running total.
///
/// Missing values count as zero. A negative `ndigits` returns the input.
pub fn round_percentages(values: &[f64], ndigits: i32) -> Vec<f64> {
    if ndigits < 0 {
        return values.to_vec();
    }
    let factor = 10f64.powi(ndigits);
    let round = |x: f64| (x * factor).round_ties_even() / factor;
    let mut cumsum = 0.0;
    let mut baseline = 0.0;
    values
        .iter()
        .map(|v| {
            cumsum += if v.is_nan() { 0.0 } else { *v };
            let rounded = round(cumsum);
            let out = rounded - baseline;
            baseline = rounded;
            out
        })
        .collect()
}

/// Sort rows by the position of `column`'s value in `order`; unlisted values
/// go last in their original order.
pub fn custom_sort<S: AsRef<str>>(frame: &Frame, column: &str, order: &[S]) -> Result<Frame> {
    let idx = frame.column_index(column)?;
    let rank = |v: &CellValue| {
        let text = v.display();
        order
            .iter()
            .position(|o| o.as_ref() == text)
            .unwrap_or(usize::MAX)
    };
    let mut rows = frame.rows.clone();
    rows.sort_by_key(|r| rank(&r[idx]));
    let mut out = frame.clone();
    out.rows = rows;
    Ok(out)
}

/// Count rows per (`index`, `columns`) pair. Rows with a null in either
/// column are skipped.
pub fn crosstab(frame: &Frame, index: &str, columns: &str) -> Result<Frame> {
    let ri = frame.column_index(index)?;
    let ci = frame.column_index(columns)?;
    let mut row_labels: Vec<&CellValue> = Vec::new();
    let mut col_labels: Vec<&CellValue> = Vec::new();
    let mut counts: HashMap<(String, String), i64> = HashMap::new();
    for row in &frame.rows {
        let (r, c) = (&row[ri], &row[ci]);
        if r.is_null() || c.is_null() {
            continue;
        }
        if !row_labels.iter().any(|l| l.key() == r.key()) {
            row_labels.push(r);
        }
        if !col_labels.iter().any(|l| l.key() == c.key()) {
            col_labels.push(c);
        }
        *counts.entry((r.key(), c.key())).or_insert(0) += 1;
    }
    row_labels.sort_by(|a, b| a.sort_cmp(b));
    col_labels.sort_by(|a, b| a.sort_cmp(b));

    let mut names = vec![index.to_string()];
    names.extend(col_labels.iter().map(|c| c.display()));
    let rows = row_labels
        .iter()
        .map(|r| {
            let mut row = vec![(*r).clone()];
            row.extend(col_labels.iter().map(|c| {
                CellValue::Int64(counts.get(&(r.key(), c.key())).copied().unwrap_or(0))
            }));
            row
        })
        .collect();
    Frame::new(names, rows).set_index(&[index])
}

/// Shift every date forward by `max(year) - year` years into a new
/// `<date_field>_offs` column, so several years line up on the latest one.
pub fn offset_date_field(frame: &Frame, date_field: &str, year_field: &str) -> Result<Frame> {
    let di = frame.column_index(date_field)?;
    let yi = frame.column_index(year_field)?;
    let years: Vec<Option<i64>> = frame.rows.iter().map(|r| r[yi].as_i64()).collect();
    let offset_year = years
        .iter()
        .flatten()
        .max()
        .copied()
        .context("No years to offset against")?;

    let mut order: Vec<usize> = (0..frame.height()).collect();
    order.sort_by_key(|&i| years[i]);

    let shifted = order
        .iter()
        .map(|&i| {
            let (Some(year), Some(date)) = (years[i], frame.rows[i][di].as_datetime()) else {
                return CellValue::Null;
            };
            let months = Months::new(((offset_year - year) * 12) as u32);
            match (&frame.rows[i][di], date.checked_add_months(months)) {
                (_, None) => CellValue::Null,
                (CellValue::DateTime(_), Some(d)) => CellValue::DateTime(d),
                (_, Some(d)) => CellValue::Date(d.date()),
            }
        })
        .collect();

    let name = format!("{}_offs", date_field);
    let sorted = frame.take(&order)?.with_column(&name, shifted)?;
    let mut columns = vec![name];
    columns.extend(frame.column_names().iter().map(|c| c.to_string()));
    sorted.select(&columns)
}

fn label_columns(frame: &Frame) -> Vec<usize> {
    if frame.index.is_empty() {
        return (0..frame.width()).filter(|i| !is_value_column(frame, *i)).collect();
    }
    frame
        .index
        .iter()
        .filter_map(|n| frame.column_index(n).ok())
        .collect()
}

fn value_columns(frame: &Frame) -> Vec<usize> {
    (0..frame.width())
        .filter(|i| !frame.index.contains(&frame.columns[*i].name) && is_value_column(frame, *i))
        .collect()
}

fn is_value_column(frame: &Frame, i: usize) -> bool {
    frame
        .rows
        .iter()
        .all(|r| r[i].is_null() || r[i].is_numeric())
}

/// Store whole-number aggregates as integers.
fn discretize(frame: &Frame) -> Result<Frame> {
    let mut out = frame.clone();
    for i in value_columns(frame) {
        if !frame.rows.iter().all(|r| r[i].is_null() || r[i].as_i64().is_some()) {
            continue;
        }
        for row in out.rows.iter_mut() {
            if let Some(n) = row[i].as_i64() {
                row[i] = CellValue::Int64(n);
            }
        }
        out.columns[i].type_name = "int8".into();
    }
    out.refresh_widths();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::students;

    fn ints(frame: &Frame, column: &str) -> Vec<i64> {
        frame
            .column(column)
            .unwrap()
            .iter()
            .filter_map(|v| v.as_i64())
            .collect()
    }

    #[test]
    fn test_value_counts_with_total() {
        let series = students().series("name").unwrap();
        let counts = value_counts(&series, &ValueCountOptions::default()).unwrap();
        assert_eq!(counts.column_names(), vec!["name", "aantal"]);
        assert_eq!(counts.index, vec!["name".to_string()]);
        let labels: Vec<String> = counts.column("name").unwrap().iter().map(|v| v.display()).collect();
        assert_eq!(labels, vec!["Bob", "Alice", "---", "Totaal"]);
        assert_eq!(ints(&counts, "aantal"), vec![2, 1, 1, 4]);
    }

    #[test]
    fn test_value_counts_with_percentages() {
        let series = students().series("course").unwrap();
        let options = ValueCountOptions {
            add_pct: true,
            ndigits: 1,
            ..Default::default()
        };
        let counts = value_counts(&series, &options).unwrap();
        let pcts: Vec<f64> = counts.column("pct").unwrap().iter().filter_map(|v| v.as_f64()).collect();
        assert_eq!(pcts, vec![75.0, 25.0, 100.0]);
    }

    #[test]
    fn test_round_percentages_adds_up() {
        let values = [100.0 / 3.0, 100.0 / 3.0, 100.0 / 3.0];
        let rounded = round_percentages(&values, 0);
        assert_eq!(rounded, vec![33.0, 34.0, 33.0]);
        assert_eq!(rounded.iter().sum::<f64>(), 100.0);
        assert_eq!(round_percentages(&values, -1), values.to_vec());
        assert_eq!(round_percentages(&[f64::NAN, 50.0], 0), vec![0.0, 50.0]);
    }

    fn sales() -> Frame {
        let rows = [
            ("north", Some("a")),
            ("north", Some("b")),
            ("north", Some("a")),
            ("south", Some("a")),
            ("south", None),
        ];
        Frame::new(
            vec!["region".into(), "product".into()],
            rows.iter()
                .map(|(r, p)| {
                    vec![
                        CellValue::from(*r),
                        p.map(CellValue::from).unwrap_or(CellValue::Null),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn test_crosstab_with_totals() {
        let table = crosstab(&sales(), "region", "product").unwrap();
        assert_eq!(table.column_names(), vec!["region", "a", "b"]);
        assert_eq!(ints(&table, "a"), vec![2, 1]);
        assert_eq!(ints(&table, "b"), vec![1, 0]);

        let both = add_totals(&table, Axis::Both, TOTAL_LABEL, true).unwrap();
        assert_eq!(both.column_names(), vec!["region", "a", "b", "Totaal"]);
        assert_eq!(ints(&both, "Totaal"), vec![3, 1, 4]);
        assert_eq!(both.rows[2][0], CellValue::Text("Totaal".into()));
        assert_eq!(both.rows[2][1], CellValue::Int64(3));
    }

    #[test]
    fn test_add_percentages_grand_total() {
        let table = crosstab(&sales(), "region", "product").unwrap();
        let both = add_totals(&table, Axis::Both, TOTAL_LABEL, true).unwrap();
        let pct = add_percentages(&both, PctBase::Grand, "n", "pct", 0).unwrap();
        assert_eq!(
            pct.column_names(),
            vec!["region", "n_a", "n_b", "n_Totaal", "pct_a", "pct_b", "pct_Totaal"]
        );
        let a: Vec<f64> = pct.column("pct_a").unwrap().iter().filter_map(|v| v.as_f64()).collect();
        assert_eq!(a, vec![50.0, 25.0, 75.0]);
        assert_eq!(ints(&pct, "n_a"), vec![2, 1, 3]);
    }

    #[test]
    fn test_add_percentages_per_row() {
        let table = crosstab(&sales(), "region", "product").unwrap();
        let rows = add_totals(&table, Axis::Columns, TOTAL_LABEL, true).unwrap();
        let pct = add_percentages(&rows, PctBase::Row, "n", "pct", -1).unwrap();
        let a: Vec<f64> = pct.column("pct_a").unwrap().iter().filter_map(|v| v.as_f64()).collect();
        assert!((a[0] - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(a[1], 100.0);
    }

    #[test]
    fn test_add_agg_mean_row() {
        let table = crosstab(&sales(), "region", "product").unwrap();
        let mean = add_agg(&table, AggKind::Mean, Axis::Index, None).unwrap();
        assert_eq!(mean.rows[2][0], CellValue::Text("mean".into()));
        assert_eq!(mean.rows[2][1], CellValue::Float64(1.5));
        assert_eq!(mean.rows[2][2], CellValue::Float64(0.5));
    }

    #[test]
    fn test_custom_sort() {
        let frame = students();
        let sorted = custom_sort(&frame, "course", &["physics", "math"]).unwrap();
        assert_eq!(sorted.rows[0][2], CellValue::Text("physics".into()));
        let sorted = custom_sort(&frame, "name", &["Bob"]).unwrap();
        assert_eq!(sorted.rows[0][1], CellValue::Text("Bob".into()));
        assert_eq!(sorted.rows[2][1], CellValue::Text("Alice".into()));
    }

    #[test]
    fn test_offset_date_field() {
        let frame = Frame::new(
            vec!["day".into(), "year".into()],
            vec![
                vec![CellValue::Text("2024-02-29".into()), CellValue::Int32(2024)],
                vec![CellValue::Text("2022-09-01".into()), CellValue::Int32(2022)],
            ],
        );
        let out = offset_date_field(&frame, "day", "year").unwrap();
        assert_eq!(out.column_names(), vec!["day_offs", "day", "year"]);
        assert_eq!(out.rows[0][0].display(), "2024-09-01");
        assert_eq!(out.rows[1][0].display(), "2024-02-29");
        assert_eq!(out.rows[0][2], CellValue::Int32(2022));
    }
}
