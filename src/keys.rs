//! Extracting key lists from a result column.
//!
//! Keys are typically pasted into another system, so the output is a flat
//! `a;b;c` string, or one block per group and batch:
//!
//! ```text
//! [course: math] (2)
//! 1;2
//!
//! [course: physics] (1)
//! 3
//! ```
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{seq::index, SeedableRng};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::frame::{row_key, CellValue, Frame, Series};
use crate::ts::Ts;

#[derive(Debug, Clone)]
pub struct KeyOptions {
    /// Drop repeated keys within each group.
    pub unique: bool,
    /// Keep a random sample of this many keys.
    pub sample: Option<usize>,
    /// Seed for reproducible samples.
    pub seed: Option<u64>,
    pub groupby: Vec<String>,
    /// Split each group into numbered batches of this size. Sizes below 2
    /// disable batching.
    pub batch_size: Option<usize>,
    pub batch_name: String,
}

impl Default for KeyOptions {
    fn default() -> Self {
        Self {
            unique: true,
            sample: None,
            seed: None,
            groupby: vec![],
            batch_size: None,
            batch_name: "batch".to_string(),
        }
    }
}

/// One extracted key with its group and batch labels.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRecord {
    pub labels: Vec<CellValue>,
    pub key: CellValue,
}

pub struct KeyExtractor {
    key: String,
    label_names: Vec<String>,
    records: Vec<KeyRecord>,
}

impl KeyExtractor {
    pub fn new(frame: &Frame, key: &str, options: &KeyOptions) -> Result<Self> {
        let mut columns = options.groupby.clone();
        columns.push(key.to_string());
        let mut data = frame.select(&columns)?;
        if options.unique {
            data = data.drop_duplicates(Some(&columns[..]))?;
        }

        let n_groups = options.groupby.len();
        let mut records: Vec<KeyRecord> = data
            .rows
            .into_iter()
            .map(|mut row| {
                let key = row.pop().unwrap_or(CellValue::Null);
                KeyRecord { labels: row, key }
            })
            .collect();

        if n_groups > 0 {
            records.sort_by(|a, b| compare_labels(&a.labels, &b.labels));
        }

        let mut label_names = options.groupby.clone();
        if let Some(size) = options.batch_size.filter(|s| *s > 1) {
            add_batches(&mut records, n_groups, size);
            label_names.push(options.batch_name.clone());
        }

        if let Some(n) = options.sample {
            if n > records.len() {
                bail!(
                    "Cannot take a sample of {} from {} keys",
                    n,
                    records.len()
                );
            }
            let mut rng = match options.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut picked = index::sample(&mut rng, records.len(), n).into_vec();
            picked.sort_unstable();
            let picked: HashSet<usize> = picked.into_iter().collect();
            records = records
                .into_iter()
                .enumerate()
                .filter(|(i, _)| picked.contains(i))
                .map(|(_, r)| r)
                .collect();
        }

        Ok(Self {
            key: key.to_string(),
            label_names,
            records,
        })
    }

    pub fn from_series(series: &Series, options: &KeyOptions) -> Result<Self> {
        Self::new(&series.clone().into_frame(), &series.name, options)
    }

    pub fn records(&self) -> &[KeyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Group and batch labels followed by the key.
    pub fn to_frame(&self) -> Frame {
        let mut names = self.label_names.clone();
        names.push(self.key.clone());
        let rows = self
            .records
            .iter()
            .map(|r| {
                let mut row = r.labels.clone();
                row.push(r.key.clone());
                row
            })
            .collect();
        Frame::new(names, rows)
    }

    pub fn to_string(&self, sep: &str) -> String {
        if self.label_names.is_empty() {
            return join_keys(self.records.iter(), sep);
        }
        let refs: Vec<&KeyRecord> = self.records.iter().collect();
        let mut out = String::new();
        stringify(&refs, &self.label_names, 0, sep, &mut out);
        out
    }

    pub fn to_stdout(&self, sep: &str) {
        println!("{}", self.to_string(sep));
    }

    /// Write one file per group, named `{ymd}.{group}.{n}.txt`.
    pub fn to_file(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let ymd = Ts::now().ymd;
        let mut written = Vec::new();
        for (labels, records) in self.groups() {
            let name = if labels.is_empty() {
                self.key.clone()
            } else {
                labels
                    .iter()
                    .map(CellValue::display)
                    .collect::<Vec<_>>()
                    .join("_")
            };
            let path = dir.join(format!("{}.{}.{}.txt", ymd, name, records.len()));
            let keys = Frame::new(
                vec![self.key.clone()],
                records.iter().map(|r| vec![r.key.clone()]).collect(),
            );
            std::fs::write(&path, crate::frame::to_csv(&keys))?;
            info!("Wrote {} keys to {}", records.len(), path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// Records per distinct label combination, in label order.
    fn groups(&self) -> Vec<(Vec<CellValue>, Vec<&KeyRecord>)> {
        let mut groups: Vec<(Vec<CellValue>, Vec<&KeyRecord>)> = Vec::new();
        for record in &self.records {
            match groups.last_mut() {
                Some((labels, members)) if same_labels(labels, &record.labels) => {
                    members.push(record)
                }
                _ => groups.push((record.labels.clone(), vec![record])),
            }
        }
        groups
    }
}

fn compare_labels(a: &[CellValue], b: &[CellValue]) -> std::cmp::Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.sort_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}

fn same_labels(a: &[CellValue], b: &[CellValue]) -> bool {
    let indices: Vec<usize> = (0..a.len()).collect();
    a.len() == b.len() && row_key(a, &indices) == row_key(b, &indices)
}

/// Number records from 1 in chunks of `size`, restarting in every group.
fn add_batches(records: &mut [KeyRecord], n_groups: usize, size: usize) {
    let mut position = 0;
    let mut previous: Option<Vec<CellValue>> = None;
    for record in records.iter_mut() {
        let group = record.labels[..n_groups].to_vec();
        if previous.as_ref().is_some_and(|p| !same_labels(p, &group)) {
            position = 0;
        }
        record
            .labels
            .push(CellValue::Int64((position / size + 1) as i64));
        position += 1;
        previous = Some(group);
    }
}

fn join_keys<'a>(records: impl Iterator<Item = &'a KeyRecord>, sep: &str) -> String {
    records
        .map(|r| r.key.display())
        .collect::<Vec<_>>()
        .join(sep)
}

fn stringify(records: &[&KeyRecord], names: &[String], depth: usize, sep: &str, out: &mut String) {
    let mut start = 0;
    while start < records.len() {
        let label = &records[start].labels[depth];
        let end = records[start..]
            .iter()
            .position(|r| r.labels[depth].key() != label.key())
            .map(|offset| start + offset)
            .unwrap_or(records.len());
        let group = &records[start..end];
        out.push_str(&format!(
            "[{}: {}] ({})\n",
            names[depth],
            label.display(),
            group.len()
        ));
        if depth + 1 == names.len() {
            out.push_str(&join_keys(group.iter().copied(), sep));
            out.push_str("\n\n");
        } else {
            stringify(group, names, depth + 1, sep, out);
        }
        start = end;
    }
}
