use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio_postgres::Client;
use tracing::{info, warn};

use super::{create_client, execute_query, Credentials, ReadOptions};
use crate::config::{Config, PathTable, SanityDefaults};
use crate::frame::{quote_literal, CellValue, Frame, Squeezed};
use crate::template::{Params, QuerySource, SqlEngine};

pub const DEFAULT_PEEK_ROWS: usize = 7;
pub const DEFAULT_THRESHOLD_HOURS: i64 = 1;

/// How a search pattern is matched against catalog names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Match {
    #[default]
    Like,
    Regex,
    Exact,
}

impl Match {
    pub fn condition(&self, field: &str, arg: &str) -> String {
        match self {
            Match::Like => format!("{} ILIKE {}", field, quote_literal(&format!("%{}%", arg))),
            Match::Regex => format!("{} ~* {}", field, quote_literal(arg)),
            Match::Exact => format!("{} = {}", field, quote_literal(arg)),
        }
    }
}

/// Criteria for [`Source::find_column`].
#[derive(Debug, Clone, Default)]
pub struct ColumnSearch {
    pub patterns: Vec<String>,
    pub table: Option<String>,
    pub data_type: Option<String>,
    pub where_: Vec<String>,
    pub how: Match,
    pub how_table: Match,
    pub how_data_type: Match,
}

impl ColumnSearch {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            how_table: Match::Exact,
            ..Default::default()
        }
    }

    pub fn conditions(&self) -> Vec<String> {
        let mut conditions = self.where_.clone();
        conditions.extend(
            self.patterns
                .iter()
                .map(|p| self.how.condition("column_name", p)),
        );
        if let Some(table) = &self.table {
            conditions.push(self.how_table.condition("table_name", table));
        }
        if let Some(data_type) = &self.data_type {
            conditions.push(self.how_data_type.condition("data_type", data_type));
        }
        conditions
    }
}

pub fn table_conditions<S: AsRef<str>>(patterns: &[S], where_: Vec<String>, how: Match) -> Vec<String> {
    let mut conditions = where_;
    conditions.extend(
        patterns
            .iter()
            .map(|p| how.condition("table_name", p.as_ref())),
    );
    conditions
}

/// Move quick-filter parameters into `where` as `col IN (...)` conditions.
///
/// A parameter named after a quick-filter column holds one value or a list of
/// values. Existing `where` conditions are kept and come first.
pub fn apply_quick_filters(params: &mut Params, columns: &[String]) {
    let mut extra = Vec::new();
    for column in columns {
        let Some(value) = params.remove(column) else {
            continue;
        };
        let values = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        let literals: Vec<String> = values.iter().map(json_literal).collect();
        extra.push(format!("{} IN ({})", column, literals.join(", ")));
    }
    if extra.is_empty() {
        return;
    }
    let mut conditions = match params.remove("where") {
        Some(serde_json::Value::Array(items)) => items,
        Some(serde_json::Value::Null) | None => vec![],
        Some(other) => vec![other],
    };
    conditions.extend(extra.into_iter().map(serde_json::Value::String));
    params.insert("where".into(), serde_json::Value::Array(conditions));
}

fn json_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => quote_literal(s),
        serde_json::Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Result of the staleness check.
#[derive(Debug, Clone, Serialize)]
pub struct SanityReport {
    pub table: String,
    pub max_mutation_date: CellValue,
    pub hours_since_mutation: Option<f64>,
    pub threshold_in_hours: i64,
    pub below_threshold: bool,
}

impl SanityReport {
    fn from_frame(table: &str, threshold_in_hours: i64, frame: &Frame) -> Result<Self> {
        let row = frame
            .row_map(0)
            .context("Sanity query returned no rows")?;
        let get = |name: &str| row.get(name).cloned().unwrap_or(CellValue::Null);
        Ok(Self {
            table: table.to_string(),
            max_mutation_date: get("max_mutation_date"),
            hours_since_mutation: get("hours_since_mutation").as_f64(),
            threshold_in_hours,
            below_threshold: get("below_threshold").as_str() == Some("Y"),
        })
    }

    pub fn to_frame(&self) -> Frame {
        Frame::new(
            vec![
                "max_mutation_date".into(),
                "hours_since_mutation".into(),
                "threshold_in_hours".into(),
                "below_threshold".into(),
            ],
            vec![vec![
                self.max_mutation_date.clone(),
                self.hours_since_mutation
                    .map(CellValue::Float64)
                    .unwrap_or(CellValue::Null),
                CellValue::Int64(self.threshold_in_hours),
                CellValue::Text(if self.below_threshold { "Y" } else { "N" }.into()),
            ]],
        )
    }
}

/// Merge per-call overrides over the configured defaults.
pub fn sanity_settings(
    configured: &SanityDefaults,
    overrides: &SanityDefaults,
) -> Result<(String, String, i64)> {
    let column = overrides
        .mutation_date_column
        .clone()
        .or_else(|| configured.mutation_date_column.clone());
    let table = overrides.table.clone().or_else(|| configured.table.clone());
    let threshold = overrides
        .threshold_in_hours
        .or(configured.threshold_in_hours)
        .unwrap_or(DEFAULT_THRESHOLD_HOURS);
    match (column, table) {
        (Some(column), Some(table)) => Ok((column, table, threshold)),
        (None, _) => bail!("Sanity check needs a mutation_date_column"),
        (_, None) => bail!("Sanity check needs a table"),
    }
}

/// A named database from the configuration.
pub struct Source {
    pub name: String,
    client: Client,
    engine: SqlEngine,
    quick_filters: Vec<String>,
    sanity: SanityDefaults,
}

impl Source {
    pub fn new(name: &str, client: Client, engine: SqlEngine) -> Self {
        Self {
            name: name.to_string(),
            client,
            engine,
            quick_filters: vec![],
            sanity: SanityDefaults::default(),
        }
    }

    /// Connect using the credential file configured under `[credentials]`.
    pub async fn connect(config: &Config, name: &str) -> Result<Self> {
        let path = config
            .paths_from_config(name, PathTable::Credentials, true)?
            .into_single()?;
        let mut connection = Credentials::load(&path)?;
        connection.resolve_password()?;
        let client = create_client(&connection).await?;
        info!("Connected to {} ({})", name, connection.display_string());
        Ok(Self {
            name: name.to_string(),
            client,
            engine: SqlEngine::from_config(config)?,
            quick_filters: config.quick_filters.get(name).cloned().unwrap_or_default(),
            sanity: config.sanity.get(name).cloned().unwrap_or_default(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn engine(&self) -> &SqlEngine {
        &self.engine
    }

    pub async fn execute(
        &self,
        query: impl Into<QuerySource>,
        params: Params,
        options: &ReadOptions,
    ) -> Result<Squeezed> {
        let mut params = params;
        apply_quick_filters(&mut params, &self.quick_filters);
        execute_query(&self.client, &self.engine, query, &params, options).await
    }

    async fn execute_frame(&self, query: &str, params: Params) -> Result<Frame> {
        Ok(self
            .execute(query, params, &ReadOptions::unsqueezed())
            .await?
            .into_frame())
    }

    pub async fn find_table<S: AsRef<str>>(
        &self,
        patterns: &[S],
        where_: Vec<String>,
        how: Match,
    ) -> Result<Frame> {
        let conditions = table_conditions(patterns, where_, how);
        self.execute_frame("reference/all_tables", crate::params! { "where" => conditions })
            .await
    }

    pub async fn find_column(&self, search: &ColumnSearch) -> Result<Frame> {
        self.execute_frame(
            "reference/all_columns",
            crate::params! { "where" => search.conditions() },
        )
        .await
    }

    pub async fn get_table(&self, table: &str) -> Result<Frame> {
        self.execute_frame("reference/table", crate::params! { "table" => table })
            .await
    }

    pub async fn peek(&self, table: &str, n: usize) -> Result<Frame> {
        self.execute_frame(
            "reference/table",
            crate::params! { "table" => table, "n" => n },
        )
        .await
    }

    /// Check how long ago `table` was last mutated. Stale data is logged as a
    /// warning, not returned as an error.
    pub async fn sanity(&self, overrides: &SanityDefaults) -> Result<SanityReport> {
        let (column, table, threshold) = sanity_settings(&self.sanity, overrides)?;
        let frame = self
            .execute_frame(
                "sanity/last_mutation",
                crate::params! {
                    "mutation_date_column" => column,
                    "table" => table,
                    "threshold_in_hours" => threshold,
                },
            )
            .await?;
        let report = SanityReport::from_frame(&table, threshold, &frame)?;
        if !report.below_threshold {
            warn!(
                "Stale data in {}: time since last mutation in table '{}' exceeds threshold of {} hours. Last mutation was at {}.",
                self.name,
                table,
                threshold,
                report.max_mutation_date.display()
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_conditions() {
        assert_eq!(
            Match::Like.condition("table_name", "stud"),
            "table_name ILIKE '%stud%'"
        );
        assert_eq!(
            Match::Regex.condition("table_name", "^stu"),
            "table_name ~* '^stu'"
        );
        assert_eq!(
            Match::Exact.condition("table_name", "o'neil"),
            "table_name = 'o''neil'"
        );
    }

    #[test]
    fn test_table_conditions_keep_where_first() {
        let conditions = table_conditions(&["a", "b"], vec!["x = 1".into()], Match::Like);
        assert_eq!(
            conditions,
            vec![
                "x = 1".to_string(),
                "table_name ILIKE '%a%'".to_string(),
                "table_name ILIKE '%b%'".to_string(),
            ]
        );
    }

    #[test]
    fn test_column_search_conditions() {
        let search = ColumnSearch {
            table: Some("students".into()),
            data_type: Some("date".into()),
            ..ColumnSearch::new(&["birth"])
        };
        assert_eq!(
            search.conditions(),
            vec![
                "column_name ILIKE '%birth%'".to_string(),
                "table_name = 'students'".to_string(),
                "data_type ILIKE '%date%'".to_string(),
            ]
        );
    }

    #[test]
    fn test_quick_filters_move_into_where() {
        let mut params = crate::params! {
            "student_id" => [1, 2],
            "course" => "math",
            "where" => "year > 2020",
            "other" => true,
        };
        apply_quick_filters(&mut params, &["student_id".into(), "course".into()]);
        assert_eq!(
            params["where"],
            json!(["year > 2020", "student_id IN (1, 2)", "course IN ('math')"])
        );
        assert!(!params.contains_key("student_id"));
        assert_eq!(params["other"], json!(true));
    }

    #[test]
    fn test_quick_filters_untouched_without_values() {
        let mut params = crate::params! { "where" => "a = 1" };
        apply_quick_filters(&mut params, &["student_id".into()]);
        assert_eq!(params["where"], json!("a = 1"));
    }

    #[test]
    fn test_sanity_settings_precedence() {
        let configured = SanityDefaults {
            mutation_date_column: Some("updated_at".into()),
            table: Some("enrolments".into()),
            threshold_in_hours: Some(4),
        };
        let overrides = SanityDefaults {
            table: Some("results".into()),
            ..Default::default()
        };
        let (column, table, threshold) = sanity_settings(&configured, &overrides).unwrap();
        assert_eq!(column, "updated_at");
        assert_eq!(table, "results");
        assert_eq!(threshold, 4);

        let bare = SanityDefaults {
            mutation_date_column: Some("m".into()),
            table: Some("t".into()),
            threshold_in_hours: None,
        };
        let (_, _, threshold) = sanity_settings(&SanityDefaults::default(), &bare).unwrap();
        assert_eq!(threshold, DEFAULT_THRESHOLD_HOURS);

        assert!(sanity_settings(&SanityDefaults::default(), &SanityDefaults::default()).is_err());
    }

    #[test]
    fn test_sanity_report_from_frame() {
        let frame = Frame::new(
            vec![
                "max_mutation_date".into(),
                "hours_since_mutation".into(),
                "threshold_in_hours".into(),
                "below_threshold".into(),
            ],
            vec![vec![
                CellValue::Text("2024-01-01 10:00:00".into()),
                CellValue::Float64(5.5),
                CellValue::Int32(4),
                CellValue::Text("N".into()),
            ]],
        );
        let report = SanityReport::from_frame("enrolments", 4, &frame).unwrap();
        assert!(!report.below_threshold);
        assert_eq!(report.hours_since_mutation, Some(5.5));
        assert_eq!(report.to_frame().rows[0][3], CellValue::Text("N".into()));
        assert!(SanityReport::from_frame("t", 1, &Frame::empty()).is_err());
    }
}
