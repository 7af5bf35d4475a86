//! Aggregation specifications for the `base/aggregate.sql` template.
//!
//! A spec describes one aggregate column: a function applied either to a
//! column or to a `CASE WHEN .. THEN .. END` expression. Specs are built with
//! the legacy constructors ([`count_spec`], [`sum_spec`], ...) or with the
//! immutable [`AggregationBuilder`]:
//!
//! ```
//! use quarry::aggspec;
//!
//! let spec = aggspec::count()
//!     .case("status = 'active'")
//!     .name("active_users")
//!     .build()
//!     .unwrap();
//! assert_eq!(
//!     spec.to_sql(),
//!     "COUNT(CASE WHEN status = 'active' THEN 1 END) AS active_users"
//! );
//! ```
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggFunc {
    Sum,
    #[default]
    Count,
    Avg,
    Max,
    Min,
    Listagg,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Sum => "SUM",
            AggFunc::Count => "COUNT",
            AggFunc::Avg => "AVG",
            AggFunc::Max => "MAX",
            AggFunc::Min => "MIN",
            AggFunc::Listagg => "LISTAGG",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Must specify either column or case")]
    MissingColumnOrCase,

    #[error("Cannot specify both column and case")]
    ColumnAndCase,

    #[error("Name must be specified when using case condition")]
    CaseWithoutName,

    #[error("THEN clause specified without CASE condition")]
    ThenWithoutCase,

    #[error("Must specify either column or condition")]
    MissingColumnOrCondition,

    #[error("Cannot specify both column and condition")]
    ColumnAndCondition,
}

/// One aggregate column, in the shape the aggregate template expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggSpec {
    pub aggfunc: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub distinct: bool,
}

impl AggSpec {
    /// Render as a select-list item, e.g. `SUM(DISTINCT amount) AS total`.
    pub fn to_sql(&self) -> String {
        let body = match (&self.case, &self.column) {
            (Some(case), _) => format!("CASE {} END", case),
            (None, Some(column)) => column.clone(),
            (None, None) => "*".to_string(),
        };
        let distinct = if self.distinct { "DISTINCT " } else { "" };
        let call = match self.aggfunc {
            AggFunc::Listagg => format!("STRING_AGG({}{}::text, ', ')", distinct, body),
            func => format!("{}({}{})", func.as_str(), distinct, body),
        };
        match self.name.as_deref().or(self.column.as_deref()) {
            Some(alias) => format!("{} AS {}", call, alias),
            None => call,
        }
    }
}

/// Build a spec from either a column or a condition. `then` defaults to `1`.
pub fn create_spec(
    name: &str,
    column: Option<&str>,
    condition: Option<&str>,
    then: Option<&str>,
    distinct: bool,
    aggfunc: AggFunc,
) -> Result<AggSpec, ValidationError> {
    match (column, condition) {
        (Some(_), Some(_)) => Err(ValidationError::ColumnAndCondition),
        (None, None) => Err(ValidationError::MissingColumnOrCondition),
        _ => Ok(AggSpec {
            aggfunc,
            column: column.map(str::to_string),
            case: condition.map(|c| format!("WHEN {} THEN {}", c, then.unwrap_or("1"))),
            name: Some(name.to_string()),
            distinct,
        }),
    }
}

pub fn count_spec(
    name: &str,
    column: Option<&str>,
    condition: Option<&str>,
    then: Option<&str>,
    distinct: bool,
) -> Result<AggSpec, ValidationError> {
    create_spec(name, column, condition, then, distinct, AggFunc::Count)
}

pub fn sum_spec(
    name: &str,
    column: Option<&str>,
    condition: Option<&str>,
    then: Option<&str>,
    distinct: bool,
) -> Result<AggSpec, ValidationError> {
    create_spec(name, column, condition, then, distinct, AggFunc::Sum)
}

pub fn avg_spec(
    name: &str,
    column: Option<&str>,
    condition: Option<&str>,
    then: Option<&str>,
    distinct: bool,
) -> Result<AggSpec, ValidationError> {
    create_spec(name, column, condition, then, distinct, AggFunc::Avg)
}

/// `(a) AND (b)`
pub fn combine_conditions<S: AsRef<str>>(conditions: &[S], operator: &str) -> String {
    conditions
        .iter()
        .map(|c| format!("({})", c.as_ref()))
        .collect::<Vec<_>>()
        .join(&format!(" {} ", operator))
}

/// Immutable builder; every setter returns a new builder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregationBuilder {
    aggfunc: AggFunc,
    name: Option<String>,
    column: Option<String>,
    conditions: Vec<String>,
    operator: Option<String>,
    then: Option<String>,
    distinct: bool,
}

impl AggregationBuilder {
    pub fn new(aggfunc: AggFunc) -> Self {
        Self {
            aggfunc,
            ..Default::default()
        }
    }

    pub fn name(&self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self.clone()
        }
    }

    pub fn column(&self, column: &str) -> Self {
        Self {
            column: Some(column.to_string()),
            ..self.clone()
        }
    }

    pub fn case(&self, condition: &str) -> Self {
        self.case_all(&[condition])
    }

    /// Several conditions joined with AND.
    pub fn case_all<S: AsRef<str>>(&self, conditions: &[S]) -> Self {
        Self {
            conditions: conditions.iter().map(|c| c.as_ref().to_string()).collect(),
            operator: None,
            ..self.clone()
        }
    }

    pub fn case_with_operator<S: AsRef<str>>(&self, conditions: &[S], operator: &str) -> Self {
        Self {
            operator: Some(operator.to_string()),
            ..self.case_all(conditions)
        }
    }

    pub fn then(&self, then: &str) -> Self {
        Self {
            then: Some(then.to_string()),
            ..self.clone()
        }
    }

    pub fn distinct(&self, distinct: bool) -> Self {
        Self {
            distinct,
            ..self.clone()
        }
    }

    pub fn aggfunc(&self) -> AggFunc {
        self.aggfunc
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn get_column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn get_then(&self) -> Option<&str> {
        self.then.as_deref()
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// The rendered `WHEN .. THEN ..` clause, if any condition is set.
    pub fn get_case(&self) -> Option<String> {
        let condition = match self.conditions.as_slice() {
            [] => return None,
            [single] => single.clone(),
            many => combine_conditions(many, self.operator.as_deref().unwrap_or("AND")),
        };
        Some(format!(
            "WHEN {} THEN {}",
            condition,
            self.then.as_deref().unwrap_or("1")
        ))
    }

    pub fn build(&self) -> Result<AggSpec, ValidationError> {
        let case = self.get_case();
        if self.then.is_some() && case.is_none() {
            return Err(ValidationError::ThenWithoutCase);
        }
        match (&self.column, &case) {
            (None, None) => return Err(ValidationError::MissingColumnOrCase),
            (Some(_), Some(_)) => return Err(ValidationError::ColumnAndCase),
            _ => {}
        }
        if case.is_some() && self.name.is_none() {
            return Err(ValidationError::CaseWithoutName);
        }
        Ok(AggSpec {
            aggfunc: self.aggfunc,
            column: self.column.clone(),
            case,
            name: self.name.clone(),
            distinct: self.distinct,
        })
    }
}

pub fn count() -> AggregationBuilder {
    AggregationBuilder::new(AggFunc::Count)
}

pub fn sum() -> AggregationBuilder {
    AggregationBuilder::new(AggFunc::Sum)
}

pub fn avg() -> AggregationBuilder {
    AggregationBuilder::new(AggFunc::Avg)
}

pub fn max() -> AggregationBuilder {
    AggregationBuilder::new(AggFunc::Max)
}

pub fn min() -> AggregationBuilder {
    AggregationBuilder::new(AggFunc::Min)
}

pub fn listagg() -> AggregationBuilder {
    AggregationBuilder::new(AggFunc::Listagg)
}

/// A template parameter that may still hold unbuilt aggregation builders.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecValue {
    Builder(AggregationBuilder),
    Value(serde_json::Value),
}

impl From<AggregationBuilder> for SpecValue {
    fn from(builder: AggregationBuilder) -> Self {
        SpecValue::Builder(builder)
    }
}

impl From<serde_json::Value> for SpecValue {
    fn from(value: serde_json::Value) -> Self {
        SpecValue::Value(value)
    }
}

impl From<AggSpec> for SpecValue {
    fn from(spec: AggSpec) -> Self {
        SpecValue::Value(serde_json::to_value(spec).unwrap_or_default())
    }
}

/// Build a single value: builders become specs, anything else passes through.
pub fn build_value_spec(value: &SpecValue) -> Result<serde_json::Value, ValidationError> {
    match value {
        SpecValue::Builder(builder) => {
            Ok(serde_json::to_value(builder.build()?).unwrap_or_default())
        }
        SpecValue::Value(v) => Ok(v.clone()),
    }
}

/// Build a list of mixed values into a JSON array.
pub fn build_value_specs(values: &[SpecValue]) -> Result<serde_json::Value, ValidationError> {
    values
        .iter()
        .map(build_value_spec)
        .collect::<Result<Vec<_>, _>>()
        .map(serde_json::Value::Array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_column_aggregation() {
        let spec = count().column("user_id").name("total_users").build().unwrap();
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "aggfunc": "COUNT",
                "column": "user_id",
                "name": "total_users",
                "distinct": false
            })
        );
    }

    #[test]
    fn test_case_condition() {
        let spec = count()
            .case("status = 'active'")
            .name("active_users")
            .build()
            .unwrap();
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "aggfunc": "COUNT",
                "case": "WHEN status = 'active' THEN 1",
                "name": "active_users",
                "distinct": false
            })
        );
    }

    #[test]
    fn test_multiple_conditions() {
        let and = count()
            .case_all(&["status = 'active'", "type = 'premium'"])
            .name("premium_active")
            .build()
            .unwrap();
        assert_eq!(
            and.case.as_deref(),
            Some("WHEN (status = 'active') AND (type = 'premium') THEN 1")
        );

        let or = count()
            .case_with_operator(&["type = 'trial'", "type = 'premium'"], "OR")
            .name("paid_users")
            .build()
            .unwrap();
        assert_eq!(
            or.case.as_deref(),
            Some("WHEN (type = 'trial') OR (type = 'premium') THEN 1")
        );
    }

    #[test]
    fn test_custom_then_clause() {
        let spec = sum()
            .case("is_valid = 1")
            .then("amount * weight")
            .name("weighted_sum")
            .build()
            .unwrap();
        assert_eq!(spec.aggfunc, AggFunc::Sum);
        assert_eq!(spec.case.as_deref(), Some("WHEN is_valid = 1 THEN amount * weight"));
    }

    #[test]
    fn test_getters() {
        let agg = count()
            .name("test_name")
            .column("test_col")
            .distinct(true)
            .case("test_case")
            .then("test_then");
        assert_eq!(agg.get_name(), Some("test_name"));
        assert_eq!(agg.get_column(), Some("test_col"));
        assert!(agg.is_distinct());
        assert_eq!(agg.get_case().as_deref(), Some("WHEN test_case THEN test_then"));
        assert_eq!(agg.get_then(), Some("test_then"));
    }

    #[test]
    fn test_immutability() {
        let original = count().name("original");
        let modified = original.name("modified");
        assert_eq!(original.get_name(), Some("original"));
        assert_eq!(modified.get_name(), Some("modified"));
    }

    #[test]
    fn test_preconfigured_builders() {
        for builder in [count(), sum(), avg(), max(), min(), listagg()] {
            let spec = builder.column("test").name("test_name").build().unwrap();
            assert_eq!(spec.aggfunc, builder.aggfunc());
        }
    }

    #[test]
    fn test_validation_messages() {
        let err = count().name("test").build().unwrap_err();
        assert_eq!(err.to_string(), "Must specify either column or case");

        let err = count().column("col").case("condition").name("test").build().unwrap_err();
        assert_eq!(err.to_string(), "Cannot specify both column and case");

        let err = count().case("condition").build().unwrap_err();
        assert_eq!(err.to_string(), "Name must be specified when using case condition");

        let err = count().then("value").name("test").build().unwrap_err();
        assert_eq!(err.to_string(), "THEN clause specified without CASE condition");
    }

    #[test]
    fn test_legacy_constructors() {
        let spec = count_spec("total_users", Some("user_id"), None, None, false).unwrap();
        assert_eq!(spec.column.as_deref(), Some("user_id"));
        assert!(spec.case.is_none());

        let spec = avg_spec("weighted", None, Some("is_valid = 1"), Some("score"), false).unwrap();
        assert_eq!(spec.case.as_deref(), Some("WHEN is_valid = 1 THEN score"));

        let spec = sum_spec("n", None, Some("x > 0"), None, true).unwrap();
        assert_eq!(spec.case.as_deref(), Some("WHEN x > 0 THEN 1"));
        assert!(spec.distinct);

        assert_eq!(
            count_spec("x", Some("a"), Some("b"), None, false).unwrap_err(),
            ValidationError::ColumnAndCondition
        );
        assert_eq!(
            count_spec("x", None, None, None, false).unwrap_err(),
            ValidationError::MissingColumnOrCondition
        );
    }

    #[test]
    fn test_combine_conditions() {
        assert_eq!(
            combine_conditions(&["status = 'active'", "type = 'premium'"], "AND"),
            "(status = 'active') AND (type = 'premium')"
        );
    }

    #[test]
    fn test_to_sql() {
        let spec = count().column("category").distinct(true).name("n").build().unwrap();
        assert_eq!(spec.to_sql(), "COUNT(DISTINCT category) AS n");

        let spec = max().column("amount").build().unwrap();
        assert_eq!(spec.to_sql(), "MAX(amount) AS amount");

        let spec = listagg().column("code").name("codes").build().unwrap();
        assert_eq!(spec.to_sql(), "STRING_AGG(code::text, ', ') AS codes");
    }

    #[test]
    fn test_build_value_specs() {
        let built = build_value_spec(&count().column("test").name("test_name").into()).unwrap();
        assert_eq!(built["name"], "test_name");

        let values = vec![
            SpecValue::from(count().column("test").name("test_name")),
            SpecValue::from(json!({"existing": "dict"})),
            SpecValue::from(json!("plain string")),
        ];
        let built = build_value_specs(&values).unwrap();
        assert_eq!(built[0]["aggfunc"], "COUNT");
        assert_eq!(built[1], json!({"existing": "dict"}));
        assert_eq!(built[2], json!("plain string"));

        let passthrough = build_value_spec(&json!({"test": "value"}).into()).unwrap();
        assert_eq!(passthrough, json!({"test": "value"}));

        let invalid = vec![SpecValue::from(count().name("x"))];
        assert!(build_value_specs(&invalid).is_err());
    }
}
