use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;

/// A single cell of a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<CellValue>),
    Unknown(String),
}

/// Target type for explicit column casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Text,
    Int,
    Float,
    Bool,
    Date,
    DateTime,
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
            CellValue::Array(arr) => {
                let items: Vec<String> = arr.iter().map(|v| v.display()).collect();
                format!("{{{}}}", items.join(", "))
            }
            CellValue::Unknown(s) => s.clone(),
        }
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CellValue::Int16(_)
                | CellValue::Int32(_)
                | CellValue::Int64(_)
                | CellValue::Float32(_)
                | CellValue::Float64(_)
        )
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int16(i) => Some(*i as f64),
            CellValue::Int32(i) => Some(*i as f64),
            CellValue::Int64(i) => Some(*i as f64),
            CellValue::Float32(f) => Some(*f as f64),
            CellValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int16(i) => Some(*i as i64),
            CellValue::Int32(i) => Some(*i as i64),
            CellValue::Int64(i) => Some(*i),
            CellValue::Float32(f) if f.fract() == 0.0 => Some(*f as i64),
            CellValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) | CellValue::Unknown(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Date-like view of the value; text is parsed as an ISO date or datetime.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Date(d) => d.and_hms_opt(0, 0, 0),
            CellValue::DateTime(dt) => Some(*dt),
            CellValue::TimestampTz(dt) => Some(dt.naive_utc()),
            CellValue::Text(s) => parse_datetime(s),
            _ => None,
        }
    }

    fn is_temporal(&self) -> bool {
        matches!(
            self,
            CellValue::Date(_) | CellValue::DateTime(_) | CellValue::TimestampTz(_)
        )
    }

    /// Compare two values the way a filter expression would.
    ///
    /// Numbers compare numerically across widths, temporal values compare with
    /// ISO text, and nulls never compare.
    pub fn compare(&self, other: &CellValue) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        if self.is_temporal() || other.is_temporal() {
            return match (self.as_datetime(), other.as_datetime()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            };
        }
        match (self, other) {
            (CellValue::Bool(a), CellValue::Bool(b)) => Some(a.cmp(b)),
            (CellValue::Time(a), CellValue::Time(b)) => Some(a.cmp(b)),
            _ => match (self.as_str(), other.as_str()) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }

    /// Total order used for sorting: nulls last, then by comparison, then by
    /// display text.
    pub fn sort_cmp(&self, other: &CellValue) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => self
                .compare(other)
                .unwrap_or_else(|| self.display().cmp(&other.display())),
        }
    }

    /// Canonical key for equality-based grouping and deduplication.
    pub fn key(&self) -> String {
        match self {
            CellValue::Null => "\u{0}null".to_string(),
            v if v.is_numeric() => format!("n:{}", v.as_f64().unwrap_or_default()),
            CellValue::Text(s) => format!("s:{}", s),
            other => format!("o:{}", other.display()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Null => serde_json::Value::Null,
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
            CellValue::Int16(i) => serde_json::json!(*i),
            CellValue::Int32(i) => serde_json::json!(*i),
            CellValue::Int64(i) => serde_json::json!(*i),
            CellValue::Float32(f) => serde_json::json!(*f),
            CellValue::Float64(f) => serde_json::json!(*f),
            CellValue::Json(j) => j.clone(),
            CellValue::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(CellValue::to_json).collect())
            }
            other => serde_json::Value::String(other.display()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => CellValue::Null,
            serde_json::Value::Bool(b) => CellValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => CellValue::Int64(i),
                None => n.as_f64().map(CellValue::Float64).unwrap_or(CellValue::Null),
            },
            serde_json::Value::String(s) => CellValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                CellValue::Array(items.iter().map(CellValue::from_json).collect())
            }
            obj @ serde_json::Value::Object(_) => CellValue::Json(obj.clone()),
        }
    }

    /// Convert to `dtype`; values that cannot be converted become null.
    pub fn cast(&self, dtype: DType) -> CellValue {
        if self.is_null() {
            return CellValue::Null;
        }
        let converted = match dtype {
            DType::Text => Some(CellValue::Text(self.display())),
            DType::Int => self
                .as_i64()
                .or_else(|| self.as_str().and_then(|s| s.trim().parse().ok()))
                .map(CellValue::Int64),
            DType::Float => self
                .as_f64()
                .or_else(|| self.as_str().and_then(|s| s.trim().parse().ok()))
                .map(CellValue::Float64),
            DType::Bool => self.as_bool().or_else(|| match self.as_str() {
                Some(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "t" | "y" | "yes" | "1" => Some(true),
                    "false" | "f" | "n" | "no" | "0" => Some(false),
                    _ => None,
                },
                None => self.as_i64().map(|i| i != 0),
            })
            .map(CellValue::Bool),
            DType::Date => self.as_datetime().map(|dt| CellValue::Date(dt.date())),
            DType::DateTime => self.as_datetime().map(CellValue::DateTime),
        };
        converted.unwrap_or(CellValue::Null)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int64(i)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Float64(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

/// Parse ISO dates (`2023-12-27`) and datetimes (`2023-12-27 10:00:00`,
/// `2023-12-27T10:00:00`).
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_display() {
        assert_eq!(CellValue::Null.display(), "NULL");
    }

    #[test]
    fn test_array_display() {
        let arr = CellValue::Array(vec![
            CellValue::Int32(1),
            CellValue::Int32(2),
            CellValue::Int32(3),
        ]);
        assert_eq!(arr.display(), "{1, 2, 3}");
    }

    #[test]
    fn test_display_width() {
        assert_eq!(CellValue::Null.display_width(), 4);
        assert_eq!(CellValue::Text("hello".into()).display_width(), 5);
        assert_eq!(CellValue::Int32(100).display_width(), 3);
    }

    #[test]
    fn test_compare_across_int_widths() {
        assert_eq!(
            CellValue::Int16(3).compare(&CellValue::Float64(3.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            CellValue::Int64(2).compare(&CellValue::Int32(5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_compare_date_with_text() {
        let date = CellValue::Date(NaiveDate::from_ymd_opt(2023, 12, 27).unwrap());
        assert_eq!(
            date.compare(&CellValue::Text("2023-01-01".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(date.compare(&CellValue::Text("not a date".into())), None);
    }

    #[test]
    fn test_compare_null_is_none() {
        assert_eq!(CellValue::Null.compare(&CellValue::Int32(1)), None);
        assert_eq!(CellValue::Text("a".into()).compare(&CellValue::Null), None);
    }

    #[test]
    fn test_sort_cmp_puts_nulls_last() {
        let mut values = vec![CellValue::Null, CellValue::Int32(2), CellValue::Int32(1)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![CellValue::Int32(1), CellValue::Int32(2), CellValue::Null]
        );
    }

    #[test]
    fn test_key_unifies_numbers() {
        assert_eq!(CellValue::Int32(1).key(), CellValue::Float64(1.0).key());
        assert_ne!(CellValue::Int32(1).key(), CellValue::Text("1".into()).key());
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": 1});
        assert_eq!(CellValue::from_json(&json), CellValue::Json(json.clone()));
        assert_eq!(CellValue::from_json(&serde_json::json!(3)), CellValue::Int64(3));
        assert_eq!(
            CellValue::from_json(&serde_json::json!(1.5)),
            CellValue::Float64(1.5)
        );
        assert!(CellValue::Null.to_json().is_null());
        assert_eq!(CellValue::Int32(42).to_json(), serde_json::json!(42));
    }

    #[test]
    fn test_cast() {
        assert_eq!(
            CellValue::Text(" 12 ".into()).cast(DType::Int),
            CellValue::Int64(12)
        );
        assert_eq!(CellValue::Text("x".into()).cast(DType::Int), CellValue::Null);
        assert_eq!(
            CellValue::Text("2024-02-29".into()).cast(DType::Date),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(CellValue::Text("Y".into()).cast(DType::Bool), CellValue::Bool(true));
        assert_eq!(CellValue::Int32(7).cast(DType::Text), CellValue::Text("7".into()));
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2023-12-27").is_some());
        assert!(parse_datetime("2023-12-27 10:11:12").is_some());
        assert!(parse_datetime("2023-12-27T10:11:12.5").is_some());
        assert!(parse_datetime("27-12-2023").is_none());
    }
}
