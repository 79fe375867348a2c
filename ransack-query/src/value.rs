//! Search values, their blankness rules and casting to column types.
//!
//! Values arrive as [`serde_json::Value`] trees, since that is how a
//! decoded parameter map is most often held. They are converted into
//! [`Value`], which knows the handful of shapes a search cares about,
//! and then cast against the [`AttributeType`] of the column they are
//! compared with, so that `"3"` compares as an integer against an
//! integer column and `"t"` as a boolean against a boolean one.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::SearchError;

/// The type of a column, as reported by the metadata provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AttributeType {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
}

/// A single search value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
}

const TRUE_VALUES: &[&str] = &["1", "t", "true", "y", "yes", "on"];
const FALSE_VALUES: &[&str] = &["0", "f", "false", "n", "no", "off"];

/// Decide whether a string reads as a boolean.
pub fn parse_boolean(s: &str) -> Option<bool> {
    let lower = s.trim().to_ascii_lowercase();
    if TRUE_VALUES.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_VALUES.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

impl Value {
    /// Convert a JSON value. Objects whose keys are all integers are
    /// read as arrays in key order; any other object has no
    /// representation as a value and yields `None`.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        Some(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64()?)
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut indexed = map
                    .iter()
                    .map(|(k, v)| k.parse::<u64>().ok().map(|i| (i, v)))
                    .collect::<Option<Vec<_>>>()?;
                indexed.sort_by_key(|(i, _)| *i);
                Value::Array(
                    indexed
                        .into_iter()
                        .map(|(_, v)| Value::from_json(v))
                        .collect::<Option<Vec<_>>>()?,
                )
            }
        })
    }

    /// Whether this value counts as "not supplied". `false` is never
    /// blank; `nil`, empty strings and arrays with no non-blank
    /// elements are.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.iter().all(Value::is_blank),
            _ => false,
        }
    }

    /// Trim the whitespace from every string in this value.
    pub fn stripped(self) -> Self {
        match self {
            Value::String(s) => Value::String(s.trim().to_string()),
            Value::Array(items) => Value::Array(items.into_iter().map(Value::stripped).collect()),
            other => other,
        }
    }

    /// Drop blank elements from an array value.
    pub fn without_blank_elements(self) -> Self {
        match self {
            Value::Array(items) => {
                Value::Array(items.into_iter().filter(|v| !v.is_blank()).collect())
            }
            other => other,
        }
    }

    /// The elements of an array value, or the value itself as a
    /// single element.
    pub fn to_list(&self) -> Vec<Value> {
        match self {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    /// A textual rendering suitable for pattern matching. Non-string
    /// scalars are converted rather than rejected.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Array(items) => items
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Interpret this value as a boolean flag, the way scope toggles
    /// and the `true`/`present` family of predicates do.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::String(s) => parse_boolean(s),
            _ => None,
        }
    }

    /// Cast to the given column type. `attribute` is only used to
    /// describe a failure.
    pub fn cast(&self, ty: AttributeType, attribute: &str) -> Result<Value, SearchError> {
        let invalid = || SearchError::InvalidValue {
            attribute: attribute.to_string(),
            value: self.to_string(),
        };
        match (self, ty) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Array(items), _) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| v.cast(ty, attribute))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            (_, AttributeType::String | AttributeType::Text) => Ok(match self {
                Value::String(_) => self.clone(),
                other => Value::String(other.to_text()),
            }),
            (Value::Integer(_), AttributeType::Integer) => Ok(self.clone()),
            (Value::Float(f), AttributeType::Integer) if f.fract() == 0.0 => {
                Ok(Value::Integer(*f as i64))
            }
            (Value::Bool(b), AttributeType::Integer) => Ok(Value::Integer(i64::from(*b))),
            (Value::String(s), AttributeType::Integer) => {
                s.trim().parse().map(Value::Integer).map_err(|_| invalid())
            }
            (Value::Float(f), AttributeType::Float) if f.is_finite() => Ok(self.clone()),
            (Value::Integer(i), AttributeType::Float) => Ok(Value::Float(*i as f64)),
            (Value::String(s), AttributeType::Float) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(invalid),
            (_, AttributeType::Boolean) => self.as_flag().map(Value::Bool).ok_or_else(invalid),
            (Value::Date(_), AttributeType::Date) => Ok(self.clone()),
            (Value::DateTime(dt), AttributeType::Date) => Ok(Value::Date(dt.date_naive())),
            (Value::String(s), AttributeType::Date) => parse_date(s)
                .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
                .map(Value::Date)
                .ok_or_else(invalid),
            (Value::DateTime(_), AttributeType::DateTime) => Ok(self.clone()),
            (Value::Date(d), AttributeType::DateTime) => {
                midnight(*d).map(Value::DateTime).ok_or_else(invalid)
            }
            (Value::String(s), AttributeType::DateTime) => parse_datetime(s)
                .or_else(|| parse_date(s).and_then(midnight))
                .map(Value::DateTime)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Render as an SQL literal.
    pub fn to_sql(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => quote(s),
            Value::Date(_) | Value::DateTime(_) => quote(&self.to_text()),
            Value::Array(items) => format!(
                "({})",
                items
                    .iter()
                    .map(Value::to_sql)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Quote a string as an SQL literal, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn midnight(d: NaiveDate) -> Option<DateTime<Utc>> {
    d.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blankness() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("").is_blank());
        assert!(Value::from("  ").is_blank());
        assert!(Value::Array(vec![]).is_blank());
        assert!(Value::Array(vec![Value::from(""), Value::Null]).is_blank());
        assert!(!Value::Bool(false).is_blank());
        assert!(!Value::Integer(0).is_blank());
        assert!(!Value::Array(vec![Value::from(""), Value::from("a")]).is_blank());
    }

    #[test]
    fn indexed_objects_become_arrays() {
        let json = serde_json::json!({"1": "b", "0": "a", "10": "c"});
        assert_eq!(
            Value::from_json(&json),
            Some(Value::Array(vec!["a".into(), "b".into(), "c".into()]))
        );
        assert_eq!(Value::from_json(&serde_json::json!({"x": 1})), None);
    }

    #[test]
    fn casting() {
        assert_eq!(
            Value::from(" 42 ").cast(AttributeType::Integer, "age").unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            Value::Integer(42).cast(AttributeType::String, "name").unwrap(),
            Value::from("42")
        );
        assert_eq!(
            Value::from("yes").cast(AttributeType::Boolean, "awesome").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from("2024-02-29").cast(AttributeType::Date, "born_on").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            Value::from("2024-02-29")
                .cast(AttributeType::DateTime, "created_at")
                .unwrap()
                .to_sql(),
            "'2024-02-29 00:00:00'"
        );
        assert!(matches!(
            Value::from("abc").cast(AttributeType::Integer, "age"),
            Err(SearchError::InvalidValue { .. })
        ));
    }

    #[test]
    fn floats_must_be_finite() {
        assert_eq!(
            Value::from(" 2.5").cast(AttributeType::Float, "score").unwrap(),
            Value::Float(2.5)
        );
        for text in ["NaN", "inf", "-infinity"] {
            assert!(matches!(
                Value::from(text).cast(AttributeType::Float, "score"),
                Err(SearchError::InvalidValue { attribute, .. }) if attribute == "score"
            ));
        }
        assert!(Value::Float(f64::NAN).cast(AttributeType::Float, "score").is_err());
    }

    #[test]
    fn literals() {
        assert_eq!(Value::from("O'Brien").to_sql(), "'O''Brien'");
        assert_eq!(
            Value::Array(vec![Value::Integer(1), Value::Integer(2)]).to_sql(),
            "(1, 2)"
        );
        assert_eq!(Value::Bool(false).to_sql(), "FALSE");
    }
}
