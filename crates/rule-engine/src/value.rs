use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value taking part in condition evaluation, either resolved from a
/// [`RuleContext`](crate::RuleContext) field or declared as a condition operand.
///
/// JSON `null` and missing paths both become [`FieldValue::Absent`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
    #[default]
    Absent,
}

impl FieldValue {
    /// Convert a JSON value into a `FieldValue`, recursively.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Absent,
            serde_json::Value::Bool(b) => FieldValue::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or_default(),
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.iter().map(FieldValue::from_json).collect())
            }
            serde_json::Value::Object(map) => FieldValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), FieldValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value. Text that parses as a number counts, so
    /// query-string parameters compare against numeric thresholds.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Length in characters, elements, or entries. Scalars have no length.
    pub fn len(&self) -> Option<usize> {
        match self {
            FieldValue::Text(s) => Some(s.chars().count()),
            FieldValue::List(items) => Some(items.len()),
            FieldValue::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Equality with numeric coercion: `Number(5)` equals `Text("5")`.
    pub fn loosely_equals(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Number(_), FieldValue::Text(_))
            | (FieldValue::Text(_), FieldValue::Number(_)) => {
                match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => self == other,
        }
    }

    /// Ordering used by the relational operators. Numbers (and numeric text)
    /// compare numerically, other text lexicographically; anything else is
    /// incomparable.
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(items: Vec<T>) -> Self {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_and_missing_are_absent() {
        assert_eq!(FieldValue::from_json(&json!(null)), FieldValue::Absent);
        assert!(FieldValue::default().is_absent());
    }

    #[test]
    fn nested_json_converts() {
        let v = FieldValue::from_json(&json!({"tags": ["a", "b"], "n": 3}));
        match v {
            FieldValue::Map(map) => {
                assert_eq!(map["n"], FieldValue::Number(3.0));
                assert_eq!(map["tags"].len(), Some(2));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn numeric_text_coerces() {
        assert!(FieldValue::from(5i64).loosely_equals(&FieldValue::from("5")));
        assert!(!FieldValue::from("five").loosely_equals(&FieldValue::from(5i64)));
        assert_eq!(
            FieldValue::from("500").compare(&FieldValue::from(100i64)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn untagged_operands_deserialize() {
        let v: FieldValue = serde_yml::from_str("[image, video]").unwrap();
        assert_eq!(v, FieldValue::from(vec!["image", "video"]));
        let n: FieldValue = serde_yml::from_str("42").unwrap();
        assert_eq!(n, FieldValue::Number(42.0));
        let absent: FieldValue = serde_json::from_str("null").unwrap();
        assert!(absent.is_absent());
    }

    #[test]
    fn length_counts_chars() {
        assert_eq!(FieldValue::from("héllo").len(), Some(5));
        assert_eq!(FieldValue::Bool(true).len(), None);
    }
}
