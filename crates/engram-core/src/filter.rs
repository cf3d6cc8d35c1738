//! Structured query filter grammar. External collaborators translate
//! natural language into this form; the core only ever consumes the tree.
//!
//! Leaf operators take either a bare value (shorthand for `equals`) or an
//! object of operator/operand pairs. `allOf`, `anyOf` and `not` compose;
//! sibling keys inside one object are an implicit AND.

use crate::{CoreError, MetadataBag, MetadataValue, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Sort direction for `orderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    AllOf(Vec<Filter>),
    AnyOf(Vec<Filter>),
    Not(Box<Filter>),
    Field { field: String, op: FieldOp },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Equals(MetadataValue),
    NotEquals(MetadataValue),
    GreaterThan(MetadataValue),
    GreaterEqual(MetadataValue),
    LessThan(MetadataValue),
    LessEqual(MetadataValue),
    /// Inclusive on both endpoints.
    Between(MetadataValue, MetadataValue),
    OneOf(Vec<MetadataValue>),
    NoneOf(Vec<MetadataValue>),
    Contains(MetadataValue),
    Excludes(MetadataValue),
    HasAll(Vec<MetadataValue>),
    StartsWith(String),
    EndsWith(String),
    Matches(String),
    Exists(bool),
}

impl Filter {
    pub fn field(field: impl Into<String>, op: FieldOp) -> Self {
        Self::Field { field: field.into(), op }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Self::field(field, FieldOp::Equals(value.into()))
    }

    pub fn all_of(filters: Vec<Filter>) -> Self {
        Self::AllOf(filters)
    }

    pub fn any_of(filters: Vec<Filter>) -> Self {
        Self::AnyOf(filters)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Parse the JSON-shaped grammar. Unknown operators and malformed
    /// operands are validation errors with the offending key in the
    /// message.
    pub fn parse(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            CoreError::validation("where", "filter must be a JSON object")
        })?;
        let mut parts = Vec::with_capacity(obj.len());
        for (key, val) in obj {
            match key.as_str() {
                "allOf" => parts.push(Self::AllOf(Self::parse_list(key, val)?)),
                "anyOf" => parts.push(Self::AnyOf(Self::parse_list(key, val)?)),
                "not" => parts.push(Self::Not(Box::new(Self::parse(val)?))),
                _ => parts.extend(Self::parse_field(key, val)?),
            }
        }
        Ok(match parts.len() {
            0 => Self::AllOf(Vec::new()),
            1 => parts.into_iter().next().expect("len checked"),
            _ => Self::AllOf(parts),
        })
    }

    fn parse_list(key: &str, value: &Value) -> Result<Vec<Filter>> {
        let items = value.as_array().ok_or_else(|| {
            CoreError::validation(key, "compound operator takes an array of filters")
        })?;
        items.iter().map(Self::parse).collect()
    }

    fn parse_field(field: &str, value: &Value) -> Result<Vec<Filter>> {
        let Some(ops) = value.as_object() else {
            // Bare value: shorthand for equals.
            let v = MetadataValue::try_from(value.clone())
                .map_err(|e| CoreError::validation(field, e))?;
            return Ok(vec![Self::field(field, FieldOp::Equals(v))]);
        };
        let mut filters = Vec::with_capacity(ops.len());
        for (op_key, operand) in ops {
            filters.push(Self::field(field, FieldOp::parse(field, op_key, operand)?));
        }
        Ok(filters)
    }

    /// Linear-scan semantics against a metadata bag. The indexes must
    /// return exactly the set this predicate accepts.
    pub fn matches_bag(&self, bag: &MetadataBag) -> bool {
        match self {
            Self::AllOf(filters) => filters.iter().all(|f| f.matches_bag(bag)),
            Self::AnyOf(filters) => filters.iter().any(|f| f.matches_bag(bag)),
            Self::Not(filter) => !filter.matches_bag(bag),
            Self::Field { field, op } => op.matches_value(bag.get(field)),
        }
    }

    /// Human-readable predicate list, used by score explanations.
    pub fn describe(&self, out: &mut Vec<String>) {
        match self {
            Self::AllOf(filters) | Self::AnyOf(filters) => {
                for f in filters {
                    f.describe(out);
                }
            }
            Self::Not(filter) => {
                let mut inner = Vec::new();
                filter.describe(&mut inner);
                out.extend(inner.into_iter().map(|p| format!("not({p})")));
            }
            Self::Field { field, op } => out.push(format!("{field} {}", op.describe())),
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::parse(&value).map_err(D::Error::custom)
    }
}

impl FieldOp {
    fn parse(field: &str, op_key: &str, operand: &Value) -> Result<Self> {
        let value = |v: &Value| -> Result<MetadataValue> {
            MetadataValue::try_from(v.clone()).map_err(|e| CoreError::validation(field, e))
        };
        let list = |v: &Value| -> Result<Vec<MetadataValue>> {
            let items = v.as_array().ok_or_else(|| {
                CoreError::validation(field, format!("`{op_key}` takes an array"))
            })?;
            items.iter().map(value).collect()
        };
        let string = |v: &Value| -> Result<String> {
            v.as_str().map(str::to_string).ok_or_else(|| {
                CoreError::validation(field, format!("`{op_key}` takes a string"))
            })
        };
        Ok(match op_key {
            "eq" | "equals" => Self::Equals(value(operand)?),
            "ne" | "notEquals" => Self::NotEquals(value(operand)?),
            "gt" | "greaterThan" => Self::GreaterThan(value(operand)?),
            "gte" | "greaterEqual" => Self::GreaterEqual(value(operand)?),
            "lt" | "lessThan" => Self::LessThan(value(operand)?),
            "lte" | "lessEqual" => Self::LessEqual(value(operand)?),
            "between" => {
                let bounds = list(operand)?;
                if bounds.len() != 2 {
                    return Err(CoreError::validation(
                        field,
                        format!("`between` takes [min, max], got {} values", bounds.len()),
                    ));
                }
                let mut it = bounds.into_iter();
                Self::Between(it.next().expect("len 2"), it.next().expect("len 2"))
            }
            "in" | "oneOf" => Self::OneOf(list(operand)?),
            "notIn" | "noneOf" => Self::NoneOf(list(operand)?),
            "contains" => Self::Contains(value(operand)?),
            "excludes" => Self::Excludes(value(operand)?),
            "hasAll" => Self::HasAll(list(operand)?),
            "startsWith" => Self::StartsWith(string(operand)?),
            "endsWith" => Self::EndsWith(string(operand)?),
            "matches" => {
                let pattern = string(operand)?;
                regex::Regex::new(&pattern).map_err(|e| {
                    CoreError::validation(field, format!("invalid regex: {e}"))
                })?;
                Self::Matches(pattern)
            }
            "exists" => Self::Exists(operand.as_bool().ok_or_else(|| {
                CoreError::validation(field, "`exists` takes a bool")
            })?),
            other => {
                return Err(CoreError::validation(
                    field,
                    format!("unknown filter operator `{other}`"),
                ))
            }
        })
    }

    /// Evaluate against a field value (`None` when the field is absent).
    /// Negative operators treat a missing field as a match.
    pub fn matches_value(&self, value: Option<&MetadataValue>) -> bool {
        match self {
            Self::Exists(expected) => value.is_some() == *expected,
            Self::NotEquals(target) => match value {
                Some(v) => !equals(v, target),
                None => true,
            },
            Self::NoneOf(targets) => match value {
                Some(v) => !targets.iter().any(|t| equals(v, t)),
                None => true,
            },
            Self::Excludes(target) => match value {
                Some(v) => !contains(v, target),
                None => true,
            },
            _ => {
                let Some(v) = value else { return false };
                match self {
                    Self::Equals(t) => equals(v, t),
                    Self::GreaterThan(t) => comparable(v, t) && v > t,
                    Self::GreaterEqual(t) => comparable(v, t) && v >= t,
                    Self::LessThan(t) => comparable(v, t) && v < t,
                    Self::LessEqual(t) => comparable(v, t) && v <= t,
                    Self::Between(lo, hi) => {
                        comparable(v, lo) && comparable(v, hi) && v >= lo && v <= hi
                    }
                    Self::OneOf(targets) => targets.iter().any(|t| equals(v, t)),
                    Self::Contains(t) => contains(v, t),
                    Self::HasAll(targets) => match v {
                        MetadataValue::List(items) => targets.iter().all(|t| items.contains(t)),
                        _ => false,
                    },
                    Self::StartsWith(prefix) => {
                        v.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
                    }
                    Self::EndsWith(suffix) => {
                        v.as_str().is_some_and(|s| s.ends_with(suffix.as_str()))
                    }
                    Self::Matches(pattern) => v.as_str().is_some_and(|s| {
                        regex::Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false)
                    }),
                    Self::Exists(_) | Self::NotEquals(_) | Self::NoneOf(_) | Self::Excludes(_) => {
                        unreachable!("handled above")
                    }
                }
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Equals(v) => format!("== {v:?}"),
            Self::NotEquals(v) => format!("!= {v:?}"),
            Self::GreaterThan(v) => format!("> {v:?}"),
            Self::GreaterEqual(v) => format!(">= {v:?}"),
            Self::LessThan(v) => format!("< {v:?}"),
            Self::LessEqual(v) => format!("<= {v:?}"),
            Self::Between(lo, hi) => format!("between {lo:?} and {hi:?}"),
            Self::OneOf(vs) => format!("in {vs:?}"),
            Self::NoneOf(vs) => format!("not in {vs:?}"),
            Self::Contains(v) => format!("contains {v:?}"),
            Self::Excludes(v) => format!("excludes {v:?}"),
            Self::HasAll(vs) => format!("has all of {vs:?}"),
            Self::StartsWith(s) => format!("starts with {s:?}"),
            Self::EndsWith(s) => format!("ends with {s:?}"),
            Self::Matches(p) => format!("matches /{p}/"),
            Self::Exists(b) => format!("exists == {b}"),
        }
    }
}

/// Equality, with a bare value against a list field meaning membership.
fn equals(value: &MetadataValue, target: &MetadataValue) -> bool {
    if value == target {
        return true;
    }
    matches!(value, MetadataValue::List(items)
        if !matches!(target, MetadataValue::List(_)) && items.contains(target))
}

/// String containment for strings, element containment for lists.
fn contains(value: &MetadataValue, target: &MetadataValue) -> bool {
    match (value, target) {
        (MetadataValue::String(haystack), MetadataValue::String(needle)) => {
            haystack.contains(needle.as_str())
        }
        (MetadataValue::List(items), t) => items.contains(t),
        _ => false,
    }
}

/// Range operators only compare values of one kind; see
/// [`MetadataValue::comparable_with`].
fn comparable(value: &MetadataValue, target: &MetadataValue) -> bool {
    value.comparable_with(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(pairs: &[(&str, MetadataValue)]) -> MetadataBag {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn bare_value_is_equals_shorthand() {
        let f = Filter::parse(&json!({"year": 2024})).unwrap();
        assert_eq!(f, Filter::eq("year", 2024));
        assert!(f.matches_bag(&bag(&[("year", 2024.into())])));
        assert!(!f.matches_bag(&bag(&[("year", 2023.into())])));
    }

    #[test]
    fn sibling_keys_are_implicit_and() {
        let f = Filter::parse(&json!({"year": 2024, "status": "open"})).unwrap();
        assert!(f.matches_bag(&bag(&[("year", 2024.into()), ("status", "open".into())])));
        assert!(!f.matches_bag(&bag(&[("year", 2024.into())])));
    }

    #[test]
    fn operator_aliases_parse_identically() {
        let long = Filter::parse(&json!({"year": {"greaterEqual": 2022}})).unwrap();
        let short = Filter::parse(&json!({"year": {"gte": 2022}})).unwrap();
        assert_eq!(long, short);
    }

    #[test]
    fn range_operators() {
        let f = Filter::parse(&json!({"year": {"between": [2020, 2022]}})).unwrap();
        assert!(f.matches_bag(&bag(&[("year", 2020.into())])));
        assert!(f.matches_bag(&bag(&[("year", 2022.into())])));
        assert!(!f.matches_bag(&bag(&[("year", 2023.into())])));
    }

    #[test]
    fn range_superset_monotonicity() {
        // {gte: a} accepts a superset of {gte: b} for a <= b.
        let wide = Filter::parse(&json!({"n": {"gte": 10}})).unwrap();
        let narrow = Filter::parse(&json!({"n": {"gte": 20}})).unwrap();
        for n in 0..40i64 {
            let b = bag(&[("n", n.into())]);
            if narrow.matches_bag(&b) {
                assert!(wide.matches_bag(&b), "gte 20 matched {n} but gte 10 did not");
            }
        }
    }

    #[test]
    fn compound_operators() {
        let f = Filter::parse(&json!({
            "anyOf": [
                {"status": "open"},
                {"not": {"priority": {"lt": 5}}}
            ]
        }))
        .unwrap();
        assert!(f.matches_bag(&bag(&[("status", "open".into()), ("priority", 1.into())])));
        assert!(f.matches_bag(&bag(&[("status", "closed".into()), ("priority", 9.into())])));
        assert!(!f.matches_bag(&bag(&[("status", "closed".into()), ("priority", 1.into())])));
    }

    #[test]
    fn negative_operators_match_missing_fields() {
        let ne = Filter::parse(&json!({"status": {"ne": "open"}})).unwrap();
        assert!(ne.matches_bag(&bag(&[])));
        let none_of = Filter::parse(&json!({"status": {"noneOf": ["a", "b"]}})).unwrap();
        assert!(none_of.matches_bag(&bag(&[])));
        let exists = Filter::parse(&json!({"status": {"exists": false}})).unwrap();
        assert!(exists.matches_bag(&bag(&[])));
    }

    #[test]
    fn string_operators() {
        let b = bag(&[("title", "quick brown fox".into())]);
        assert!(Filter::parse(&json!({"title": {"contains": "brown"}})).unwrap().matches_bag(&b));
        assert!(Filter::parse(&json!({"title": {"startsWith": "quick"}})).unwrap().matches_bag(&b));
        assert!(Filter::parse(&json!({"title": {"endsWith": "fox"}})).unwrap().matches_bag(&b));
        assert!(Filter::parse(&json!({"title": {"matches": "b.own"}})).unwrap().matches_bag(&b));
        assert!(!Filter::parse(&json!({"title": {"matches": "^fox"}})).unwrap().matches_bag(&b));
    }

    #[test]
    fn list_operators() {
        let b = bag(&[("tags", vec!["rust", "db"].into())]);
        assert!(Filter::parse(&json!({"tags": {"contains": "rust"}})).unwrap().matches_bag(&b));
        assert!(Filter::parse(&json!({"tags": {"hasAll": ["rust", "db"]}})).unwrap().matches_bag(&b));
        assert!(!Filter::parse(&json!({"tags": {"hasAll": ["rust", "go"]}})).unwrap().matches_bag(&b));
        assert!(Filter::parse(&json!({"tags": {"excludes": "go"}})).unwrap().matches_bag(&b));
    }

    #[test]
    fn bare_equals_on_list_field_means_membership() {
        let b = bag(&[("tags", vec!["rust", "db"].into())]);
        assert!(Filter::parse(&json!({"tags": "rust"})).unwrap().matches_bag(&b));
        assert!(!Filter::parse(&json!({"tags": "go"})).unwrap().matches_bag(&b));
        assert!(Filter::parse(&json!({"tags": {"ne": "go"}})).unwrap().matches_bag(&b));
        assert!(!Filter::parse(&json!({"tags": {"ne": "rust"}})).unwrap().matches_bag(&b));
    }

    #[test]
    fn range_operators_ignore_cross_type_values() {
        let b = bag(&[("year", "2024".into())]);
        // A string field never satisfies a numeric range.
        assert!(!Filter::parse(&json!({"year": {"gte": 2000}})).unwrap().matches_bag(&b));
    }

    #[test]
    fn unknown_operator_is_a_validation_error() {
        let err = Filter::parse(&json!({"year": {"fuzzyEquals": 2024}})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fuzzyEquals"), "{msg}");
        assert!(msg.contains("year"), "{msg}");
    }

    #[test]
    fn invalid_regex_is_rejected_at_parse_time() {
        assert!(Filter::parse(&json!({"title": {"matches": "["}})).is_err());
    }
}
