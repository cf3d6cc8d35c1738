//! Metadata primitives. Values are JSON-shaped: string, int64, float64,
//! bool, timestamp, or a list of primitives. Ints and floats compare as one
//! numeric domain so that `{year: {gte: 2022}}` matches both `2022` and
//! `2022.0`; equality, ordering and hashing all agree on that.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Metadata bag attached to entities and relationships. BTreeMap keeps the
/// serialized field order deterministic.
pub type MetadataBag = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone)]
pub enum MetadataValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Timestamp(_) => "timestamp",
            Self::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view unifying ints and floats. -0.0 normalises to 0.0 so
    /// ordering and hashing agree with `Int(0)`.
    fn as_numeric(&self) -> Option<f64> {
        let x = match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            _ => return None,
        };
        Some(if x == 0.0 { 0.0 } else { x })
    }

    /// Whether two values belong to one comparable kind: numbers with
    /// numbers, strings with strings, timestamps with timestamps, bools
    /// with bools. Lists never compare. Range operators are gated on this.
    pub fn comparable_with(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_))
                | (Self::String(_), Self::String(_))
                | (Self::Timestamp(_), Self::Timestamp(_))
                | (Self::Bool(_), Self::Bool(_))
        )
    }

    /// Rank used to order values of different types in the sorted index.
    fn type_rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::Timestamp(_) => 2,
            Self::String(_) => 3,
            Self::List(_) => 4,
        }
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::List(a), Self::List(b)) => a.cmp(b),
            _ => match (self.as_numeric(), other.as_numeric()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.type_rank().cmp(&other.type_rank()),
            },
        }
    }
}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MetadataValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MetadataValue {}

impl Hash for MetadataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Bool(b) => {
                state.write_u8(0);
                b.hash(state);
            }
            Self::Int(i) => {
                state.write_u8(1);
                i.hash(state);
            }
            Self::Float(f) => {
                // Integral floats hash like the equal int; others by bits,
                // matching total_cmp equality.
                let f = if *f == 0.0 { 0.0 } else { *f };
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    state.write_u8(1);
                    (f as i64).hash(state);
                } else {
                    state.write_u8(2);
                    f.to_bits().hash(state);
                }
            }
            Self::Timestamp(t) => {
                state.write_u8(3);
                t.timestamp_micros().hash(state);
            }
            Self::String(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Self::List(items) => {
                state.write_u8(5);
                for item in items {
                    item.hash(state);
                }
            }
        }
    }
}

impl Serialize for MetadataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Timestamp(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Self::List(items) => items.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(D::Error::custom)
    }
}

impl TryFrom<serde_json::Value> for MetadataValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, String> {
        use serde_json::Value;
        match value {
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Self::Float(f))
                } else {
                    Err(format!("unrepresentable number {n}"))
                }
            }
            Value::String(s) => match DateTime::parse_from_rfc3339(&s) {
                Ok(ts) => Ok(Self::Timestamp(ts.with_timezone(&Utc))),
                Err(_) => Ok(Self::String(s)),
            },
            Value::Array(items) => items
                .into_iter()
                .map(Self::try_from)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Self::List),
            other => Err(format!("metadata values may not be {other:?}")),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for MetadataValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}
