//! Filter conditions in `field__lookup` form, evaluated locally against
//! instances and shipped verbatim as the server-side form. Local evaluation
//! is necessary because optimistic rows and pushed rows must be matched
//! against a view's window before the server has any say.

use serde_json::Value;
use thiserror::Error;
use vantage_proto::Pk;

use crate::{collation, model::Instance};

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("unknown lookup: {0}")]
    UnknownLookup(String),
    #[error("conditions must be an object")]
    NotAnObject,
}

/// Comparison applied by a single condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Eq,
    Ne,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    IContains,
    IsNull,
}

impl Lookup {
    fn parse(s: &str) -> Result<Self, FilterError> {
        match s {
            "eq" | "exact" => Ok(Lookup::Eq),
            "ne" | "not" => Ok(Lookup::Ne),
            "in" => Ok(Lookup::In),
            "gt" => Ok(Lookup::Gt),
            "gte" => Ok(Lookup::Gte),
            "lt" => Ok(Lookup::Lt),
            "lte" => Ok(Lookup::Lte),
            "contains" => Ok(Lookup::Contains),
            "icontains" => Ok(Lookup::IContains),
            "isnull" => Ok(Lookup::IsNull),
            other => Err(FilterError::UnknownLookup(other.to_string())),
        }
    }

    fn suffix(&self) -> Option<&'static str> {
        match self {
            Lookup::Eq => None,
            Lookup::Ne => Some("ne"),
            Lookup::In => Some("in"),
            Lookup::Gt => Some("gt"),
            Lookup::Gte => Some("gte"),
            Lookup::Lt => Some("lt"),
            Lookup::Lte => Some("lte"),
            Lookup::Contains => Some("contains"),
            Lookup::IContains => Some("icontains"),
            Lookup::IsNull => Some("isnull"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub lookup: Lookup,
    pub value: Value,
}

impl Condition {
    pub fn matches(&self, instance: &Instance) -> bool {
        let actual = instance.get(&self.field).unwrap_or(&Value::Null);
        match self.lookup {
            Lookup::Eq => actual == &self.value,
            Lookup::Ne => actual != &self.value,
            Lookup::In => match &self.value {
                Value::Array(candidates) => candidates.contains(actual),
                _ => false,
            },
            Lookup::Gt => matches!(collation::compare(actual, &self.value), Some(std::cmp::Ordering::Greater)),
            Lookup::Gte => {
                matches!(collation::compare(actual, &self.value), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
            }
            Lookup::Lt => matches!(collation::compare(actual, &self.value), Some(std::cmp::Ordering::Less)),
            Lookup::Lte => matches!(collation::compare(actual, &self.value), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
            Lookup::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            Lookup::IContains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Lookup::IsNull => {
                let is_null = actual.is_null();
                match &self.value {
                    Value::Bool(expected) => is_null == *expected,
                    _ => false,
                }
            }
        }
    }
}

/// A conjunction of conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Vec<Condition>);

impl Filter {
    pub fn new() -> Self { Self(Vec::new()) }

    /// Parse `{"field": v, "field__lookup": v}` condition maps.
    pub fn parse(conditions: &serde_json::Map<String, Value>) -> Result<Self, FilterError> {
        let mut parsed = Vec::with_capacity(conditions.len());
        for (key, value) in conditions {
            let (field, lookup) = match key.rsplit_once("__") {
                Some((field, suffix)) => (field.to_string(), Lookup::parse(suffix)?),
                None => (key.clone(), Lookup::Eq),
            };
            parsed.push(Condition { field, lookup, value: value.clone() });
        }
        Ok(Self(parsed))
    }

    /// Parse from any JSON value; must be an object.
    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Object(map) => Self::parse(map),
            _ => Err(FilterError::NotAnObject),
        }
    }

    /// Shorthand for a `pk__in` membership condition.
    pub fn pk_in(pk_field: &str, pks: impl IntoIterator<Item = Pk>) -> Self {
        let values: Vec<Value> = pks.into_iter().map(|pk| pk.to_value()).collect();
        Self(vec![Condition { field: pk_field.to_string(), lookup: Lookup::In, value: Value::Array(values) }])
    }

    /// Shorthand for an exact pk condition.
    pub fn pk_eq(pk_field: &str, pk: &Pk) -> Self {
        Self(vec![Condition { field: pk_field.to_string(), lookup: Lookup::Eq, value: pk.to_value() }])
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn conditions(&self) -> &[Condition] { &self.0 }

    /// Conjunction: the result matches what both filters match.
    pub fn and(&self, other: &Filter) -> Filter {
        let mut combined = self.0.clone();
        combined.extend(other.0.iter().cloned());
        Filter(combined)
    }

    pub fn matches(&self, instance: &Instance) -> bool { self.0.iter().all(|condition| condition.matches(instance)) }

    /// The server-side form: a `field__lookup -> value` map.
    pub fn to_conditions(&self) -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        for condition in &self.0 {
            let key = match condition.lookup.suffix() {
                Some(suffix) => format!("{}__{}", condition.field, suffix),
                None => condition.field.clone(),
            };
            map.insert(key, condition.value.clone());
        }
        map
    }
}
