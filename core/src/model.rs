use serde_json::Value;
use vantage_proto::Pk;

/// A remote entity as the engine sees it: a plain JSON object. The engine is
/// opaque to everything except the primary key and the fields named in
/// filters and aggregates.
pub type Instance = serde_json::Map<String, Value>;

/// Descriptor for a remote collection's model: its logical name and the name
/// of the primary key field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelType {
    pub name: String,
    pub pk_field: String,
}

impl ModelType {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), pk_field: "id".to_string() } }

    pub fn with_pk_field(name: impl Into<String>, pk_field: impl Into<String>) -> Self {
        Self { name: name.into(), pk_field: pk_field.into() }
    }

    /// Primary key of an instance, if it carries one.
    pub fn pk_of(&self, instance: &Instance) -> Option<Pk> { instance.get(&self.pk_field).and_then(Pk::from_value) }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.name) }
}

/// Shallow-merge partial fields onto an instance. Later values win.
pub fn merge_fields(target: &mut Instance, partial: &Instance) {
    for (key, value) in partial {
        target.insert(key.clone(), value.clone());
    }
}

/// Parse a query response payload into instances. Accepts a bare object, an
/// array of objects, or null/absent (empty).
pub fn instances_from(data: Value) -> Vec<Instance> {
    match data {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}
