use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Pk;

/// Kind of change announced by a server push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    BulkCreate,
    BulkUpdate,
    BulkDelete,
}

impl EventKind {
    pub fn is_bulk(&self) -> bool { matches!(self, EventKind::BulkCreate | EventKind::BulkUpdate | EventKind::BulkDelete) }

    /// The kind that undoes this one. Rolling back a create emits a delete
    /// and vice versa; updates invert to updates.
    pub fn inverse(&self) -> EventKind {
        match self {
            EventKind::Create => EventKind::Delete,
            EventKind::Delete => EventKind::Create,
            EventKind::Update => EventKind::Update,
            EventKind::BulkCreate => EventKind::BulkDelete,
            EventKind::BulkDelete => EventKind::BulkCreate,
            EventKind::BulkUpdate => EventKind::BulkUpdate,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::BulkCreate => "bulk_create",
            EventKind::BulkUpdate => "bulk_update",
            EventKind::BulkDelete => "bulk_delete",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventKind {
    type Err = UnknownEventKind;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(EventKind::Create),
            "update" => Ok(EventKind::Update),
            "delete" => Ok(EventKind::Delete),
            "bulk_create" => Ok(EventKind::BulkCreate),
            "bulk_update" => Ok(EventKind::BulkUpdate),
            "bulk_delete" => Ok(EventKind::BulkDelete),
            other => Err(UnknownEventKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

fn default_pk_field() -> String { "id".to_string() }

/// A raw event record as delivered by the realtime channel.
///
/// The wire format tolerates both `operation_id` and `operationId` spellings,
/// an optional `pk_field_name` (default `"id"`), the single-event primary key
/// under the named pk field or top-level `pk`/`id`, and bulk `instances` that
/// are either raw key values or objects carrying the key under the pk field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    #[serde(rename = "type", alias = "event")]
    pub event: String,
    pub model: String,
    pub namespace: String,
    #[serde(default, alias = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default = "default_pk_field")]
    pub pk_field_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ModelEvent {
    pub fn kind(&self) -> Result<EventKind, UnknownEventKind> { self.event.parse() }

    /// Primary key of a single-entity event. The field named by
    /// `pk_field_name` wins over the generic `pk`/`id` fallbacks.
    pub fn single_pk(&self) -> Option<Pk> {
        if let Some(value) = self.extra.get(&self.pk_field_name) {
            if let Some(pk) = Pk::from_value(value) {
                return Some(pk);
            }
        }
        if let Some(value) = &self.pk {
            if let Some(pk) = Pk::from_value(value) {
                return Some(pk);
            }
        }
        self.id.as_ref().and_then(Pk::from_value)
    }

    /// Primary keys of a bulk event. Instances that are neither key values
    /// nor objects carrying the pk field are skipped.
    pub fn bulk_pks(&self) -> Vec<Pk> {
        let Some(instances) = &self.instances else { return Vec::new() };
        instances
            .iter()
            .filter_map(|instance| match instance {
                Value::Object(map) => map.get(&self.pk_field_name).and_then(Pk::from_value),
                other => Pk::from_value(other),
            })
            .collect()
    }
}

impl std::fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ns={}", self.event, self.model, self.namespace)?;
        if let Some(op) = &self.operation_id {
            write!(f, " op={op}")?;
        }
        Ok(())
    }
}
