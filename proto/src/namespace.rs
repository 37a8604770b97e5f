use serde::{Deserialize, Serialize};

/// Routing key tying a model (optionally plus a suffix) to a realtime channel
/// and a registry bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    /// Default resolution: `model`, or `model::suffix` when a per-view suffix
    /// is configured.
    pub fn resolve(model: &str, suffix: Option<&str>) -> Self {
        match suffix {
            Some(suffix) => Self(format!("{model}::{suffix}")),
            None => Self(model.to_string()),
        }
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self { Self(s.to_string()) }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self { Self(s) }
}
