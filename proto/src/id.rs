use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier assigned to a client-initiated change. Used for transport-side
/// dedup, rollback grouping, and self-echo suppression of server events.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(Ulid);

impl OperationId {
    pub fn new() -> Self { Self(Ulid::new()) }

    /// Id of the `n`th staged op within a grouped (bulk) operation.
    pub fn member(&self, n: usize) -> String { format!("{}/{}", self, n) }
}

impl Default for OperationId {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "op_{}", self.0) }
}

impl std::str::FromStr for OperationId {
    type Err = ulid::DecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(Self(Ulid::from_string(s.strip_prefix("op_").unwrap_or(s))?)) }
}
