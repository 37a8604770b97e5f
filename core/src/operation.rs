use std::sync::Arc;

use vantage_proto::Pk;

use crate::model::Instance;

/// Where an inserted row lands in the view.
#[derive(Clone, Default)]
pub enum Position {
    Prepend,
    #[default]
    Append,
    /// Splice index, clamped to the view length
    Index(usize),
    /// Computed from the candidate row and the current view
    Sorted(Arc<dyn Fn(&Instance, &[Instance]) -> usize + Send + Sync>),
}

impl Position {
    pub fn resolve(&self, item: &Instance, view: &[Instance]) -> usize {
        match self {
            Position::Prepend => 0,
            Position::Append => view.len(),
            Position::Index(index) => (*index).min(view.len()),
            Position::Sorted(resolver) => resolver(item, view).min(view.len()),
        }
    }
}

impl std::fmt::Debug for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Prepend => write!(f, "Prepend"),
            Position::Append => write!(f, "Append"),
            Position::Index(index) => write!(f, "Index({index})"),
            Position::Sorted(_) => write!(f, "Sorted(..)"),
        }
    }
}

/// Insertion policy of a view: where locally created rows appear immediately,
/// and where server-originated rows are placed.
#[derive(Debug, Clone)]
pub struct InsertPolicy {
    pub local: Position,
    pub remote: Position,
}

impl Default for InsertPolicy {
    fn default() -> Self { Self { local: Position::Prepend, remote: Position::Append } }
}

/// A pending local change overlaid on ground truth.
#[derive(Debug, Clone)]
pub struct OptimisticOp {
    /// Unique within one SyncedArray; members of a grouped mutation share the
    /// outer operation id as prefix.
    pub id: String,
    /// Process-monotonic sequence number; ops apply in this order.
    pub timestamp: u64,
    pub kind: OpKind,
}

#[derive(Debug, Clone)]
pub enum OpKind {
    Create { position: Position, data: Instance },
    Update { key: Pk, data: Instance },
    Delete { key: Pk },
}

impl OpKind {
    pub fn is_create(&self) -> bool { matches!(self, OpKind::Create { .. }) }
    pub fn is_update(&self) -> bool { matches!(self, OpKind::Update { .. }) }
    pub fn is_delete(&self) -> bool { matches!(self, OpKind::Delete { .. }) }
}
