use std::sync::Arc;

use vantage_proto::EventKind;

use crate::model::Instance;

/// What caused a view to change. Carried on every change notification so
/// downstream layers (metrics, UI adapters) can react per-origin.
#[derive(Debug, Clone)]
pub enum ChangeOrigin {
    /// A pending local mutation was overlaid on ground truth
    Optimistic { operation_id: String, kind: EventKind },
    /// A pending mutation was accepted and merged into ground truth
    Confirm { operation_id: String },
    /// A pending mutation (or a logged direct operation) was reverted
    Rollback { operation_id: String },
    /// A server-originated change was applied to ground truth
    Remote { kind: EventKind, operation_id: Option<String> },
    /// Ground truth was replaced wholesale
    Reset,
}

/// A change notification: the new view, the view it replaced, and why.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub view: Arc<Vec<Instance>>,
    pub previous: Arc<Vec<Instance>>,
    pub origin: ChangeOrigin,
}
