//! Primary-key-indexed array with a ground-truth layer and an overlay of
//! optimistic operations. The observable view is ground truth with all
//! pending ops applied in timestamp order; it is computed lazily and cached
//! until the next state change.
//!
//! None of these operations perform I/O or fail; they are pure state
//! transforms. Change notifications fire synchronously before the mutating
//! method returns, and only when the view observably changed. Subscribers
//! must not mutate the array from inside their callback.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use vantage_proto::{EventKind, Pk};

use crate::{
    broadcast::{Broadcast, IntoListener, SubscriptionGuard},
    changes::{ChangeOrigin, ChangeSet},
    model::{merge_fields, Instance, ModelType},
    operation::{OpKind, OptimisticOp, Position},
    oplog::OperationLog,
};

#[derive(Clone)]
pub struct SyncedArray(Arc<Inner>);

struct Inner {
    model: ModelType,
    state: Mutex<State>,
    changes: Broadcast<ChangeSet>,
    oplog: OperationLog,
}

struct State {
    ground_truth: Vec<Instance>,
    /// pk -> ground truth index, kept in sync on every structural mutation
    pk_index: HashMap<Pk, usize>,
    /// Pending ops, in timestamp order (appended with an increasing clock)
    ops: Vec<OptimisticOp>,
    /// Cached view; invalidated by every state change
    view: Option<Arc<Vec<Instance>>>,
    /// Monotonic timestamps for optimistic ops
    clock: u64,
}

impl State {
    fn next_timestamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl SyncedArray {
    pub fn new(model: ModelType) -> Self {
        Self(Arc::new(Inner {
            model,
            state: Mutex::new(State { ground_truth: Vec::new(), pk_index: HashMap::new(), ops: Vec::new(), view: None, clock: 0 }),
            changes: Broadcast::new(),
            oplog: OperationLog::new(),
        }))
    }

    pub fn model(&self) -> &ModelType { &self.0.model }

    pub fn operation_log(&self) -> &OperationLog { &self.0.oplog }

    /// Subscribe to change notifications.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionGuard
    where L: IntoListener<ChangeSet> {
        self.0.changes.listen(listener)
    }

    // ---- reads ------------------------------------------------------------

    /// The current view: ground truth with all pending ops applied.
    pub fn view(&self) -> Arc<Vec<Instance>> {
        let mut state = self.0.state.lock().unwrap();
        Self::build_view(&mut state, &self.0.model)
    }

    pub fn view_pks(&self) -> Vec<Pk> {
        let model = &self.0.model;
        self.view().iter().filter_map(|row| model.pk_of(row)).collect()
    }

    /// The row with this pk, as currently rendered in the view.
    pub fn get(&self, key: &Pk) -> Option<Instance> {
        let model = &self.0.model;
        self.view().iter().find(|row| model.pk_of(row).as_ref() == Some(key)).cloned()
    }

    /// Snapshot of the ground-truth layer, without pending ops.
    pub fn ground_truth(&self) -> Vec<Instance> { self.0.state.lock().unwrap().ground_truth.clone() }

    pub fn has_op(&self, id: &str) -> bool { self.0.state.lock().unwrap().ops.iter().any(|op| op.id == id) }

    pub fn pending_ops(&self) -> usize { self.0.state.lock().unwrap().ops.len() }

    // ---- optimistic layer -------------------------------------------------

    /// Insert a synthetic row at `position`. Until confirmed, the row's pk is
    /// the op id, acting as a temporary key.
    pub fn create_optimistic(&self, id: impl Into<String>, position: Position, data: Instance) -> String {
        let id = id.into();
        let origin = ChangeOrigin::Optimistic { operation_id: id.clone(), kind: EventKind::Create };
        self.mutate(origin, |state, _| {
            let timestamp = state.next_timestamp();
            state.ops.push(OptimisticOp { id: id.clone(), timestamp, kind: OpKind::Create { position, data } });
        });
        id
    }

    /// Overlay partial updates on the row with this pk. No effect on the view
    /// if the pk is absent.
    pub fn update_optimistic(&self, id: impl Into<String>, key: Pk, data: Instance) -> String {
        let id = id.into();
        let origin = ChangeOrigin::Optimistic { operation_id: id.clone(), kind: EventKind::Update };
        self.mutate(origin, |state, _| {
            let timestamp = state.next_timestamp();
            state.ops.push(OptimisticOp { id: id.clone(), timestamp, kind: OpKind::Update { key, data } });
        });
        id
    }

    /// Hide the row with this pk from the view.
    pub fn delete_optimistic(&self, id: impl Into<String>, key: Pk) -> String {
        let id = id.into();
        let origin = ChangeOrigin::Optimistic { operation_id: id.clone(), kind: EventKind::Delete };
        self.mutate(origin, |state, _| {
            let timestamp = state.next_timestamp();
            state.ops.push(OptimisticOp { id: id.clone(), timestamp, kind: OpKind::Delete { key } });
        });
        id
    }

    /// Stage several creates atomically: one recompute, one notification.
    pub fn bulk_create_optimistic(&self, group: &str, items: Vec<(String, Position, Instance)>) {
        let origin = ChangeOrigin::Optimistic { operation_id: group.to_string(), kind: EventKind::BulkCreate };
        self.mutate(origin, |state, _| {
            for (id, position, data) in items {
                let timestamp = state.next_timestamp();
                state.ops.push(OptimisticOp { id, timestamp, kind: OpKind::Create { position, data } });
            }
        });
    }

    pub fn bulk_update_optimistic(&self, group: &str, items: Vec<(String, Pk, Instance)>) {
        let origin = ChangeOrigin::Optimistic { operation_id: group.to_string(), kind: EventKind::BulkUpdate };
        self.mutate(origin, |state, _| {
            for (id, key, data) in items {
                let timestamp = state.next_timestamp();
                state.ops.push(OptimisticOp { id, timestamp, kind: OpKind::Update { key, data } });
            }
        });
    }

    pub fn bulk_delete_optimistic(&self, group: &str, items: Vec<(String, Pk)>) {
        let origin = ChangeOrigin::Optimistic { operation_id: group.to_string(), kind: EventKind::BulkDelete };
        self.mutate(origin, |state, _| {
            for (id, key) in items {
                let timestamp = state.next_timestamp();
                state.ops.push(OptimisticOp { id, timestamp, kind: OpKind::Delete { key } });
            }
        });
    }

    /// Remove the op and merge its outcome into ground truth. For a create
    /// the confirmed row keeps the synthetic row's current view index, so the
    /// row the user is looking at does not jump. Returns false if the op is
    /// unknown (already confirmed or cancelled).
    pub fn confirm_optimistic_op(&self, id: &str, server_data: Option<Instance>) -> bool {
        self.mutate(ChangeOrigin::Confirm { operation_id: id.to_string() }, |state, model| {
            Self::confirm_one(state, model, id, server_data)
        })
    }

    /// Confirm a group atomically: deletes are staged first, then updates,
    /// then creates, and a single notification is emitted. Returns how many
    /// ops were actually confirmed.
    pub fn bulk_confirm_optimistic_ops(&self, group: &str, items: Vec<(String, Option<Instance>)>) -> usize {
        self.mutate(ChangeOrigin::Confirm { operation_id: group.to_string() }, |state, model| {
            let rank = |state: &State, id: &str| {
                state.ops.iter().find(|op| op.id == id).map(|op| match op.kind {
                    OpKind::Delete { .. } => 0u8,
                    OpKind::Update { .. } => 1,
                    OpKind::Create { .. } => 2,
                })
            };
            let mut staged: Vec<(u8, String, Option<Instance>)> =
                items.into_iter().filter_map(|(id, data)| rank(state, &id).map(|r| (r, id, data))).collect();
            staged.sort_by_key(|(r, _, _)| *r);
            staged.into_iter().filter(|(_, id, data)| Self::confirm_one(state, model, id, data.clone())).count()
        })
    }

    /// Cancel a pending op, reverting its contribution to the view.
    pub fn remove_optimistic_op(&self, id: &str) -> bool {
        self.mutate(ChangeOrigin::Rollback { operation_id: id.to_string() }, |state, _| {
            let before = state.ops.len();
            state.ops.retain(|op| op.id != id);
            state.ops.len() != before
        })
    }

    /// Cancel a group of pending ops with a single notification.
    pub fn bulk_remove_optimistic_ops(&self, group: &str, ids: &[String]) -> usize {
        self.mutate(ChangeOrigin::Rollback { operation_id: group.to_string() }, |state, _| {
            let before = state.ops.len();
            state.ops.retain(|op| !ids.iter().any(|id| *id == op.id));
            before - state.ops.len()
        })
    }

    // ---- ground-truth layer (server-originated) ---------------------------

    /// Safe add: inserting a row whose pk already exists becomes a merge at
    /// the existing index. Returns whether a new row was added.
    pub fn create_direct(&self, position: Position, data: Instance, origin: Option<&str>) -> bool {
        self.mutate_direct(EventKind::Create, origin, |state, model| {
            let index = position.resolve(&data, &Self::build_view(state, model));
            Self::insert_ground_truth(state, model, index, data)
        })
    }

    /// Merge partial fields onto the ground-truth row. Returns whether the
    /// row was found.
    pub fn update_direct(&self, key: &Pk, data: Instance, origin: Option<&str>) -> bool {
        self.mutate_direct(EventKind::Update, origin, |state, model| match state.pk_index.get(key) {
            Some(&index) => {
                merge_fields(&mut state.ground_truth[index], &data);
                true
            }
            None => false,
        })
    }

    /// Remove the row from ground truth. Returns whether it was present.
    pub fn delete_direct(&self, key: &Pk, origin: Option<&str>) -> bool {
        self.mutate_direct(EventKind::Delete, origin, |state, model| Self::remove_ground_truth(state, model, key))
    }

    pub fn bulk_create_direct(&self, items: Vec<(Position, Instance)>, origin: Option<&str>) -> usize {
        self.mutate_direct(EventKind::BulkCreate, origin, |state, model| {
            let mut added = 0;
            for (position, data) in items {
                let index = position.resolve(&data, &Self::build_view(state, model));
                if Self::insert_ground_truth(state, model, index, data) {
                    added += 1;
                }
            }
            added
        })
    }

    pub fn bulk_update_direct(&self, items: Vec<(Pk, Instance)>, origin: Option<&str>) -> usize {
        self.mutate_direct(EventKind::BulkUpdate, origin, |state, _| {
            let mut found = 0;
            for (key, data) in items {
                if let Some(&index) = state.pk_index.get(&key) {
                    merge_fields(&mut state.ground_truth[index], &data);
                    state.view = None;
                    found += 1;
                }
            }
            found
        })
    }

    pub fn bulk_delete_direct(&self, keys: &[Pk], origin: Option<&str>) -> usize {
        self.mutate_direct(EventKind::BulkDelete, origin, |state, model| {
            keys.iter().filter(|key| Self::remove_ground_truth(state, model, key)).count()
        })
    }

    /// Replace ground truth verbatim.
    pub fn reset_ground_truth(&self, data: Vec<Instance>, clear_optimistic: bool) {
        self.mutate(ChangeOrigin::Reset, |state, model| {
            state.ground_truth = data;
            if clear_optimistic {
                state.ops.clear();
            }
            Self::reindex(state, model);
        });
    }

    /// Undo the direct operations logged under this operation id, newest
    /// first. Pending optimistic ops are untouched. Returns the inverse event
    /// kinds that were applied.
    pub fn rollback_direct(&self, operation_id: &str) -> Vec<EventKind> {
        let oplog = &self.0.oplog;
        self.mutate(ChangeOrigin::Rollback { operation_id: operation_id.to_string() }, |state, model| {
            let mut doc = Value::Array(state.ground_truth.iter().cloned().map(Value::Object).collect());
            let kinds = oplog.rollback(&mut doc, operation_id);
            if !kinds.is_empty() {
                state.ground_truth = crate::model::instances_from(doc);
                Self::reindex(state, model);
            }
            kinds
        })
    }

    // ---- internals --------------------------------------------------------

    /// Run a state mutation, then notify if the view observably changed.
    fn mutate<R>(&self, origin: ChangeOrigin, f: impl FnOnce(&mut State, &ModelType) -> R) -> R {
        let model = &self.0.model;
        let (result, notification) = {
            let mut state = self.0.state.lock().unwrap();
            let previous = Self::build_view(&mut state, model);
            let result = f(&mut state, model);
            state.view = None;
            let view = Self::build_view(&mut state, model);
            let notification = (*view != *previous).then(|| ChangeSet { view, previous, origin });
            (result, notification)
        };
        if let Some(change) = notification {
            self.0.changes.send(&change);
        }
        result
    }

    /// Direct mutation wrapper: records the ground-truth transition in the
    /// operation log when an originating operation id is known.
    fn mutate_direct<R>(&self, kind: EventKind, origin: Option<&str>, f: impl FnOnce(&mut State, &ModelType) -> R) -> R {
        let change_origin = ChangeOrigin::Remote { kind, operation_id: origin.map(str::to_string) };
        self.mutate(change_origin, |state, model| {
            let before = origin.map(|_| Value::Array(state.ground_truth.iter().cloned().map(Value::Object).collect()));
            let result = f(state, model);
            if let (Some(op_id), Some(before)) = (origin, before) {
                let after = Value::Array(state.ground_truth.iter().cloned().map(Value::Object).collect());
                self.0.oplog.record(op_id, kind, &before, &after);
                self.0.oplog.cleanup();
            }
            result
        })
    }

    fn build_view(state: &mut State, model: &ModelType) -> Arc<Vec<Instance>> {
        if let Some(view) = &state.view {
            return view.clone();
        }
        let mut view = state.ground_truth.clone();
        for op in &state.ops {
            match &op.kind {
                OpKind::Create { position, data } => {
                    let mut item = data.clone();
                    // Synthetic key: the op id stands in for the pk until the
                    // server assigns one
                    let pk = match model.pk_of(&item) {
                        Some(pk) => pk,
                        None => {
                            item.insert(model.pk_field.clone(), Value::String(op.id.clone()));
                            Pk::Str(op.id.clone())
                        }
                    };
                    if view.iter().any(|row| model.pk_of(row).as_ref() == Some(&pk)) {
                        continue; // collision: suppress rather than duplicate
                    }
                    let index = position.resolve(&item, &view);
                    view.insert(index, item);
                }
                OpKind::Update { key, data } => {
                    if let Some(row) = view.iter_mut().find(|row| model.pk_of(row).as_ref() == Some(key)) {
                        merge_fields(row, data);
                    }
                }
                OpKind::Delete { key } => {
                    view.retain(|row| model.pk_of(row).as_ref() != Some(key));
                }
            }
        }
        let view = Arc::new(view);
        state.view = Some(view.clone());
        view
    }

    fn confirm_one(state: &mut State, model: &ModelType, id: &str, server_data: Option<Instance>) -> bool {
        let Some(op_index) = state.ops.iter().position(|op| op.id == id) else {
            return false;
        };
        let op = state.ops[op_index].clone();
        match op.kind {
            OpKind::Create { data, .. } => {
                // Find where the synthetic row currently renders before
                // removing the op; the confirmed row takes that index
                let view = Self::build_view(state, model);
                let synthetic_pk = match model.pk_of(&data) {
                    Some(pk) => pk,
                    None => Pk::Str(op.id.clone()),
                };
                let view_index = view.iter().position(|row| model.pk_of(row).as_ref() == Some(&synthetic_pk));
                state.ops.remove(op_index);
                let item = server_data.unwrap_or(data);
                let index = view_index.unwrap_or(state.ground_truth.len());
                Self::insert_ground_truth(state, model, index, item);
            }
            OpKind::Update { key, data } => {
                state.ops.remove(op_index);
                let partial = server_data.unwrap_or(data);
                // Merge only if the row still exists; don't resurrect
                if let Some(&index) = state.pk_index.get(&key) {
                    merge_fields(&mut state.ground_truth[index], &partial);
                }
            }
            OpKind::Delete { key } => {
                state.ops.remove(op_index);
                Self::remove_ground_truth(state, model, &key);
            }
        }
        state.view = None;
        true
    }

    fn insert_ground_truth(state: &mut State, model: &ModelType, index: usize, item: Instance) -> bool {
        if let Some(pk) = model.pk_of(&item) {
            if let Some(&existing) = state.pk_index.get(&pk) {
                merge_fields(&mut state.ground_truth[existing], &item);
                state.view = None;
                return false;
            }
        }
        let index = index.min(state.ground_truth.len());
        state.ground_truth.insert(index, item);
        Self::reindex(state, model);
        state.view = None;
        true
    }

    fn remove_ground_truth(state: &mut State, model: &ModelType, key: &Pk) -> bool {
        match state.pk_index.get(key) {
            Some(&index) => {
                state.ground_truth.remove(index);
                Self::reindex(state, model);
                state.view = None;
                true
            }
            None => false,
        }
    }

    fn reindex(state: &mut State, model: &ModelType) {
        state.pk_index =
            state.ground_truth.iter().enumerate().filter_map(|(index, row)| model.pk_of(row).map(|pk| (pk, index))).collect();
    }
}
