//! Process-wide shared state: the namespace registry routing server events to
//! root views, and the active-operation-id set used to suppress self-echoes.
//! Locks here are only ever held briefly; never across an await.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use vantage_proto::Namespace;

use crate::liveview::{LiveView, WeakLiveView};

#[derive(Clone, Default)]
pub struct Registry(Arc<RegistryInner>);

#[derive(Default)]
struct RegistryInner {
    views: DashMap<Namespace, Vec<WeakLiveView>>,
    active_operations: DashSet<String>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    /// Register a root view under a namespace. Returns true when this is the
    /// first registrant, i.e. the event receiver should subscribe the channel.
    pub fn register(&self, namespace: Namespace, view: WeakLiveView) -> bool {
        let mut entry = self.0.views.entry(namespace).or_default();
        entry.retain(|weak| weak.upgrade().is_some());
        let first = entry.is_empty();
        entry.push(view);
        first
    }

    /// Remove a view from a namespace. Returns true when the namespace is now
    /// empty, i.e. the event receiver may unsubscribe the channel.
    pub fn unregister(&self, namespace: &Namespace, view: &LiveView) -> bool {
        let empty = match self.0.views.get_mut(namespace) {
            Some(mut entry) => {
                entry.retain(|weak| match weak.upgrade() {
                    Some(live) => !live.same(view),
                    None => false,
                });
                entry.is_empty()
            }
            None => return true,
        };
        if empty {
            self.0.views.remove(namespace);
        }
        empty
    }

    /// The live root views registered under a namespace.
    pub fn views_for(&self, namespace: &Namespace) -> Vec<LiveView> {
        match self.0.views.get(namespace) {
            Some(entry) => entry.iter().filter_map(|weak| weak.upgrade()).collect(),
            None => Vec::new(),
        }
    }

    // ---- active operation ids --------------------------------------------

    pub fn begin_operation(&self, operation_id: String) { self.0.active_operations.insert(operation_id); }

    pub fn end_operation(&self, operation_id: &str) -> bool { self.0.active_operations.remove(operation_id).is_some() }

    /// True while a local mutation with this id is in flight; events echoing
    /// it back are already reflected optimistically.
    pub fn operation_active(&self, operation_id: &str) -> bool { self.0.active_operations.contains(operation_id) }

    /// RAII wrapper: the operation id stays active until the guard drops.
    pub fn operation_guard(&self, operation_id: String) -> OperationGuard {
        self.begin_operation(operation_id.clone());
        OperationGuard { registry: self.clone(), operation_id }
    }
}

pub struct OperationGuard {
    registry: Registry,
    operation_id: String,
}

impl Drop for OperationGuard {
    fn drop(&mut self) { self.registry.end_operation(&self.operation_id); }
}
