//! Observable, filterable windows over a shared ground truth. A root view
//! owns a SyncedArray, registers under a namespace and receives server
//! events; filtered children share the root's array and conjoin predicates.
//! Change notifications flow from the array to every attached view through a
//! shared pipeline; each view re-filters the window and notifies its own
//! subscribers only when its window observably changed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};
use vantage_proto::{EventKind, ModelEvent, Namespace, OperationId, Pk};

use crate::{
    broadcast::{Broadcast, IntoListener, SubscriptionGuard},
    changes::{ChangeOrigin, ChangeSet},
    error::{MutationError, RetrievalError},
    filter::Filter,
    metrics::{Metric, MetricKind, MetricsManager},
    model::{Instance, ModelType},
    operation::{InsertPolicy, Position},
    overfetch::OverfetchCache,
    queryset::QuerySet,
    registry::Registry,
    synced_array::SyncedArray,
    task,
    transport::{EventReceiver, QueryExecutor, SerializerOptions},
};

/// Lifecycle of a view. Only `Active` accepts mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Initializing,
    Active,
    Destroyed,
}

/// Construction options for a root view.
#[derive(Clone)]
pub struct LiveViewOptions {
    pub model: ModelType,
    pub filter: Filter,
    pub options: SerializerOptions,
    pub insert: InsertPolicy,
    /// Size of the replenishment pool; 0 disables it. Only effective when
    /// `options.limit` fixes the page size.
    pub overfetch_size: usize,
    /// Appended to the model name when resolving the namespace
    pub namespace_suffix: Option<String>,
}

impl LiveViewOptions {
    pub fn new(model: ModelType) -> Self {
        Self {
            model,
            filter: Filter::new(),
            options: SerializerOptions::default(),
            insert: InsertPolicy::default(),
            overfetch_size: 0,
            namespace_suffix: None,
        }
    }
}

#[derive(Clone)]
pub struct LiveView(Arc<Inner>);

pub struct WeakLiveView(Weak<Inner>);

impl Clone for WeakLiveView {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl WeakLiveView {
    pub fn upgrade(&self) -> Option<LiveView> { self.0.upgrade().map(LiveView) }
}

struct Inner {
    model: ModelType,
    registry: Registry,
    receiver: Arc<dyn EventReceiver>,
    qs: Mutex<QuerySet>,
    /// Cumulative local predicate: the root's conditions conjoined with every
    /// ancestor filter on the way down
    filter: Filter,
    options: Mutex<SerializerOptions>,
    insert: InsertPolicy,
    synced: SyncedArray,
    metrics: MetricsManager,
    overfetch: Mutex<Option<OverfetchCache>>,
    /// pks created by this client and not yet reconciled; shared between the
    /// root and its children
    created_items: Arc<Mutex<HashSet<Pk>>>,
    subscribers: Broadcast<ChangeSet>,
    errors: Broadcast<MutationError>,
    state: Mutex<ViewState>,
    namespace: Mutex<Namespace>,
    namespace_suffix: Option<String>,
    parent: Option<WeakLiveView>,
    is_root: bool,
    /// This view's window as of the last pipeline notification
    last_window: Mutex<Arc<Vec<Instance>>>,
    pipeline_guard: Mutex<Option<SubscriptionGuard>>,
}

impl LiveView {
    /// Open a root view: fetch the initial window, register the namespace,
    /// and start the replenishment pool if configured.
    pub(crate) async fn open(
        registry: Registry,
        receiver: Arc<dyn EventReceiver>,
        executor: Arc<dyn QueryExecutor>,
        options: LiveViewOptions,
    ) -> Result<LiveView, RetrievalError> {
        let qs = QuerySet::new(options.model.clone(), executor).filter(options.filter.clone()).with_options(options.options.clone());
        let synced = SyncedArray::new(options.model.clone());
        let namespace = Namespace::resolve(&options.model.name, options.namespace_suffix.as_deref());

        let view = LiveView(Arc::new(Inner {
            model: options.model,
            registry: registry.clone(),
            receiver: receiver.clone(),
            qs: Mutex::new(qs.clone()),
            filter: options.filter,
            options: Mutex::new(options.options),
            insert: options.insert,
            synced,
            metrics: MetricsManager::new(),
            overfetch: Mutex::new(None),
            created_items: Arc::new(Mutex::new(HashSet::new())),
            subscribers: Broadcast::new(),
            errors: Broadcast::new(),
            state: Mutex::new(ViewState::Initializing),
            namespace: Mutex::new(namespace.clone()),
            namespace_suffix: options.namespace_suffix,
            parent: None,
            is_root: true,
            last_window: Mutex::new(Arc::new(Vec::new())),
            pipeline_guard: Mutex::new(None),
        }));
        view.attach_pipeline();

        let first = registry.register(namespace.clone(), view.weak());
        if first {
            if let Err(e) = receiver.subscribe(&namespace).await {
                registry.unregister(&namespace, &view);
                return Err(RetrievalError::Transport(e));
            }
        }

        let rows = match qs.fetch().await {
            Ok(rows) => rows,
            Err(e) => {
                let last = registry.unregister(&namespace, &view);
                if last {
                    let receiver = receiver.clone();
                    task::spawn(async move {
                        if let Err(e) = receiver.unsubscribe(&namespace).await {
                            warn!("unsubscribe {} failed: {}", namespace, e);
                        }
                    });
                }
                return Err(e);
            }
        };
        view.0.synced.reset_ground_truth(rows, true);

        if options.overfetch_size > 0 && view.0.options.lock().unwrap().limit.is_some() {
            let serializer = view.0.options.lock().unwrap().clone();
            let cache = OverfetchCache::new(qs, serializer, options.overfetch_size, view.0.synced.clone());
            cache.initialize().await;
            *view.0.overfetch.lock().unwrap() = Some(cache);
        }

        *view.0.state.lock().unwrap() = ViewState::Active;
        debug!("live view opened for {} on {}", view.0.model, namespace);
        Ok(view)
    }

    pub fn weak(&self) -> WeakLiveView { WeakLiveView(Arc::downgrade(&self.0)) }

    /// Pointer identity; views are equal only when they are the same view.
    pub fn same(&self, other: &LiveView) -> bool { Arc::ptr_eq(&self.0, &other.0) }

    pub fn model(&self) -> &ModelType { &self.0.model }

    pub fn namespace(&self) -> Namespace { self.0.namespace.lock().unwrap().clone() }

    pub fn state(&self) -> ViewState { *self.0.state.lock().unwrap() }

    pub fn is_root(&self) -> bool { self.0.is_root }

    pub fn synced_array(&self) -> &SyncedArray { &self.0.synced }

    pub fn metrics(&self) -> &MetricsManager { &self.0.metrics }

    pub fn overfetch(&self) -> Option<OverfetchCache> { self.0.overfetch.lock().unwrap().clone() }

    pub fn queryset(&self) -> QuerySet { self.0.qs.lock().unwrap().clone() }

    /// pks this client created locally and has not yet reconciled.
    pub fn created_items(&self) -> HashSet<Pk> { self.0.created_items.lock().unwrap().clone() }

    // ---- subscriptions ----------------------------------------------------

    /// Subscribe to window changes: `(view, previous, origin)`.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionGuard
    where L: IntoListener<ChangeSet> {
        self.0.subscribers.listen(listener)
    }

    /// Subscribe to mutation failures surfaced by this view or its children.
    pub fn on_error<L>(&self, listener: L) -> SubscriptionGuard
    where L: IntoListener<MutationError> {
        self.0.errors.listen(listener)
    }

    // ---- reads ------------------------------------------------------------

    /// Read-only snapshot of the filtered window.
    pub fn fetch(&self) -> Vec<Instance> { self.window() }

    pub fn first(&self) -> Option<Instance> { self.window().first().cloned() }

    pub fn last(&self) -> Option<Instance> { self.window().last().cloned() }

    pub fn len(&self) -> usize { self.window().len() }

    pub fn is_empty(&self) -> bool { self.window().is_empty() }

    /// Exactly-one lookup: the local window first, the server second. A row
    /// fetched from the server joins ground truth only if it matches this
    /// view's predicate.
    pub async fn get(&self, conditions: Filter) -> Result<Instance, RetrievalError> {
        let mut matches: Vec<Instance> = self.window().into_iter().filter(|row| conditions.matches(row)).collect();
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => {
                let fetched = self.queryset().get(conditions).await?;
                if self.0.filter.matches(&fetched) {
                    self.0.synced.create_direct(self.0.insert.remote.clone(), fetched.clone(), None);
                    Ok(fetched)
                } else {
                    Err(RetrievalError::DoesNotExist)
                }
            }
            n => Err(RetrievalError::MultipleObjectsReturned(n)),
        }
    }

    /// A filtered child sharing this view's ground truth. Children register
    /// nothing; the root's notifications reach them through the shared
    /// pipeline.
    pub fn filter(&self, conditions: Filter) -> LiveView {
        let window = {
            let filter = self.0.filter.and(&conditions);
            Arc::new(self.0.synced.view().iter().filter(|row| filter.matches(row)).cloned().collect::<Vec<_>>())
        };
        let child = LiveView(Arc::new(Inner {
            model: self.0.model.clone(),
            registry: self.0.registry.clone(),
            receiver: self.0.receiver.clone(),
            qs: Mutex::new(self.queryset().filter(conditions.clone())),
            filter: self.0.filter.and(&conditions),
            options: Mutex::new(self.0.options.lock().unwrap().clone()),
            insert: self.0.insert.clone(),
            synced: self.0.synced.clone(),
            metrics: MetricsManager::new(),
            overfetch: Mutex::new(None),
            created_items: self.0.created_items.clone(),
            subscribers: Broadcast::new(),
            errors: Broadcast::new(),
            state: Mutex::new(ViewState::Active),
            namespace: Mutex::new(self.namespace()),
            namespace_suffix: self.0.namespace_suffix.clone(),
            parent: Some(self.weak()),
            is_root: false,
            last_window: Mutex::new(window),
            pipeline_guard: Mutex::new(None),
        }));
        child.attach_pipeline();
        child
    }

    // ---- mutations --------------------------------------------------------

    /// Create a row. The synthetic row appears at the local insert position
    /// immediately; on acceptance it is replaced in place by the server's
    /// echo, and its pk is remembered as locally created.
    pub async fn create(&self, data: Instance) -> Result<Instance, MutationError> {
        self.ensure_active()?;
        let operation_id = OperationId::new().to_string();
        self.0.synced.create_optimistic(operation_id.clone(), self.0.insert.local.clone(), data.clone());
        let _active = self.0.registry.operation_guard(operation_id.clone());

        match self.queryset().create(data, &operation_id, &self.namespace()).await {
            Ok(server_item) => {
                if self.destroyed() {
                    return Ok(server_item);
                }
                self.0.synced.confirm_optimistic_op(&operation_id, Some(server_item.clone()));
                if let Some(pk) = self.0.model.pk_of(&server_item) {
                    self.0.created_items.lock().unwrap().insert(pk);
                }
                self.0.metrics.schedule_refresh(self.queryset());
                Ok(server_item)
            }
            Err(error) => {
                self.0.synced.remove_optimistic_op(&operation_id);
                self.emit_error(&error);
                Err(error)
            }
        }
    }

    /// Apply a partial update to every row in the window. All staged ops
    /// share one operation id for grouped confirmation and rollback.
    pub async fn update(&self, updates: Instance) -> Result<Vec<Instance>, MutationError> {
        self.ensure_active()?;
        if updates.contains_key(&self.0.model.pk_field) {
            return Err(MutationError::InvalidArguments("updates must not touch the primary key"));
        }
        let operation = OperationId::new();
        let group = operation.to_string();
        let keys: Vec<Pk> = self.window().iter().filter_map(|row| self.0.model.pk_of(row)).collect();

        let staged: Vec<(String, Pk, Instance)> =
            keys.iter().enumerate().map(|(n, key)| (operation.member(n), key.clone(), updates.clone())).collect();
        let ids: Vec<String> = staged.iter().map(|(id, _, _)| id.clone()).collect();
        self.0.synced.bulk_update_optimistic(&group, staged);
        let _active = self.0.registry.operation_guard(group.clone());

        match self.queryset().update(updates, &group, &self.namespace()).await {
            Ok(server_rows) => {
                if self.destroyed() {
                    return Ok(server_rows);
                }
                let by_pk: Vec<(Pk, Instance)> =
                    server_rows.iter().filter_map(|row| self.0.model.pk_of(row).map(|pk| (pk, row.clone()))).collect();
                let items: Vec<(String, Option<Instance>)> = ids
                    .iter()
                    .zip(keys.iter())
                    .map(|(id, key)| {
                        let echo = by_pk.iter().find(|(pk, _)| pk == key).map(|(_, row)| row.clone());
                        (id.clone(), echo)
                    })
                    .collect();
                self.0.synced.bulk_confirm_optimistic_ops(&group, items);
                self.0.metrics.schedule_refresh(self.queryset());
                let updated = keys.iter().filter_map(|key| self.0.synced.get(key)).collect();
                Ok(updated)
            }
            Err(error) => {
                self.0.synced.bulk_remove_optimistic_ops(&group, &ids);
                self.emit_error(&error);
                Err(error)
            }
        }
    }

    /// Delete every row in the window. Returns the number of rows removed.
    /// Bulk deletions schedule a ghost sweep to reconcile rows the server
    /// removed beyond the local page.
    pub async fn delete(&self) -> Result<usize, MutationError> {
        self.ensure_active()?;
        let operation = OperationId::new();
        let group = operation.to_string();
        let keys: Vec<Pk> = self.window().iter().filter_map(|row| self.0.model.pk_of(row)).collect();

        let staged: Vec<(String, Pk)> = keys.iter().enumerate().map(|(n, key)| (operation.member(n), key.clone())).collect();
        let ids: Vec<String> = staged.iter().map(|(id, _)| id.clone()).collect();
        self.0.synced.bulk_delete_optimistic(&group, staged);
        let _active = self.0.registry.operation_guard(group.clone());

        match self.queryset().delete(&group, &self.namespace()).await {
            Ok(server_count) => {
                if self.destroyed() {
                    return Ok(keys.len());
                }
                let items = ids.iter().map(|id| (id.clone(), None)).collect();
                self.0.synced.bulk_confirm_optimistic_ops(&group, items);
                self.root().refill_from_overfetch(keys.len());
                self.0.metrics.schedule_refresh(self.queryset());
                if keys.len() > 1 {
                    self.spawn_ghost_sweep();
                }
                Ok(server_count.map(|n| n as usize).unwrap_or(keys.len()))
            }
            Err(error) => {
                self.0.synced.bulk_remove_optimistic_ops(&group, &ids);
                self.emit_error(&error);
                Err(error)
            }
        }
    }

    /// Re-point the root view at a new queryset and/or options. Rejects a
    /// model change. With `clear_data`, the window is refetched and ground
    /// truth replaced.
    pub async fn refresh(&self, new_qs: Option<QuerySet>, new_options: Option<SerializerOptions>, clear_data: bool) -> Result<(), MutationError> {
        self.ensure_active()?;
        if !self.0.is_root {
            return Err(MutationError::InvalidArguments("refresh is only available on the root view"));
        }
        if let Some(qs) = new_qs {
            if *qs.model() != self.0.model {
                return Err(MutationError::ModelMismatch { expected: self.0.model.name.clone(), actual: qs.model().name.clone() });
            }
            *self.0.qs.lock().unwrap() = qs;
        }
        if let Some(options) = new_options {
            let qs = self.0.qs.lock().unwrap().clone().with_options(options.clone());
            *self.0.qs.lock().unwrap() = qs;
            *self.0.options.lock().unwrap() = options;
        }

        // Same model, same suffix: the namespace cannot actually move, but
        // re-registering keeps the registry entry fresh
        let namespace = Namespace::resolve(&self.0.model.name, self.0.namespace_suffix.as_deref());
        let previous = self.namespace();
        if namespace != previous {
            let last = self.0.registry.unregister(&previous, self);
            if last {
                let receiver = self.0.receiver.clone();
                let stale = previous.clone();
                task::spawn(async move {
                    if let Err(e) = receiver.unsubscribe(&stale).await {
                        warn!("unsubscribe {} failed: {}", stale, e);
                    }
                });
            }
            let first = self.0.registry.register(namespace.clone(), self.weak());
            if first {
                self.0.receiver.subscribe(&namespace).await.map_err(MutationError::Transport)?;
            }
            *self.0.namespace.lock().unwrap() = namespace;
        }

        if clear_data {
            let rows = self.queryset().fetch().await.map_err(MutationError::from)?;
            if self.destroyed() {
                return Ok(());
            }
            self.0.synced.reset_ground_truth(rows, true);
        }

        // Rebuild the replenishment pool against the new window
        let cache = self.overfetch();
        if let Some(cache) = cache {
            let options = self.0.options.lock().unwrap().clone();
            if options.limit.is_some() {
                cache.reset(Some(self.queryset()), Some(options), None).await?;
            } else {
                *self.0.overfetch.lock().unwrap() = None;
            }
        }
        Ok(())
    }

    /// Tear the view down. Idempotent. Pending I/O completions become no-ops;
    /// the last root for a namespace asks the receiver to unsubscribe.
    pub fn destroy(&self) {
        {
            let mut state = self.0.state.lock().unwrap();
            if *state == ViewState::Destroyed {
                return;
            }
            *state = ViewState::Destroyed;
        }
        self.0.subscribers.clear();
        self.0.errors.clear();
        *self.0.pipeline_guard.lock().unwrap() = None;

        if self.0.is_root {
            let namespace = self.namespace();
            let last = self.0.registry.unregister(&namespace, self);
            if last {
                let receiver = self.0.receiver.clone();
                let namespace_for_task = namespace.clone();
                task::spawn(async move {
                    if let Err(e) = receiver.unsubscribe(&namespace_for_task).await {
                        warn!("unsubscribe {} failed: {}", namespace_for_task, e);
                    }
                });
            }
            debug!("live view destroyed for {}", namespace);
        }
    }

    // ---- metrics ----------------------------------------------------------

    pub async fn count(&self) -> Result<Metric, RetrievalError> {
        self.0.metrics.aggregate(&self.queryset(), MetricKind::Count, None).await
    }

    pub async fn sum(&self, field: &str) -> Result<Metric, RetrievalError> {
        self.0.metrics.aggregate(&self.queryset(), MetricKind::Sum, Some(field)).await
    }

    pub async fn avg(&self, field: &str) -> Result<Metric, RetrievalError> {
        self.0.metrics.aggregate(&self.queryset(), MetricKind::Avg, Some(field)).await
    }

    pub async fn min(&self, field: &str) -> Result<Metric, RetrievalError> {
        self.0.metrics.aggregate(&self.queryset(), MetricKind::Min, Some(field)).await
    }

    pub async fn max(&self, field: &str) -> Result<Metric, RetrievalError> {
        self.0.metrics.aggregate(&self.queryset(), MetricKind::Max, Some(field)).await
    }

    // ---- event dispatch hooks (root views only) ----------------------------

    /// Bookkeeping that runs for every event on this namespace+model, before
    /// self-echo suppression: metric refresh and pool maintenance.
    pub(crate) fn on_remote_event(&self, kind: EventKind, pks: &[Pk]) {
        self.0.metrics.schedule_refresh(self.queryset());
        if let Some(cache) = self.overfetch() {
            cache.handle_model_event(kind, pks);
        }
    }

    /// Apply a non-echo server event to ground truth. Server events are
    /// truth: all mutations here are direct.
    pub(crate) async fn apply_remote_event(&self, kind: EventKind, event: &ModelEvent, pks: &[Pk]) {
        if self.destroyed() {
            return;
        }
        let origin = event.operation_id.as_deref();
        match kind {
            EventKind::Create => {
                let Some(pk) = pks.first() else { return };
                match self.queryset().get(Filter::pk_eq(&self.0.model.pk_field, pk)).await {
                    Ok(row) => {
                        if self.0.filter.matches(&row) {
                            self.0.synced.create_direct(self.0.insert.remote.clone(), row, origin);
                        }
                    }
                    Err(RetrievalError::DoesNotExist) => debug!("create event for {} vanished before fetch", pk),
                    Err(e) => warn!("create event fetch failed: {}", e),
                }
            }
            EventKind::Update => {
                let Some(pk) = pks.first() else { return };
                match self.queryset().first(Filter::pk_eq(&self.0.model.pk_field, pk)).await {
                    Ok(Some(row)) => {
                        if self.0.filter.matches(&row) {
                            // Safe add: merges when the row is already in
                            // ground truth, inserts when it drifted in
                            self.0.synced.create_direct(self.0.insert.remote.clone(), row, origin);
                        } else if !self.locally_created(pk) {
                            let removed = self.0.synced.delete_direct(pk, origin);
                            if removed {
                                self.refill_from_overfetch(1);
                            }
                        }
                    }
                    Ok(None) => {
                        if !self.locally_created(pk) {
                            let removed = self.0.synced.delete_direct(pk, origin);
                            if removed {
                                self.refill_from_overfetch(1);
                            }
                        }
                    }
                    Err(e) => warn!("update event fetch failed: {}", e),
                }
            }
            EventKind::Delete => {
                let Some(pk) = pks.first() else { return };
                if self.0.synced.delete_direct(pk, origin) {
                    self.refill_from_overfetch(1);
                }
            }
            EventKind::BulkCreate | EventKind::BulkUpdate => {
                if pks.is_empty() {
                    return;
                }
                let fetched = match self.queryset().filter(Filter::pk_in(&self.0.model.pk_field, pks.to_vec())).fetch().await {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!("bulk event fetch failed: {}", e);
                        return;
                    }
                };
                let mut upserts = Vec::new();
                let mut fetched_pks = HashSet::new();
                for row in fetched {
                    let Some(pk) = self.0.model.pk_of(&row) else { continue };
                    if self.0.filter.matches(&row) {
                        fetched_pks.insert(pk);
                        upserts.push((self.0.insert.remote.clone(), row));
                    }
                }
                let stale: Vec<Pk> =
                    pks.iter().filter(|pk| !fetched_pks.contains(*pk) && !self.locally_created(pk)).cloned().collect();
                if !upserts.is_empty() {
                    self.0.synced.bulk_create_direct(upserts, origin);
                }
                if !stale.is_empty() {
                    let removed = self.0.synced.bulk_delete_direct(&stale, origin);
                    if removed > 0 {
                        self.refill_from_overfetch(removed);
                    }
                }
            }
            EventKind::BulkDelete => {
                let removed = self.0.synced.bulk_delete_direct(pks, origin);
                if removed > 0 {
                    self.refill_from_overfetch(removed);
                }
            }
        }
    }

    // ---- internals --------------------------------------------------------

    /// The current filtered window.
    fn window(&self) -> Vec<Instance> {
        if self.0.filter.is_empty() {
            return self.0.synced.view().as_ref().clone();
        }
        self.0.synced.view().iter().filter(|row| self.0.filter.matches(row)).cloned().collect()
    }

    fn attach_pipeline(&self) {
        let weak = self.weak();
        let guard = self.0.synced.subscribe(move |change: &ChangeSet| {
            if let Some(view) = weak.upgrade() {
                view.on_array_change(change);
            }
        });
        *self.0.pipeline_guard.lock().unwrap() = Some(guard);
    }

    /// Pipeline step: re-filter the array's view into this view's window and
    /// notify subscribers when the window observably changed. Optimistic
    /// origins additionally drive metric delta math.
    fn on_array_change(&self, change: &ChangeSet) {
        if self.destroyed() {
            return;
        }
        let window: Arc<Vec<Instance>> = if self.0.filter.is_empty() {
            change.view.clone()
        } else {
            Arc::new(change.view.iter().filter(|row| self.0.filter.matches(row)).cloned().collect())
        };
        let previous = {
            let mut last = self.0.last_window.lock().unwrap();
            std::mem::replace(&mut *last, window.clone())
        };
        if *window == *previous {
            return;
        }
        match &change.origin {
            // Pending ops move the window now; metrics follow with delta math.
            // The phase-qualified key keeps a rollback from being swallowed by
            // the dedup entry its optimistic phase recorded.
            ChangeOrigin::Optimistic { operation_id, .. } => {
                let updates = self.0.metrics.optimistic_update(&self.0.model, &window, &previous);
                self.0.metrics.apply_optimistic_updates(updates, &format!("optimistic:{operation_id}"));
            }
            ChangeOrigin::Rollback { operation_id } => {
                let updates = self.0.metrics.optimistic_update(&self.0.model, &window, &previous);
                self.0.metrics.apply_optimistic_updates(updates, &format!("rollback:{operation_id}"));
            }
            // Ground truth moved; the server is the only authority on what
            // the aggregates are now
            ChangeOrigin::Confirm { .. } | ChangeOrigin::Remote { .. } | ChangeOrigin::Reset => {
                self.0.metrics.schedule_refresh(self.queryset());
            }
        }
        self.0.subscribers.send(&ChangeSet { view: window, previous, origin: change.origin.clone() });
    }

    fn destroyed(&self) -> bool { *self.0.state.lock().unwrap() == ViewState::Destroyed }

    fn ensure_active(&self) -> Result<(), MutationError> {
        if self.state() != ViewState::Active {
            return Err(MutationError::DestroyedView);
        }
        if let Some(parent) = &self.0.parent {
            match parent.upgrade() {
                Some(parent) => parent.ensure_active()?,
                None => return Err(MutationError::DestroyedView),
            }
        }
        Ok(())
    }

    fn locally_created(&self, pk: &Pk) -> bool { self.0.created_items.lock().unwrap().contains(pk) }

    fn emit_error(&self, error: &MutationError) {
        self.0.errors.send(error);
        // Errors propagate up the parent chain
        if let Some(parent) = &self.0.parent {
            if let Some(parent) = parent.upgrade() {
                parent.emit_error(error);
            }
        }
    }

    fn root(&self) -> LiveView {
        match &self.0.parent {
            Some(parent) => match parent.upgrade() {
                Some(parent) => parent.root(),
                None => self.clone(),
            },
            None => self.clone(),
        }
    }

    /// Pull up to `k` rows out of the replenishment pool into the window.
    fn refill_from_overfetch(&self, k: usize) {
        if k == 0 {
            return;
        }
        let root = self.root();
        let Some(cache) = root.overfetch() else { return };
        let replacements = cache.get_replacements(k);
        if replacements.is_empty() {
            return;
        }
        let items = replacements.into_iter().map(|row| (Position::Append, row)).collect();
        root.0.synced.bulk_create_direct(items, None);
    }

    /// After a bulk delete, reconcile the root window against the server's pk
    /// list: any row still rendered that the server no longer has (and that
    /// this client did not just create) is a ghost.
    fn spawn_ghost_sweep(&self) {
        let view = self.root();
        task::spawn(async move {
            let qs = view.queryset().only(vec![view.0.model.pk_field.clone()]);
            match qs.fetch().await {
                Ok(rows) => {
                    if view.destroyed() {
                        return;
                    }
                    let remote: HashSet<Pk> = rows.iter().filter_map(|row| view.0.model.pk_of(row)).collect();
                    let created = view.created_items();
                    let ghosts: Vec<Pk> = view
                        .window()
                        .iter()
                        .filter_map(|row| view.0.model.pk_of(row))
                        .filter(|pk| !remote.contains(pk) && !created.contains(pk))
                        .collect();
                    if !ghosts.is_empty() {
                        debug!("ghost sweep removing {} rows", ghosts.len());
                        view.0.synced.bulk_delete_direct(&ghosts, None);
                    }
                }
                Err(e) => warn!("ghost sweep fetch failed: {}", e),
            }
        });
    }
}
