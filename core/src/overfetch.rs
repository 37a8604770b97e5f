//! Replenishment pool for fixed-size windows. Holds the next items ranked by
//! the same order as the main view and excluded by its pks, so deletions can
//! be refilled without a round trip. Refreshes run in the background,
//! debounced and mutually exclusive.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tracing::{debug, warn};
use vantage_proto::{EventKind, Pk};

use crate::{
    debounce::Debouncer,
    error::{MutationError, RetrievalError},
    filter::Filter,
    model::{Instance, ModelType},
    queryset::QuerySet,
    synced_array::SyncedArray,
    transport::SerializerOptions,
};

const REFRESH_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Clone)]
pub struct OverfetchCache(Arc<Inner>);

struct Inner {
    /// The main array, observed by reference; cached pks stay disjoint from
    /// its view pks as of the last refresh
    main: SyncedArray,
    qs: Mutex<QuerySet>,
    options: Mutex<SerializerOptions>,
    cache_size: Mutex<usize>,
    cache: Mutex<Vec<Instance>>,
    refresher: OnceLock<Debouncer>,
}

impl OverfetchCache {
    pub fn new(qs: QuerySet, options: SerializerOptions, cache_size: usize, main: SyncedArray) -> Self {
        Self(Arc::new(Inner {
            main,
            qs: Mutex::new(qs),
            options: Mutex::new(options),
            cache_size: Mutex::new(cache_size),
            cache: Mutex::new(Vec::new()),
            refresher: OnceLock::new(),
        }))
    }

    pub fn model(&self) -> ModelType { self.0.qs.lock().unwrap().model().clone() }

    pub fn len(&self) -> usize { self.0.cache.lock().unwrap().len() }

    /// Snapshot of the pooled rows.
    pub fn items(&self) -> Vec<Instance> { self.0.cache.lock().unwrap().clone() }

    pub fn is_empty(&self) -> bool { self.0.cache.lock().unwrap().is_empty() }

    pub fn cache_size(&self) -> usize { *self.0.cache_size.lock().unwrap() }

    /// Initial fill. Runs immediately, subject to the same exclusion as the
    /// debounced refreshes.
    pub async fn initialize(&self) { self.refresher().run_now().await }

    /// Re-fetch the pool in the background after the debounce window.
    pub fn schedule_refresh(&self) { self.refresher().schedule(); }

    /// Bookkeeping for a server event on this model.
    pub fn handle_model_event(&self, kind: EventKind, pks: &[Pk]) {
        match kind {
            EventKind::Create | EventKind::BulkCreate => {
                // New rows may rank inside the pool's window
                if self.len() < self.cache_size() {
                    self.schedule_refresh();
                }
            }
            EventKind::Delete | EventKind::BulkDelete => {
                let intersected = self.remove_pks(pks);
                if intersected {
                    self.schedule_refresh();
                }
            }
            EventKind::Update | EventKind::BulkUpdate => {
                if self.intersects(pks) {
                    self.schedule_refresh();
                }
            }
        }
    }

    /// Take up to `n` items off the front of the pool, for refilling the main
    /// window. Rows that drifted into the main view since the last refresh
    /// are discarded first; they must never surface as replacements.
    pub fn get_replacements(&self, n: usize) -> Vec<Instance> {
        let model = self.model();
        let main_pks: HashSet<Pk> = self.0.main.view_pks().into_iter().collect();
        let replacements = {
            let mut cache = self.0.cache.lock().unwrap();
            cache.retain(|row| match model.pk_of(row) {
                Some(pk) => !main_pks.contains(&pk),
                None => false,
            });
            let take = n.min(cache.len());
            cache.drain(..take).collect::<Vec<_>>()
        };
        if self.len() * 2 < self.cache_size() {
            self.schedule_refresh();
        }
        replacements
    }

    /// Re-point the cache at a new queryset/options/size. The pool is cleared
    /// in place and refilled. Fails when the new queryset targets a different
    /// model.
    pub async fn reset(
        &self,
        new_qs: Option<QuerySet>,
        new_options: Option<SerializerOptions>,
        new_cache_size: Option<usize>,
    ) -> Result<(), MutationError> {
        if let Some(qs) = new_qs {
            let expected = self.model();
            if *qs.model() != expected {
                return Err(MutationError::ModelMismatch { expected: expected.name, actual: qs.model().name.clone() });
            }
            *self.0.qs.lock().unwrap() = qs;
        }
        if let Some(options) = new_options {
            *self.0.options.lock().unwrap() = options;
        }
        if let Some(size) = new_cache_size {
            *self.0.cache_size.lock().unwrap() = size;
        }
        self.0.cache.lock().unwrap().clear();
        self.initialize().await;
        Ok(())
    }

    // ---- internals --------------------------------------------------------

    fn refresher(&self) -> &Debouncer {
        self.0.refresher.get_or_init(|| {
            let weak = Arc::downgrade(&self.0);
            Debouncer::new(
                REFRESH_DEBOUNCE,
                Arc::new(move || -> futures::future::BoxFuture<'static, ()> {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            OverfetchCache(inner).refresh().await;
                        }
                    })
                }),
            )
        })
    }

    async fn refresh(&self) {
        match self.fetch_pool().await {
            Ok(items) => {
                debug!("overfetch pool refreshed with {} items", items.len());
                let mut cache = self.0.cache.lock().unwrap();
                cache.clear();
                cache.extend(items);
            }
            Err(e) => warn!("overfetch refresh failed: {}", e),
        }
    }

    /// The pool query: same filters and order as the main view, excluding
    /// every pk currently rendered, limited to the pool size.
    async fn fetch_pool(&self) -> Result<Vec<Instance>, RetrievalError> {
        let (qs, options, size) = {
            let qs = self.0.qs.lock().unwrap().clone();
            let options = self.0.options.lock().unwrap().clone();
            let size = *self.0.cache_size.lock().unwrap();
            (qs, options, size)
        };
        let model = qs.model().clone();
        let main_pks = self.0.main.view_pks();
        let mut options = options;
        options.limit = Some(size);
        options.offset = None;
        qs.exclude(Filter::pk_in(&model.pk_field, main_pks)).with_options(options).fetch().await
    }

    fn intersects(&self, pks: &[Pk]) -> bool {
        let model = self.model();
        let cache = self.0.cache.lock().unwrap();
        cache.iter().any(|row| model.pk_of(row).map(|pk| pks.contains(&pk)).unwrap_or(false))
    }

    /// Drop the named pks from the pool. Returns whether any were present.
    fn remove_pks(&self, pks: &[Pk]) -> bool {
        let model = self.model();
        let mut cache = self.0.cache.lock().unwrap();
        let before = cache.len();
        cache.retain(|row| match model.pk_of(row) {
            Some(pk) => !pks.contains(&pk),
            None => false,
        });
        cache.len() != before
    }
}
