//! Per-view aggregates with optimistic delta updates. Each metric holds the
//! last value fetched from the server; while a view window changes
//! optimistically, count/sum/min/max are adjusted with delta math so the UI
//! moves instantly, and a debounced full refresh converges everything to
//! server truth. `avg` has no exact delta form and always waits for refresh.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::{
    broadcast::{Broadcast, IntoListener, SubscriptionGuard},
    collation,
    debounce::Debouncer,
    error::RetrievalError,
    model::{Instance, ModelType},
    queryset::QuerySet,
    transport::QueryKind,
};

const REFRESH_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl MetricKind {
    fn query_kind(&self) -> QueryKind {
        match self {
            MetricKind::Count => QueryKind::Count,
            MetricKind::Sum => QueryKind::Sum,
            MetricKind::Avg => QueryKind::Avg,
            MetricKind::Min => QueryKind::Min,
            MetricKind::Max => QueryKind::Max,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricKind::Count => "count",
            MetricKind::Sum => "sum",
            MetricKind::Avg => "avg",
            MetricKind::Min => "min",
            MetricKind::Max => "max",
        };
        write!(f, "{s}")
    }
}

/// Identity of a metric within a view: `kind:field` (field empty for count).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub kind: MetricKind,
    pub field: Option<String>,
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.field.as_deref().unwrap_or(""))
    }
}

/// An observable aggregate value.
#[derive(Clone)]
pub struct Metric(Arc<MetricInner>);

struct MetricInner {
    key: MetricKey,
    value: Mutex<Value>,
    changed: Broadcast<Value>,
}

impl Metric {
    fn new(key: MetricKey) -> Self { Self(Arc::new(MetricInner { key, value: Mutex::new(Value::Null), changed: Broadcast::new() })) }

    pub fn key(&self) -> &MetricKey { &self.0.key }

    pub fn value(&self) -> Value { self.0.value.lock().unwrap().clone() }

    /// Subscribe to value changes.
    pub fn subscribe<L>(&self, listener: L) -> SubscriptionGuard
    where L: IntoListener<Value> {
        self.0.changed.listen(listener)
    }

    fn set(&self, value: Value) {
        {
            let mut current = self.0.value.lock().unwrap();
            if *current == value {
                return;
            }
            *current = value.clone();
        }
        self.0.changed.send(&value);
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric").field("key", &self.0.key.to_string()).field("value", &self.value()).finish()
    }
}

#[derive(Clone, Default)]
pub struct MetricsManager(Arc<MetricsInner>);

#[derive(Default)]
struct MetricsInner {
    metrics: Mutex<HashMap<String, Metric>>,
    /// Operation ids whose deltas were already applied; protects against the
    /// same notification being applied twice through propagation
    applied_operations: Mutex<HashSet<String>>,
    /// Latest queryset to refresh against; updated on every schedule
    refresh_qs: Mutex<Option<QuerySet>>,
    refresher: OnceLock<Debouncer>,
}

impl MetricsManager {
    pub fn new() -> Self { Self::default() }

    /// The active metrics of this view.
    pub fn active(&self) -> Vec<Metric> { self.0.metrics.lock().unwrap().values().cloned().collect() }

    pub fn get(&self, key: &MetricKey) -> Option<Metric> { self.0.metrics.lock().unwrap().get(&key.to_string()).cloned() }

    /// Fetch an aggregate from the server, store it into the metric (created
    /// on first observation) and return the observable handle.
    pub async fn aggregate(&self, qs: &QuerySet, kind: MetricKind, field: Option<&str>) -> Result<Metric, RetrievalError> {
        let value = qs.aggregate(kind.query_kind(), field).await?;
        let metric = self.entry(MetricKey { kind, field: field.map(str::to_string) });
        metric.set(value);
        Ok(metric)
    }

    fn entry(&self, key: MetricKey) -> Metric {
        let mut metrics = self.0.metrics.lock().unwrap();
        metrics.entry(key.to_string()).or_insert_with(|| Metric::new(key)).clone()
    }

    /// True while a full refresh is in flight; optimistic updates are dropped
    /// during this window because the refresh is authoritative.
    pub fn refreshing(&self) -> bool { self.0.refresher.get().map(|d| d.running()).unwrap_or(false) }

    /// Debounced full recompute of every active metric against `qs`.
    pub fn schedule_refresh(&self, qs: QuerySet) {
        if self.0.metrics.lock().unwrap().is_empty() {
            return;
        }
        *self.0.refresh_qs.lock().unwrap() = Some(qs);
        let refresher = self.0.refresher.get_or_init(|| {
            let weak = Arc::downgrade(&self.0);
            Debouncer::new(
                REFRESH_DEBOUNCE,
                Arc::new(move || -> futures::future::BoxFuture<'static, ()> {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            MetricsManager(inner).refresh_all().await;
                        }
                    })
                }),
            )
        });
        refresher.schedule();
    }

    async fn refresh_all(&self) {
        let Some(qs) = self.0.refresh_qs.lock().unwrap().clone() else { return };
        let metrics = self.active();
        for metric in metrics {
            let key = metric.key().clone();
            match qs.aggregate(key.kind.query_kind(), key.field.as_deref()).await {
                Ok(value) => metric.set(value),
                // A metric that fails to refetch keeps its prior value
                Err(e) => warn!("metric {} refresh failed: {}", key, e),
            }
        }
        // The refresh is authoritative; earlier deltas no longer matter
        self.0.applied_operations.lock().unwrap().clear();
    }

    /// Delta math for one optimistic window change. Returns the new value per
    /// affected metric key; empty while a refresh is in flight.
    pub fn optimistic_update(&self, model: &ModelType, new_view: &[Instance], old_view: &[Instance]) -> HashMap<String, Value> {
        let mut updates = HashMap::new();
        if self.refreshing() {
            return updates;
        }
        let metrics = self.active();
        if metrics.is_empty() {
            return updates;
        }
        for metric in metrics {
            let key = metric.key();
            let current = metric.value();
            let next = match key.kind {
                MetricKind::Count => delta_count(&current, new_view, old_view),
                MetricKind::Sum => key.field.as_deref().and_then(|f| delta_sum(&current, model, new_view, old_view, f)),
                MetricKind::Min => key.field.as_deref().and_then(|f| delta_extreme(&current, model, new_view, old_view, f, Extreme::Min)),
                MetricKind::Max => key.field.as_deref().and_then(|f| delta_extreme(&current, model, new_view, old_view, f, Extreme::Max)),
                // No exact delta form; waits for the scheduled refresh
                MetricKind::Avg => None,
            };
            if let Some(value) = next {
                if value != current {
                    updates.insert(key.to_string(), value);
                }
            }
        }
        updates
    }

    /// Write delta results, recording the operation id so the same update is
    /// never applied twice.
    pub fn apply_optimistic_updates(&self, updates: HashMap<String, Value>, operation_id: &str) {
        if updates.is_empty() {
            return;
        }
        if !self.0.applied_operations.lock().unwrap().insert(operation_id.to_string()) {
            return;
        }
        let metrics = self.0.metrics.lock().unwrap().clone();
        for (key, value) in updates {
            if let Some(metric) = metrics.get(&key) {
                metric.set(value);
            }
        }
    }
}

enum Extreme {
    Min,
    Max,
}

fn delta_count(current: &Value, new_view: &[Instance], old_view: &[Instance]) -> Option<Value> {
    let current = current.as_i64()?;
    let delta = new_view.len() as i64 - old_view.len() as i64;
    (delta != 0).then(|| Value::from(current + delta))
}

/// Rows added to / removed from the window, by pk; a row whose field changed
/// counts on both sides.
fn affected_values<'a>(
    model: &ModelType,
    new_view: &'a [Instance],
    old_view: &'a [Instance],
    field: &str,
) -> (Vec<&'a Value>, Vec<&'a Value>) {
    let old_by_pk: HashMap<_, _> = old_view.iter().filter_map(|row| model.pk_of(row).map(|pk| (pk, row))).collect();
    let new_by_pk: HashMap<_, _> = new_view.iter().filter_map(|row| model.pk_of(row).map(|pk| (pk, row))).collect();

    let mut added = Vec::new();
    let mut removed = Vec::new();
    for (pk, row) in &new_by_pk {
        let value = row.get(field).unwrap_or(&Value::Null);
        match old_by_pk.get(pk) {
            None => added.push(value),
            Some(old_row) => {
                let old_value = old_row.get(field).unwrap_or(&Value::Null);
                if old_value != value {
                    added.push(value);
                    removed.push(old_value);
                }
            }
        }
    }
    for (pk, row) in &old_by_pk {
        if !new_by_pk.contains_key(pk) {
            removed.push(row.get(field).unwrap_or(&Value::Null));
        }
    }
    (added, removed)
}

fn delta_sum(current: &Value, model: &ModelType, new_view: &[Instance], old_view: &[Instance], field: &str) -> Option<Value> {
    let current = collation::as_f64(current)?;
    let (added, removed) = affected_values(model, new_view, old_view, field);
    let delta: f64 = added.iter().filter_map(|v| collation::as_f64(v)).sum::<f64>()
        - removed.iter().filter_map(|v| collation::as_f64(v)).sum::<f64>();
    if delta == 0.0 {
        return None;
    }
    serde_json::Number::from_f64(current + delta).map(Value::Number)
}

/// Min/max can only tighten from additions. A removal touching the current
/// extreme is ambiguous without the full set; leave the value for the
/// refresh to correct.
fn delta_extreme(
    current: &Value,
    model: &ModelType,
    new_view: &[Instance],
    old_view: &[Instance],
    field: &str,
    extreme: Extreme,
) -> Option<Value> {
    use std::cmp::Ordering::*;
    let (added, removed) = affected_values(model, new_view, old_view, field);

    let threatens = |value: &Value| match (collation::compare(value, current), &extreme) {
        (Some(Less) | Some(Equal), Extreme::Min) => true,
        (Some(Greater) | Some(Equal), Extreme::Max) => true,
        (None, _) => true,
        _ => false,
    };
    if removed.iter().any(|v| threatens(v)) {
        return None;
    }

    let improves = |value: &Value| match (collation::compare(value, current), &extreme) {
        (Some(Less), Extreme::Min) => true,
        (Some(Greater), Extreme::Max) => true,
        // No comparable current value yet (e.g. Null over an empty window)
        (None, _) => current.is_null(),
        _ => false,
    };
    let mut best: Option<&Value> = None;
    for value in added {
        let candidate_beats_best = match best {
            None => true,
            Some(b) => matches!(
                (collation::compare(value, b), &extreme),
                (Some(Less), Extreme::Min) | (Some(Greater), Extreme::Max)
            ),
        };
        if improves(value) && candidate_beats_best {
            best = Some(value);
        }
    }
    best.cloned()
}
