#![allow(unused)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Notify, Semaphore};
use tracing::Level;

pub use vantage::{
    ChangeOrigin, ChangeSet, Client, EventKind, EventReceiver, Filter, Instance, LiveView, LiveViewOptions, Metric, ModelEvent,
    ModelType, MutationError, Namespace, Pk, Query, QueryExecutor, QueryKind, QueryResponse, QuerySet, RetrievalError,
    SerializerOptions, TransportError,
};

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").ok().and_then(|l| Level::from_str(&l).ok()).unwrap_or(Level::INFO);
    let _ = tracing_subscriber::fmt().with_max_level(level).with_test_writer().try_init();
}

pub fn row(value: Value) -> Instance {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

pub fn rows(values: Vec<Value>) -> Vec<Instance> { values.into_iter().map(row).collect() }

pub fn filter(value: Value) -> Filter { Filter::from_value(&value).expect("valid filter") }

pub fn ids(window: &[Instance]) -> Vec<Value> { window.iter().map(|r| r["id"].clone()).collect() }

/// Let the event pump and debounced jobs make progress.
pub async fn settle() { tokio::time::sleep(Duration::from_millis(50)).await; }

/// Long enough for the metric (250 ms) and overfetch (300 ms) debounces.
pub async fn settle_debounced() { tokio::time::sleep(Duration::from_millis(450)).await; }

// ---- in-memory backend ------------------------------------------------------

/// A little in-memory server: rows live in insertion order, filters are
/// evaluated with the engine's own lookup semantics, and mutations apply to
/// whatever the query's filters match.
pub struct MockExecutor {
    model: ModelType,
    rows: Mutex<Vec<Instance>>,
    next_id: Mutex<i64>,
    queries: Mutex<Vec<Query>>,
    fail_kinds: Mutex<Vec<QueryKind>>,
    gate: Mutex<Option<(QueryKind, Arc<Semaphore>)>>,
}

impl MockExecutor {
    pub fn new(model: ModelType, seed: Vec<Instance>) -> Arc<Self> {
        let next_id = 1 + seed.iter().filter_map(|r| r.get(&model.pk_field)).filter_map(|v| v.as_i64()).max().unwrap_or(0);
        Arc::new(Self {
            model,
            rows: Mutex::new(seed),
            next_id: Mutex::new(next_id),
            queries: Mutex::new(Vec::new()),
            fail_kinds: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        })
    }

    pub fn server_rows(&self) -> Vec<Instance> { self.rows.lock().unwrap().clone() }

    pub fn set_server_rows(&self, rows: Vec<Instance>) { *self.rows.lock().unwrap() = rows; }

    pub fn queries(&self) -> Vec<Query> { self.queries.lock().unwrap().clone() }

    pub fn queries_of(&self, kind: QueryKind) -> Vec<Query> {
        self.queries.lock().unwrap().iter().filter(|q| q.kind == kind).cloned().collect()
    }

    /// Every query of this kind fails until cleared.
    pub fn fail_kind(&self, kind: QueryKind) { self.fail_kinds.lock().unwrap().push(kind); }

    pub fn clear_failures(&self) { self.fail_kinds.lock().unwrap().clear(); }

    /// Queries of this kind block until the returned semaphore gets permits.
    pub fn gate_kind(&self, kind: QueryKind) -> Arc<Semaphore> {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some((kind, semaphore.clone()));
        semaphore
    }

    fn matching(&self, query: &Query) -> Vec<Instance> {
        let rows = self.rows.lock().unwrap();
        rows.iter().filter(|r| query.filter.matches(r) && (query.exclude.is_empty() || !query.exclude.matches(r))).cloned().collect()
    }

    fn windowed(&self, query: &Query, mut matched: Vec<Instance>) -> Vec<Instance> {
        if let Some(offset) = query.options.offset {
            matched = matched.into_iter().skip(offset).collect();
        }
        if let Some(limit) = query.options.limit {
            matched.truncate(limit);
        }
        if let Some(fields) = &query.options.fields {
            matched = matched
                .into_iter()
                .map(|r| r.into_iter().filter(|(k, _)| fields.contains(k)).collect::<Instance>())
                .collect();
        }
        matched
    }

    fn aggregate(&self, query: &Query) -> Value {
        let matched = self.matching(query);
        let values: Vec<f64> = match &query.field {
            Some(field) => matched.iter().filter_map(|r| r.get(field)).filter_map(|v| v.as_f64()).collect(),
            None => Vec::new(),
        };
        match query.kind {
            QueryKind::Count => json!(matched.len()),
            QueryKind::Sum => json!(values.iter().sum::<f64>()),
            QueryKind::Avg => {
                if values.is_empty() {
                    Value::Null
                } else {
                    json!(values.iter().sum::<f64>() / values.len() as f64)
                }
            }
            QueryKind::Min => values.iter().cloned().reduce(f64::min).map(|v| json!(v)).unwrap_or(Value::Null),
            QueryKind::Max => values.iter().cloned().reduce(f64::max).map(|v| json!(v)).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(&self, query: Query) -> Result<QueryResponse, TransportError> {
        self.queries.lock().unwrap().push(query.clone());

        let gate = self.gate.lock().unwrap().as_ref().filter(|(kind, _)| *kind == query.kind).map(|(_, s)| s.clone());
        if let Some(semaphore) = gate {
            semaphore.acquire().await.map_err(|_| TransportError::new("gate closed"))?.forget();
        }
        if self.fail_kinds.lock().unwrap().contains(&query.kind) {
            return Err(TransportError::new(format!("injected {} failure", query.kind)));
        }

        let response = match query.kind {
            QueryKind::Read => QueryResponse::new(Value::Array(self.windowed(&query, self.matching(&query)).into_iter().map(Value::Object).collect())),
            QueryKind::Get | QueryKind::First => {
                let matched = self.matching(&query);
                QueryResponse::new(matched.into_iter().next().map(Value::Object).unwrap_or(Value::Null))
            }
            QueryKind::Count | QueryKind::Sum | QueryKind::Avg | QueryKind::Min | QueryKind::Max => {
                QueryResponse::new(self.aggregate(&query))
            }
            QueryKind::Create => {
                let mut item = match query.data.clone() {
                    Some(Value::Object(map)) => map,
                    _ => return Err(TransportError::new("create without data")),
                };
                if !item.contains_key(&self.model.pk_field) {
                    let mut next = self.next_id.lock().unwrap();
                    item.insert(self.model.pk_field.clone(), json!(*next));
                    *next += 1;
                }
                self.rows.lock().unwrap().push(item.clone());
                QueryResponse::new(Value::Object(item))
            }
            QueryKind::Update => {
                let partial = match query.data.clone() {
                    Some(Value::Object(map)) => map,
                    _ => return Err(TransportError::new("update without data")),
                };
                let mut rows = self.rows.lock().unwrap();
                let mut updated = Vec::new();
                for r in rows.iter_mut() {
                    if query.filter.matches(r) {
                        for (k, v) in &partial {
                            r.insert(k.clone(), v.clone());
                        }
                        updated.push(Value::Object(r.clone()));
                    }
                }
                QueryResponse::new(Value::Array(updated))
            }
            QueryKind::Delete => {
                let mut rows = self.rows.lock().unwrap();
                let before = rows.len();
                rows.retain(|r| !query.filter.matches(r));
                QueryResponse::new(json!(before - rows.len()))
            }
        };
        Ok(response)
    }
}

// ---- event receiver ---------------------------------------------------------

#[derive(Default)]
pub struct MockReceiver {
    handlers: Mutex<HashMap<usize, vantage::EventHandler>>,
    next_id: AtomicUsize,
    connected: AtomicBool,
    pub subscribed: Mutex<Vec<Namespace>>,
    pub unsubscribed: Mutex<Vec<Namespace>>,
}

impl MockReceiver {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Deliver an event to every handler, as the realtime channel would.
    pub fn deliver(&self, event: ModelEvent) {
        let handlers: Vec<_> = self.handlers.lock().unwrap().values().cloned().collect();
        for handler in handlers {
            handler(event.clone());
        }
    }

    pub fn deliver_json(&self, value: Value) { self.deliver(serde_json::from_value(value).expect("valid event")); }

    pub fn subscriptions(&self) -> Vec<Namespace> { self.subscribed.lock().unwrap().clone() }

    pub fn unsubscriptions(&self) -> Vec<Namespace> { self.unsubscribed.lock().unwrap().clone() }
}

#[async_trait]
impl EventReceiver for MockReceiver {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, namespace: &Namespace) -> Result<(), TransportError> {
        self.subscribed.lock().unwrap().push(namespace.clone());
        Ok(())
    }

    async fn unsubscribe(&self, namespace: &Namespace) -> Result<(), TransportError> {
        self.unsubscribed.lock().unwrap().push(namespace.clone());
        Ok(())
    }

    fn add_event_handler(&self, handler: vantage::EventHandler) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().insert(id, handler);
        id
    }

    fn remove_event_handler(&self, handler_id: usize) { self.handlers.lock().unwrap().remove(&handler_id); }

    fn set_namespace_resolver(&self, _resolver: vantage::NamespaceResolver) {}
}

// ---- watcher ----------------------------------------------------------------

/// Accumulates notifications and provides async waiting.
#[derive(Clone)]
pub struct TestWatcher<T> {
    changes: Arc<Mutex<Vec<T>>>,
    notify: Arc<Notify>,
}

impl<T: Clone + Send + 'static> TestWatcher<T> {
    pub fn new() -> Self { Self { changes: Arc::new(Mutex::new(Vec::new())), notify: Arc::new(Notify::new()) } }

    pub fn notify(&self, value: T) {
        self.changes.lock().unwrap().push(value);
        self.notify.notify_waiters();
    }

    pub fn listener(&self) -> impl Fn(&T) + Send + Sync + 'static {
        let me = self.clone();
        move |value: &T| me.notify(value.clone())
    }

    pub fn len(&self) -> usize { self.changes.lock().unwrap().len() }

    pub fn all(&self) -> Vec<T> { self.changes.lock().unwrap().clone() }

    /// Wait for (and take) the next accumulated notification.
    pub async fn take_one(&self) -> T {
        loop {
            if let Some(value) = {
                let mut changes = self.changes.lock().unwrap();
                (!changes.is_empty()).then(|| changes.remove(0))
            } {
                return value;
            }
            tokio::time::timeout(Duration::from_secs(5), self.notify.notified()).await.expect("watcher timed out");
        }
    }
}

// ---- fixtures ---------------------------------------------------------------

pub struct Fixture {
    pub client: Client,
    pub executor: Arc<MockExecutor>,
    pub receiver: Arc<MockReceiver>,
}

/// Client over an in-memory backend seeded with rows.
pub async fn fixture(seed: Vec<Value>) -> Fixture {
    let model = ModelType::new("todo");
    let executor = MockExecutor::new(model, rows(seed));
    let receiver = MockReceiver::new();
    let client = Client::connect(executor.clone(), receiver.clone()).await.expect("connect");
    Fixture { client, executor, receiver }
}

pub fn todo_options() -> LiveViewOptions { LiveViewOptions::new(ModelType::new("todo")) }
