//! Transport capability traits. The engine talks to the outside world
//! through exactly two injected capabilities: a query executor (request/
//! response) and an event receiver (channel-per-namespace pub/sub). Both are
//! dyn traits supplied at construction; there is no runtime patching.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use vantage_proto::{ModelEvent, Namespace};

use crate::{error::TransportError, filter::Filter, model::ModelType};

/// What a structured query asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Get,
    First,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryKind::Read => "read",
            QueryKind::Get => "get",
            QueryKind::First => "first",
            QueryKind::Count => "count",
            QueryKind::Sum => "sum",
            QueryKind::Avg => "avg",
            QueryKind::Min => "min",
            QueryKind::Max => "max",
            QueryKind::Create => "create",
            QueryKind::Update => "update",
            QueryKind::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// Serializer options attached to read queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializerOptions {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub depth: Option<usize>,
    pub fields: Option<Vec<String>>,
}

/// A structured query handed to the executor.
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: QueryKind,
    pub model: ModelType,
    pub filter: Filter,
    pub exclude: Filter,
    pub order_by: Vec<String>,
    pub options: SerializerOptions,
    /// Aggregate target field, for sum/avg/min/max
    pub field: Option<String>,
    /// Create payload or update partial
    pub data: Option<Value>,
    pub operation_id: Option<String>,
    pub namespace: Option<Namespace>,
}

impl Query {
    pub fn new(kind: QueryKind, model: ModelType) -> Self {
        Self {
            kind,
            model,
            filter: Filter::new(),
            exclude: Filter::new(),
            order_by: Vec::new(),
            options: SerializerOptions::default(),
            field: None,
            data: None,
            operation_id: None,
            namespace: None,
        }
    }
}

/// Query response: `data` carries rows, a row, a scalar, or null.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub data: Value,
    pub metadata: Option<Value>,
}

impl QueryResponse {
    pub fn new(data: Value) -> Self { Self { data, metadata: None } }
}

/// Request/response transport. Must be idempotent with respect to
/// `operation_id`: the engine passes the same id on retry, and the transport
/// side may dedup or simply re-execute.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    async fn execute(&self, query: Query) -> Result<QueryResponse, TransportError>;
}

/// Callback invoked with each event delivered on a subscribed namespace.
pub type EventHandler = Arc<dyn Fn(ModelEvent) + Send + Sync + 'static>;

/// Maps a model (plus optional per-view suffix) to the channel it listens on.
pub type NamespaceResolver = Arc<dyn Fn(&ModelType, Option<&str>) -> Namespace + Send + Sync + 'static>;

/// Push transport: a channel-per-namespace pub/sub delivering events as
/// opaque records. Handlers run synchronously inside the receiver's delivery.
#[async_trait]
pub trait EventReceiver: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    async fn subscribe(&self, namespace: &Namespace) -> Result<(), TransportError>;
    async fn unsubscribe(&self, namespace: &Namespace) -> Result<(), TransportError>;
    fn add_event_handler(&self, handler: EventHandler) -> usize;
    fn remove_event_handler(&self, handler_id: usize);
    fn set_namespace_resolver(&self, resolver: NamespaceResolver);
}
