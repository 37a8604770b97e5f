//! # Vantage
//!
//! A client-side live query cache: an in-memory, filtered, paginated view of
//! a remote collection that updates instantly on local optimistic mutations
//! and converges to server truth as confirmations and push events arrive.
//!
//! Construct a [`Client`] with your transports (a [`QueryExecutor`] for
//! request/response and an [`EventReceiver`] for server push), then open
//! [`LiveView`]s over your collections:
//!
//! ```ignore
//! let client = Client::connect(executor, receiver).await?;
//! let todos = client.live_view(LiveViewOptions::new(ModelType::new("todo"))).await?;
//!
//! let _sub = todos.subscribe(|change: &ChangeSet| render(&change.view));
//! todos.create(row).await?;          // appears immediately, confirmed async
//! let open = todos.filter(Filter::from_value(&json!({"status": "open"}))?);
//! let count = open.count().await?;   // optimistic deltas + debounced refresh
//! ```

pub use vantage_core::{
    broadcast::{IntoListener, SubscriptionGuard},
    changes::{ChangeOrigin, ChangeSet},
    client::Client,
    error::{MutationError, RetrievalError, TransportError},
    filter::{Condition, Filter, FilterError, Lookup},
    liveview::{LiveView, LiveViewOptions, ViewState, WeakLiveView},
    metrics::{Metric, MetricKey, MetricKind, MetricsManager},
    model::{Instance, ModelType},
    operation::{InsertPolicy, Position},
    oplog::OperationLog,
    overfetch::OverfetchCache,
    queryset::QuerySet,
    registry::Registry,
    synced_array::SyncedArray,
    transport::{EventHandler, EventReceiver, NamespaceResolver, Query, QueryExecutor, QueryKind, QueryResponse, SerializerOptions},
};

pub use vantage_proto as proto;
pub use vantage_proto::{EventKind, ModelEvent, Namespace, OperationId, Pk};
