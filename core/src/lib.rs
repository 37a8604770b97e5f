pub mod broadcast;
pub mod changes;
pub mod client;
pub mod collation;
pub mod debounce;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod liveview;
pub mod metrics;
pub mod model;
pub mod operation;
pub mod oplog;
pub mod overfetch;
pub mod queryset;
pub mod registry;
pub mod synced_array;
pub mod task;
pub mod transport;

pub use client::Client;
pub use liveview::{LiveView, LiveViewOptions, ViewState};
pub use model::{Instance, ModelType};
pub use synced_array::SyncedArray;

pub use vantage_proto as proto;
