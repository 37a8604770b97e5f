//! Session root: owns the transports, the namespace registry and the event
//! pump. One client per connected backend; views are opened through it.

use std::sync::Arc;

use tracing::debug;
use vantage_proto::ModelEvent;

use crate::{
    dispatcher::EventDispatcher,
    error::{RetrievalError, TransportError},
    liveview::{LiveView, LiveViewOptions},
    registry::Registry,
    task,
    transport::{EventReceiver, QueryExecutor},
};

#[derive(Clone)]
pub struct Client(Arc<Inner>);

struct Inner {
    executor: Arc<dyn QueryExecutor>,
    receiver: Arc<dyn EventReceiver>,
    registry: Registry,
    handler_id: usize,
}

impl Client {
    /// Connect the receiver and start the event pump. Events are processed
    /// strictly in delivery order by a single dispatcher task.
    pub async fn connect(executor: Arc<dyn QueryExecutor>, receiver: Arc<dyn EventReceiver>) -> Result<Self, TransportError> {
        receiver.connect().await?;
        let registry = Registry::new();
        let dispatcher = EventDispatcher::new(registry.clone());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ModelEvent>();
        let handler_id = receiver.add_event_handler(Arc::new(move |event| {
            let _ = tx.send(event);
        }));
        task::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatcher.dispatch(event).await;
            }
            debug!("event pump stopped");
        });

        Ok(Self(Arc::new(Inner { executor, receiver, registry, handler_id })))
    }

    pub fn registry(&self) -> &Registry { &self.0.registry }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> { &self.0.executor }

    pub fn receiver(&self) -> &Arc<dyn EventReceiver> { &self.0.receiver }

    /// Open a root live view: initial fetch, namespace registration, and the
    /// replenishment pool when configured.
    pub async fn live_view(&self, options: LiveViewOptions) -> Result<LiveView, RetrievalError> {
        LiveView::open(self.0.registry.clone(), self.0.receiver.clone(), self.0.executor.clone(), options).await
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> { self.0.receiver.disconnect().await }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Detaching the handler drops the pump's sender; the pump task exits
        self.receiver.remove_event_handler(self.handler_id);
    }
}
