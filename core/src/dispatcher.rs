//! Routes raw server events to the root views that care about them. Events
//! echoing a local in-flight mutation are suppressed after bookkeeping; the
//! view already reflects them optimistically.

use futures::future::join_all;
use tracing::{debug, warn};
use vantage_proto::{ModelEvent, Namespace};

use crate::registry::Registry;

#[derive(Clone)]
pub struct EventDispatcher {
    registry: Registry,
}

impl EventDispatcher {
    pub fn new(registry: Registry) -> Self { Self { registry } }

    pub async fn dispatch(&self, event: ModelEvent) {
        let kind = match event.kind() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("dropping event: {}", e);
                return;
            }
        };
        let namespace = Namespace::from(event.namespace.clone());
        let views: Vec<_> =
            self.registry.views_for(&namespace).into_iter().filter(|view| view.model().name == event.model).collect();
        if views.is_empty() {
            return;
        }

        let pks = if kind.is_bulk() { event.bulk_pks() } else { event.single_pk().into_iter().collect() };

        // Metric refresh and pool bookkeeping run for every event, echoes
        // included: the server moved even if this client moved it
        for view in &views {
            view.on_remote_event(kind, &pks);
        }

        if let Some(operation_id) = &event.operation_id {
            if self.registry.operation_active(operation_id) {
                debug!("suppressing self-echo of {}", operation_id);
                return;
            }
        }

        join_all(views.iter().map(|view| view.apply_remote_event(kind, &event, &pks))).await;
    }
}
