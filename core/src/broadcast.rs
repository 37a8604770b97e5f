//! A payload-carrying broadcast with RAII listener guards. Change
//! notifications fire synchronously on the mutating call; listeners must not
//! mutate the originating array from inside their callback.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

/// A listener called with each broadcast payload.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

/// Trait for types that can be converted into broadcast listeners.
pub trait IntoListener<T> {
    fn into_listener(self) -> Listener<T>;
}

impl<T, F> IntoListener<T> for F
where F: Fn(&T) + Send + Sync + 'static
{
    fn into_listener(self) -> Listener<T> { Arc::new(self) }
}

impl<T: Clone + Send + 'static> IntoListener<T> for tokio::sync::mpsc::UnboundedSender<T> {
    fn into_listener(self) -> Listener<T> {
        Arc::new(move |value: &T| {
            let _ = self.send(value.clone());
        })
    }
}

/// Broadcast sender notifying all live subscribers with a payload reference.
pub struct Broadcast<T>(Arc<Inner<T>>);
struct Inner<T> {
    listeners: std::sync::RwLock<HashMap<usize, Listener<T>>>,
    next_id: AtomicUsize,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Broadcast<T> {
    pub fn new() -> Self { Self(Arc::new(Inner { listeners: std::sync::RwLock::new(HashMap::new()), next_id: AtomicUsize::new(0) })) }

    /// Notify all active listeners.
    pub fn send(&self, value: &T) {
        // Clone the listeners out to avoid holding the lock during callbacks
        let subscribers = {
            let listeners = self.0.listeners.read().unwrap();
            listeners.values().cloned().collect::<Vec<_>>()
        };
        for callback in subscribers {
            callback(value);
        }
    }

    pub fn listen<L>(&self, listener: L) -> SubscriptionGuard
    where L: IntoListener<T>, T: 'static, {
        let id = self.0.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.0.listeners.write().unwrap().insert(id, listener.into_listener());
        SubscriptionGuard { _guard: Box::new(ListenerGuard { inner: Arc::downgrade(&self.0), id }) }
    }

    pub fn listener_count(&self) -> usize { self.0.listeners.read().unwrap().len() }

    /// Drop every listener. Used on destroy; outstanding guards become no-ops.
    pub fn clear(&self) { self.0.listeners.write().unwrap().clear(); }
}

struct ListenerGuard<T> {
    inner: Weak<Inner<T>>,
    id: usize,
}

impl<T> Drop for ListenerGuard<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.write().unwrap().remove(&self.id);
        }
    }
}

/// Type-erased handle for a subscription; dropping it unsubscribes.
pub struct SubscriptionGuard {
    _guard: Box<dyn std::any::Any + Send + Sync>,
}
