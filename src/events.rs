//! Publish/subscribe surface shared by the session and the job manager.
//!
//! Listeners are registered per event kind and invoked synchronously, in
//! registration order, by the component that owns the bus. A broadcast
//! stream of every event is also available for async consumers.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// An event that can travel over an [`EventBus`].
pub trait BusEvent: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Listener callback. Unsubscription compares listeners by pointer identity.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub struct EventBus<E: BusEvent> {
    listeners: RwLock<HashMap<E::Kind, Vec<Listener<E>>>>,
    tx: broadcast::Sender<E>,
    publish_count: AtomicU64,
}

impl<E: BusEvent> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(HashMap::new()),
            tx,
            publish_count: AtomicU64::new(0),
        }
    }

    /// Register `listener` for `kind`. Returns the handle to pass to [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, kind: E::Kind, listener: Listener<E>) -> Listener<E> {
        self.listeners
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::clone(&listener));
        listener
    }

    /// Closure form of [`subscribe`](Self::subscribe).
    pub fn on<F>(&self, kind: E::Kind, f: F) -> Listener<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(kind, Arc::new(f))
    }

    /// Remove one registration of `listener` for `kind`. Returns false if it was not registered.
    pub fn unsubscribe(&self, kind: E::Kind, listener: &Listener<E>) -> bool {
        let mut listeners = self.listeners.write();
        let Some(registered) = listeners.get_mut(&kind) else {
            return false;
        };
        let Some(pos) = registered.iter().position(|l| Arc::ptr_eq(l, listener)) else {
            return false;
        };
        registered.remove(pos);
        if registered.is_empty() {
            listeners.remove(&kind);
        }
        true
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }

    /// Receiver for every event published after this call. Slow receivers lag
    /// instead of blocking the publisher.
    pub fn stream(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Deliver `event` to the listeners of its kind, then to stream receivers.
    ///
    /// Listeners run outside the registry lock so they may subscribe or
    /// unsubscribe from inside the callback.
    pub(crate) fn publish(&self, event: &E) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);
        let targets: Vec<Listener<E>> = self
            .listeners
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for listener in &targets {
            listener(event);
        }
        let streamed = self.tx.send(event.clone()).unwrap_or(0);
        targets.len() + streamed
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
