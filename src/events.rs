//! Host-to-frontend event bus.
//!
//! The host pushes `(name, data)` pairs through a single entry point,
//! [`EventBus::dispatch`]; everything else subscribes by name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::extensions::Disposable;

pub type Listener = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

type ListenerMap = HashMap<String, Vec<Listener>>;

fn same_listener(a: &Listener, b: &Listener) -> bool {
    // Compare data pointers only; vtable pointers are not unique per type.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn lock(map: &Mutex<ListenerMap>) -> MutexGuard<'_, ListenerMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pub/sub keyed by event name. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<ListenerMap>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`. Registering the same listener twice is
    /// a no-op; each listener is held at most once per event.
    pub fn on(&self, event: &str, listener: Listener) -> Subscription {
        {
            let mut map = lock(&self.listeners);
            let entry = map.entry(event.to_string()).or_default();
            if !entry.iter().any(|existing| same_listener(existing, &listener)) {
                entry.push(Arc::clone(&listener));
            }
        }

        Subscription {
            bus: Arc::downgrade(&self.listeners),
            event: event.to_string(),
            listener,
            active: AtomicBool::new(true),
        }
    }

    pub fn listen<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on(event, Arc::new(callback))
    }

    /// Remove exactly this listener. No-op if it is not registered.
    pub fn off(&self, event: &str, listener: &Listener) {
        remove(&self.listeners, event, listener);
    }

    /// Call every listener currently registered for `event`, synchronously.
    ///
    /// Listener order is unspecified. A failing listener is not isolated: its
    /// error is returned and the remaining listeners are not called. Returns
    /// how many listeners ran.
    pub fn dispatch(&self, event: &str, data: &Value) -> anyhow::Result<usize> {
        let snapshot: Vec<Listener> = match lock(&self.listeners).get(event) {
            Some(listeners) => listeners.clone(),
            None => return Ok(0),
        };

        for listener in &snapshot {
            listener(data)?;
        }
        Ok(snapshot.len())
    }

    pub fn listener_count(&self, event: &str) -> usize {
        lock(&self.listeners).get(event).map_or(0, Vec::len)
    }

    /// Feed host events into [`dispatch`](Self::dispatch) until the sender side
    /// closes. Listener failures are logged and the pump keeps going.
    pub async fn pump(&self, mut events: mpsc::UnboundedReceiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(err) = self.dispatch(&event.name, &event.data) {
                tracing::error!(
                    target: "events",
                    event = %event.name,
                    error = %err,
                    "event listener failed"
                );
            }
        }
        tracing::debug!(target: "events", "host event channel closed");
    }
}

fn remove(listeners: &Mutex<ListenerMap>, event: &str, listener: &Listener) {
    let mut map = lock(listeners);
    if let Some(entry) = map.get_mut(event) {
        entry.retain(|existing| !same_listener(existing, listener));
        if entry.is_empty() {
            map.remove(event);
        }
    }
}

/// Handle returned by [`EventBus::on`].
///
/// Unsubscribing is idempotent and only ever removes the listener this handle
/// registered. Dropping the handle unsubscribes; call [`forget`](Self::forget)
/// to keep the listener for the life of the bus.
#[must_use = "dropping a Subscription unsubscribes"]
pub struct Subscription {
    bus: Weak<Mutex<ListenerMap>>,
    event: String,
    listener: Listener,
    active: AtomicBool,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(listeners) = self.bus.upgrade() {
            remove(&listeners, &self.event, &self.listener);
        }
    }

    pub fn forget(self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl Disposable for Subscription {
    fn dispose(&self) {
        self.unsubscribe();
    }
}

/// An event as pushed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostEvent {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl HostEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// The script a host evaluates in the page to deliver this event.
    pub fn dispatch_script(&self) -> String {
        format!(
            "window.__dispatch({}, {});",
            Value::String(self.name.clone()),
            self.data
        )
    }
}
