use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::descriptor::ActivationDescriptor;
use super::extension::Extension;
use super::host::ExtensionHost;
use super::module::ModuleResolver;
use crate::events::EventBus;

/// Outcome of one descriptor taken off the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationReport {
    Activated { id: String },
    AlreadyActive { id: String },
    Skipped { id: String, reason: String },
    Failed { id: String, error: String },
}

impl ActivationReport {
    pub fn id(&self) -> &str {
        match self {
            ActivationReport::Activated { id }
            | ActivationReport::AlreadyActive { id }
            | ActivationReport::Skipped { id, .. }
            | ActivationReport::Failed { id, .. } => id,
        }
    }
}

pub type Reporter = Arc<dyn Fn(&ActivationReport) + Send + Sync>;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ActivationDescriptor>,
    in_flight: Option<String>,
    draining: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    resolver: Arc<dyn ModuleResolver>,
    host: ExtensionHost,
    events: EventBus,
    reporter: Option<Reporter>,
    idle: Notify,
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serialises extension activation: descriptors are activated one at a time,
/// strictly in the order they were enqueued.
#[derive(Clone)]
pub struct ActivationQueue {
    inner: Arc<QueueInner>,
}

impl ActivationQueue {
    pub fn new(resolver: Arc<dyn ModuleResolver>, host: ExtensionHost, events: EventBus) -> Self {
        Self::build(resolver, host, events, None)
    }

    /// Like [`new`](Self::new), with a callback told how each descriptor ended.
    pub fn with_reporter(
        resolver: Arc<dyn ModuleResolver>,
        host: ExtensionHost,
        events: EventBus,
        reporter: Reporter,
    ) -> Self {
        Self::build(resolver, host, events, Some(reporter))
    }

    fn build(
        resolver: Arc<dyn ModuleResolver>,
        host: ExtensionHost,
        events: EventBus,
        reporter: Option<Reporter>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                resolver,
                host,
                events,
                reporter,
                idle: Notify::new(),
            }),
        }
    }

    pub fn host(&self) -> &ExtensionHost {
        &self.inner.host
    }

    /// Append a descriptor and start draining if nothing is.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, descriptor: ActivationDescriptor) {
        let start = {
            let mut state = self.inner.state();
            state.pending.push_back(descriptor);
            !std::mem::replace(&mut state.draining, true)
        };

        if start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(drain(inner));
        }
    }

    pub fn enqueue_all(&self, descriptors: impl IntoIterator<Item = ActivationDescriptor>) {
        for descriptor in descriptors {
            self.enqueue(descriptor);
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.state().pending.len()
    }

    pub fn in_flight(&self) -> Option<String> {
        self.inner.state().in_flight.clone()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state();
        state.pending.is_empty() && !state.draining
    }

    /// Resolves once nothing is pending or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

async fn drain(inner: Arc<QueueInner>) {
    loop {
        let descriptor = {
            let mut state = inner.state();
            match state.pending.pop_front() {
                Some(descriptor) => {
                    state.in_flight = Some(descriptor.id.clone());
                    descriptor
                }
                None => {
                    state.in_flight = None;
                    state.draining = false;
                    drop(state);
                    inner.idle.notify_waiters();
                    return;
                }
            }
        };

        let report = process(&inner, descriptor).await;
        if let Some(reporter) = &inner.reporter {
            // A panicking reporter must not leave the queue marked as draining.
            if catch_unwind(AssertUnwindSafe(|| reporter(&report))).is_err() {
                tracing::error!(target: "extensions", id = %report.id(), "activation reporter panicked");
            }
        }
    }
}

async fn process(inner: &Arc<QueueInner>, descriptor: ActivationDescriptor) -> ActivationReport {
    let id = descriptor.id.clone();

    if let Err(err) = descriptor.module_url() {
        tracing::warn!(target: "extensions", %id, error = %err, "skipping extension descriptor");
        return ActivationReport::Skipped {
            id,
            reason: err.to_string(),
        };
    }

    if inner.host.has_extension(&id).await {
        tracing::info!(target: "extensions", %id, "extension already activated");
        return ActivationReport::AlreadyActive { id };
    }

    // Each activation runs as its own task so a panicking hook is contained
    // to this descriptor.
    let resolver = Arc::clone(&inner.resolver);
    let events = inner.events.clone();
    let activation = tokio::spawn(async move {
        let mut extension = Extension::from_descriptor(&descriptor, resolver.as_ref(), events).await?;
        extension.activate().await?;
        Ok::<_, super::ExtensionError>(extension)
    });

    match activation.await {
        Ok(Ok(extension)) => {
            inner.host.insert(extension).await;
            ActivationReport::Activated { id }
        }
        Ok(Err(err)) => {
            tracing::error!(target: "extensions", %id, error = %err, "extension activation failed");
            ActivationReport::Failed {
                id,
                error: err.to_string(),
            }
        }
        Err(join_err) => {
            tracing::error!(target: "extensions", %id, error = %join_err, "extension activation aborted");
            ActivationReport::Failed {
                id,
                error: join_err.to_string(),
            }
        }
    }
}
