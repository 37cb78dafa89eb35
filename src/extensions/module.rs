use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::ExtensionError;
use crate::events::EventBus;

/// What an extension's `activate` hook hands back to its callers.
pub type Exports = Map<String, Value>;

/// Something an extension registered and must release when it deactivates.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Adapts a closure into a [`Disposable`].
pub struct OnDispose<F>(F);

impl<F: Fn() + Send + Sync> Disposable for OnDispose<F> {
    fn dispose(&self) {
        (self.0)()
    }
}

pub fn on_dispose<F: Fn() + Send + Sync + 'static>(f: F) -> OnDispose<F> {
    OnDispose(f)
}

/// Disposables owned by one activation of an extension.
#[derive(Clone, Default)]
pub struct Subscriptions {
    items: Arc<Mutex<Vec<Box<dyn Disposable>>>>,
}

impl Subscriptions {
    pub fn push(&self, disposable: impl Disposable + 'static) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(disposable));
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose everything and leave the set empty. Returns how many were disposed.
    pub fn dispose_all(&self) -> usize {
        let drained: Vec<Box<dyn Disposable>> = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            items.drain(..).collect()
        };
        for disposable in &drained {
            disposable.dispose();
        }
        drained.len()
    }
}

/// Passed to an extension's `activate` hook.
#[derive(Clone)]
pub struct ExtensionContext {
    pub id: String,
    pub asset_base_url: Option<String>,
    pub subscriptions: Subscriptions,
    pub events: EventBus,
}

pub type ActivateFn =
    dyn Fn(ExtensionContext) -> BoxFuture<'static, anyhow::Result<Option<Exports>>> + Send + Sync;
pub type DeactivateFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// An optional module operation.
pub enum Hook<F: ?Sized> {
    Present(Box<F>),
    Absent,
}

impl<F: ?Sized> Hook<F> {
    pub fn is_present(&self) -> bool {
        matches!(self, Hook::Present(_))
    }
}

impl<F: ?Sized> Default for Hook<F> {
    fn default() -> Self {
        Hook::Absent
    }
}

/// A loaded extension module: two optional lifecycle operations.
#[derive(Default)]
pub struct ExtensionModule {
    pub activate: Hook<ActivateFn>,
    pub deactivate: Hook<DeactivateFn>,
}

impl ExtensionModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_activate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ExtensionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Exports>>> + Send + 'static,
    {
        self.activate = Hook::Present(Box::new(
            move |context| -> BoxFuture<'static, anyhow::Result<Option<Exports>>> {
                Box::pin(hook(context))
            },
        ));
        self
    }

    pub fn on_deactivate<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.deactivate = Hook::Present(Box::new(
            move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(hook()) },
        ));
        self
    }
}

/// Turns a module URL into a loaded module.
pub trait ModuleResolver: Send + Sync {
    fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Arc<ExtensionModule>, ExtensionError>>;
}

/// Modules known ahead of time, keyed by URL. Resolving the same URL twice
/// yields the same module instance.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<ExtensionModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, url: impl Into<String>, module: ExtensionModule) {
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), Arc::new(module));
    }

    pub fn contains(&self, url: &str) -> bool {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url)
    }
}

impl ModuleResolver for ModuleRegistry {
    fn resolve<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Arc<ExtensionModule>, ExtensionError>> {
        let found = self
            .modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned();

        Box::pin(async move {
            found.ok_or_else(|| ExtensionError::ModuleLoad {
                url: url.to_string(),
                reason: anyhow::anyhow!("no module registered for this url"),
            })
        })
    }
}
