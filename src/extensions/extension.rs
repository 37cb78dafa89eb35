use std::sync::Arc;

use thiserror::Error;

use super::descriptor::ActivationDescriptor;
use super::module::{
    ExtensionContext, ExtensionModule, Exports, Hook, ModuleResolver, Subscriptions,
};
use crate::events::EventBus;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("extension {id:?} has no main module url")]
    Configuration { id: String },
    #[error("failed to load module {url}: {reason}")]
    ModuleLoad { url: String, reason: anyhow::Error },
    #[error("failed to activate extension {id}: {reason}")]
    Activation { id: String, reason: anyhow::Error },
    #[error("extension {id} failed to deactivate cleanly: {reason}")]
    Deactivation { id: String, reason: anyhow::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

/// Disposes a subscription set when dropped while armed, so a hook that
/// panics or is cancelled mid-activation still releases what it registered.
struct DisposeUnlessDisarmed {
    subscriptions: Subscriptions,
    armed: bool,
}

impl DisposeUnlessDisarmed {
    fn new(subscriptions: Subscriptions) -> Self {
        Self {
            subscriptions,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for DisposeUnlessDisarmed {
    fn drop(&mut self) {
        if self.armed {
            self.subscriptions.dispose_all();
        }
    }
}

/// One loaded extension module and everything its activation owns.
pub struct Extension {
    id: String,
    asset_base_url: Option<String>,
    main_module_url: String,
    module: Arc<ExtensionModule>,
    state: ExtensionState,
    exports: Exports,
    subscriptions: Subscriptions,
    events: EventBus,
}

impl Extension {
    pub fn new(
        descriptor: &ActivationDescriptor,
        module: Arc<ExtensionModule>,
        events: EventBus,
    ) -> Result<Self, ExtensionError> {
        let main_module_url = descriptor.module_url()?.to_string();
        Ok(Self {
            id: descriptor.id.clone(),
            asset_base_url: descriptor.asset_base_url.clone(),
            main_module_url,
            module,
            state: ExtensionState::Inactive,
            exports: Exports::new(),
            subscriptions: Subscriptions::default(),
            events,
        })
    }

    /// Validate the descriptor, then resolve its module. Nothing is loaded when
    /// the module URL is missing.
    pub async fn from_descriptor(
        descriptor: &ActivationDescriptor,
        resolver: &dyn ModuleResolver,
        events: EventBus,
    ) -> Result<Self, ExtensionError> {
        let url = descriptor.module_url()?;
        let module = resolver.resolve(url).await?;
        Self::new(descriptor, module, events)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn main_module_url(&self) -> &str {
        &self.main_module_url
    }

    pub fn asset_base_url(&self) -> Option<&str> {
        self.asset_base_url.as_deref()
    }

    /// `<assetBaseUrl>/<path>`, if the extension has an asset base.
    pub fn asset_url(&self, path: &str) -> Option<String> {
        self.asset_base_url.as_deref().map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        })
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ExtensionState::Active
    }

    pub fn exports(&self) -> &Exports {
        &self.exports
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Run the module's `activate` hook with a fresh subscription set.
    ///
    /// No-op when already active. If the hook fails, whatever it registered is
    /// disposed and the extension stays inactive.
    pub async fn activate(&mut self) -> Result<(), ExtensionError> {
        if self.state == ExtensionState::Active {
            tracing::debug!(target: "extensions", id = %self.id, "already active");
            return Ok(());
        }

        self.state = ExtensionState::Activating;
        let subscriptions = Subscriptions::default();
        self.subscriptions = subscriptions.clone();
        let guard = DisposeUnlessDisarmed::new(subscriptions.clone());

        let exports = match &self.module.activate {
            Hook::Present(hook) => {
                let context = ExtensionContext {
                    id: self.id.clone(),
                    asset_base_url: self.asset_base_url.clone(),
                    subscriptions: subscriptions.clone(),
                    events: self.events.clone(),
                };
                match hook(context).await {
                    Ok(exports) => exports.unwrap_or_default(),
                    Err(reason) => {
                        drop(guard);
                        self.state = ExtensionState::Inactive;
                        return Err(ExtensionError::Activation {
                            id: self.id.clone(),
                            reason,
                        });
                    }
                }
            }
            Hook::Absent => Exports::new(),
        };
        guard.disarm();

        self.exports = exports;
        self.state = ExtensionState::Active;
        tracing::info!(
            target: "extensions",
            id = %self.id,
            exports = self.exports.len(),
            subscriptions = subscriptions.len(),
            "extension activated"
        );
        Ok(())
    }

    /// Run the module's `deactivate` hook, then dispose every subscription and
    /// clear the exports.
    ///
    /// No-op unless active. Cleanup happens even when the hook fails; the
    /// hook's error is returned afterwards.
    pub async fn deactivate(&mut self) -> Result<(), ExtensionError> {
        if self.state != ExtensionState::Active {
            tracing::debug!(target: "extensions", id = %self.id, "not active");
            return Ok(());
        }

        self.state = ExtensionState::Deactivating;
        let hook_result = match &self.module.deactivate {
            Hook::Present(hook) => hook().await,
            Hook::Absent => Ok(()),
        };

        let disposed = self.subscriptions.dispose_all();
        self.exports.clear();
        self.state = ExtensionState::Inactive;

        match hook_result {
            Ok(()) => {
                tracing::info!(target: "extensions", id = %self.id, disposed, "extension deactivated");
                Ok(())
            }
            Err(reason) => {
                tracing::warn!(
                    target: "extensions",
                    id = %self.id,
                    disposed,
                    error = %reason,
                    "deactivate hook failed"
                );
                Err(ExtensionError::Deactivation {
                    id: self.id.clone(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::module::{on_dispose, ModuleRegistry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor() -> ActivationDescriptor {
        ActivationDescriptor::new("todo", "lenz://todo/main.js").with_asset_base_url("lenz://todo/")
    }

    fn counting_module(activations: Arc<AtomicUsize>, disposed: Arc<AtomicUsize>) -> ExtensionModule {
        ExtensionModule::new().on_activate(move |context| {
            let activations = Arc::clone(&activations);
            let disposed = Arc::clone(&disposed);
            async move {
                activations.fetch_add(1, Ordering::SeqCst);
                for _ in 0..2 {
                    let disposed = Arc::clone(&disposed);
                    context.subscriptions.push(on_dispose(move || {
                        disposed.fetch_add(1, Ordering::SeqCst);
                    }));
                }
                let mut exports = Exports::new();
                exports.insert("version".into(), json!(2));
                Ok(Some(exports))
            }
        })
    }

    #[tokio::test]
    async fn activate_twice_is_noop() {
        let activations = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let module = counting_module(Arc::clone(&activations), Arc::clone(&disposed));
        let mut extension = Extension::new(&descriptor(), Arc::new(module), EventBus::new()).unwrap();

        extension.activate().await.unwrap();
        extension.activate().await.unwrap();

        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(extension.subscription_count(), 2);
        assert_eq!(extension.exports().get("version"), Some(&json!(2)));
        assert_eq!(extension.state(), ExtensionState::Active);
    }

    #[tokio::test]
    async fn absent_hooks_yield_empty_exports() {
        let mut extension =
            Extension::new(&descriptor(), Arc::new(ExtensionModule::new()), EventBus::new()).unwrap();
        extension.deactivate().await.unwrap();
        assert_eq!(extension.state(), ExtensionState::Inactive);

        extension.activate().await.unwrap();
        assert!(extension.is_active());
        assert!(extension.exports().is_empty());

        extension.deactivate().await.unwrap();
        extension.deactivate().await.unwrap();
        assert!(!extension.is_active());
    }

    #[tokio::test]
    async fn failing_deactivate_hook_still_disposes() {
        let activations = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let mut module = counting_module(Arc::clone(&activations), Arc::clone(&disposed));
        module = module.on_deactivate(|| async { anyhow::bail!("hook exploded") });
        let mut extension = Extension::new(&descriptor(), Arc::new(module), EventBus::new()).unwrap();

        extension.activate().await.unwrap();
        let err = extension.deactivate().await.unwrap_err();

        assert!(matches!(err, ExtensionError::Deactivation { .. }));
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(extension.subscription_count(), 0);
        assert!(extension.exports().is_empty());
        assert_eq!(extension.state(), ExtensionState::Inactive);
    }

    #[tokio::test]
    async fn failing_activate_hook_leaves_extension_inactive() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&disposed);
        let module = ExtensionModule::new().on_activate(move |context| {
            let seen = Arc::clone(&seen);
            async move {
                context.subscriptions.push(on_dispose(move || {
                    seen.fetch_add(1, Ordering::SeqCst);
                }));
                anyhow::bail!("cannot start")
            }
        });
        let mut extension = Extension::new(&descriptor(), Arc::new(module), EventBus::new()).unwrap();

        assert!(matches!(
            extension.activate().await,
            Err(ExtensionError::Activation { .. })
        ));
        assert_eq!(extension.state(), ExtensionState::Inactive);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    fn panic_after_registering() -> anyhow::Result<Option<Exports>> {
        panic!("activate hook panicked")
    }

    #[tokio::test]
    async fn panicking_activate_hook_still_disposes() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&disposed);
        let module = ExtensionModule::new().on_activate(move |context| {
            let seen = Arc::clone(&seen);
            async move {
                context.subscriptions.push(on_dispose(move || {
                    seen.fetch_add(1, Ordering::SeqCst);
                }));
                panic_after_registering()
            }
        });
        let mut extension = Extension::new(&descriptor(), Arc::new(module), EventBus::new()).unwrap();

        let joined = tokio::spawn(async move { extension.activate().await }).await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn from_descriptor_rejects_before_loading() {
        let registry = ModuleRegistry::new();
        let missing_url = ActivationDescriptor {
            id: "broken".into(),
            asset_base_url: None,
            main_module_url: None,
        };
        let result = Extension::from_descriptor(&missing_url, &registry, EventBus::new()).await;
        assert!(matches!(result, Err(ExtensionError::Configuration { .. })));

        let unknown = ActivationDescriptor::new("ghost", "lenz://ghost/main.js");
        let result = Extension::from_descriptor(&unknown, &registry, EventBus::new()).await;
        assert!(matches!(result, Err(ExtensionError::ModuleLoad { .. })));
    }

    #[test]
    fn asset_urls_join_on_base() {
        let extension =
            Extension::new(&descriptor(), Arc::new(ExtensionModule::new()), EventBus::new()).unwrap();
        assert_eq!(
            extension.asset_url("/icons/app.png").as_deref(),
            Some("lenz://todo/icons/app.png")
        );
    }
}
