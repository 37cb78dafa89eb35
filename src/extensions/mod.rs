mod descriptor;
mod extension;
mod host;
mod module;
mod queue;

pub use descriptor::ActivationDescriptor;
pub use extension::{Extension, ExtensionError, ExtensionState};
pub use host::ExtensionHost;
pub use module::{
    on_dispose, ActivateFn, DeactivateFn, Disposable, ExtensionContext, ExtensionModule, Exports,
    Hook, ModuleRegistry, ModuleResolver, OnDispose, Subscriptions,
};
pub use queue::{ActivationQueue, ActivationReport, Reporter};
