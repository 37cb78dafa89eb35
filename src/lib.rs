// Library exports for the bridge binary and tests

pub mod bootstrap;
pub mod config;
pub mod events;
pub mod extensions;
pub mod ipc;
pub mod peer;

pub use bootstrap::{Bootstrap, BootstrapInjector, ImportMap};
pub use config::BridgeConfig;
pub use events::{EventBus, HostEvent, Subscription};
pub use extensions::{ActivationDescriptor, ActivationQueue, ExtensionHost, ExtensionModule};
pub use ipc::{InvokeError, InvokeParam, InvokePayload, InvokeResult, InvokeTransport};
pub use peer::{start_peer, InvokeRouter, PeerConfig, PeerHandle};
