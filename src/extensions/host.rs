use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::extension::{Extension, ExtensionError};
use super::module::Exports;

/// Active extensions by id.
#[derive(Clone, Default)]
pub struct ExtensionHost {
    extensions: Arc<Mutex<HashMap<String, Extension>>>,
}

impl ExtensionHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_extension(&self, id: &str) -> bool {
        self.extensions.lock().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.extensions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn exports(&self, id: &str) -> Option<Exports> {
        self.extensions
            .lock()
            .await
            .get(id)
            .map(|extension| extension.exports().clone())
    }

    pub(crate) async fn insert(&self, extension: Extension) {
        let id = extension.id().to_string();
        if self.extensions.lock().await.insert(id.clone(), extension).is_some() {
            tracing::warn!(target: "extensions", %id, "replaced an extension with the same id");
        }
    }

    /// Deactivate and drop the extension. It is dropped even when its
    /// `deactivate` hook fails, since cleanup has already run by then.
    pub async fn deactivate(&self, id: &str) -> Result<bool, ExtensionError> {
        let mut extensions = self.extensions.lock().await;
        let Some(extension) = extensions.get_mut(id) else {
            return Ok(false);
        };
        let result = extension.deactivate().await;
        extensions.remove(id);
        result.map(|_| true)
    }

    /// Deactivate everything, returning the failures.
    pub async fn deactivate_all(&self) -> Vec<ExtensionError> {
        let drained: Vec<Extension> = self.extensions.lock().await.drain().map(|(_, ext)| ext).collect();
        let mut failures = Vec::new();
        for mut extension in drained {
            if let Err(err) = extension.deactivate().await {
                failures.push(err);
            }
        }
        failures
    }
}
