//! Page bootstrap: the import map, the `CUSTOM_PROTOCOL` resolver and the
//! bridge entry module are injected into `<head>` once per document.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use kuchiki::traits::*;
use kuchiki::{parse_html, NodeRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extensions::ActivationDescriptor;
use crate::ipc::ProtocolResolver;

pub const IMPORT_MAP_ID: &str = "lenz-import-map";
pub const PROTOCOL_ID: &str = "lenz-protocol";
pub const ENTRY_ID: &str = "lenz-ipc";
pub const DEFAULT_ENTRY_MODULE: &str = "lenz/ipc";

/// Module specifier to URL mapping, serialised as `{"imports": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: BTreeMap<String, String>,
}

impl ImportMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, url: impl Into<String>) -> &mut Self {
        self.imports.insert(name.into(), url.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.imports.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }

    /// App-wide entries overlaid with per-window ones.
    pub fn merged(app: &ImportMap, window: &ImportMap) -> ImportMap {
        let mut merged = app.clone();
        for (name, url) in &window.imports {
            merged.imports.insert(name.clone(), url.clone());
        }
        merged
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"imports\":{}}"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ImportMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            imports: iter
                .into_iter()
                .map(|(name, url)| (name.into(), url.into()))
                .collect(),
        }
    }
}

/// `</script` inside inline script text would end the element early.
fn script_safe(text: &str) -> String {
    text.replace("</", "<\\/")
}

fn json_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// `Object.defineProperty(window, 'ID', ...)` for the page's window identity.
pub fn window_identity_script(window_id: &str) -> String {
    format!(
        "Object.defineProperty(window, 'ID', {{ value: {}, writable: false, enumerable: true }});",
        json_string(window_id)
    )
}

/// `window.EXTENSIONS = [...]` with the descriptors the page should activate.
pub fn extensions_script(descriptors: &[ActivationDescriptor]) -> Result<String, serde_json::Error> {
    Ok(format!(
        "window.EXTENSIONS = {};",
        serde_json::to_string(descriptors)?
    ))
}

/// What gets injected into each page.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    import_map: ImportMap,
    entry_module: String,
    resolver_expression: String,
}

impl Bootstrap {
    pub fn new(import_map: ImportMap, resolver: &dyn ProtocolResolver) -> Self {
        Self {
            import_map,
            entry_module: DEFAULT_ENTRY_MODULE.to_string(),
            resolver_expression: resolver.page_expression(),
        }
    }

    pub fn with_entry_module(mut self, entry_module: impl Into<String>) -> Self {
        self.entry_module = entry_module.into();
        self
    }

    pub fn import_map(&self) -> &ImportMap {
        &self.import_map
    }

    /// A fresh injector for one document.
    pub fn injector(&self) -> BootstrapInjector {
        BootstrapInjector {
            bootstrap: self.clone(),
            done: AtomicBool::new(false),
        }
    }

    /// Parse a whole page, inject into its `<head>` and serialise it back.
    pub fn inject_html(&self, html: &str) -> String {
        let document = parse_html().one(html);
        match self.injector().observe(&document) {
            Observation::Injected => document.to_string(),
            Observation::Waiting | Observation::Detached => html.to_string(),
        }
    }

    fn protocol_markup(&self) -> String {
        format!(
            r#"<script id="{PROTOCOL_ID}">Object.defineProperty(window, 'CUSTOM_PROTOCOL', {{ value: (protocol, url) => {} }});</script>"#,
            script_safe(&self.resolver_expression)
        )
    }

    fn import_map_markup(&self) -> String {
        format!(
            r#"<script id="{IMPORT_MAP_ID}" type="importmap">{}</script>"#,
            script_safe(&self.import_map.to_json())
        )
    }

    fn entry_markup(&self) -> String {
        format!(
            r#"<script id="{ENTRY_ID}" type="module">import {};</script>"#,
            script_safe(&json_string(&self.entry_module))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// No `<head>` yet, or a piece could not be built; call again on the
    /// next structural change.
    Waiting,
    /// Injection happened; the injector has stopped observing.
    Injected,
    /// A previous call already injected; nothing was done.
    Detached,
}

/// One-shot injector for a single document.
///
/// Call [`observe`](Self::observe) whenever the document tree changes. The
/// first call that finds a `<head>` injects; every later call is a no-op.
/// Each element is also guarded by its `id`, so a document that already
/// carries the markers is left alone.
pub struct BootstrapInjector {
    bootstrap: Bootstrap,
    done: AtomicBool,
}

impl BootstrapInjector {
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn observe(&self, document: &NodeRef) -> Observation {
        self.observe_with(document, script_node)
    }

    fn observe_with(
        &self,
        document: &NodeRef,
        build: impl Fn(&str) -> Option<NodeRef>,
    ) -> Observation {
        if self.is_done() {
            return Observation::Detached;
        }

        let Ok(head) = document.select_first("head") else {
            return Observation::Waiting;
        };

        let pieces = [
            (PROTOCOL_ID, self.bootstrap.protocol_markup()),
            (IMPORT_MAP_ID, self.bootstrap.import_map_markup()),
            (ENTRY_ID, self.bootstrap.entry_markup()),
        ];

        let mut injected = 0usize;
        let mut missing = 0usize;
        for (id, markup) in pieces {
            if document.select_first(&format!("#{id}")).is_ok() {
                continue;
            }
            match build(&markup) {
                Some(node) => {
                    head.as_node().append(node);
                    injected += 1;
                }
                None => {
                    tracing::error!(target: "bootstrap", %id, "failed to build bootstrap script");
                    missing += 1;
                }
            }
        }

        // Only stop observing once every marker is in place.
        if missing > 0 {
            return Observation::Waiting;
        }

        self.done.store(true, Ordering::Release);
        tracing::debug!(target: "bootstrap", injected, "bootstrap injected into head");
        Observation::Injected
    }
}

fn script_node(markup: &str) -> Option<NodeRef> {
    let parsed = parse_html().one(markup);
    let script = parsed.select_first("script").ok()?;
    let node = script.as_node().clone();
    node.detach();
    Some(node)
}
