use serde::Deserialize;
use url::Url;

use super::error::RequestError;

/// Maps a protocol name plus a relative path onto an absolute dispatch URL.
///
/// The page sees the same mapping as the `CUSTOM_PROTOCOL(protocol, url)`
/// function, so every resolver also knows how to render itself as a JS
/// expression over the `protocol` and `url` bindings.
pub trait ProtocolResolver: Send + Sync {
    fn resolve(&self, protocol: &str, path: &str) -> Result<Url, RequestError>;

    fn page_expression(&self) -> String;
}

fn parse(protocol: &str, path: &str, raw: &str) -> Result<Url, RequestError> {
    Url::parse(raw).map_err(|source| RequestError::Resolve {
        protocol: protocol.to_string(),
        path: path.to_string(),
        source,
    })
}

/// `<protocol>://<path>`, the form custom schemes take on macOS and Linux webviews.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomSchemeResolver;

impl ProtocolResolver for CustomSchemeResolver {
    fn resolve(&self, protocol: &str, path: &str) -> Result<Url, RequestError> {
        parse(protocol, path, &format!("{protocol}://{path}"))
    }

    fn page_expression(&self) -> String {
        "`${protocol}://${url}`".to_string()
    }
}

/// `http://<protocol>.localhost/<path>`, the form WebView2 exposes custom schemes under.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalhostResolver;

impl ProtocolResolver for LocalhostResolver {
    fn resolve(&self, protocol: &str, path: &str) -> Result<Url, RequestError> {
        parse(protocol, path, &format!("http://{protocol}.localhost/{path}"))
    }

    fn page_expression(&self) -> String {
        "`http://${protocol}.localhost/${url}`".to_string()
    }
}

/// `<base>/<protocol>/<path>`, for peers reachable over plain HTTP.
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base: Url,
}

impl BaseUrlResolver {
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }
}

impl ProtocolResolver for BaseUrlResolver {
    fn resolve(&self, protocol: &str, path: &str) -> Result<Url, RequestError> {
        self.base
            .join(&format!("{protocol}/{}", path.trim_start_matches('/')))
            .map_err(|source| RequestError::Resolve {
                protocol: protocol.to_string(),
                path: path.to_string(),
                source,
            })
    }

    fn page_expression(&self) -> String {
        let base = serde_json::Value::String(self.base.to_string()).to_string();
        format!("`${{{base}}}${{protocol}}/${{url}}`")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolStyle {
    Scheme,
    Localhost,
    BaseUrl,
}

impl Default for ProtocolStyle {
    fn default() -> Self {
        if cfg!(target_os = "windows") {
            ProtocolStyle::Localhost
        } else {
            ProtocolStyle::Scheme
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_scheme_puts_target_in_host() {
        let url = CustomSchemeResolver.resolve("ipc", "invoke/fs.read").unwrap();
        assert_eq!(url.scheme(), "ipc");
        assert_eq!(url.host_str(), Some("invoke"));
        assert_eq!(url.path(), "/fs.read");
    }

    #[test]
    fn localhost_form() {
        let url = LocalhostResolver.resolve("ipc", "invoke/window.get_all").unwrap();
        assert_eq!(url.as_str(), "http://ipc.localhost/invoke/window.get_all");
    }

    #[test]
    fn base_url_keeps_base_path() {
        let resolver = BaseUrlResolver::new(Url::parse("http://127.0.0.1:9000/bridge").unwrap());
        let url = resolver.resolve("ipc", "invoke/bridge.ping").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/bridge/ipc/invoke/bridge.ping");
    }

    #[test]
    fn base_url_page_expression_is_template_literal() {
        let resolver = BaseUrlResolver::new(Url::parse("http://localhost:1/").unwrap());
        assert_eq!(
            resolver.page_expression(),
            "`${\"http://localhost:1/\"}${protocol}/${url}`"
        );
    }
}
