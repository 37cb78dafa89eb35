//! A development peer that speaks the invoke envelope over plain HTTP.
//!
//! It stands in for the native host when running pages in a browser or in
//! tests: `POST /ipc/invoke/:method` dispatches to registered handlers, and
//! `GET /assets/*path` serves files with HTML passed through the bootstrap.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use url::Url;

use crate::bootstrap::Bootstrap;
use crate::ipc::{ContentKind, InvokeParam, InvokeResult, ResponseEnvelope, WINDOW_ID_HEADER};

/// One decoded call as seen by a handler.
#[derive(Debug, Clone)]
pub struct InvokeCall {
    pub method: String,
    pub window_id: String,
    pub params: Vec<InvokeParam>,
}

type BlockingHandler = Arc<dyn Fn(InvokeCall) -> InvokeResult + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(InvokeCall) -> BoxFuture<'static, InvokeResult> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Blocking(BlockingHandler),
    Async(AsyncHandler),
}

/// Method name to handler table.
#[derive(Clone, Default)]
pub struct InvokeRouter {
    handlers: HashMap<String, Handler>,
}

impl InvokeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `bridge.ping` answers `"pong"`; `bridge.echo` sends its params back,
    /// a lone binary param as raw bytes.
    pub fn with_builtins() -> Self {
        Self::new()
            .handle("bridge.ping", |_| InvokeResult::json(json!("pong")))
            .handle("bridge.echo", |call| match call.params.as_slice() {
                [InvokeParam::Binary(bytes)] => InvokeResult::binary(bytes.clone()),
                params => match serde_json::to_value(params) {
                    Ok(value) => InvokeResult::json(value),
                    Err(err) => InvokeResult::error(err.to_string()),
                },
            })
    }

    /// Register a handler that runs on the blocking pool.
    pub fn handle<F, R>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(InvokeCall) -> R + Send + Sync + 'static,
        R: Into<InvokeResult>,
    {
        self.handlers.insert(
            method.to_string(),
            Handler::Blocking(Arc::new(move |call| handler(call).into())),
        );
        self
    }

    pub fn handle_async<F, Fut, R>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(InvokeCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Into<InvokeResult>,
    {
        let handler = Arc::new(handler);
        self.handlers.insert(
            method.to_string(),
            Handler::Async(Arc::new(move |call| -> BoxFuture<'static, InvokeResult> {
                let handler = Arc::clone(&handler);
                Box::pin(async move { handler(call).await.into() })
            })),
        );
        self
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    pub async fn call(&self, call: InvokeCall) -> InvokeResult {
        let Some(handler) = self.handlers.get(&call.method).cloned() else {
            tracing::warn!(target: "peer", method = %call.method, "unknown invoke method");
            return InvokeResult::error(format!("unknown method {}", call.method));
        };

        match handler {
            Handler::Blocking(handler) => {
                match tokio::task::spawn_blocking(move || handler(call)).await {
                    Ok(result) => result,
                    Err(err) => InvokeResult::error(format!("handler panicked: {err}")),
                }
            }
            Handler::Async(handler) => handler(call).await,
        }
    }
}

pub struct PeerConfig {
    pub router: InvokeRouter,
    pub bootstrap: Bootstrap,
    pub asset_root: Option<PathBuf>,
}

struct PeerState {
    router: InvokeRouter,
    bootstrap: Bootstrap,
    asset_root: Option<PathBuf>,
}

pub struct PeerHandle {
    pub addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    server_handle: tokio::task::JoinHandle<()>,
}

impl PeerHandle {
    /// `http://<addr>/`, suitable for a [`BaseUrlResolver`](crate::ipc::BaseUrlResolver).
    pub fn base_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("http://{}/", self.addr))?)
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.server_handle.await;
    }
}

pub async fn start_peer(addr: SocketAddr, config: PeerConfig) -> Result<PeerHandle> {
    let state = Arc::new(PeerState {
        router: config.router,
        bootstrap: config.bootstrap,
        asset_root: config.asset_root,
    });

    let router = Router::new()
        .route("/ipc/invoke/:method", post(invoke))
        .route("/assets/*path", get(asset))
        .with_state(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let graceful =
        axum::serve(listener, router.into_make_service()).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

    let handle = tokio::spawn(async move {
        if let Err(err) = graceful.await {
            tracing::error!(target: "peer", error = %err, "peer server error");
        }
    });

    tracing::info!(target: "peer", addr = %local_addr, "invoke peer listening");

    Ok(PeerHandle {
        addr: local_addr,
        shutdown_tx,
        server_handle: handle,
    })
}

fn envelope_response(envelope: ResponseEnvelope, status: StatusCode) -> Response {
    (status, envelope.headers, envelope.body).into_response()
}

async fn invoke(
    State(state): State<Arc<PeerState>>,
    AxumPath(method): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(window_id) = headers
        .get(WINDOW_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
    else {
        return (StatusCode::BAD_REQUEST, "missing X-Window-Id header").into_response();
    };

    let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok());
    let params = if ContentKind::is_json(content_type) {
        match serde_json::from_slice::<Vec<Value>>(&body) {
            Ok(values) => values.into_iter().map(InvokeParam::Json).collect(),
            Err(err) => {
                tracing::warn!(target: "peer", %method, error = %err, "invoke body is not a JSON array");
                return envelope_response(
                    InvokeResult::error(err.to_string()).encode(),
                    StatusCode::BAD_REQUEST,
                );
            }
        }
    } else {
        vec![InvokeParam::Binary(body.to_vec())]
    };

    tracing::debug!(target: "peer", %method, %window_id, params = params.len(), "invoke");
    let result = state
        .router
        .call(InvokeCall {
            method,
            window_id,
            params,
        })
        .await;

    let envelope = result.encode();
    let status = StatusCode::from_u16(envelope.status).unwrap_or(StatusCode::OK);
    envelope_response(envelope, status)
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|component| matches!(component, Component::Normal(_)))
}

async fn asset(State(state): State<Arc<PeerState>>, AxumPath(path): AxumPath<String>) -> Response {
    let Some(root) = &state.asset_root else {
        return (StatusCode::NOT_FOUND, "no asset root configured").into_response();
    };

    let relative = Path::new(&path);
    if !is_plain_relative(relative) {
        return (StatusCode::BAD_REQUEST, "invalid asset path").into_response();
    }

    let mut full = root.join(relative);
    if tokio::fs::metadata(&full).await.map(|meta| meta.is_dir()).unwrap_or(false) {
        full = full.join("index.html");
    }

    let content = match tokio::fs::read(&full).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return (StatusCode::NOT_FOUND, "file not found").into_response();
        }
        Err(err) => {
            tracing::error!(target: "peer", path = %full.display(), error = %err, "failed to read asset");
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let mime = mime_guess::from_path(&full).first_or_octet_stream();
    let is_html = mime.type_() == mime_guess::mime::TEXT && mime.subtype() == mime_guess::mime::HTML;

    let body = if is_html {
        match String::from_utf8(content) {
            Ok(html) => state.bootstrap.inject_html(&html).into_bytes(),
            Err(err) => err.into_bytes(),
        }
    } else {
        content
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    (StatusCode::OK, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal() {
        assert!(is_plain_relative(Path::new("app/index.html")));
        assert!(!is_plain_relative(Path::new("../secret")));
        assert!(!is_plain_relative(Path::new("/etc/passwd")));
    }

    #[tokio::test]
    async fn unknown_method_is_err() {
        let router = InvokeRouter::with_builtins();
        let result = router
            .call(InvokeCall {
                method: "nope".into(),
                window_id: "1".into(),
                params: vec![],
            })
            .await;
        assert!(!result.is_ok());
        assert_eq!(router.methods(), vec!["bridge.echo", "bridge.ping"]);
    }

    #[tokio::test]
    async fn echo_returns_params() {
        let result = InvokeRouter::with_builtins()
            .call(InvokeCall {
                method: "bridge.echo".into(),
                window_id: "1".into(),
                params: vec![InvokeParam::Json(json!(1)), InvokeParam::Json(json!("two"))],
            })
            .await;
        assert_eq!(result, InvokeResult::json(json!([1, "two"])));
    }
}
