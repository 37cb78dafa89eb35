use std::sync::{Arc, OnceLock};

use serde::de::DeserializeOwned;

use super::codec::{decode, InvokeEnvelope, InvokeParam, InvokePayload, InvokeRequest};
use super::error::InvokeError;
use super::resolver::ProtocolResolver;

/// Performs invoke calls against the host, either blocking or non-blocking.
///
/// Both entry points go through [`InvokeRequest::encode`] and [`decode`], so a
/// payload decodes identically whichever path carried it. There are no
/// timeouts at this layer: a host that never answers stalls the caller.
#[derive(Clone)]
pub struct InvokeTransport {
    window_id: String,
    resolver: Arc<dyn ProtocolResolver>,
    client: reqwest::Client,
    blocking: Arc<OnceLock<reqwest::blocking::Client>>,
}

impl InvokeTransport {
    pub fn new(window_id: impl Into<String>, resolver: Arc<dyn ProtocolResolver>) -> Self {
        Self::with_client(window_id, resolver, reqwest::Client::new())
    }

    pub fn with_client(
        window_id: impl Into<String>,
        resolver: Arc<dyn ProtocolResolver>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            window_id: window_id.into(),
            resolver,
            client,
            blocking: Arc::new(OnceLock::new()),
        }
    }

    pub fn window_id(&self) -> &str {
        &self.window_id
    }

    pub fn resolver(&self) -> &Arc<dyn ProtocolResolver> {
        &self.resolver
    }

    fn envelope(&self, method: &str, params: Vec<InvokeParam>) -> Result<InvokeEnvelope, InvokeError> {
        let request = InvokeRequest::new(method, params, self.window_id.as_str());
        Ok(request.encode(self.resolver.as_ref())?)
    }

    /// Non-blocking call. Concurrent calls are independent of each other and
    /// may complete in any order.
    pub async fn invoke_async(
        &self,
        method: &str,
        params: Vec<InvokeParam>,
    ) -> Result<InvokePayload, InvokeError> {
        let envelope = self.envelope(method, params)?;
        tracing::debug!(target: "invoke", %method, url = %envelope.url, "invoke (async)");

        let response = self
            .client
            .post(envelope.url)
            .headers(envelope.headers)
            .body(envelope.body)
            .send()
            .await?;

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        decode(&headers, &body)
    }

    /// Blocking call: the calling thread does nothing else until the host
    /// answers.
    ///
    /// Must not be called from an async worker thread (use `spawn_blocking` or
    /// a plain thread), and never from a handler the host is itself waiting on.
    pub fn invoke_sync(&self, method: &str, params: Vec<InvokeParam>) -> Result<InvokePayload, InvokeError> {
        let envelope = self.envelope(method, params)?;
        tracing::debug!(target: "invoke", %method, url = %envelope.url, "invoke (sync)");

        let response = self
            .blocking_client()?
            .post(envelope.url)
            .headers(envelope.headers)
            .body(envelope.body)
            .send()?;

        let headers = response.headers().clone();
        let body = response.bytes()?;
        decode(&headers, &body)
    }

    pub async fn invoke_async_json<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<InvokeParam>,
    ) -> Result<T, InvokeError> {
        self.invoke_async(method, params)
            .await?
            .deserialize()
            .map_err(InvokeError::Deserialize)
    }

    pub fn invoke_sync_json<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<InvokeParam>,
    ) -> Result<T, InvokeError> {
        self.invoke_sync(method, params)?
            .deserialize()
            .map_err(InvokeError::Deserialize)
    }

    // Built on first use: constructing (or dropping) a blocking client inside
    // an async context panics, and most transports only ever call async.
    fn blocking_client(&self) -> Result<&reqwest::blocking::Client, InvokeError> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder().build()?;
        Ok(self.blocking.get_or_init(|| client))
    }
}
