//! Request/response envelopes for `ipc://invoke/<method>`.
//!
//! Nothing in here performs I/O. The transport hands the codec a method call
//! and gets back the URL, headers and body to send; once the host answers it
//! hands back the response headers and body and gets the decoded payload.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use url::Url;

use super::error::{ErrorDetail, InvokeError, ProtocolError, RequestError};
use super::resolver::ProtocolResolver;

pub const IPC_PROTOCOL: &str = "ipc";
pub const WINDOW_ID_HEADER: &str = "x-window-id";
pub const RESULT_KIND_HEADER: &str = "x-invoke-result";
pub const JSON_MIME: &str = "application/json";
pub const BINARY_MIME: &str = "application/octet-stream";

// Everything that could end or split a single path segment.
const METHOD_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const RESULT_OK: &str = "Ok";
const RESULT_ERR: &str = "Err";

/// One positional argument of an invoke call.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeParam {
    Json(Value),
    Binary(Vec<u8>),
}

impl Serialize for InvokeParam {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            InvokeParam::Json(value) => value.serialize(serializer),
            // Only reached when the buffer shares the call with other params.
            InvokeParam::Binary(bytes) => serializer.collect_seq(bytes),
        }
    }
}

impl From<Value> for InvokeParam {
    fn from(value: Value) -> Self {
        InvokeParam::Json(value)
    }
}

impl From<Vec<u8>> for InvokeParam {
    fn from(bytes: Vec<u8>) -> Self {
        InvokeParam::Binary(bytes)
    }
}

impl From<&[u8]> for InvokeParam {
    fn from(bytes: &[u8]) -> Self {
        InvokeParam::Binary(bytes.to_vec())
    }
}

macro_rules! json_param_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for InvokeParam {
                fn from(value: $ty) -> Self {
                    InvokeParam::Json(json!(value))
                }
            }
        )*
    };
}

json_param_from!(&str, String, bool, i32, i64, u32, u64, f64);

/// Builds a `Vec<InvokeParam>` from heterogeneous arguments.
///
/// ```
/// use lenz_bridge::params;
/// let params = params!["window-1", true, vec![0u8, 1, 2]];
/// assert_eq!(params.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::ipc::InvokeParam>::new() };
    ($($param:expr),+ $(,)?) => {
        vec![$($crate::ipc::InvokeParam::from($param)),+]
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Binary,
}

impl ContentKind {
    pub fn mime(self) -> &'static str {
        match self {
            ContentKind::Json => JSON_MIME,
            ContentKind::Binary => BINARY_MIME,
        }
    }

    /// Whether a `Content-Type` header names JSON. Parameters such as
    /// `charset` are ignored.
    pub fn is_json(content_type: Option<&str>) -> bool {
        content_type
            .and_then(|value| value.split(';').next())
            .map(|media| media.trim().eq_ignore_ascii_case(JSON_MIME))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    pub method: String,
    pub params: Vec<InvokeParam>,
    pub window_id: String,
}

impl InvokeRequest {
    pub fn new(method: impl Into<String>, params: Vec<InvokeParam>, window_id: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params,
            window_id: window_id.into(),
        }
    }

    /// A lone binary parameter travels as the raw body; every other shape is a
    /// JSON array.
    pub fn content_kind(&self) -> ContentKind {
        match self.params.as_slice() {
            [InvokeParam::Binary(_)] => ContentKind::Binary,
            _ => ContentKind::Json,
        }
    }

    /// The method as one percent-encoded path segment. Empty and dot-only
    /// names would address a different endpoint and are rejected.
    fn method_segment(&self) -> Result<String, RequestError> {
        match self.method.as_str() {
            "" | "." | ".." => Err(RequestError::Method(self.method.clone())),
            method => Ok(utf8_percent_encode(method, METHOD_SEGMENT).to_string()),
        }
    }

    pub fn encode(&self, resolver: &dyn ProtocolResolver) -> Result<InvokeEnvelope, RequestError> {
        let url = resolver.resolve(IPC_PROTOCOL, &format!("invoke/{}", self.method_segment()?))?;
        let content_kind = self.content_kind();

        let body = match (content_kind, self.params.as_slice()) {
            (ContentKind::Binary, [InvokeParam::Binary(bytes)]) => bytes.clone(),
            _ => serde_json::to_vec(&self.params)?,
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(WINDOW_ID_HEADER),
            HeaderValue::from_str(&self.window_id)
                .map_err(|_| RequestError::WindowId(self.window_id.clone()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_kind.mime()));

        Ok(InvokeEnvelope {
            url,
            headers,
            body,
            content_kind,
        })
    }
}

/// What goes over the wire for one call. Always sent as `POST`.
#[derive(Debug, Clone)]
pub struct InvokeEnvelope {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub content_kind: ContentKind,
}

pub fn encode(
    method: &str,
    params: Vec<InvokeParam>,
    window_id: &str,
    resolver: &dyn ProtocolResolver,
) -> Result<InvokeEnvelope, RequestError> {
    InvokeRequest::new(method, params, window_id).encode(resolver)
}

/// Decoded `Ok` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokePayload {
    Json(Value),
    Binary(Vec<u8>),
}

impl InvokePayload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            InvokePayload::Json(value) => Some(value),
            InvokePayload::Binary(_) => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            InvokePayload::Binary(bytes) => Some(bytes),
            InvokePayload::Json(_) => None,
        }
    }

    /// Deserialize a JSON payload. A binary payload is offered to `T` as a
    /// sequence of bytes.
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        match self {
            InvokePayload::Json(value) => serde_json::from_value(value),
            InvokePayload::Binary(bytes) => serde_json::from_value(Value::from(bytes)),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Interpret a response envelope.
///
/// Only [`InvokeError::Protocol`] and [`InvokeError::Host`] are ever produced
/// here, and an `Err` result never yields a value.
pub fn decode(headers: &HeaderMap, body: &[u8]) -> Result<InvokePayload, InvokeError> {
    let is_json = ContentKind::is_json(header_str(headers, CONTENT_TYPE.as_str()));

    match header_str(headers, RESULT_KIND_HEADER) {
        Some(RESULT_OK) => {
            if is_json {
                let value = serde_json::from_slice(body).map_err(ProtocolError::MalformedBody)?;
                Ok(InvokePayload::Json(value))
            } else {
                Ok(InvokePayload::Binary(body.to_vec()))
            }
        }
        Some(RESULT_ERR) => {
            if is_json {
                let value = serde_json::from_slice(body).map_err(ProtocolError::MalformedBody)?;
                Err(InvokeError::Host(ErrorDetail::Json(value)))
            } else {
                let text = String::from_utf8_lossy(body).into_owned();
                tracing::warn!(
                    target: "invoke",
                    content_type = ?header_str(headers, CONTENT_TYPE.as_str()),
                    "error response is not JSON"
                );
                Err(InvokeError::Host(ErrorDetail::Text(text)))
            }
        }
        Some(other) => {
            tracing::warn!(target: "invoke", result_kind = %other, "unrecognised invoke result kind");
            tracing::debug!(target: "invoke", headers = ?headers, "invalid invoke response headers");
            Err(ProtocolError::UnknownResultKind(other.to_string()).into())
        }
        None => {
            tracing::warn!(target: "invoke", "invoke response carries no result kind");
            tracing::debug!(target: "invoke", headers = ?headers, "invalid invoke response headers");
            Err(ProtocolError::MissingResultKind.into())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResultData {
    Json(Value),
    Binary(Vec<u8>),
}

/// Host-side outcome of a call, ready to be put on the wire with [`InvokeResult::encode`].
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResult {
    Ok(InvokeResultData),
    Err(String),
}

/// Encoded response: status, headers and body.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl InvokeResult {
    pub fn json(value: Value) -> Self {
        InvokeResult::Ok(InvokeResultData::Json(value))
    }

    pub fn binary(bytes: Vec<u8>) -> Self {
        InvokeResult::Ok(InvokeResultData::Binary(bytes))
    }

    pub fn error(message: impl Into<String>) -> Self {
        InvokeResult::Err(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, InvokeResult::Ok(_))
    }

    pub fn encode(&self) -> ResponseEnvelope {
        let mut headers = HeaderMap::new();
        headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
        headers.insert(
            "access-control-allow-methods",
            HeaderValue::from_static("POST, OPTIONS"),
        );
        headers.insert(
            "access-control-expose-headers",
            HeaderValue::from_static("X-Invoke-Result"),
        );
        headers.insert(
            RESULT_KIND_HEADER,
            HeaderValue::from_static(if self.is_ok() { RESULT_OK } else { RESULT_ERR }),
        );

        let (kind, body) = match self {
            InvokeResult::Ok(InvokeResultData::Json(value)) => {
                (ContentKind::Json, value.to_string().into_bytes())
            }
            InvokeResult::Ok(InvokeResultData::Binary(bytes)) => (ContentKind::Binary, bytes.clone()),
            InvokeResult::Err(message) => (ContentKind::Json, json!(message).to_string().into_bytes()),
        };
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(kind.mime()));

        ResponseEnvelope {
            status: 200,
            headers,
            body,
        }
    }
}

impl From<Value> for InvokeResult {
    fn from(value: Value) -> Self {
        InvokeResult::json(value)
    }
}

impl From<Vec<u8>> for InvokeResult {
    fn from(bytes: Vec<u8>) -> Self {
        InvokeResult::binary(bytes)
    }
}

impl From<()> for InvokeResult {
    fn from(_: ()) -> Self {
        InvokeResult::json(Value::Null)
    }
}

impl From<bool> for InvokeResult {
    fn from(value: bool) -> Self {
        InvokeResult::json(Value::Bool(value))
    }
}

impl From<&str> for InvokeResult {
    fn from(message: &str) -> Self {
        InvokeResult::error(message)
    }
}

impl<T: Serialize> From<Option<T>> for InvokeResult {
    fn from(value: Option<T>) -> Self {
        match value.map(serde_json::to_value).transpose() {
            Ok(Some(value)) => InvokeResult::json(value),
            Ok(None) => InvokeResult::json(Value::Null),
            Err(err) => InvokeResult::error(err.to_string()),
        }
    }
}

impl<E: Into<String>> From<Result<Value, E>> for InvokeResult {
    fn from(result: Result<Value, E>) -> Self {
        match result {
            Ok(value) => InvokeResult::json(value),
            Err(err) => InvokeResult::Err(err.into()),
        }
    }
}

impl<E: Into<String>> From<Result<Vec<u8>, E>> for InvokeResult {
    fn from(result: Result<Vec<u8>, E>) -> Self {
        match result {
            Ok(bytes) => InvokeResult::binary(bytes),
            Err(err) => InvokeResult::Err(err.into()),
        }
    }
}
