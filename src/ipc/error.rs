use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// The response envelope could not be interpreted.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid Invoke Result: missing result kind")]
    MissingResultKind,
    #[error("Invalid Invoke Result: unknown result kind {0:?}")]
    UnknownResultKind(String),
    #[error("Invalid Invoke Result: malformed JSON body: {0}")]
    MalformedBody(#[source] serde_json::Error),
}

/// Payload of an `Err` response as reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    Json(Value),
    Text(String),
}

impl ErrorDetail {
    /// Human readable message. JSON strings are unwrapped, other JSON values are
    /// rendered compactly.
    pub fn message(&self) -> String {
        match self {
            ErrorDetail::Json(Value::String(message)) => message.clone(),
            ErrorDetail::Json(value) => value.to_string(),
            ErrorDetail::Text(text) => text.clone(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Failures while building the request envelope.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to encode invoke params: {0}")]
    Params(#[from] serde_json::Error),
    #[error("failed to resolve {protocol}://{path}: {source}")]
    Resolve {
        protocol: String,
        path: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid window id header value {0:?}")]
    WindowId(String),
    #[error("invalid invoke method name {0:?}")]
    Method(String),
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("InvokeError: {0}")]
    Host(ErrorDetail),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to deserialize invoke result: {0}")]
    Deserialize(#[source] serde_json::Error),
}

impl InvokeError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, InvokeError::Protocol(_))
    }

    /// The host-reported detail, if this is an application error.
    pub fn host_detail(&self) -> Option<&ErrorDetail> {
        match self {
            InvokeError::Host(detail) => Some(detail),
            _ => None,
        }
    }
}
