mod codec;
mod error;
mod resolver;
mod transport;

pub use codec::{
    decode, encode, ContentKind, InvokeEnvelope, InvokeParam, InvokePayload, InvokeRequest,
    InvokeResult, InvokeResultData, ResponseEnvelope, BINARY_MIME, IPC_PROTOCOL, JSON_MIME,
    RESULT_KIND_HEADER, WINDOW_ID_HEADER,
};
pub use error::{ErrorDetail, InvokeError, ProtocolError, RequestError};
pub use resolver::{
    BaseUrlResolver, CustomSchemeResolver, LocalhostResolver, ProtocolResolver, ProtocolStyle,
};
pub use transport::InvokeTransport;
