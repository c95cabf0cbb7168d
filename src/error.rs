//! Gateway error types

use http::StatusCode;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors raised while authenticating, rewriting, dialing or relaying a request
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Client certificate missing, unparsable, or its name lacks the required suffix
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Request framing not allowed for the connection's protocol version
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// HTTP/1 request head could not be parsed
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// HTTP/1 request head larger than the configured limit
    #[error("Request head exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    /// HTTP/2 request body larger than the configured limit
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Upstream proxy refused the connection or the dial timed out
    #[error("Failed to connect to upstream proxy {addr}: {reason}")]
    UpstreamUnreachable { addr: String, reason: String },

    /// Upstream reply could not be parsed
    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// The negotiated connection kind cannot serve this request
    #[error("Unsupported capability: {0}")]
    CapabilityUnsupported(String),

    /// Invariant broken while building a response or request
    #[error("Internal error: {0}")]
    Internal(String),

    /// Read or write failure on either side of the tunnel
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl GatewayError {
    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// Create a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an upstream protocol error
    pub fn upstream_protocol(msg: impl Into<String>) -> Self {
        Self::UpstreamProtocol(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl ToString) -> Self {
        Self::Internal(msg.to_string())
    }

    /// Status the client should see, or `None` when the connection is just ended.
    ///
    /// Errors after the upstream connection exists mostly map to `None`: by
    /// then response bytes may already be on the wire.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::AuthenticationFailed(_) => Some(StatusCode::FORBIDDEN),
            Self::ProtocolViolation(_) | Self::MalformedRequest(_) => {
                Some(StatusCode::BAD_REQUEST)
            }
            Self::HeadersTooLarge { .. } => Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            Self::BodyTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Self::UpstreamProtocol(_) | Self::CapabilityUnsupported(_) | Self::Internal(_) => {
                Some(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::UpstreamUnreachable { .. } | Self::Transport(_) => None,
        }
    }

    /// Plain-text body sent along with [`status_code`](Self::status_code)
    pub fn response_message(&self) -> &'static str {
        match self.status_code() {
            Some(StatusCode::FORBIDDEN) => "Permission Denied",
            Some(StatusCode::BAD_REQUEST) => "Bad Request",
            Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE) => {
                "Request Header Fields Too Large"
            }
            Some(StatusCode::PAYLOAD_TOO_LARGE) => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }
}
