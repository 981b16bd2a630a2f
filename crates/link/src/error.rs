//! Error types for Monitor link operations.
//!
//! Three classes matter to callers: setup errors surface from builders
//! synchronously, [`LinkError::Unauthorized`] is fatal for the session,
//! and [`ProtocolError`]s never leave the link; they close the socket
//! and trigger a reconnect.

use thiserror::Error;

use crate::protocol::CLOSE_PROTOCOL_VIOLATION;

/// Errors surfaced to users of the link.
#[derive(Debug, Error)]
pub enum LinkError {
    /// URI is not `host:port[/path]`
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri {
        /// Rejected input
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// Neither a token nor credentials were provided
    #[error("Either a session token or login/password must be specified")]
    MissingCredentials,

    /// Login refused the credentials
    #[error("Wrong credentials for '{login}' login")]
    InvalidCredentials {
        /// Login that was refused
        login: String,
    },

    /// Session token rejected by the backend
    #[error("Unauthorized")]
    Unauthorized,

    /// Unexpected HTTP status
    #[error("Unexpected HTTP status {status} from {endpoint}")]
    HttpStatus {
        /// Endpoint URL
        endpoint: String,
        /// Status code returned
        status: u16,
    },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] monitor_core::ConfigError),

    /// The link task is gone
    #[error("Link task failed: {0}")]
    TaskFailed(String),
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Recoverable faults on an open socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON or not a known frame kind
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// Binary frames are not part of the protocol
    #[error("Unexpected binary frame")]
    BinaryFrame,

    /// Peer sent a ping out of sequence
    #[error("Incorrect ping value: expected {expected}, received {received}")]
    PingMismatch {
        /// Value the link was waiting for
        expected: u64,
        /// Value that arrived
        received: u64,
    },

    /// No ping arrived within the liveness interval
    #[error("ping not received in time")]
    LivenessTimeout,
}

impl ProtocolError {
    /// Close code sent to the peer
    pub fn close_code(&self) -> u16 {
        CLOSE_PROTOCOL_VIOLATION
    }
}

/// Failures of a single history page request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Session token rejected
    #[error("Unauthorized")]
    Unauthorized,

    /// Any other non-success status
    #[error("Unexpected status {0}")]
    Status(u16),

    /// Request never produced a response
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body was not a list of history items
    #[error("Decode error: {0}")]
    Decode(String),
}

impl HistoryError {
    /// Whether the whole backfill must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, HistoryError::Unauthorized)
    }
}
