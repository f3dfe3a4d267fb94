//! # Error Types
//!
//! Error handling for the node codec, the session crypto and the session
//! state machine.
//!
//! ## Error Categories
//! - **Codec Errors**: malformed or truncated binary nodes, oversized strings,
//!   nesting past [`MAX_DEPTH`](crate::core::tokens::MAX_DEPTH)
//! - **Cryptographic Errors**: MAC mismatches, AES-CBC failures, bad key material
//! - **Session Errors**: aborted handshakes, cancelled or timed out requests,
//!   closed transports
//! - **Ambient Errors**: JSON, base64 and configuration failures
//!
//! Codec errors are local to one encode/decode call. `HmacMismatch`,
//! `DecryptionFailure`, `HandshakeAborted` and `TransportClosed` are fatal to
//! the session that produced them; see [`ProtocolError::is_fatal`].
//!
//! ## Example Usage
//! ```rust
//! use wa_web_protocol::core::NodeReader;
//! use wa_web_protocol::error::ProtocolError;
//!
//! match NodeReader::decode(&[0xf8]) {
//!     Err(ProtocolError::UnexpectedEndOfStream) => {}
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake errors
    pub const ERR_LOGIN_REFUSED: &str = "Server refused the login request";
    pub const ERR_MISSING_REF: &str = "Login reply carries no server ref";
    pub const ERR_NO_KEYPAIR: &str = "Conn received before an ephemeral keypair was issued";
    pub const ERR_SECRET_TOO_SHORT: &str = "Secret blob shorter than 96 bytes";
    pub const ERR_KEYS_LENGTH: &str = "Decrypted key material is not 64 bytes";
    pub const ERR_BINARY_LOGIN_REPLY: &str = "Login reply arrived as a binary frame";

    /// Frame errors
    pub const ERR_FRAME_TOO_SHORT: &str = "Authenticated frame shorter than its MAC";
    pub const ERR_NO_TAG: &str = "Frame carries no message tag";

    /// State errors
    pub const ERR_NOT_AUTHENTICATED: &str = "Session keys are not established";
    pub const ERR_ALREADY_OPEN: &str = "Session was already opened";
    pub const ERR_NOT_OPEN: &str = "Session has not been opened";
    pub const ERR_LOGIN_TIMEOUT: &str = "Login reply timed out";
    pub const ERR_SESSION_TERMINATED: &str = "Session is closed or failed";
    pub const ERR_DUPLICATE_TAG: &str = "Message tag already pending";

    /// System errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_DRIVER_GONE: &str = "Session driver has stopped";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("Invalid string tag: {0}")]
    InvalidStringTag(u8),

    #[error("Invalid list tag: {0}")]
    InvalidListTag(u8),

    #[error("Invalid JID pair")]
    InvalidJidPair,

    #[error("Token index out of range: {0}")]
    TokenIndexOutOfRange(usize),

    #[error("Invalid packed nibble: {0}")]
    InvalidNibble(u8),

    #[error("Invalid node")]
    InvalidNode,

    #[error("Unexpected stream end")]
    UnexpectedStreamEnd,

    #[error("Duplicate attribute: {0}")]
    DuplicateAttribute(String),

    #[error("String is not valid UTF-8")]
    InvalidUtf8,

    #[error("Packed string too large: {0} characters")]
    PackedStringTooLarge(usize),

    #[error("String too large: {0} bytes")]
    StringTooLarge(usize),

    #[error("List too large: {0} entries")]
    ListTooLarge(usize),

    #[error("Node nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    #[error("HMAC mismatch (expected {expected}, got {actual})")]
    HmacMismatch { expected: String, actual: String },

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Random source failure: {0}")]
    Random(String),

    #[error("Handshake aborted: {0}")]
    HandshakeAborted(String),

    #[error("Request timed out: {0}")]
    RequestTimeout(String),

    #[error("Request cancelled: {0}")]
    RequestCancelled(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Transport closed")]
    TransportClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether the error leaves the session untrustworthy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::HmacMismatch { .. }
                | ProtocolError::DecryptionFailure
                | ProtocolError::HandshakeAborted(_)
                | ProtocolError::TransportClosed
        )
    }
}

/// Why a session entered the `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    HmacMismatch,
    DecryptionFailure,
    HandshakeAborted(String),
    TransportClosed,
    Other(String),
}

impl From<&ProtocolError> for FailureReason {
    fn from(err: &ProtocolError) -> Self {
        match err {
            ProtocolError::HmacMismatch { .. } => FailureReason::HmacMismatch,
            ProtocolError::DecryptionFailure => FailureReason::DecryptionFailure,
            ProtocolError::HandshakeAborted(msg) => FailureReason::HandshakeAborted(msg.clone()),
            ProtocolError::TransportClosed => FailureReason::TransportClosed,
            other => FailureReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::HmacMismatch => write!(f, "hmac mismatch"),
            FailureReason::DecryptionFailure => write!(f, "decryption failure"),
            FailureReason::HandshakeAborted(msg) => write!(f, "handshake aborted: {msg}"),
            FailureReason::TransportClosed => write!(f, "transport closed"),
            FailureReason::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
