//! # Error Types
//!
//! Error handling for the RPC engine.
//!
//! Every failure is an [`RpcError`]. The variants fall into the categories reported by
//! [`RpcError::category`]:
//! - **Connection**: I/O failures, malformed or oversized frames. The connection ends.
//! - **Protocol**: the remote side does not know the service or method. The connection
//!   stays usable.
//! - **Authentication**: zero-knowledge handshake rejected. The connection ends.
//! - **RemoteApplication**: the invoked method itself failed; carried as [`RemoteError`].
//! - **Codec**: (de)serialization, compression or session-cipher failures. Treated like a
//!   connection error since the payload can no longer be trusted.
//! - **Configuration**: host set-up mistakes such as registering after start.
//!
//! Callers that need to tell "my remote method threw" apart from "the call itself failed"
//! use [`RpcError::is_remote`].
//!
//! ## Example Usage
//! ```rust
//! use wirecall::error::{ErrorCategory, RemoteError, RpcError};
//!
//! let err = RpcError::Remote(RemoteError::new("ArgumentError", "b must be positive"));
//! assert!(err.is_remote());
//! assert_eq!(err.category(), ErrorCategory::RemoteApplication);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Frame validation errors
    pub const ERR_UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_INVALID_UTF8: &str = "String is not valid UTF-8";
    pub const ERR_TRUNCATED_BLOCK: &str = "Truncated parameter block";
    pub const ERR_UNKNOWN_SLOT_TAG: &str = "Unknown parameter slot tag";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after payload";

    /// Connection errors
    pub const ERR_CONNECT_TIMEOUT: &str = "Unable to connect within the configured timeout";

    /// Registry errors
    pub const ERR_ALREADY_STARTED: &str = "Service cannot be added after the host is started";

    /// Zero-knowledge handshake errors
    pub const ERR_UNKNOWN_USER: &str = "Unknown username";
    pub const ERR_PROOF_MISMATCH: &str = "Client proof does not match";
    pub const ERR_SERVER_PROOF_MISMATCH: &str = "Server proof does not match";
    pub const ERR_PROOF_WITHOUT_INIT: &str = "Proof received before initiation";
    pub const ERR_SESSION_REQUIRED: &str = "Zero-knowledge session required";
    pub const ERR_HANDSHAKE_REJECTED: &str = "Server terminated the handshake";

    /// Cipher errors
    pub const ERR_BAD_CIPHERTEXT_LEN: &str = "Ciphertext length is not a positive multiple of the block size";
    pub const ERR_BAD_PADDING: &str = "Invalid padding";
}

/// Coarse classification of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Authentication,
    RemoteApplication,
    Codec,
    Configuration,
}

/// A transportable error record produced when an invoked method fails.
///
/// `kind` names the failure (for Rust errors, the error's type name), `message` is the
/// display text and `remote_trace` optionally carries the server-side source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    pub remote_trace: Option<String>,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            remote_trace: None,
        }
    }

    /// Build a record from any error, using its type name as the kind and its source
    /// chain as the remote trace.
    pub fn from_error<E: std::error::Error + 'static>(err: &E) -> Self {
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }

        Self {
            kind: short_type_name::<E>().to_string(),
            message: err.to_string(),
            remote_trace: if trace.is_empty() {
                None
            } else {
                Some(trace.join(" <- "))
            },
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.remote_trace = Some(trace.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    // keep generic arguments intact, strip the module path of the outer type only
    let outer = full.split('<').next().unwrap_or(full);
    match outer.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}

// RpcError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Frame too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("Remote interface version mismatch: {0}")]
    VersionMismatch(String),

    #[error("Service not found on host: {0}")]
    ServiceNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Remote method failed: {0}")]
    Remote(RemoteError),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("{}", constants::ERR_ALREADY_STARTED)]
    AlreadyStarted,

    #[error("Service already added, only one instance allowed: {0}")]
    DuplicateService(String),
}

impl RpcError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RpcError::Io(_)
            | RpcError::ConnectionClosed
            | RpcError::Timeout(_)
            | RpcError::OversizedPacket(_)
            | RpcError::InvalidFrame(_)
            | RpcError::UnexpectedMessage => ErrorCategory::Connection,
            RpcError::VersionMismatch(_) | RpcError::ServiceNotFound(_) => {
                ErrorCategory::Protocol
            }
            RpcError::AuthenticationFailed(_) => ErrorCategory::Authentication,
            RpcError::Remote(_) => ErrorCategory::RemoteApplication,
            RpcError::SerializeError(_)
            | RpcError::DeserializeError(_)
            | RpcError::CompressionFailure
            | RpcError::DecompressionFailure
            | RpcError::EncryptionFailure
            | RpcError::DecryptionFailure(_) => ErrorCategory::Codec,
            RpcError::ConfigError(_)
            | RpcError::AlreadyStarted
            | RpcError::DuplicateService(_) => ErrorCategory::Configuration,
        }
    }

    /// True when the invoked remote method failed, as opposed to the call machinery.
    pub fn is_remote(&self) -> bool {
        matches!(self, RpcError::Remote(_))
    }

    /// True when the error leaves the connection in an unusable state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Authentication | ErrorCategory::Codec
        )
    }
}

impl From<RemoteError> for RpcError {
    fn from(err: RemoteError) -> Self {
        RpcError::Remote(err)
    }
}

/// Type alias for Results using RpcError
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] io::Error);

    #[test]
    fn test_remote_error_from_error_keeps_kind_and_chain() {
        let err = Outer(io::Error::new(io::ErrorKind::Other, "disk on fire"));
        let remote = RemoteError::from_error(&err);
        assert_eq!(remote.kind, "Outer");
        assert_eq!(remote.message, "outer failure");
        assert_eq!(remote.remote_trace.as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(RpcError::ConnectionClosed.category(), ErrorCategory::Connection);
        assert_eq!(
            RpcError::VersionMismatch("Max".into()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            RpcError::AuthenticationFailed("nope".into()).category(),
            ErrorCategory::Authentication
        );
        assert_eq!(RpcError::CompressionFailure.category(), ErrorCategory::Codec);
        assert!(RpcError::DecompressionFailure.is_fatal());
        assert!(!RpcError::VersionMismatch("x".into()).is_fatal());
        assert!(!RpcError::Remote(RemoteError::new("k", "m")).is_fatal());
    }
}
