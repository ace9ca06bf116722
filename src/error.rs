//! Error types and result definitions for the miswitch crate.
//! Groups every failure into the taxonomy callers act on (see [`ErrorKind`]).

use thiserror::Error;

/// Represents all possible errors that can occur when talking to a plug or the device table.
#[derive(Error, Debug, Clone)]
pub enum MiioError {
    /// Switch id outside the configured range
    #[error("Invalid switch id {id} (configured switches: {count})")]
    InvalidSwitchId { id: usize, count: usize },

    /// Stored token is not 32 hex characters
    #[error("Invalid device token: {0}")]
    InvalidToken(String),

    /// The switch has a value range and cannot be read as on/off
    #[error("Switch {0} is not a binary on/off switch")]
    NotBinarySwitch(usize),

    /// No hello reply within the handshake deadline
    #[error("Timeout waiting for handshake reply")]
    HandshakeTimeout,

    /// Hello reply shorter than 16 bytes
    #[error("Malformed handshake reply ({0} bytes)")]
    MalformedHandshake(usize),

    /// Socket level failure (resolve, bind, send, receive)
    #[error("IO error: {0}")]
    Io(String),

    /// No reply to a command within the command deadline
    #[error("Timeout waiting for command reply")]
    CommandTimeout,

    /// Failed to encrypt a command for the device
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Ciphertext from the device is not a whole number of blocks
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Command reply is too short or carries no usable result
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),

    /// Settings document could not be read or parsed
    #[error("Failed to load device table: {0}")]
    Load(String),

    /// Settings document could not be written
    #[error("Failed to save device table: {0}")]
    Persistence(String),
}

/// Failure classes of [`MiioError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad id or token. Never retried, no network I/O attempted.
    Configuration,
    /// Handshake timed out or returned garbage.
    Discovery,
    /// Socket errors and command timeouts.
    Transport,
    /// Cipher setup or block size mismatch.
    Crypto,
    /// Reply could not be decoded into a result.
    Protocol,
    /// Settings document load/save failure.
    Persistence,
}

/// A specialized Result type for miio operations.
pub type Result<T> = std::result::Result<T, MiioError>;

impl From<std::io::Error> for MiioError {
    fn from(err: std::io::Error) -> Self {
        MiioError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MiioError {
    fn from(err: serde_json::Error) -> Self {
        MiioError::Json(err.to_string())
    }
}

impl MiioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MiioError::InvalidSwitchId { .. } => ErrorKind::Configuration,
            MiioError::InvalidToken(_) => ErrorKind::Configuration,
            MiioError::NotBinarySwitch(_) => ErrorKind::Configuration,
            MiioError::HandshakeTimeout => ErrorKind::Discovery,
            MiioError::MalformedHandshake(_) => ErrorKind::Discovery,
            MiioError::Io(_) => ErrorKind::Transport,
            MiioError::CommandTimeout => ErrorKind::Transport,
            MiioError::EncryptionFailed => ErrorKind::Crypto,
            MiioError::DecryptionFailed => ErrorKind::Crypto,
            MiioError::InvalidResponse(_) => ErrorKind::Protocol,
            MiioError::Json(_) => ErrorKind::Protocol,
            MiioError::Load(_) => ErrorKind::Persistence,
            MiioError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Whether calling the same operation again may succeed.
    ///
    /// Load failures are not retryable: there is no valid state without the table.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::Discovery | ErrorKind::Transport => true,
            ErrorKind::Persistence => matches!(self, MiioError::Persistence(_)),
            _ => false,
        }
    }
}
