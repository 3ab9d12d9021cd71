//! Error types for the application.

use thiserror::Error;

use crate::common::types::EResult;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Protocol-related errors (CM and GC framing/decoding).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid packet: {message}")]
    InvalidPacket { message: String },

    #[error("Packet too short: need {needed} bytes, got {got}")]
    PacketTooShort { needed: usize, got: usize },

    #[error("Bad frame magic: {magic:#010x}")]
    BadMagic { magic: u32 },

    #[error("Failed to decode {message_name}: {source}")]
    Decode {
        message_name: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("Invalid string encoding: {message}")]
    InvalidString { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No connection manager endpoints configured")]
    NoEndpoints,

    #[error("Connection timeout")]
    Timeout,
}

/// Authentication errors. These are fatal: retrying with the same
/// credential cannot succeed, so the process exits.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Logon rejected: {result}")]
    Rejected { result: EResult },

    #[error("Steam Guard code required but no TOTP secret or one-shot code is available")]
    GuardCodeUnavailable,

    #[error("Steam Guard code was rejected ({result})")]
    GuardCodeRejected { result: EResult },

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Invalid TOTP shared secret: {0}")]
    InvalidSharedSecret(String),

    #[error("Failed to persist credential file '{path}': {source}")]
    CredentialIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential file '{path}' is malformed: {message}")]
    CredentialFormat { path: String, message: String },
}

/// Errors returned by session operations (`SessionContext` calls).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SteamError {
    #[error("Session is not ready")]
    NotReady,

    #[error("Session disconnected before the response arrived")]
    Disconnected,

    #[error("Timed out waiting for response")]
    Timeout,

    #[error("Request rejected: {0}")]
    Rejected(EResult),

    #[error("Operation not supported for this account")]
    Unsupported,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<ProtocolError> for SteamError {
    fn from(e: ProtocolError) -> Self {
        SteamError::Protocol(e.to_string())
    }
}

/// Shared store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// Task handler errors.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unknown task type '{0}'")]
    UnknownType(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Steam error: {0}")]
    Steam(#[from] SteamError),

    #[error("GC rejected request (result {0})")]
    GcRejected(i32),
}

impl TaskError {
    /// Permanent errors fail the task immediately instead of consuming
    /// the retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TaskError::UnknownType(_))
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
