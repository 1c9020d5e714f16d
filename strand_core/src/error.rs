//! Unified error handling for STRAND
//!
//! This module provides a centralized error type for the whole runtime,
//! ensuring consistent error handling across the stack, the plugin layer
//! and the controller.

use strand_types::NodeAddr;
use thiserror::Error;

/// Main error type for STRAND operations
#[derive(Debug, Error)]
pub enum StrandError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Link-driver (physical layer) errors
    #[error("Driver error: {0}")]
    Driver(String),

    /// A handle did not resolve to an in-use pool slot
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// The node already has an in-flight suspended request
    #[error("Mailbox busy for node {node}")]
    MailboxBusy { node: NodeAddr },

    /// A fixed-capacity pool had no free slot
    #[error("Resource exhausted: {resource}")]
    Exhausted { resource: &'static str },

    /// Lookup failed (unbound node, unknown subscription, ...)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using StrandError
pub type StrandResult<T> = std::result::Result<T, StrandError>;

/// Short alias — `Result<T>` is equivalent to `StrandResult<T>`
pub type Result<T> = StrandResult<T>;

impl From<toml::de::Error> for StrandError {
    fn from(err: toml::de::Error) -> Self {
        StrandError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<serde_json::Error> for StrandError {
    fn from(err: serde_json::Error) -> Self {
        StrandError::Serialization(err.to_string())
    }
}

// NOTE: From<String> and From<&str> intentionally absent.
// Use the specific constructors below instead, which keeps accidental
// untyped errors out of the codebase.

impl StrandError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        StrandError::Config(msg.into())
    }

    /// Create a link-driver error
    pub fn driver<S: Into<String>>(msg: S) -> Self {
        StrandError::Driver(msg.into())
    }

    /// Create an invalid-handle error
    pub fn invalid_handle<S: Into<String>>(msg: S) -> Self {
        StrandError::InvalidHandle(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        StrandError::NotFound(msg.into())
    }

    /// Create an invalid-input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        StrandError::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        StrandError::Internal(msg.into())
    }
}
