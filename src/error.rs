//! Error types and result handling for pg-dispatch.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Only failures that stop the dispatch loop are represented here. Column
//! conversion problems and row changes for unknown relations are recovered
//! where they happen and only show up in the logs.
//!
//! # Example
//!
//! ```rust
//! use pg_dispatch::{Error, Result};
//!
//! fn open_stream() -> Result<()> {
//!     Err(Error::Replication {
//!         message: "slot is already active".to_string(),
//!     })
//! }
//!
//! match open_stream() {
//!     Ok(()) => println!("Streaming"),
//!     Err(Error::Replication { message }) => eprintln!("Replication error: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for pg-dispatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error: unreadable file, bad environment value or an
    /// invalid subscription pattern.
    #[error("Configuration error: {0}")]
    Config(String),

    /// PostgreSQL client error on the control connection.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Replication stream error, including loss of the streaming connection.
    #[error("Replication error: {message}")]
    Replication {
        /// Description of the replication error
        message: String,
    },

    /// Invalid or malformed pgoutput message.
    #[error("Invalid message format: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// A subscribed handler failed while a committed transaction was being
    /// delivered.
    #[error("Handler failed for {schema}.{table}: {source}")]
    Handler {
        /// Schema of the event being delivered
        schema: String,
        /// Table of the event being delivered
        table: String,
        /// The error returned by the handler
        source: anyhow::Error,
    },

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// This is not really an error but uses the error mechanism
    /// to cleanly exit the dispatch loop.
    #[error("Shutdown requested")]
    Shutdown,
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// A convenient Result type alias for pg-dispatch operations.
///
/// This is equivalent to `std::result::Result<T, pg_dispatch::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
