use std::{io, result};

use thiserror::Error;

/// The `Result` alias of the connection module.
pub type ConnectionResult<T> = result::Result<T, ConnectionError>;

/// The error reported by connectors and connections.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("connection timed out")]
    TimedOut,
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("command rejected by server: {0}")]
    No(String),
    #[error("command not understood by server: {0}")]
    Bad(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
