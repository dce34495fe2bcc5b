use std::io;

use thiserror::Error;

/// Errors returned by the fanline dispatcher.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket setup or teardown failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Invalid configuration value.
    #[error("config: {0}")]
    Config(String),
    /// Endpoint spec could not be parsed (expected `tcp/host:port`).
    #[error("invalid endpoint spec: {0}")]
    InvalidSpec(String),
    /// The target worker has shut down.
    #[error("worker not running")]
    NotRunning,
}
