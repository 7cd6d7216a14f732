//! Engine error types.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the browser driver layer.
///
/// The driver maps failures from the underlying automation transport into
/// these variants so callers can branch on the failure class instead of
/// matching message text.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("browser connection closed")]
    ConnectionClosed,

    #[error("page target closed")]
    TargetClosed,

    #[error("driver operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors surfaced by the capture engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("screenshot capture failed: {0}")]
    Capture(String),

    #[error("page pool is shut down")]
    PoolClosed,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
