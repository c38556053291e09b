//! Error types for the model build pipeline
//!
//! Device-level failures never show up here: drivers report them through
//! their `DeviceResult` return values or by simply not delivering a
//! completion event. These errors cover misuse of the public API,
//! configuration problems and setup failures.

use thiserror::Error;

/// Main error type for the model build crate
#[derive(Error, Debug)]
pub enum ModelBuildError {
    #[error("Cannot start a model build without target points")]
    EmptyTargetList,

    /// All event sinks were dropped while a pass was waiting for events
    #[error("Device event channel closed")]
    EventChannelClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result alias used throughout the crate's public API
pub type ModelBuildResult<T> = Result<T, ModelBuildError>;
