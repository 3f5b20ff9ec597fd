//! Error types for iOS platform

use thiserror::Error;

use scanshell_core::config::ConfigError;
use scanshell_core::SessionError;

/// Scanner errors exposed to Swift
#[derive(Debug, Error, uniffi::Error, Clone)]
#[uniffi(flat_error)]
pub enum ScanError {
    #[error("{0}")]
    NoConnectivity(String),

    #[error("{0}")]
    ValidationFailure(String),

    #[error("Camera is already in use by another screen")]
    ResourceBusy,

    #[error("Scanner is not initialized")]
    NotReady,

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<SessionError> for ScanError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NoConnectivity(msg) => ScanError::NoConnectivity(msg),
            SessionError::ValidationFailure(msg) => ScanError::ValidationFailure(msg),
            SessionError::ResourceBusy => ScanError::ResourceBusy,
            SessionError::NotReady => ScanError::NotReady,
            SessionError::Camera(msg) => ScanError::Camera(msg),
            SessionError::Store(msg) => ScanError::Store(msg),
        }
    }
}

impl From<ConfigError> for ScanError {
    fn from(e: ConfigError) -> Self {
        ScanError::Config(e.to_string())
    }
}
