//! Error types for Android platform

use thiserror::Error;

use scanshell_core::config::ConfigError;
use scanshell_core::SessionError;

/// ScanShell Android platform errors
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("JNI error: {0}")]
    Jni(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl From<ConfigError> for ScanError {
    fn from(e: ConfigError) -> Self {
        ScanError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(e: serde_json::Error) -> Self {
        ScanError::Config(format!("JSON error: {}", e))
    }
}

impl From<jni::errors::Error> for ScanError {
    fn from(e: jni::errors::Error) -> Self {
        ScanError::Jni(e.to_string())
    }
}
