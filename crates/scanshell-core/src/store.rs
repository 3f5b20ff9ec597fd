//! Storage abstraction for the persisted license record.
//!
//! The record is two preference entries: a "license validated" flag and the
//! "saved license identifier". This module defines the `LicenseStore` trait
//! and provides in-memory and file-backed implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::LicenseRecord;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::OperationFailed(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence for the license record.
///
/// Writers are serialized behind the validation gate, so implementations only
/// need last-writer-wins semantics.
#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Read the persisted record.
    ///
    /// # Returns
    /// * `Ok(Some(record))` if a record was saved
    /// * `Ok(None)` if nothing is persisted (first-time use)
    /// * `Err(StoreError)` if the operation fails
    async fn load(&self) -> Result<Option<LicenseRecord>, StoreError>;

    /// Overwrite the persisted record.
    async fn save(&self, record: LicenseRecord) -> Result<(), StoreError>;

    /// Remove the persisted record.
    ///
    /// # Returns
    /// * `Ok(())` on success (even if nothing was saved)
    /// * `Err(StoreError)` if the operation fails
    async fn clear(&self) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// Thread-safe in-memory store for tests and hosts without persistence.
#[derive(Default, Clone)]
pub struct InMemoryLicenseStore {
    record: Arc<RwLock<Option<LicenseRecord>>>,
}

impl InMemoryLicenseStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `record` (returning user).
    pub fn with_record(record: LicenseRecord) -> Self {
        Self {
            record: Arc::new(RwLock::new(Some(record))),
        }
    }

    /// Current record without going through the trait.
    pub async fn snapshot(&self) -> Option<LicenseRecord> {
        self.record.read().await.clone()
    }
}

#[async_trait]
impl LicenseStore for InMemoryLicenseStore {
    async fn load(&self) -> Result<Option<LicenseRecord>, StoreError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: LicenseRecord) -> Result<(), StoreError> {
        *self.record.write().await = Some(record);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.record.write().await = None;
        Ok(())
    }
}

// ============================================================================
// File Store Implementation
// ============================================================================

/// On-disk preference document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Preferences {
    #[serde(default)]
    license_validated: bool,
    #[serde(default)]
    saved_license_key: String,
}

/// Preference-file store: a small JSON document holding the two entries.
///
/// Writes go to a sibling temp file that is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileLicenseStore {
    path: PathBuf,
}

impl FileLicenseStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LicenseStore for FileLicenseStore {
    async fn load(&self) -> Result<Option<LicenseRecord>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let prefs: Preferences = serde_json::from_slice(&bytes)?;
        if !prefs.license_validated && prefs.saved_license_key.is_empty() {
            return Ok(None);
        }

        Ok(Some(LicenseRecord {
            license_identifier: prefs.saved_license_key,
            validated: prefs.license_validated,
        }))
    }

    async fn save(&self, record: LicenseRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let prefs = Preferences {
            license_validated: record.validated,
            saved_license_key: record.license_identifier,
        };
        let json = serde_json::to_vec_pretty(&prefs)?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
