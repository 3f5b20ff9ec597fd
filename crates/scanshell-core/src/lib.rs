//! ScanShell Core - session lifecycle for a licensed camera scanning SDK.
//!
//! This crate implements:
//! - License persistence (validated flag + saved license identifier)
//! - The camera resource handle and its single outstanding lease
//! - The validation gate that collapses concurrent validations into one
//! - The session lifecycle coordinator state machine (Idle → Validating → Ready)
//! - The native SDK boundary and its event inbox
//! - Configuration, decode de-duplication, and an embedding facade for FFI crates

#![forbid(unsafe_code)]

// Core state machines
pub mod coordinator;
pub mod gate;

// Resources
pub mod camera;
pub mod store;

// Boundary
pub mod platform;
pub mod scan;
pub mod embed;

// Supporting modules
pub mod config;
pub mod errors;
pub mod types;
pub mod harness;

#[cfg(test)]
mod proptests;

pub use camera::{
    display_container, CameraLease, CameraResourceHandle, ContainerLayout, DisplayContainer,
};
pub use config::{ConfigError, ScanConfig};
pub use coordinator::{CoordinatorOptions, SessionLifecycleCoordinator};
pub use embed::EmbeddedSession;
pub use errors::SessionError;
pub use gate::{ValidationGate, ValidationResult};
pub use platform::{Connectivity, EventSink, NativeCamera, NativeEvent, Platform};
pub use scan::{DecodeDebouncer, DecodeTicket};
pub use store::{FileLicenseStore, InMemoryLicenseStore, LicenseStore, StoreError};
pub use types::{
    Bounds, ContainerId, LicenseRecord, ReadinessFlags, ScannerMode, SessionEvent, SessionState,
    Surface, Validation, ValidationPath, ValidationState,
};
