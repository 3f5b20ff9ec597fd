//! ScanShell Platform Android - Rust library for the Android scanner shell
//!
//! This crate provides JNI bindings to expose the scanner session lifecycle
//! to Kotlin/Java applications on Android.

mod camera;
mod core;
mod error;
mod preview;

// Re-export main types
pub use camera::{AndroidCamera, BridgeConnectivity};
pub use core::ScanCore;
pub use error::ScanError;
pub use preview::PreviewBridge;

// JNI bindings - only compile on Android targets
#[cfg(target_os = "android")]
mod jni_bindings;
