//! ScanShell Platform iOS - Rust library for the iOS scanner shell
//!
//! Exposes the scanner session lifecycle to Swift through UniFFI. The Swift
//! app implements [`ScannerBridge`] and drives a [`ScanCore`].

uniffi::setup_scaffolding!();

mod bridge;
mod scanner;
mod error;

pub use bridge::{BridgeConnectivity, IosCamera, ScannerBridge};
pub use scanner::{ScanCore, ScanEvent};
pub use error::ScanError;
