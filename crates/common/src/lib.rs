//! Common utilities for usb-shim
//!
//! This crate provides the ambient plumbing shared by the host bridge and the
//! command line runner: error handling, logging setup, and the runtime
//! configuration (device profiles and app runs).

pub mod config;
pub mod error;
pub mod logging;

pub use config::{AppConfig, AppKind, DeviceProfile, GeneralSettings, ShimConfig};
pub use error::{Error, Result};
pub use logging::{libusb_debug_level, setup_logging};
