//! Logging setup and configuration

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable libusb reads its log verbosity from
pub const LIBUSB_DEBUG_ENV: &str = "LIBUSB_DEBUG";

/// Map a `LIBUSB_DEBUG` value (0 = none .. 4 = debug) to a tracing level
pub fn libusb_debug_level(value: &str) -> Option<&'static str> {
    match value.trim() {
        "0" => Some("off"),
        "1" => Some("error"),
        "2" => Some("warn"),
        "3" => Some("info"),
        "4" => Some("debug"),
        _ => None,
    }
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` overrides `default_level`. `LIBUSB_DEBUG` additionally sets
/// the level of the shim's own API trace. Output goes to stderr.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    if let Ok(value) = std::env::var(LIBUSB_DEBUG_ENV) {
        let level = libusb_debug_level(&value).ok_or_else(|| {
            crate::Error::Config(format!("Invalid {} value '{}'", LIBUSB_DEBUG_ENV, value))
        })?;
        let directive: Directive = format!("shim={}", level)
            .parse()
            .map_err(|e| crate::Error::Config(format!("Invalid log directive: {}", e)))?;
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}
