//! Caller-visible status vocabulary
//!
//! Every operation of the shim reports failures through [`UsbError`]. The
//! variants mirror the libusb error codes so that code written against the
//! libusb API can keep matching on numeric codes and names.

use thiserror::Error;

/// USB error vocabulary
///
/// `Success` has no variant: it is represented by `Ok(..)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Input/output error
    #[error("Input/output error")]
    Io,
    /// Invalid parameter (wrong context, device or handle)
    #[error("Invalid parameter")]
    InvalidParam,
    /// Access denied (insufficient permissions)
    #[error("Access denied (insufficient permissions)")]
    Access,
    /// Device access was refused or the device is gone
    #[error("No such device (it may have been disconnected)")]
    NoDevice,
    /// Entity not found
    #[error("Entity not found")]
    NotFound,
    /// Resource busy (e.g. transfer already in flight)
    #[error("Resource busy")]
    Busy,
    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
    /// Overflow
    #[error("Overflow")]
    Overflow,
    /// Pipe error (endpoint stalled)
    #[error("Pipe error")]
    Pipe,
    /// The host facility lacks a required capability
    #[error("Operation not supported or unimplemented on this platform")]
    NotSupported,
    /// Accepted structurally but never produces an effect
    #[error("Not implemented: {operation}")]
    NotImplemented { operation: String },
    /// Other error with message
    #[error("Other error: {message}")]
    Other { message: String },
}

impl UsbError {
    /// Build a [`UsbError::NotImplemented`] for the named operation
    pub fn not_implemented(operation: impl Into<String>) -> Self {
        UsbError::NotImplemented {
            operation: operation.into(),
        }
    }

    /// libusb numeric error code
    ///
    /// `NotImplemented` has no libusb counterpart and shares the
    /// `LIBUSB_ERROR_NOT_SUPPORTED` code.
    pub fn code(&self) -> i32 {
        match self {
            UsbError::Io => -1,
            UsbError::InvalidParam => -2,
            UsbError::Access => -3,
            UsbError::NoDevice => -4,
            UsbError::NotFound => -5,
            UsbError::Busy => -6,
            UsbError::Timeout => -7,
            UsbError::Overflow => -8,
            UsbError::Pipe => -9,
            UsbError::NotSupported | UsbError::NotImplemented { .. } => -12,
            UsbError::Other { .. } => -99,
        }
    }

    /// libusb symbolic name (`libusb_error_name`)
    pub fn name(&self) -> &'static str {
        match self {
            UsbError::Io => "LIBUSB_ERROR_IO",
            UsbError::InvalidParam => "LIBUSB_ERROR_INVALID_PARAM",
            UsbError::Access => "LIBUSB_ERROR_ACCESS",
            UsbError::NoDevice => "LIBUSB_ERROR_NO_DEVICE",
            UsbError::NotFound => "LIBUSB_ERROR_NOT_FOUND",
            UsbError::Busy => "LIBUSB_ERROR_BUSY",
            UsbError::Timeout => "LIBUSB_ERROR_TIMEOUT",
            UsbError::Overflow => "LIBUSB_ERROR_OVERFLOW",
            UsbError::Pipe => "LIBUSB_ERROR_PIPE",
            UsbError::NotSupported | UsbError::NotImplemented { .. } => {
                "LIBUSB_ERROR_NOT_SUPPORTED"
            }
            UsbError::Other { .. } => "LIBUSB_ERROR_OTHER",
        }
    }

    /// Reverse of [`UsbError::code`]
    ///
    /// Returns `None` for `0` (success) and for codes outside the libusb range.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            -1 => UsbError::Io,
            -2 => UsbError::InvalidParam,
            -3 => UsbError::Access,
            -4 => UsbError::NoDevice,
            -5 => UsbError::NotFound,
            -6 => UsbError::Busy,
            -7 => UsbError::Timeout,
            -8 => UsbError::Overflow,
            -9 => UsbError::Pipe,
            -12 => UsbError::NotSupported,
            -99 => UsbError::Other {
                message: "unknown".to_string(),
            },
            _ => return None,
        };
        Some(err)
    }
}

/// libusb name for a raw status code, `LIBUSB_SUCCESS` included
pub fn error_name(code: i32) -> &'static str {
    if code == 0 {
        return "LIBUSB_SUCCESS";
    }
    UsbError::from_code(code)
        .map(|e| e.name())
        .unwrap_or("**UNKNOWN**")
}

/// Human-readable description of a raw status code (`libusb_strerror`)
pub fn strerror(code: i32) -> String {
    match code {
        0 => "Success".to_string(),
        _ => UsbError::from_code(code)
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
    }
}

/// Type alias for results carrying a [`UsbError`]
pub type Result<T> = std::result::Result<T, UsbError>;
