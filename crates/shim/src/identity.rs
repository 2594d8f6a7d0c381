//! Singleton identity tokens
//!
//! The shim supports exactly one context and one device. Callers receive
//! these fixed values from [`Session::context`](crate::Session::context),
//! [`Session::get_device_list`](crate::Session::get_device_list) and
//! [`Session::open`](crate::Session::open); every operation rejects any other
//! value with [`UsbError::InvalidParam`].

use protocol::{Result, UsbError};
use tracing::debug;

/// Library context token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context(pub u32);

/// Device token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Device(pub u32);

/// Open device handle
///
/// Carries the same value as the [`Device`] it was opened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

pub const DEFAULT_CONTEXT: Context = Context(0);
pub const DEFAULT_DEVICE: Device = Device(1);
pub const DEFAULT_HANDLE: DeviceHandle = DeviceHandle(DEFAULT_DEVICE.0);

/// Fixed bus number reported for the device
pub const DEFAULT_BUS_NUMBER: u8 = 0;
/// Fixed device address reported for the device
pub const DEFAULT_DEVICE_ADDRESS: u8 = 0;

/// Vendor/product pair the session negotiates access for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceSelector {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl Context {
    pub fn validate(self) -> Result<()> {
        if self == DEFAULT_CONTEXT {
            Ok(())
        } else {
            debug!("Rejected context {:?}", self);
            Err(UsbError::InvalidParam)
        }
    }
}

impl Device {
    pub fn validate(self) -> Result<()> {
        if self == DEFAULT_DEVICE {
            Ok(())
        } else {
            debug!("Rejected device {:?}", self);
            Err(UsbError::InvalidParam)
        }
    }
}

impl DeviceHandle {
    pub fn validate(self) -> Result<()> {
        if self == DEFAULT_HANDLE {
            Ok(())
        } else {
            debug!("Rejected device handle {:?}", self);
            Err(UsbError::InvalidParam)
        }
    }

    /// Device this handle was opened from
    pub fn device(self) -> Device {
        Device(self.0)
    }
}
