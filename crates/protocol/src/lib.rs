//! USB vocabulary for usb-shim
//!
//! This crate defines the types shared between the shim core and the host
//! bridges: endpoint addressing, transfer types and status, control setup
//! decoding, descriptors, and the libusb-compatible error vocabulary.
//!
//! # Example
//!
//! ```
//! use protocol::{Direction, EndpointAddress, UsbError};
//!
//! let ep = EndpointAddress(0x81);
//! assert_eq!(ep.direction(), Direction::In);
//! assert_eq!(ep.number(), 1);
//!
//! assert_eq!(UsbError::NoDevice.code(), -4);
//! assert_eq!(UsbError::NoDevice.name(), "LIBUSB_ERROR_NO_DEVICE");
//! ```

pub mod descriptors;
pub mod error;
pub mod types;

pub use descriptors::{
    ConfigDescriptor, DeviceDescriptor, EndpointDescriptor, InterfaceDescriptor,
    STRING_INDEX_CONFIG, STRING_INDEX_INTERFACE, STRING_INDEX_MANUFACTURER, STRING_INDEX_PRODUCT,
    STRING_INDEX_SERIAL_NUMBER,
};
pub use error::{Result, UsbError, error_name, strerror};
pub use types::{
    ControlSetup, Direction, EndpointAddress, Recipient, RequestKind, TransferStatus, TransferType,
};
