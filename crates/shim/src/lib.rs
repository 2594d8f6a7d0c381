//! libusb-compatible device access over an asynchronous host bridge
//!
//! The shim presents the subset of the libusb API a typical SDR-style
//! client needs (device discovery, descriptors, control transfers and
//! asynchronous bulk streaming) on top of a [`HostBridge`]: a facility that
//! talks to one device and reports bulk completions whenever it likes.
//!
//! Completions are never delivered on the bridge's schedule. The bridge only
//! marks a transfer terminal; callbacks run when the caller drives
//! [`Session::poll`] (or [`Session::handle_events_timeout`]) from its own
//! loop.
//!
//! # Example
//!
//! ```
//! use shim::test_utils::MockBridge;
//! use shim::{DeviceSelector, Session, TransferStatus};
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! let bridge = MockBridge::new();
//! let session = Session::init(bridge.clone(), DeviceSelector::new(0x1d50, 0x6089)).unwrap();
//!
//! let devices = session.get_device_list(session.context()).unwrap();
//! let handle = session.open(devices[0]).unwrap();
//!
//! let received = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&received);
//! let transfer = session.alloc_transfer(0);
//! transfer
//!     .fill_bulk(handle, 0x81, vec![0; 512], move |_, t, c| {
//!         assert_eq!(c.status, TransferStatus::Completed);
//!         sink.lock().unwrap().extend(t.data().unwrap());
//!     }, Duration::ZERO)
//!     .unwrap();
//!
//! session.submit(&transfer).unwrap();
//! bridge.complete_pending_in(&[1, 2, 3]);
//! assert_eq!(session.poll().unwrap(), 1);
//! assert_eq!(*received.lock().unwrap(), vec![1, 2, 3]);
//! ```

pub mod bridge;
pub mod dispatcher;
pub mod identity;
mod registry;
pub mod session;
pub mod submission;
pub mod test_utils;
pub mod transfer;
pub mod unsupported;

pub use bridge::{HostBridge, copy_nul_terminated};
pub use identity::{
    Context, DEFAULT_BUS_NUMBER, DEFAULT_CONTEXT, DEFAULT_DEVICE, DEFAULT_DEVICE_ADDRESS,
    DEFAULT_HANDLE, Device, DeviceHandle, DeviceSelector,
};
pub use session::Session;
pub use transfer::{
    Completion, IsoPacketDescriptor, Transfer, TransferCallback, TransferId, TransferRef,
};

pub use protocol::{
    ConfigDescriptor, ControlSetup, DeviceDescriptor, Direction, EndpointAddress, Result,
    TransferStatus, TransferType, UsbError,
};
