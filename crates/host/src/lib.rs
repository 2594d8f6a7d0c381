//! Local libusb host bridge for usb-shim
//!
//! [`RusbBridge`] implements [`shim::HostBridge`] on top of rusb. Control
//! transfers and descriptor reads are synchronous; bulk transfers run on a
//! dedicated `usb-worker` thread, one blocking call per submission, and
//! complete through the shim's transfer references.

pub mod bridge;
pub mod descriptors;
pub mod transfers;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use bridge::RusbBridge;
pub use transfers::map_rusb_error;
