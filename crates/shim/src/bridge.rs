//! Host bridge seam
//!
//! The host bridge is the external facility that actually talks to the
//! device. The shim calls into it synchronously; bulk transfers are
//! asynchronous from the shim's point of view and are completed later, at a
//! time of the bridge's choosing, through the [`TransferRef`] handed over at
//! submission.

use crate::transfer::TransferRef;
use protocol::{ConfigDescriptor, ControlSetup, DeviceDescriptor, Result};
use std::time::Duration;

/// Device facility behind the shim
///
/// Implementations own at most one active device. Methods that talk to the
/// device are only called after a successful `open_device`,
/// `open_device_by_ids` or `request_access`.
pub trait HostBridge {
    /// Whether the host exposes the device facility at all
    fn ensure_capability(&self) -> bool;

    /// Find or authorize the device with the given ids and make it active
    fn request_access(&mut self, vendor_id: u16, product_id: u16) -> bool;

    /// Open the active device
    fn open_device(&mut self) -> Result<()>;

    /// Close the active device
    fn close_device(&mut self);

    /// Request access and open in one step
    ///
    /// Fails with [`UsbError::NotFound`](protocol::UsbError::NotFound) when no
    /// matching device is available.
    fn open_device_by_ids(&mut self, vendor_id: u16, product_id: u16) -> Result<()>;

    fn device_descriptor(&self) -> Result<DeviceDescriptor>;

    fn active_config_descriptor(&self) -> Result<ConfigDescriptor>;

    /// Copy string descriptor `index` into `buf` as NUL-terminated ASCII
    ///
    /// Returns the number of bytes written, terminator included, truncated to
    /// `buf.len()`.
    fn string_descriptor(&self, index: u8, buf: &mut [u8]) -> Result<usize>;

    /// Active configuration value
    fn configuration(&self) -> Result<u8>;

    fn claim_interface(&mut self, interface: u8) -> Result<()>;

    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Synchronous control transfer
    ///
    /// For IN requests `data` receives up to `setup.length` bytes; for OUT
    /// requests its first `setup.length` bytes are sent. Returns the number
    /// of bytes transferred.
    fn control_transfer(
        &mut self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize>;

    /// Start an asynchronous bulk IN transfer on endpoint number `endpoint`
    ///
    /// Returning `Ok` means the transfer was accepted; its outcome is
    /// reported through `transfer`.
    fn submit_bulk_in(&mut self, endpoint: u8, length: usize, transfer: TransferRef)
    -> Result<()>;

    /// Start an asynchronous bulk OUT transfer on endpoint number `endpoint`
    ///
    /// The payload is read through [`TransferRef::out_data`].
    fn submit_bulk_out(
        &mut self,
        endpoint: u8,
        length: usize,
        transfer: TransferRef,
    ) -> Result<()>;
}

/// Copy `text` into `buf` as a NUL-terminated string
///
/// Writes `min(text.len() + 1, buf.len())` bytes. A truncated string still
/// ends in NUL. Returns the number of bytes written.
pub fn copy_nul_terminated(text: &str, buf: &mut [u8]) -> usize {
    let len = (text.len() + 1).min(buf.len());
    if len == 0 {
        return 0;
    }
    let body = len - 1;
    buf[..body].copy_from_slice(&text.as_bytes()[..body]);
    buf[body] = 0;
    len
}
