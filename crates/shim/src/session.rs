//! Library session
//!
//! A [`Session`] is the shim's single library context. It owns the host
//! bridge and the transfer registry and exposes the handle-based device
//! surface. Transfer submission lives in [`crate::submission`], completion
//! dispatch and cancellation in [`crate::dispatcher`].
//!
//! The session is single-threaded: every method takes `&self` so that
//! completion callbacks can call back into it, and state is kept in
//! `Cell`/`RefCell`.

use crate::bridge::HostBridge;
use crate::identity::{
    Context, DEFAULT_BUS_NUMBER, DEFAULT_CONTEXT, DEFAULT_DEVICE, DEFAULT_DEVICE_ADDRESS,
    DEFAULT_HANDLE, Device, DeviceHandle, DeviceSelector,
};
use crate::registry::TransferRegistry;
use protocol::{ConfigDescriptor, ControlSetup, DeviceDescriptor, Result, UsbError};
use std::cell::{Cell, RefCell};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct Session {
    pub(crate) bridge: RefCell<Box<dyn HostBridge>>,
    selector: DeviceSelector,
    pub(crate) registry: RefCell<TransferRegistry>,
    open: Cell<bool>,
    pub(crate) next_transfer_id: Cell<u64>,
}

impl Session {
    /// `libusb_init`
    ///
    /// Fails with [`UsbError::NotSupported`] when the host has no device
    /// facility.
    pub fn init(bridge: impl HostBridge + 'static, selector: DeviceSelector) -> Result<Self> {
        debug!("libusb_init(...)");

        if !bridge.ensure_capability() {
            warn!("Host bridge reports no USB capability");
            return Err(UsbError::NotSupported);
        }

        info!("Session initialized for device {}", selector);
        Ok(Self {
            bridge: RefCell::new(Box::new(bridge)),
            selector,
            registry: RefCell::new(TransferRegistry::new()),
            open: Cell::new(false),
            next_transfer_id: Cell::new(1),
        })
    }

    /// The singleton context
    pub fn context(&self) -> Context {
        DEFAULT_CONTEXT
    }

    pub fn selector(&self) -> DeviceSelector {
        self.selector
    }

    /// Whether the device connection is currently open
    pub fn is_open(&self) -> bool {
        self.open.get()
    }

    /// `libusb_exit`; teardown has nothing to release
    pub fn exit(&self, ctx: Context) {
        debug!("libusb_exit({:?})", ctx);
    }

    /// `libusb_get_device_list`
    ///
    /// Negotiates access to the configured device and returns it as the only
    /// entry.
    pub fn get_device_list(&self, ctx: Context) -> Result<Vec<Device>> {
        debug!("libusb_get_device_list(...)");
        ctx.validate()?;
        self.negotiate_access()?;
        Ok(vec![DEFAULT_DEVICE])
    }

    /// `libusb_open`
    ///
    /// A refused access negotiation fails with [`UsbError::NoDevice`] and
    /// leaves the session untouched.
    pub fn open(&self, device: Device) -> Result<DeviceHandle> {
        debug!("libusb_open({:?})", device);
        device.validate()?;
        self.negotiate_access()?;

        self.bridge.borrow_mut().open_device()?;
        self.open.set(true);
        info!("Opened device {}", self.selector);
        Ok(DEFAULT_HANDLE)
    }

    /// `libusb_open_device_with_vid_pid`
    pub fn open_device_with_vid_pid(
        &self,
        ctx: Context,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<DeviceHandle> {
        debug!(
            "libusb_open_device_with_vid_pid({:04x}:{:04x})",
            vendor_id, product_id
        );
        ctx.validate()?;

        match self
            .bridge
            .borrow_mut()
            .open_device_by_ids(vendor_id, product_id)
        {
            Ok(()) => {}
            Err(UsbError::NotFound) => {
                warn!("Device {:04x}:{:04x} not found", vendor_id, product_id);
                return Err(UsbError::NoDevice);
            }
            Err(e) => return Err(e),
        }

        self.open.set(true);
        info!("Opened device {:04x}:{:04x}", vendor_id, product_id);
        Ok(DEFAULT_HANDLE)
    }

    /// `libusb_close`
    ///
    /// Invalid handles are ignored. Closing an already closed handle does not
    /// reach the bridge again.
    pub fn close(&self, handle: DeviceHandle) {
        debug!("libusb_close({:?})", handle);
        if handle.validate().is_err() {
            return;
        }
        if self.open.replace(false) {
            self.bridge.borrow_mut().close_device();
            info!("Closed device {}", self.selector);
        }
    }

    /// `libusb_get_device`
    pub fn get_device(&self, handle: DeviceHandle) -> Result<Device> {
        debug!("libusb_get_device(...)");
        handle.validate()?;
        Ok(handle.device())
    }

    pub fn bus_number(&self, device: Device) -> Result<u8> {
        debug!("libusb_get_bus_number(...)");
        device.validate()?;
        Ok(DEFAULT_BUS_NUMBER)
    }

    pub fn device_address(&self, device: Device) -> Result<u8> {
        debug!("libusb_get_device_address(...)");
        device.validate()?;
        Ok(DEFAULT_DEVICE_ADDRESS)
    }

    /// `libusb_get_port_numbers`; the bridge exposes no topology
    pub fn port_numbers(&self, device: Device) -> Result<Vec<u8>> {
        debug!("libusb_get_port_numbers(...)");
        device.validate()?;
        Ok(Vec::new())
    }

    pub fn device_descriptor(&self, device: Device) -> Result<DeviceDescriptor> {
        debug!("libusb_get_device_descriptor(...)");
        device.validate()?;
        self.bridge.borrow().device_descriptor()
    }

    pub fn active_config_descriptor(&self, device: Device) -> Result<ConfigDescriptor> {
        debug!("libusb_get_active_config_descriptor(...)");
        device.validate()?;
        self.bridge.borrow().active_config_descriptor()
    }

    /// `libusb_get_string_descriptor_ascii`
    ///
    /// Writes a NUL-terminated string truncated to `data.len()` and returns
    /// the number of bytes written.
    pub fn string_descriptor_ascii(
        &self,
        handle: DeviceHandle,
        index: u8,
        data: &mut [u8],
    ) -> Result<usize> {
        debug!("libusb_get_string_descriptor_ascii(index={})", index);
        handle.validate()?;
        self.bridge.borrow().string_descriptor(index, data)
    }

    /// String descriptor as an owned `String` (up to 255 bytes)
    pub fn read_string(&self, handle: DeviceHandle, index: u8) -> Result<String> {
        let mut buf = [0u8; 256];
        let len = self.string_descriptor_ascii(handle, index, &mut buf)?;
        let text = &buf[..len];
        let text = text.strip_suffix(&[0]).unwrap_or(text);
        Ok(String::from_utf8_lossy(text).into_owned())
    }

    /// `libusb_get_configuration`
    pub fn configuration(&self, handle: DeviceHandle) -> Result<u8> {
        debug!("libusb_get_configuration(...)");
        handle.validate()?;
        self.bridge.borrow().configuration()
    }

    /// `libusb_kernel_driver_active`
    ///
    /// The host bridge only reaches devices no kernel driver owns.
    pub fn kernel_driver_active(&self, handle: DeviceHandle, interface: u8) -> Result<bool> {
        debug!("libusb_kernel_driver_active(interface={})", interface);
        handle.validate()?;
        Ok(false)
    }

    pub fn claim_interface(&self, handle: DeviceHandle, interface: u8) -> Result<()> {
        debug!("libusb_claim_interface(interface={})", interface);
        handle.validate()?;
        self.bridge.borrow_mut().claim_interface(interface)
    }

    pub fn release_interface(&self, handle: DeviceHandle, interface: u8) -> Result<()> {
        debug!("libusb_release_interface(interface={})", interface);
        handle.validate()?;
        self.bridge.borrow_mut().release_interface(interface)
    }

    /// `libusb_control_transfer`
    ///
    /// Synchronous. `data.len()` is used as `wLength`. Returns the number of
    /// bytes transferred.
    #[allow(clippy::too_many_arguments)]
    pub fn control_transfer(
        &self,
        handle: DeviceHandle,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        debug!(
            "libusb_control_transfer(request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, len={})",
            request_type,
            request,
            value,
            index,
            data.len()
        );
        handle.validate()?;

        let length = u16::try_from(data.len()).map_err(|_| UsbError::InvalidParam)?;
        let setup = ControlSetup {
            request_type,
            request,
            value,
            index,
            length,
        };

        self.bridge
            .borrow_mut()
            .control_transfer(setup, data, timeout)
    }

    fn negotiate_access(&self) -> Result<()> {
        let granted = self
            .bridge
            .borrow_mut()
            .request_access(self.selector.vendor_id, self.selector.product_id);

        if granted {
            Ok(())
        } else {
            warn!("USB device {} not found/authorized", self.selector);
            Err(UsbError::NoDevice)
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("selector", &self.selector)
            .field("open", &self.open.get())
            .field("registered_transfers", &self.registry.borrow().len())
            .finish()
    }
}
