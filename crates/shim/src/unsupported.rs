//! Extended libusb surface the host bridge cannot provide
//!
//! Every entry point validates its context, device or handle like the rest
//! of the session, then logs and returns [`UsbError::NotImplemented`]
//! without touching the bridge.

use crate::identity::{Context, Device, DeviceHandle};
use crate::session::Session;
use crate::transfer::Transfer;
use protocol::{ConfigDescriptor, Result, UsbError};
use std::time::Duration;
use tracing::warn;

fn not_implemented<T>(operation: &'static str) -> Result<T> {
    warn!("not implemented: {}", operation);
    Err(UsbError::not_implemented(operation))
}

impl Session {
    /// Synchronous bulk I/O; use [`Session::submit`] with a bulk transfer instead
    pub fn bulk_transfer(
        &self,
        handle: DeviceHandle,
        _endpoint: u8,
        _data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        handle.validate()?;
        not_implemented("libusb_bulk_transfer")
    }

    pub fn interrupt_transfer(
        &self,
        handle: DeviceHandle,
        _endpoint: u8,
        _data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        handle.validate()?;
        not_implemented("libusb_interrupt_transfer")
    }

    pub fn set_debug(&self, ctx: Context, _level: i32) -> Result<()> {
        ctx.validate()?;
        not_implemented("libusb_set_debug")
    }

    pub fn set_configuration(&self, handle: DeviceHandle, _configuration: i32) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_set_configuration")
    }

    pub fn set_interface_alt_setting(
        &self,
        handle: DeviceHandle,
        _interface: u8,
        _alternate_setting: u8,
    ) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_set_interface_alt_setting")
    }

    pub fn clear_halt(&self, handle: DeviceHandle, _endpoint: u8) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_clear_halt")
    }

    pub fn reset_device(&self, handle: DeviceHandle) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_reset_device")
    }

    pub fn detach_kernel_driver(&self, handle: DeviceHandle, _interface: u8) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_detach_kernel_driver")
    }

    pub fn attach_kernel_driver(&self, handle: DeviceHandle, _interface: u8) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_attach_kernel_driver")
    }

    pub fn set_auto_detach_kernel_driver(
        &self,
        handle: DeviceHandle,
        _enable: bool,
    ) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_set_auto_detach_kernel_driver")
    }

    pub fn config_descriptor(&self, device: Device, _index: u8) -> Result<ConfigDescriptor> {
        device.validate()?;
        not_implemented("libusb_get_config_descriptor")
    }

    pub fn config_descriptor_by_value(
        &self,
        device: Device,
        _configuration_value: u8,
    ) -> Result<ConfigDescriptor> {
        device.validate()?;
        not_implemented("libusb_get_config_descriptor_by_value")
    }

    /// Raw BOS descriptor set
    pub fn bos_descriptor(&self, handle: DeviceHandle) -> Result<Vec<u8>> {
        handle.validate()?;
        not_implemented("libusb_get_bos_descriptor")
    }

    pub fn port_number(&self, device: Device) -> Result<u8> {
        device.validate()?;
        not_implemented("libusb_get_port_number")
    }

    pub fn parent(&self, device: Device) -> Result<Device> {
        device.validate()?;
        not_implemented("libusb_get_parent")
    }

    pub fn device_speed(&self, device: Device) -> Result<u8> {
        device.validate()?;
        not_implemented("libusb_get_device_speed")
    }

    pub fn max_packet_size(&self, device: Device, _endpoint: u8) -> Result<u16> {
        device.validate()?;
        not_implemented("libusb_get_max_packet_size")
    }

    pub fn max_iso_packet_size(&self, device: Device, _endpoint: u8) -> Result<u32> {
        device.validate()?;
        not_implemented("libusb_get_max_iso_packet_size")
    }

    pub fn alloc_streams(
        &self,
        handle: DeviceHandle,
        _num_streams: u32,
        _endpoints: &[u8],
    ) -> Result<u32> {
        handle.validate()?;
        not_implemented("libusb_alloc_streams")
    }

    pub fn free_streams(&self, handle: DeviceHandle, _endpoints: &[u8]) -> Result<()> {
        handle.validate()?;
        not_implemented("libusb_free_streams")
    }
}

impl Transfer {
    pub fn set_stream_id(&self, _stream_id: u32) -> Result<()> {
        not_implemented("libusb_transfer_set_stream_id")
    }

    pub fn stream_id(&self) -> Result<u32> {
        not_implemented("libusb_transfer_get_stream_id")
    }
}
