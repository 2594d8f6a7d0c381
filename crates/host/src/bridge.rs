//! rusb-backed host bridge
//!
//! Talks to one locally attached device through libusb. Synchronous calls go
//! straight to the device handle; bulk submissions are queued to the
//! [`BulkWorker`] thread.

use crate::descriptors::{map_config_descriptor, map_device_descriptor};
use crate::transfers::{BulkJob, map_rusb_error};
use crate::worker::BulkWorker;
use protocol::{ConfigDescriptor, ControlSetup, DeviceDescriptor, Direction, Result, UsbError};
use rusb::{Context, Device, DeviceHandle, UsbContext};
use shim::{HostBridge, TransferRef, copy_nul_terminated};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct OpenDevice {
    handle: Arc<DeviceHandle<Context>>,
    worker: BulkWorker,
    claimed_interfaces: Vec<u8>,
}

/// Host bridge over a local libusb context
pub struct RusbBridge {
    context: Option<Context>,
    device: Option<Device<Context>>,
    open: Option<OpenDevice>,
}

impl RusbBridge {
    /// Create the bridge
    ///
    /// A libusb context that cannot be created (no USB stack, no
    /// permissions) leaves the bridge without capability rather than
    /// failing here.
    pub fn new() -> Self {
        let context = match Context::new() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Failed to create USB context: {}", e);
                None
            }
        };

        Self {
            context,
            device: None,
            open: None,
        }
    }

    fn find_device(&self, vendor_id: u16, product_id: u16) -> Result<Option<Device<Context>>> {
        let context = self.context.as_ref().ok_or(UsbError::NotSupported)?;
        let devices = context.devices().map_err(map_rusb_error)?;

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    debug!(
                        "Skipping device {}:{}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };
            if desc.vendor_id() == vendor_id && desc.product_id() == product_id {
                debug!(
                    "Found {:04x}:{:04x} at bus {} address {}",
                    vendor_id,
                    product_id,
                    device.bus_number(),
                    device.address()
                );
                return Ok(Some(device));
            }
        }

        Ok(None)
    }

    fn active_device(&self) -> Result<&Device<Context>> {
        self.device.as_ref().ok_or(UsbError::NoDevice)
    }

    fn open_device_mut(&mut self) -> Result<&mut OpenDevice> {
        self.open.as_mut().ok_or(UsbError::NoDevice)
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>> {
        self.open
            .as_ref()
            .map(|open| open.handle.as_ref())
            .ok_or(UsbError::NoDevice)
    }

    fn queue_bulk(
        &self,
        address: u8,
        length: usize,
        data: Vec<u8>,
        transfer: TransferRef,
    ) -> Result<()> {
        let open = self.open.as_ref().ok_or(UsbError::NoDevice)?;
        open.worker.submit(BulkJob {
            address,
            length,
            data,
            transfer,
        })
    }
}

impl Default for RusbBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge for RusbBridge {
    fn ensure_capability(&self) -> bool {
        self.context.is_some()
    }

    fn request_access(&mut self, vendor_id: u16, product_id: u16) -> bool {
        match self.find_device(vendor_id, product_id) {
            Ok(Some(device)) => {
                self.device = Some(device);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                false
            }
        }
    }

    fn open_device(&mut self) -> Result<()> {
        if self.open.is_some() {
            return Ok(());
        }

        let device = self.active_device()?;
        let handle = Arc::new(device.open().map_err(|e| {
            warn!("Failed to open device: {}", e);
            map_rusb_error(e)
        })?);
        let worker = BulkWorker::spawn(Arc::clone(&handle))?;

        info!(
            "Opened device at bus {} address {}",
            device.bus_number(),
            device.address()
        );
        self.open = Some(OpenDevice {
            handle,
            worker,
            claimed_interfaces: Vec::new(),
        });
        Ok(())
    }

    fn close_device(&mut self) {
        let Some(mut open) = self.open.take() else {
            return;
        };

        // releasing an interface aborts bulk I/O still blocked on it, which
        // lets the worker exit within its join grace
        for interface in &open.claimed_interfaces {
            if let Err(e) = open.handle.release_interface(*interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }
        open.worker.shutdown();
        debug!("Closed device");
    }

    fn open_device_by_ids(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        match self.find_device(vendor_id, product_id)? {
            Some(device) => self.device = Some(device),
            None => return Err(UsbError::NotFound),
        }
        self.open_device()
    }

    fn device_descriptor(&self) -> Result<DeviceDescriptor> {
        let desc = self
            .active_device()?
            .device_descriptor()
            .map_err(map_rusb_error)?;
        Ok(map_device_descriptor(&desc))
    }

    fn active_config_descriptor(&self) -> Result<ConfigDescriptor> {
        let desc = self
            .active_device()?
            .active_config_descriptor()
            .map_err(map_rusb_error)?;
        Ok(map_config_descriptor(&desc))
    }

    fn string_descriptor(&self, index: u8, buf: &mut [u8]) -> Result<usize> {
        let text = self
            .handle()?
            .read_string_descriptor_ascii(index)
            .map_err(map_rusb_error)?;
        Ok(copy_nul_terminated(&text, buf))
    }

    fn configuration(&self) -> Result<u8> {
        self.handle()?.active_configuration().map_err(map_rusb_error)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        let open = self.open_device_mut()?;
        open.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)?;
        open.claimed_interfaces.push(interface);
        debug!("Claimed interface {}", interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        let open = self.open_device_mut()?;
        open.handle
            .release_interface(interface)
            .map_err(map_rusb_error)?;
        open.claimed_interfaces.retain(|i| *i != interface);
        debug!("Released interface {}", interface);
        Ok(())
    }

    fn control_transfer(
        &mut self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let handle = self.handle()?;
        let len = usize::from(setup.length).min(data.len());

        let result = match setup.direction() {
            Direction::In => handle.read_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                &mut data[..len],
                timeout,
            ),
            Direction::Out => handle.write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                &data[..len],
                timeout,
            ),
        };

        result.map_err(|e| {
            warn!("Control transfer failed: {}", e);
            map_rusb_error(e)
        })
    }

    fn submit_bulk_in(&mut self, endpoint: u8, length: usize, transfer: TransferRef) -> Result<()> {
        let address = endpoint | protocol::types::DIRECTION_IN_MASK;
        self.queue_bulk(address, length, Vec::new(), transfer)
    }

    fn submit_bulk_out(
        &mut self,
        endpoint: u8,
        length: usize,
        transfer: TransferRef,
    ) -> Result<()> {
        let data = transfer.out_data();
        self.queue_bulk(endpoint, length, data, transfer)
    }
}

impl Drop for RusbBridge {
    fn drop(&mut self) {
        self.close_device();
    }
}
