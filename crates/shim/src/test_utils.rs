//! Test utilities for usb-shim
//!
//! [`MockBridge`] is an in-memory [`HostBridge`] that records every call the
//! session makes and holds bulk submissions until the test completes them.
//! Clones share state, so a test keeps one clone and hands the other to
//! [`Session::init`](crate::Session::init).
//!
//! # Example
//!
//! ```
//! use shim::test_utils::{BridgeCall, MockBridge};
//! use shim::{DeviceSelector, Session, UsbError};
//!
//! let bridge = MockBridge::new().with_access(false);
//! let session = Session::init(bridge.clone(), DeviceSelector::new(0x1d50, 0x6089)).unwrap();
//!
//! assert_eq!(session.get_device_list(session.context()), Err(UsbError::NoDevice));
//! assert_eq!(bridge.call_count(|c| matches!(c, BridgeCall::RequestAccess { .. })), 1);
//! ```

use crate::bridge::{HostBridge, copy_nul_terminated};
use crate::transfer::TransferRef;
use protocol::{
    ConfigDescriptor, ControlSetup, DeviceDescriptor, Direction, EndpointAddress,
    EndpointDescriptor, InterfaceDescriptor, Result, UsbError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// HackRF One vendor id
pub const MOCK_VENDOR_ID: u16 = 0x1d50;
/// HackRF One product id
pub const MOCK_PRODUCT_ID: u16 = 0x6089;

/// One call made into the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    EnsureCapability,
    RequestAccess { vendor_id: u16, product_id: u16 },
    OpenDevice,
    CloseDevice,
    OpenDeviceByIds { vendor_id: u16, product_id: u16 },
    DeviceDescriptor,
    ActiveConfigDescriptor,
    StringDescriptor { index: u8 },
    Configuration,
    ClaimInterface(u8),
    ReleaseInterface(u8),
    ControlTransfer(ControlSetup),
    SubmitBulkIn { endpoint: u8, length: usize },
    SubmitBulkOut { endpoint: u8, data: Vec<u8> },
}

/// Bulk submission held by the mock until a test completes it
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub direction: Direction,
    /// Endpoint number without the direction bit
    pub endpoint: u8,
    pub length: usize,
    pub transfer: TransferRef,
}

struct MockState {
    capability: bool,
    grant_access: bool,
    device_present: bool,
    active: bool,
    open: bool,
    device: DeviceDescriptor,
    config: ConfigDescriptor,
    strings: HashMap<u8, String>,
    configuration: u8,
    control_response: Vec<u8>,
    submit_error: Option<UsbError>,
    claimed: Vec<u8>,
    pending: Vec<PendingTransfer>,
    calls: Vec<BridgeCall>,
}

/// In-memory host bridge
#[derive(Clone)]
pub struct MockBridge {
    state: Arc<Mutex<MockState>>,
}

/// HackRF One style device descriptor
pub fn mock_device_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        usb_version: 0x0200,
        class: 0,
        subclass: 0,
        protocol: 0,
        max_packet_size0: 64,
        vendor_id: MOCK_VENDOR_ID,
        product_id: MOCK_PRODUCT_ID,
        device_version: 0x0104,
        manufacturer_index: protocol::STRING_INDEX_MANUFACTURER,
        product_index: protocol::STRING_INDEX_PRODUCT,
        serial_number_index: protocol::STRING_INDEX_SERIAL_NUMBER,
        num_configurations: 1,
    }
}

/// Single vendor-specific interface with one bulk endpoint per direction
pub fn mock_config_descriptor() -> ConfigDescriptor {
    let bulk = |address: u8| EndpointDescriptor {
        address: EndpointAddress(address),
        attributes: 0x02,
        max_packet_size: 512,
        interval: 0,
    };

    ConfigDescriptor {
        configuration_value: 1,
        configuration_index: 0,
        attributes: 0x80,
        max_power: 250,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            alternate_setting: 0,
            class: 0xff,
            subclass: 0xff,
            protocol: 0xff,
            interface_index: 0,
            endpoints: vec![bulk(0x81), bulk(0x02)],
        }],
    }
}

impl MockBridge {
    /// Present, authorized HackRF-like device
    pub fn new() -> Self {
        let strings = HashMap::from([
            (
                protocol::STRING_INDEX_MANUFACTURER,
                "Great Scott Gadgets".to_string(),
            ),
            (protocol::STRING_INDEX_PRODUCT, "HackRF One".to_string()),
            (
                protocol::STRING_INDEX_SERIAL_NUMBER,
                "0000000000000000457863c8295d4d4f".to_string(),
            ),
        ]);

        Self {
            state: Arc::new(Mutex::new(MockState {
                capability: true,
                grant_access: true,
                device_present: true,
                active: false,
                open: false,
                device: mock_device_descriptor(),
                config: mock_config_descriptor(),
                strings,
                configuration: 1,
                control_response: Vec::new(),
                submit_error: None,
                claimed: Vec::new(),
                pending: Vec::new(),
                calls: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the host reports a device facility
    pub fn with_capability(self, capability: bool) -> Self {
        self.lock().capability = capability;
        self
    }

    /// Whether access requests are granted
    pub fn with_access(self, granted: bool) -> Self {
        self.lock().grant_access = granted;
        self
    }

    /// Whether the device can be found by id
    pub fn with_device_present(self, present: bool) -> Self {
        self.lock().device_present = present;
        self
    }

    pub fn with_string(self, index: u8, text: &str) -> Self {
        self.lock().strings.insert(index, text.to_string());
        self
    }

    /// Bytes returned by IN control transfers
    pub fn with_control_response(self, data: &[u8]) -> Self {
        self.lock().control_response = data.to_vec();
        self
    }

    /// Make every bulk submission fail with `error`
    pub fn reject_submissions(&self, error: UsbError) {
        self.lock().submit_error = Some(error);
    }

    pub fn accept_submissions(&self) {
        self.lock().submit_error = None;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.lock().claimed.clone()
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, predicate: impl Fn(&BridgeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of bulk submissions made so far
    pub fn submission_count(&self) -> usize {
        self.call_count(|c| {
            matches!(
                c,
                BridgeCall::SubmitBulkIn { .. } | BridgeCall::SubmitBulkOut { .. }
            )
        })
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Held submissions, oldest first
    pub fn pending(&self) -> Vec<PendingTransfer> {
        self.lock().pending.clone()
    }

    pub fn take_pending(&self) -> Vec<PendingTransfer> {
        std::mem::take(&mut self.lock().pending)
    }

    /// Complete every held IN submission with `data`
    ///
    /// Returns how many completions were accepted by their transfers.
    pub fn complete_pending_in(&self, data: &[u8]) -> usize {
        self.complete_pending(Direction::In, |p| p.transfer.complete_in(data))
    }

    /// Complete every held OUT submission as fully written
    pub fn complete_pending_out(&self) -> usize {
        self.complete_pending(Direction::Out, |p| p.transfer.complete_out(p.length))
    }

    /// Fail every held submission with `error`
    pub fn fail_pending(&self, error: UsbError) -> usize {
        self.take_pending()
            .iter()
            .filter(|p| p.transfer.fail(error.clone()))
            .count()
    }

    fn complete_pending(
        &self,
        direction: Direction,
        complete: impl Fn(&PendingTransfer) -> bool,
    ) -> usize {
        let matching: Vec<PendingTransfer> = {
            let mut state = self.lock();
            let (matching, rest) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|p| p.direction == direction);
            state.pending = rest;
            matching
        };
        // transfer locks are taken with the mock unlocked
        matching.iter().filter(|p| complete(p)).count()
    }

    fn record(&self, call: BridgeCall) -> MutexGuard<'_, MockState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    fn submit(&mut self, call: BridgeCall, pending: PendingTransfer) -> Result<()> {
        let mut state = self.record(call);
        if !state.open {
            return Err(UsbError::NoDevice);
        }
        if let Some(error) = state.submit_error.clone() {
            return Err(error);
        }
        state.pending.push(pending);
        Ok(())
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBridge for MockBridge {
    fn ensure_capability(&self) -> bool {
        self.record(BridgeCall::EnsureCapability).capability
    }

    fn request_access(&mut self, vendor_id: u16, product_id: u16) -> bool {
        let mut state = self.record(BridgeCall::RequestAccess {
            vendor_id,
            product_id,
        });
        let matches = state.device.vendor_id == vendor_id && state.device.product_id == product_id;
        state.active = state.grant_access && state.device_present && matches;
        state.active
    }

    fn open_device(&mut self) -> Result<()> {
        let mut state = self.record(BridgeCall::OpenDevice);
        if !state.active {
            return Err(UsbError::NoDevice);
        }
        state.open = true;
        Ok(())
    }

    fn close_device(&mut self) {
        let mut state = self.record(BridgeCall::CloseDevice);
        state.open = false;
        state.claimed.clear();
    }

    fn open_device_by_ids(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        let mut state = self.record(BridgeCall::OpenDeviceByIds {
            vendor_id,
            product_id,
        });
        let matches = state.device.vendor_id == vendor_id && state.device.product_id == product_id;
        if !(state.device_present && state.grant_access && matches) {
            return Err(UsbError::NotFound);
        }
        state.active = true;
        state.open = true;
        Ok(())
    }

    fn device_descriptor(&self) -> Result<DeviceDescriptor> {
        Ok(self.record(BridgeCall::DeviceDescriptor).device.clone())
    }

    fn active_config_descriptor(&self) -> Result<ConfigDescriptor> {
        Ok(self.record(BridgeCall::ActiveConfigDescriptor).config.clone())
    }

    fn string_descriptor(&self, index: u8, buf: &mut [u8]) -> Result<usize> {
        let state = self.record(BridgeCall::StringDescriptor { index });
        let text = state.strings.get(&index).ok_or(UsbError::InvalidParam)?;
        Ok(copy_nul_terminated(text, buf))
    }

    fn configuration(&self) -> Result<u8> {
        Ok(self.record(BridgeCall::Configuration).configuration)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        let mut state = self.record(BridgeCall::ClaimInterface(interface));
        if !state.open {
            return Err(UsbError::NoDevice);
        }
        if state.claimed.contains(&interface) {
            return Err(UsbError::Busy);
        }
        state.claimed.push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        let mut state = self.record(BridgeCall::ReleaseInterface(interface));
        let pos = state
            .claimed
            .iter()
            .position(|i| *i == interface)
            .ok_or(UsbError::NotFound)?;
        state.claimed.remove(pos);
        Ok(())
    }

    fn control_transfer(
        &mut self,
        setup: ControlSetup,
        data: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize> {
        let state = self.record(BridgeCall::ControlTransfer(setup));
        if !state.open {
            return Err(UsbError::NoDevice);
        }
        let length = usize::from(setup.length).min(data.len());
        match setup.direction() {
            Direction::In => {
                let n = state.control_response.len().min(length);
                data[..n].copy_from_slice(&state.control_response[..n]);
                Ok(n)
            }
            Direction::Out => Ok(length),
        }
    }

    fn submit_bulk_in(&mut self, endpoint: u8, length: usize, transfer: TransferRef) -> Result<()> {
        self.submit(
            BridgeCall::SubmitBulkIn { endpoint, length },
            PendingTransfer {
                direction: Direction::In,
                endpoint,
                length,
                transfer,
            },
        )
    }

    fn submit_bulk_out(
        &mut self,
        endpoint: u8,
        length: usize,
        transfer: TransferRef,
    ) -> Result<()> {
        let data = transfer.out_data();
        self.submit(
            BridgeCall::SubmitBulkOut { endpoint, data },
            PendingTransfer {
                direction: Direction::Out,
                endpoint,
                length,
                transfer,
            },
        )
    }
}

impl std::fmt::Debug for MockBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MockBridge")
            .field("open", &state.open)
            .field("pending", &state.pending.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}
