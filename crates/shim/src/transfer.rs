//! Transfer requests
//!
//! A [`Transfer`] is the caller's handle on one device I/O operation. Its
//! state lives behind an `Arc<Mutex<..>>` shared with the session registry
//! and, while in flight, with the host bridge through a [`TransferRef`].
//!
//! The data buffer belongs to the transfer. While the transfer is in flight
//! the buffer is locked: caller access fails with [`UsbError::Busy`] until
//! the completion callback has been dispatched, and the bridge reads or
//! writes it only through its `TransferRef`.

use crate::identity::DeviceHandle;
use crate::session::Session;
use protocol::{EndpointAddress, Result, TransferStatus, TransferType, UsbError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Completion callback
///
/// Invoked once per submission cycle from [`Session::poll`]. It may submit
/// other transfers or resubmit the one it was called for.
pub type TransferCallback = Box<dyn FnMut(&Session, &Transfer, &Completion) + Send>;

/// Transfer identity, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

/// Outcome handed to a completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Terminal status observed by the dispatcher
    pub status: TransferStatus,
    /// Bytes moved by the host bridge (always 0 when cancelled)
    pub actual_length: usize,
}

/// Isochronous packet slot
///
/// Slots are allocated with the transfer and never resized. Isochronous
/// transfers are not dispatched, so the slots only carry caller data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsoPacketDescriptor {
    pub length: u32,
    pub actual_length: u32,
}

pub(crate) struct TransferState {
    pub(crate) handle: Option<DeviceHandle>,
    pub(crate) endpoint: EndpointAddress,
    pub(crate) transfer_type: TransferType,
    pub(crate) timeout: Duration,
    pub(crate) buffer: Vec<u8>,
    pub(crate) length: usize,
    pub(crate) actual_length: usize,
    pub(crate) status: TransferStatus,
    /// Bumped on every submission; completions carrying an older value are stale
    pub(crate) generation: u64,
    pub(crate) callback: Option<TransferCallback>,
    pub(crate) iso_packets: Box<[IsoPacketDescriptor]>,
}

pub(crate) struct TransferShared {
    pub(crate) id: TransferId,
    state: Mutex<TransferState>,
}

impl TransferShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller handle on a transfer request
///
/// Cloning yields another handle on the same transfer.
#[derive(Clone)]
pub struct Transfer {
    pub(crate) shared: Arc<TransferShared>,
}

impl Transfer {
    pub(crate) fn new(id: TransferId, iso_packets: usize) -> Self {
        let state = TransferState {
            handle: None,
            endpoint: EndpointAddress(0),
            transfer_type: TransferType::Bulk,
            timeout: Duration::ZERO,
            buffer: Vec::new(),
            length: 0,
            actual_length: 0,
            status: TransferStatus::Unsubmitted,
            generation: 0,
            callback: None,
            iso_packets: vec![IsoPacketDescriptor::default(); iso_packets].into_boxed_slice(),
        };

        Self {
            shared: Arc::new(TransferShared {
                id,
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<TransferShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> TransferId {
        self.shared.id
    }

    pub fn status(&self) -> TransferStatus {
        self.shared.lock().status.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.lock().status == TransferStatus::InFlight
    }

    /// Requested length in bytes
    pub fn length(&self) -> usize {
        self.shared.lock().length
    }

    /// Bytes moved by the last completed submission
    pub fn actual_length(&self) -> usize {
        self.shared.lock().actual_length
    }

    pub fn endpoint(&self) -> EndpointAddress {
        self.shared.lock().endpoint
    }

    pub fn transfer_type(&self) -> TransferType {
        self.shared.lock().transfer_type
    }

    pub fn timeout(&self) -> Duration {
        self.shared.lock().timeout
    }

    pub fn device_handle(&self) -> Option<DeviceHandle> {
        self.shared.lock().handle
    }

    /// Number of iso packet slots fixed at allocation
    pub fn num_iso_packets(&self) -> usize {
        self.shared.lock().iso_packets.len()
    }

    pub fn iso_packet_descriptors(&self) -> Vec<IsoPacketDescriptor> {
        self.shared.lock().iso_packets.to_vec()
    }

    /// Populate every field of the transfer
    ///
    /// The requested length is set to the buffer length.
    pub fn fill<F>(
        &self,
        handle: DeviceHandle,
        transfer_type: TransferType,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: F,
        timeout: Duration,
    ) -> Result<()>
    where
        F: FnMut(&Session, &Transfer, &Completion) + Send + 'static,
    {
        let mut state = self.unlocked_state()?;
        state.handle = Some(handle);
        state.transfer_type = transfer_type;
        state.endpoint = EndpointAddress(endpoint);
        state.length = buffer.len();
        state.buffer = buffer;
        state.actual_length = 0;
        state.callback = Some(Box::new(callback));
        state.timeout = timeout;
        Ok(())
    }

    /// `libusb_fill_bulk_transfer`
    pub fn fill_bulk<F>(
        &self,
        handle: DeviceHandle,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: F,
        timeout: Duration,
    ) -> Result<()>
    where
        F: FnMut(&Session, &Transfer, &Completion) + Send + 'static,
    {
        self.fill(handle, TransferType::Bulk, endpoint, buffer, callback, timeout)
    }

    /// `libusb_fill_interrupt_transfer`
    pub fn fill_interrupt<F>(
        &self,
        handle: DeviceHandle,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: F,
        timeout: Duration,
    ) -> Result<()>
    where
        F: FnMut(&Session, &Transfer, &Completion) + Send + 'static,
    {
        self.fill(handle, TransferType::Interrupt, endpoint, buffer, callback, timeout)
    }

    /// `libusb_fill_control_transfer`; `buffer` starts with the 8-byte setup packet
    pub fn fill_control<F>(
        &self,
        handle: DeviceHandle,
        buffer: Vec<u8>,
        callback: F,
        timeout: Duration,
    ) -> Result<()>
    where
        F: FnMut(&Session, &Transfer, &Completion) + Send + 'static,
    {
        self.fill(handle, TransferType::Control, 0, buffer, callback, timeout)
    }

    /// Replace the completion callback
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(&Session, &Transfer, &Completion) + Send + 'static,
    {
        self.shared.lock().callback = Some(Box::new(callback));
    }

    /// Shorten or restore the requested length (at most the buffer length)
    pub fn set_length(&self, length: usize) -> Result<()> {
        let mut state = self.unlocked_state()?;
        if length > state.buffer.len() {
            return Err(UsbError::InvalidParam);
        }
        state.length = length;
        Ok(())
    }

    /// Run `f` on the whole buffer
    ///
    /// Fails with [`UsbError::Busy`] while the transfer is in flight.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut state = self.unlocked_state()?;
        Ok(f(&mut state.buffer))
    }

    /// Copy of the bytes moved by the last completion
    pub fn data(&self) -> Result<Vec<u8>> {
        let state = self.unlocked_state()?;
        let len = state.actual_length.min(state.buffer.len());
        Ok(state.buffer[..len].to_vec())
    }

    fn unlocked_state(&self) -> Result<MutexGuard<'_, TransferState>> {
        let state = self.shared.lock();
        if state.status == TransferStatus::InFlight {
            debug!("Buffer of transfer {:?} is locked while in flight", self.id());
            return Err(UsbError::Busy);
        }
        Ok(state)
    }
}

impl PartialEq for Transfer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Transfer {}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Transfer")
            .field("id", &self.shared.id)
            .field("type", &state.transfer_type)
            .field("endpoint", &state.endpoint)
            .field("length", &state.length)
            .field("actual_length", &state.actual_length)
            .field("status", &state.status)
            .finish()
    }
}

/// Host bridge back-reference to one submission of a transfer
///
/// Completion methods return `false` when the report was discarded: the
/// submission was superseded by a newer one, the transfer was cancelled, or
/// the submission was already completed.
#[derive(Clone)]
pub struct TransferRef {
    shared: Arc<TransferShared>,
    generation: u64,
}

impl TransferRef {
    pub(crate) fn new(shared: Arc<TransferShared>, generation: u64) -> Self {
        Self { shared, generation }
    }

    pub fn id(&self) -> TransferId {
        self.shared.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn endpoint(&self) -> EndpointAddress {
        self.shared.lock().endpoint
    }

    pub fn length(&self) -> usize {
        self.shared.lock().length
    }

    pub fn timeout(&self) -> Duration {
        self.shared.lock().timeout
    }

    /// Whether this submission is still waiting for its completion
    pub fn is_pending(&self) -> bool {
        let state = self.shared.lock();
        state.generation == self.generation && state.status == TransferStatus::InFlight
    }

    /// Payload of an OUT transfer (the first `length` bytes of the buffer)
    pub fn out_data(&self) -> Vec<u8> {
        let state = self.shared.lock();
        let len = state.length.min(state.buffer.len());
        state.buffer[..len].to_vec()
    }

    /// Report an IN completion, copying `data` into the transfer buffer
    ///
    /// Data beyond the requested length is dropped and the transfer ends in
    /// [`UsbError::Overflow`].
    pub fn complete_in(&self, data: &[u8]) -> bool {
        self.finish(|state| {
            let n = data.len().min(state.length).min(state.buffer.len());
            state.buffer[..n].copy_from_slice(&data[..n]);
            state.actual_length = n;
            if data.len() > state.length {
                TransferStatus::Error(UsbError::Overflow)
            } else {
                TransferStatus::Completed
            }
        })
    }

    /// Report an OUT completion
    pub fn complete_out(&self, bytes_written: usize) -> bool {
        self.finish(|state| {
            state.actual_length = bytes_written.min(state.length);
            TransferStatus::Completed
        })
    }

    /// Report a failed transfer
    pub fn fail(&self, error: UsbError) -> bool {
        self.finish(|state| {
            state.actual_length = 0;
            TransferStatus::Error(error)
        })
    }

    fn finish(&self, apply: impl FnOnce(&mut TransferState) -> TransferStatus) -> bool {
        let mut state = self.shared.lock();

        if state.generation != self.generation {
            debug!(
                "Discarding stale completion for transfer {:?} (generation {} != {})",
                self.shared.id, self.generation, state.generation
            );
            return false;
        }

        match state.status {
            TransferStatus::InFlight => {
                let status = apply(&mut state);
                state.status = status;
                true
            }
            TransferStatus::Cancelled => {
                debug!(
                    "Discarding completion for cancelled transfer {:?}",
                    self.shared.id
                );
                false
            }
            _ => {
                debug!(
                    "Ignoring duplicate completion for transfer {:?} ({:?})",
                    self.shared.id, state.status
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for TransferRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRef")
            .field("id", &self.shared.id)
            .field("generation", &self.generation)
            .finish()
    }
}
