//! Transfer submission
//!
//! Registers a transfer, marks it in flight and hands it to the host bridge
//! according to its declared type and direction. Only bulk transfers reach
//! the bridge; every other type is reported as [`UsbError::NotImplemented`]
//! and never produces a completion.

use crate::identity::DEFAULT_HANDLE;
use crate::session::Session;
use crate::transfer::{Transfer, TransferId, TransferRef};
use protocol::{Direction, Result, TransferStatus, TransferType, UsbError};
use std::sync::Arc;
use tracing::{debug, warn};

impl Session {
    /// `libusb_alloc_transfer`
    ///
    /// `iso_packets` slots are reserved for the lifetime of the transfer.
    pub fn alloc_transfer(&self, iso_packets: usize) -> Transfer {
        debug!("libusb_alloc_transfer(iso_packets={})", iso_packets);
        let id = self.next_transfer_id.get();
        self.next_transfer_id.set(id + 1);
        Transfer::new(TransferId(id), iso_packets)
    }

    /// `libusb_free_transfer`
    ///
    /// Unregisters the transfer and drops its callback. Fails with
    /// [`UsbError::Busy`] while the transfer is in flight.
    pub fn free_transfer(&self, transfer: &Transfer) -> Result<()> {
        debug!("libusb_free_transfer({:?})", transfer.id());
        let callback = {
            let mut state = transfer.shared.lock();
            if state.status == TransferStatus::InFlight {
                return Err(UsbError::Busy);
            }
            state.callback.take()
        };
        self.registry.borrow_mut().remove(transfer.id());
        // dropped outside the lock: the callback may own handles on this transfer
        drop(callback);
        Ok(())
    }

    /// `libusb_submit_transfer`
    ///
    /// `Ok` means the host bridge accepted the transfer, not that it
    /// completed. The outcome is delivered to the transfer callback by a
    /// later [`Session::poll`].
    pub fn submit(&self, transfer: &Transfer) -> Result<()> {
        debug!("libusb_submit_transfer({:?})", transfer.id());

        let (transfer_type, endpoint, length, transfer_ref) = {
            let mut state = transfer.shared.lock();

            if state.status == TransferStatus::InFlight {
                warn!("Transfer {:?} is already in flight", transfer.id());
                return Err(UsbError::Busy);
            }

            match state.handle {
                Some(handle) if handle == DEFAULT_HANDLE => {}
                other => {
                    debug!("Transfer {:?} has invalid handle {:?}", transfer.id(), other);
                    return Err(UsbError::InvalidParam);
                }
            }

            self.registry.borrow_mut().register(&transfer.shared);

            state.status = TransferStatus::InFlight;
            state.generation += 1;
            state.actual_length = 0;

            (
                state.transfer_type,
                state.endpoint,
                state.length,
                TransferRef::new(Arc::clone(&transfer.shared), state.generation),
            )
        };

        let number = endpoint.number();
        let result = match transfer_type {
            TransferType::Bulk => {
                let mut bridge = self.bridge.borrow_mut();
                match endpoint.direction() {
                    Direction::In => bridge.submit_bulk_in(number, length, transfer_ref),
                    Direction::Out => bridge.submit_bulk_out(number, length, transfer_ref),
                }
            }
            other => {
                warn!("Transfer type not implemented: {:?}", other);
                Err(UsbError::not_implemented(format!(
                    "libusb_submit_transfer({:?})",
                    other
                )))
            }
        };

        if let Err(e) = &result {
            let mut state = transfer.shared.lock();
            // the bridge may have completed the transfer before failing; only
            // roll back our own in-flight mark
            if state.status == TransferStatus::InFlight {
                state.status = TransferStatus::Unsubmitted;
            }
            debug!("Submission of transfer {:?} failed: {}", transfer.id(), e);
        }

        result
    }

    /// Number of transfers currently registered
    pub fn registered_transfers(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn is_registered(&self, transfer: &Transfer) -> bool {
        self.registry.borrow().contains(transfer.id())
    }
}
