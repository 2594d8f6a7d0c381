//! Completion dispatch and cancellation
//!
//! [`Session::poll`] is the only place callbacks run. It is driven by the
//! caller's own loop; the session never spawns threads or blocks.

use crate::identity::Context;
use crate::session::Session;
use crate::transfer::{Completion, Transfer};
use protocol::{Result, TransferStatus};
use std::time::Duration;
use tracing::{debug, trace};

impl Session {
    /// Drain terminal transfers and run their callbacks
    ///
    /// Transfers are visited in registration order. Each terminal transfer
    /// is reset to [`TransferStatus::Unsubmitted`] before its callback runs,
    /// so the callback is free to resubmit it. Transfers registered by a
    /// callback are considered on the next poll. Returns the number of
    /// callbacks that ran.
    pub fn poll(&self) -> Result<usize> {
        let snapshot = {
            let mut registry = self.registry.borrow_mut();
            let pruned = registry.prune_orphans();
            if pruned > 0 {
                debug!("Pruned {} unreachable transfers", pruned);
            }
            registry.snapshot()
        };

        let mut dispatched = 0;
        for shared in snapshot {
            // freed by an earlier callback of this poll
            if !self.registry.borrow().contains(shared.id) {
                continue;
            }

            let (completion, callback) = {
                let mut state = shared.lock();
                if !state.status.is_terminal() {
                    continue;
                }
                let status = std::mem::replace(&mut state.status, TransferStatus::Unsubmitted);
                let completion = Completion {
                    status,
                    actual_length: state.actual_length,
                };
                (completion, state.callback.take())
            };

            let transfer = Transfer::from_shared(shared);
            trace!(
                "Dispatching transfer {:?}: {:?}",
                transfer.id(),
                completion.status
            );

            match callback {
                Some(mut callback) => {
                    callback(self, &transfer, &completion);

                    let still_registered = self.registry.borrow().contains(transfer.id());
                    let mut state = transfer.shared.lock();
                    if still_registered && state.callback.is_none() {
                        state.callback = Some(callback);
                    }
                    dispatched += 1;
                }
                None => debug!("Transfer {:?} has no callback", transfer.id()),
            }
        }

        Ok(dispatched)
    }

    /// `libusb_handle_events_timeout`
    ///
    /// The timeout is accepted for API compatibility only; pacing repeated
    /// polls is up to the caller.
    pub fn handle_events_timeout(&self, ctx: Context, timeout: Option<Duration>) -> Result<usize> {
        trace!("libusb_handle_events_timeout(timeout={:?})", timeout);
        ctx.validate()?;
        self.poll()
    }

    /// `libusb_cancel_transfer`
    ///
    /// Marks the transfer cancelled without contacting the host bridge. The
    /// next poll runs its callback; a late bridge completion for the
    /// cancelled submission is discarded.
    pub fn cancel(&self, transfer: &Transfer) {
        debug!("libusb_cancel_transfer({:?})", transfer.id());
        let mut state = transfer.shared.lock();
        state.status = TransferStatus::Cancelled;
        state.actual_length = 0;
        drop(state);

        // never-submitted transfers still need a registry entry to be dispatched
        self.registry.borrow_mut().register(&transfer.shared);
    }
}
