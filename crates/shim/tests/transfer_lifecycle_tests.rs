//! Transfer Lifecycle Tests
//!
//! Tests for submission, completion dispatch and cancellation of
//! asynchronous transfers.
//!
//! # Test Scenarios
//! - Bulk IN/OUT completion delivered exactly once
//! - Non-bulk transfer types rejected without completion
//! - Cancellation before and during flight
//! - Dispatch order and callback re-entry
//! - Transfer freeing and registry pruning
//!
//! Run with: `cargo test -p shim --test transfer_lifecycle_tests`

use proptest::prelude::*;
use shim::test_utils::{BridgeCall, MOCK_PRODUCT_ID, MOCK_VENDOR_ID, MockBridge};
use shim::{
    Completion, DEFAULT_HANDLE, DeviceHandle, DeviceSelector, Session, Transfer, TransferId,
    TransferStatus, TransferType, UsbError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<(TransferId, Completion)>>>;

fn open_session() -> (Session, MockBridge) {
    let bridge = MockBridge::new();
    let session = Session::init(
        bridge.clone(),
        DeviceSelector::new(MOCK_VENDOR_ID, MOCK_PRODUCT_ID),
    )
    .unwrap();
    session.open(shim::DEFAULT_DEVICE).unwrap();
    bridge.clear_calls();
    (session, bridge)
}

fn recorder(log: &Log) -> impl FnMut(&Session, &Transfer, &Completion) + Send + 'static {
    let log = Arc::clone(log);
    move |_, transfer, completion| {
        log.lock()
            .unwrap()
            .push((transfer.id(), completion.clone()));
    }
}

fn bulk_transfer(session: &Session, endpoint: u8, len: usize, log: &Log) -> Transfer {
    let transfer = session.alloc_transfer(0);
    transfer
        .fill_bulk(DEFAULT_HANDLE, endpoint, vec![0; len], recorder(log), Duration::ZERO)
        .unwrap();
    transfer
}

fn entries(log: &Log) -> Vec<(TransferId, Completion)> {
    log.lock().unwrap().clone()
}

// ============================================================================
// Bulk Completion Tests
// ============================================================================

#[test]
fn test_bulk_in_dispatched_once() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 16, &log);

    session.submit(&transfer).unwrap();
    assert!(transfer.is_in_flight());
    assert_eq!(
        bridge.calls(),
        vec![BridgeCall::SubmitBulkIn {
            endpoint: 1,
            length: 16
        }]
    );

    // nothing terminal yet
    assert_eq!(session.poll().unwrap(), 0);
    assert!(entries(&log).is_empty());

    assert_eq!(bridge.complete_pending_in(&[0xaa; 10]), 1);
    assert_eq!(session.poll().unwrap(), 1);
    assert_eq!(
        entries(&log),
        vec![(
            transfer.id(),
            Completion {
                status: TransferStatus::Completed,
                actual_length: 10
            }
        )]
    );
    assert_eq!(transfer.data().unwrap(), vec![0xaa; 10]);
    assert_eq!(transfer.status(), TransferStatus::Unsubmitted);

    assert_eq!(session.poll().unwrap(), 0);
    assert_eq!(entries(&log).len(), 1);
}

#[test]
fn test_bulk_out_sends_buffer() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = session.alloc_transfer(0);
    transfer
        .fill_bulk(DEFAULT_HANDLE, 0x02, vec![1, 2, 3, 4], recorder(&log), Duration::ZERO)
        .unwrap();
    transfer.set_length(3).unwrap();

    session.submit(&transfer).unwrap();
    assert_eq!(
        bridge.calls(),
        vec![BridgeCall::SubmitBulkOut {
            endpoint: 2,
            data: vec![1, 2, 3]
        }]
    );

    assert_eq!(bridge.complete_pending_out(), 1);
    assert_eq!(session.poll().unwrap(), 1);
    assert_eq!(entries(&log)[0].1.actual_length, 3);
}

#[test]
fn test_error_status_dispatched() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    assert_eq!(bridge.fail_pending(UsbError::Pipe), 1);
    assert_eq!(session.poll().unwrap(), 1);

    assert_eq!(
        entries(&log)[0].1,
        Completion {
            status: TransferStatus::Error(UsbError::Pipe),
            actual_length: 0
        }
    );
}

#[test]
fn test_buffer_locked_until_dispatch() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    assert_eq!(transfer.data(), Err(UsbError::Busy));

    bridge.complete_pending_in(&[1]);
    // terminal but not yet dispatched: the buffer is readable again
    assert_eq!(transfer.status(), TransferStatus::Completed);
    assert_eq!(transfer.data().unwrap(), vec![1]);
}

// ============================================================================
// Submission Rejection Tests
// ============================================================================

#[test]
fn test_non_bulk_types_never_complete() {
    let (session, bridge) = open_session();
    let log = Log::default();

    let interrupt = session.alloc_transfer(0);
    interrupt
        .fill_interrupt(DEFAULT_HANDLE, 0x83, vec![0; 8], recorder(&log), Duration::ZERO)
        .unwrap();
    let control = session.alloc_transfer(0);
    control
        .fill_control(DEFAULT_HANDLE, vec![0; 8], recorder(&log), Duration::ZERO)
        .unwrap();
    let iso = session.alloc_transfer(8);
    iso.fill(
        DEFAULT_HANDLE,
        TransferType::Isochronous,
        0x81,
        vec![0; 64],
        recorder(&log),
        Duration::ZERO,
    )
    .unwrap();

    for transfer in [&interrupt, &control, &iso] {
        let result = session.submit(transfer);
        assert!(
            matches!(result, Err(UsbError::NotImplemented { .. })),
            "unexpected {:?}",
            result
        );
        assert_eq!(transfer.status(), TransferStatus::Unsubmitted);
    }

    assert_eq!(session.poll().unwrap(), 0);
    assert!(entries(&log).is_empty());
    assert_eq!(bridge.submission_count(), 0);
    assert_eq!(iso.num_iso_packets(), 8);
}

#[test]
fn test_submit_invalid_handle() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = session.alloc_transfer(0);
    transfer
        .fill_bulk(DeviceHandle(5), 0x81, vec![0; 8], recorder(&log), Duration::ZERO)
        .unwrap();

    assert_eq!(session.submit(&transfer), Err(UsbError::InvalidParam));
    assert!(bridge.calls().is_empty());
    assert!(!session.is_registered(&transfer));
}

#[test]
fn test_submit_unfilled_transfer() {
    let (session, bridge) = open_session();
    let transfer = session.alloc_transfer(0);

    assert_eq!(session.submit(&transfer), Err(UsbError::InvalidParam));
    assert_eq!(bridge.submission_count(), 0);
}

#[test]
fn test_resubmit_in_flight_is_busy() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    assert_eq!(session.submit(&transfer), Err(UsbError::Busy));
    assert_eq!(bridge.submission_count(), 1);
    assert!(transfer.is_in_flight());
}

#[test]
fn test_bridge_rejection_rolls_back() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    bridge.reject_submissions(UsbError::Io);
    assert_eq!(session.submit(&transfer), Err(UsbError::Io));
    assert_eq!(transfer.status(), TransferStatus::Unsubmitted);
    assert_eq!(session.poll().unwrap(), 0);

    bridge.accept_submissions();
    session.submit(&transfer).unwrap();
    bridge.complete_pending_in(&[1, 2]);
    assert_eq!(session.poll().unwrap(), 1);
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[test]
fn test_cancel_never_submitted() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.cancel(&transfer);
    assert_eq!(session.poll().unwrap(), 1);
    assert_eq!(
        entries(&log),
        vec![(
            transfer.id(),
            Completion {
                status: TransferStatus::Cancelled,
                actual_length: 0
            }
        )]
    );
    assert!(bridge.calls().is_empty());

    assert_eq!(session.poll().unwrap(), 0);
}

#[test]
fn test_cancel_in_flight_discards_late_completion() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    session.cancel(&transfer);
    assert_eq!(session.poll().unwrap(), 1);

    assert_eq!(bridge.complete_pending_in(&[1, 2, 3]), 0);
    assert_eq!(session.poll().unwrap(), 0);
    assert_eq!(entries(&log).len(), 1);
    assert_eq!(entries(&log)[0].1.status, TransferStatus::Cancelled);
    assert_eq!(transfer.actual_length(), 0);
}

#[test]
fn test_stale_completion_after_resubmit() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    let first = bridge.take_pending();
    session.cancel(&transfer);
    session.poll().unwrap();

    session.submit(&transfer).unwrap();
    assert!(!first[0].transfer.complete_in(&[9, 9]));
    assert!(transfer.is_in_flight());

    assert_eq!(bridge.complete_pending_in(&[4]), 1);
    session.poll().unwrap();
    assert_eq!(transfer.data().unwrap(), vec![4]);
}

// ============================================================================
// Dispatch Order and Re-entry Tests
// ============================================================================

#[test]
fn test_dispatch_in_registration_order() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let a = bulk_transfer(&session, 0x81, 8, &log);
    let b = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&a).unwrap();
    session.submit(&b).unwrap();

    // complete B first
    let pending = bridge.take_pending();
    assert!(pending[1].transfer.complete_in(&[2]));
    assert!(pending[0].transfer.complete_in(&[1]));

    assert_eq!(session.poll().unwrap(), 2);
    let ids: Vec<TransferId> = entries(&log).iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![a.id(), b.id()]);
}

#[test]
fn test_callback_resubmits_transfer() {
    let (session, bridge) = open_session();
    let count = Arc::new(Mutex::new(0usize));
    let transfer = session.alloc_transfer(0);

    let seen = Arc::clone(&count);
    transfer
        .fill_bulk(
            DEFAULT_HANDLE,
            0x81,
            vec![0; 8],
            move |session: &Session, transfer: &Transfer, completion: &Completion| {
                assert_eq!(completion.status, TransferStatus::Completed);
                *seen.lock().unwrap() += 1;
                session.submit(transfer).unwrap();
            },
            Duration::ZERO,
        )
        .unwrap();

    session.submit(&transfer).unwrap();
    for round in 1..=3 {
        assert_eq!(bridge.complete_pending_in(&[round as u8]), 1);
        assert_eq!(session.poll().unwrap(), 1);
        assert_eq!(*count.lock().unwrap(), round);
        assert!(transfer.is_in_flight());
    }

    assert_eq!(bridge.submission_count(), 4);
    assert_eq!(session.registered_transfers(), 1);
}

#[test]
fn test_callback_submits_other_transfer() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let follow_up = bulk_transfer(&session, 0x81, 8, &log);
    let first = session.alloc_transfer(0);

    let next = follow_up.clone();
    first
        .fill_bulk(
            DEFAULT_HANDLE,
            0x81,
            vec![0; 8],
            move |session: &Session, _: &Transfer, _: &Completion| {
                session.submit(&next).unwrap();
            },
            Duration::ZERO,
        )
        .unwrap();

    session.submit(&first).unwrap();
    bridge.complete_pending_in(&[1]);

    // the follow-up is only in flight, not dispatched, during this poll
    assert_eq!(session.poll().unwrap(), 1);
    assert!(follow_up.is_in_flight());

    bridge.complete_pending_in(&[2]);
    assert_eq!(session.poll().unwrap(), 1);
    assert_eq!(entries(&log)[0].0, follow_up.id());
}

#[test]
fn test_callback_replaced_during_dispatch() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = session.alloc_transfer(0);

    let replacement = recorder(&log);
    let mut replacement = Some(replacement);
    transfer
        .fill_bulk(
            DEFAULT_HANDLE,
            0x81,
            vec![0; 8],
            move |session: &Session, transfer: &Transfer, _: &Completion| {
                if let Some(cb) = replacement.take() {
                    transfer.set_callback(cb);
                }
                session.submit(transfer).unwrap();
            },
            Duration::ZERO,
        )
        .unwrap();

    session.submit(&transfer).unwrap();
    bridge.complete_pending_in(&[1]);
    session.poll().unwrap();
    assert!(entries(&log).is_empty());

    bridge.complete_pending_in(&[2]);
    session.poll().unwrap();
    assert_eq!(entries(&log).len(), 1);
}

#[test]
fn test_handle_events_timeout_polls() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    bridge.complete_pending_in(&[1]);

    assert_eq!(
        session
            .handle_events_timeout(session.context(), Some(Duration::from_millis(10)))
            .unwrap(),
        1
    );
    assert_eq!(
        session.handle_events_timeout(shim::Context(9), None),
        Err(UsbError::InvalidParam)
    );
}

// ============================================================================
// Free and Prune Tests
// ============================================================================

#[test]
fn test_free_transfer() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    assert_eq!(session.free_transfer(&transfer), Err(UsbError::Busy));

    bridge.complete_pending_in(&[1]);
    session.poll().unwrap();
    session.free_transfer(&transfer).unwrap();
    assert!(!session.is_registered(&transfer));
    assert_eq!(session.registered_transfers(), 0);
}

#[test]
fn test_freed_terminal_transfer_not_dispatched() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.submit(&transfer).unwrap();
    bridge.complete_pending_in(&[1]);
    session.free_transfer(&transfer).unwrap();

    assert_eq!(session.poll().unwrap(), 0);
    assert!(entries(&log).is_empty());
}

#[test]
fn test_transfer_freed_by_earlier_callback() {
    let (session, bridge) = open_session();
    let log = Log::default();
    let first = bulk_transfer(&session, 0x81, 8, &log);
    let second = bulk_transfer(&session, 0x81, 8, &log);

    let victim = second.clone();
    first.set_callback(move |session, _, _| {
        session.free_transfer(&victim).unwrap();
    });

    session.submit(&first).unwrap();
    session.submit(&second).unwrap();
    bridge.complete_pending_in(&[1]);

    // only the first callback ran
    assert_eq!(session.poll().unwrap(), 1);
    assert!(entries(&log).is_empty());
    assert!(!session.is_registered(&second));
}

#[test]
fn test_terminal_transfer_without_callback_not_counted() {
    let (session, _bridge) = open_session();
    let transfer = session.alloc_transfer(0);

    session.cancel(&transfer);
    assert_eq!(session.poll().unwrap(), 0);
    assert_eq!(transfer.status(), TransferStatus::Unsubmitted);
}

#[test]
fn test_dropped_transfers_pruned() {
    let (session, _bridge) = open_session();
    let log = Log::default();
    let transfer = bulk_transfer(&session, 0x81, 8, &log);

    session.cancel(&transfer);
    drop(transfer);

    // still owes its callback
    assert_eq!(session.poll().unwrap(), 1);
    assert_eq!(session.registered_transfers(), 1);

    session.poll().unwrap();
    assert_eq!(session.registered_transfers(), 0);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_dispatch_follows_registration_order(
        order in (1usize..8).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let (session, bridge) = open_session();
        let log = Log::default();
        let transfers: Vec<Transfer> = order
            .iter()
            .map(|_| bulk_transfer(&session, 0x81, 4, &log))
            .collect();
        for transfer in &transfers {
            session.submit(transfer).unwrap();
        }

        let pending = bridge.take_pending();
        for i in &order {
            prop_assert!(pending[*i].transfer.complete_in(&[*i as u8]));
        }

        prop_assert_eq!(session.poll().unwrap(), transfers.len());
        let ids: Vec<TransferId> = entries(&log).iter().map(|(id, _)| *id).collect();
        let expected: Vec<TransferId> = transfers.iter().map(Transfer::id).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(session.poll().unwrap(), 0);
    }
}
