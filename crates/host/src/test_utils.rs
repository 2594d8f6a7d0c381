//! Scripted bulk I/O and mock-submitted transfers for host tests

use crate::transfers::{BulkIo, BulkJob};
use shim::test_utils::{MOCK_PRODUCT_ID, MOCK_VENDOR_ID, MockBridge};
use shim::{DEFAULT_DEVICE, DEFAULT_HANDLE, DeviceSelector, Session, Transfer};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fill byte for scripted IN data
pub const IN_FILL: u8 = 0xab;

/// One call seen by [`ScriptedIo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoCall {
    pub address: u8,
    pub len: usize,
    pub timeout: Duration,
}

/// Bulk I/O returning the same outcome for every call
pub struct ScriptedIo {
    outcome: rusb::Result<usize>,
    panics: bool,
    calls: Mutex<Vec<IoCall>>,
}

impl ScriptedIo {
    pub fn returning(outcome: rusb::Result<usize>) -> Self {
        Self {
            outcome,
            panics: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::returning(Ok(0))
        }
    }

    pub fn calls(&self) -> Vec<IoCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, address: u8, len: usize, timeout: Duration) -> rusb::Result<usize> {
        self.calls.lock().unwrap().push(IoCall {
            address,
            len,
            timeout,
        });
        if self.panics {
            panic!("scripted bulk I/O failure");
        }
        self.outcome
    }
}

impl BulkIo for ScriptedIo {
    fn read_bulk(&self, address: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        let result = self.record(address, buf.len(), timeout);
        if let Ok(n) = result {
            let n = n.min(buf.len());
            buf[..n].fill(IN_FILL);
        }
        result
    }

    fn write_bulk(&self, address: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.record(address, buf.len(), timeout)
    }
}

/// Session opened on a [`MockBridge`] that holds submissions
pub fn open_session() -> (Session, MockBridge) {
    let bridge = MockBridge::new();
    let session = Session::init(
        bridge.clone(),
        DeviceSelector::new(MOCK_VENDOR_ID, MOCK_PRODUCT_ID),
    )
    .unwrap();
    session.open(DEFAULT_DEVICE).unwrap();
    (session, bridge)
}

/// Submit a bulk transfer and turn the held submission into a worker job
pub fn submitted_job(
    session: &Session,
    bridge: &MockBridge,
    address: u8,
    buffer: Vec<u8>,
    timeout: Duration,
) -> (Transfer, BulkJob) {
    let transfer = session.alloc_transfer(0);
    transfer
        .fill_bulk(DEFAULT_HANDLE, address, buffer, |_, _, _| {}, timeout)
        .unwrap();
    session.submit(&transfer).unwrap();

    let pending = bridge.take_pending().pop().unwrap();
    let data = if address & protocol::types::DIRECTION_IN_MASK != 0 {
        Vec::new()
    } else {
        pending.transfer.out_data()
    };
    let job = BulkJob {
        address,
        length: pending.length,
        data,
        transfer: pending.transfer,
    };
    (transfer, job)
}

/// Wait for a worker to finish a transfer
pub fn wait_until_done(transfer: &Transfer) {
    let started = Instant::now();
    while transfer.is_in_flight() {
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "transfer still in flight"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}
