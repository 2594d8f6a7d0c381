//! Bulk transfer execution
//!
//! Runs one queued bulk job against a rusb device handle and reports the
//! outcome through the job's [`TransferRef`]. Called from the worker thread
//! only.

use protocol::UsbError;
use rusb::{DeviceHandle, UsbContext};
use shim::TransferRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Blocking bulk I/O on an open device
///
/// A zero timeout waits indefinitely, as in libusb.
pub trait BulkIo {
    fn read_bulk(&self, address: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;
    fn write_bulk(&self, address: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize>;
}

impl<T: UsbContext> BulkIo for DeviceHandle<T> {
    fn read_bulk(&self, address: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::read_bulk(self, address, buf, timeout)
    }

    fn write_bulk(&self, address: u8, buf: &[u8], timeout: Duration) -> rusb::Result<usize> {
        DeviceHandle::write_bulk(self, address, buf, timeout)
    }
}

/// One bulk submission queued for the worker thread
#[derive(Debug)]
pub struct BulkJob {
    /// Full endpoint address, direction bit included
    pub address: u8,
    pub length: usize,
    /// Payload for OUT jobs, empty for IN jobs
    pub data: Vec<u8>,
    pub transfer: TransferRef,
}

impl BulkJob {
    pub fn is_in(&self) -> bool {
        self.address & protocol::types::DIRECTION_IN_MASK != 0
    }
}

/// Execute a bulk job as a single blocking call
///
/// Jobs cancelled while queued are dropped. Once started, a transfer runs
/// to completion or to its own timeout; the payload is never re-issued, so
/// a partially written OUT buffer cannot reach the device twice.
pub fn execute_bulk<H: BulkIo + ?Sized>(handle: &H, job: BulkJob, shutdown: &AtomicBool) {
    if !job.transfer.is_pending() {
        debug!("Transfer {:?} no longer pending, dropping job", job.transfer.id());
        return;
    }
    if shutdown.load(Ordering::Acquire) {
        job.transfer.fail(UsbError::NoDevice);
        return;
    }

    let timeout = job.transfer.timeout();
    debug!(
        "Bulk transfer: endpoint={:#x}, length={}, timeout={}ms, is_in={}",
        job.address,
        job.length,
        timeout.as_millis(),
        job.is_in()
    );

    if job.is_in() {
        let mut buffer = vec![0u8; job.length];
        match handle.read_bulk(job.address, &mut buffer, timeout) {
            Ok(len) => {
                debug!("Bulk IN succeeded: {} bytes", len);
                job.transfer.complete_in(&buffer[..len]);
            }
            Err(e) => fail_job(&job, e),
        }
    } else {
        match handle.write_bulk(job.address, &job.data, timeout) {
            Ok(len) => {
                debug!("Bulk OUT succeeded: {} bytes", len);
                job.transfer.complete_out(len);
            }
            Err(e) => fail_job(&job, e),
        }
    }
}

fn fail_job(job: &BulkJob, err: rusb::Error) {
    warn!("Bulk transfer on endpoint {:#x} failed: {}", job.address, err);
    job.transfer.fail(map_rusb_error(err));
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
