//! Bulk worker thread
//!
//! Blocking bulk I/O runs on a dedicated thread fed through a bounded
//! async-channel queue. The thread completes transfers through their
//! [`TransferRef`](shim::TransferRef); the session picks the results up on
//! its next poll.

use crate::transfers::{BulkIo, BulkJob, execute_bulk};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::{Result, UsbError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Queue depth between the session and the worker thread
pub const QUEUE_CAPACITY: usize = 256;

/// How long shutdown waits for a transfer still blocked on the device
pub const JOIN_GRACE: Duration = Duration::from_secs(2);

/// Commands for the worker thread
#[derive(Debug)]
pub enum WorkerCommand {
    Bulk(BulkJob),
    /// Stop after the current job
    Shutdown,
}

/// Session side of the worker: queues jobs and owns the thread
pub struct BulkWorker {
    cmd_tx: Sender<WorkerCommand>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BulkWorker {
    /// Spawn the worker thread for an open device
    pub fn spawn<H>(handle: Arc<H>) -> Result<Self>
    where
        H: BulkIo + Send + Sync + 'static,
    {
        let (cmd_tx, cmd_rx) = bounded(QUEUE_CAPACITY);
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name("usb-worker".to_string())
            .spawn(move || run(handle, cmd_rx, flag))
            .map_err(|e| UsbError::Other {
                message: format!("Failed to spawn USB worker thread: {}", e),
            })?;

        Ok(Self {
            cmd_tx,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Queue a job without blocking
    ///
    /// A full queue is reported as [`UsbError::Busy`].
    pub fn submit(&self, job: BulkJob) -> Result<()> {
        match self.cmd_tx.try_send(WorkerCommand::Bulk(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("USB worker queue full");
                Err(UsbError::Busy)
            }
            Err(TrySendError::Closed(_)) => Err(UsbError::NoDevice),
        }
    }

    /// Stop the thread and wait for it
    ///
    /// Jobs still queued fail with [`UsbError::NoDevice`]. A thread still
    /// blocked in a transfer after [`JOIN_GRACE`] is detached; it exits once
    /// that transfer returns.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        if self.cmd_tx.try_send(WorkerCommand::Shutdown).is_err() {
            self.cmd_tx.close();
        }

        let started = Instant::now();
        while !thread.is_finished() && started.elapsed() < JOIN_GRACE {
            std::thread::sleep(Duration::from_millis(10));
        }
        if !thread.is_finished() {
            warn!("USB worker still blocked in a transfer, detaching");
            return;
        }
        if thread.join().is_err() {
            error!("USB worker thread panicked");
        }
    }
}

impl Drop for BulkWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<H: BulkIo>(handle: Arc<H>, cmd_rx: Receiver<WorkerCommand>, shutdown: Arc<AtomicBool>) {
    info!("USB worker thread started");

    while let Ok(cmd) = cmd_rx.recv_blocking() {
        match cmd {
            WorkerCommand::Bulk(job) => {
                let transfer = job.transfer.clone();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    execute_bulk(handle.as_ref(), job, &shutdown)
                }));
                if let Err(e) = result {
                    error!("Panic in bulk transfer: {:?}", e);
                    transfer.fail(UsbError::Other {
                        message: "bulk transfer panicked".to_string(),
                    });
                }
            }
            WorkerCommand::Shutdown => {
                debug!("USB worker shutting down");
                break;
            }
        }
    }

    // anything still queued belongs to a closed device
    while let Ok(cmd) = cmd_rx.try_recv() {
        if let WorkerCommand::Bulk(job) = cmd {
            job.transfer.fail(UsbError::NoDevice);
        }
    }

    info!("USB worker thread stopped");
}
