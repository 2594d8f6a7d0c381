//! Bulk streaming over self-resubmitting transfers
//!
//! A [`Stream`] keeps a fixed pool of bulk transfers in flight. Each
//! completion callback consumes (receive) or refills (transmit) its buffer
//! and resubmits the same transfer until the transfer budget runs out, the
//! source hits end of file, or the stream is stopped.

use common::AppConfig;
use shim::{Completion, DeviceHandle, Session, Transfer, TransferStatus};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Transfer pool parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Bulk endpoint address, direction bit included
    pub endpoint: u8,
    pub transfer_size: usize,
    pub in_flight: usize,
    /// Total transfers to submit (None = until stopped)
    pub transfer_count: Option<u64>,
    pub timeout: Duration,
}

impl StreamConfig {
    pub fn from_app(app: &AppConfig) -> anyhow::Result<Self> {
        let endpoint = app
            .endpoint
            .ok_or_else(|| anyhow::anyhow!("App '{}' has no endpoint", app.name))?;
        Ok(Self {
            endpoint,
            transfer_size: app.transfer_size,
            in_flight: app.in_flight,
            transfer_count: app.transfer_count,
            timeout: Duration::from_millis(u64::from(app.timeout_ms)),
        })
    }
}

/// Counters reported when a stream finishes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Completed transfers
    pub transfers: u64,
    pub bytes: u64,
    pub errors: u64,
}

enum Payload {
    Sink(Box<dyn Write + Send>),
    Source(Box<dyn Read + Send>),
}

struct StreamState {
    payload: Payload,
    remaining: Option<u64>,
    /// Submitted and not yet dispatched
    in_flight: usize,
    stopping: bool,
    failure: Option<String>,
    stats: StreamStats,
}

impl StreamState {
    /// Take one submission from the budget
    fn claim_submission(&mut self) -> bool {
        if self.stopping {
            return false;
        }
        match &mut self.remaining {
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
            None => true,
        }
    }

    fn fail(&mut self, message: String) {
        warn!("{}", message);
        self.stopping = true;
        self.failure.get_or_insert(message);
    }

    fn submit(&mut self, session: &Session, transfer: &Transfer) {
        match session.submit(transfer) {
            Ok(()) => self.in_flight += 1,
            Err(e) => self.fail(format!("Failed to submit transfer: {}", e)),
        }
    }

    /// Prepare `transfer` for its next submission
    ///
    /// OUT transfers are refilled from the source; `false` means end of input.
    fn refill(&mut self, transfer: &Transfer) -> io::Result<bool> {
        let Payload::Source(source) = &mut self.payload else {
            return Ok(true);
        };
        let read = transfer
            .with_buffer(|buf| read_chunk(source, buf))
            .map_err(io::Error::other)??;
        if read == 0 {
            return Ok(false);
        }
        transfer.set_length(read).map_err(io::Error::other)?;
        Ok(true)
    }
}

/// Read until `buf` is full or the source is exhausted
fn read_chunk<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn lock(state: &Mutex<StreamState>) -> MutexGuard<'_, StreamState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn on_completion(
    state: &Mutex<StreamState>,
    session: &Session,
    transfer: &Transfer,
    completion: &Completion,
) {
    let mut state = lock(state);
    state.in_flight = state.in_flight.saturating_sub(1);

    match &completion.status {
        TransferStatus::Completed => {
            state.stats.transfers += 1;
            state.stats.bytes += completion.actual_length as u64;
            if let Payload::Sink(sink) = &mut state.payload {
                let written = transfer
                    .data()
                    .map_err(io::Error::other)
                    .and_then(|data| sink.write_all(&data));
                if let Err(e) = written {
                    state.fail(format!("Failed to write received data: {}", e));
                }
            }
        }
        TransferStatus::Cancelled => {
            debug!("Transfer {:?} cancelled", transfer.id());
            return;
        }
        TransferStatus::Error(e) => {
            state.stats.errors += 1;
            state.fail(format!("Transfer {:?} failed: {}", transfer.id(), e));
            return;
        }
        other => {
            debug!("Unexpected status {:?} for {:?}", other, transfer.id());
            return;
        }
    }

    if !state.claim_submission() {
        return;
    }
    match state.refill(transfer) {
        Ok(true) => state.submit(session, transfer),
        Ok(false) => {
            debug!("End of input");
            state.stopping = true;
        }
        Err(e) => state.fail(format!("Failed to read input: {}", e)),
    }
}

/// Pool of bulk transfers cycling through one endpoint
pub struct Stream {
    transfers: Vec<Transfer>,
    state: Arc<Mutex<StreamState>>,
}

impl Stream {
    /// Stream bulk IN data into `sink`
    pub fn receive(
        session: &Session,
        handle: DeviceHandle,
        config: &StreamConfig,
        sink: Box<dyn Write + Send>,
    ) -> anyhow::Result<Self> {
        Self::start(session, handle, config, Payload::Sink(sink))
    }

    /// Stream `source` to a bulk OUT endpoint
    pub fn transmit(
        session: &Session,
        handle: DeviceHandle,
        config: &StreamConfig,
        source: Box<dyn Read + Send>,
    ) -> anyhow::Result<Self> {
        Self::start(session, handle, config, Payload::Source(source))
    }

    fn start(
        session: &Session,
        handle: DeviceHandle,
        config: &StreamConfig,
        payload: Payload,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(Mutex::new(StreamState {
            payload,
            remaining: config.transfer_count,
            in_flight: 0,
            stopping: false,
            failure: None,
            stats: StreamStats::default(),
        }));

        let mut transfers = Vec::with_capacity(config.in_flight);
        for _ in 0..config.in_flight {
            let transfer = session.alloc_transfer(0);
            let shared = Arc::clone(&state);
            transfer.fill_bulk(
                handle,
                config.endpoint,
                vec![0; config.transfer_size],
                move |session: &Session, transfer: &Transfer, completion: &Completion| {
                    on_completion(&shared, session, transfer, completion)
                },
                config.timeout,
            )?;
            transfers.push(transfer);
        }

        let stream = Self { transfers, state };
        {
            let mut state = lock(&stream.state);
            for transfer in &stream.transfers {
                if !state.claim_submission() {
                    break;
                }
                match state.refill(transfer) {
                    Ok(true) => state.submit(session, transfer),
                    Ok(false) => {
                        state.stopping = true;
                        break;
                    }
                    Err(e) => {
                        state.fail(format!("Failed to read input: {}", e));
                        break;
                    }
                }
            }
        }

        if let Some(failure) = stream.failure() {
            stream.stop(session);
            anyhow::bail!("{}", failure);
        }

        debug!(
            "Stream started on endpoint {:#04x} with {} transfers",
            config.endpoint,
            stream.transfers.len()
        );
        Ok(stream)
    }

    /// No transfer is waiting for dispatch
    pub fn is_finished(&self) -> bool {
        lock(&self.state).in_flight == 0
    }

    pub fn is_stopping(&self) -> bool {
        lock(&self.state).stopping
    }

    pub fn failure(&self) -> Option<String> {
        lock(&self.state).failure.clone()
    }

    pub fn stats(&self) -> StreamStats {
        lock(&self.state).stats
    }

    /// Stop resubmitting and cancel every transfer still in flight
    pub fn stop(&self, session: &Session) {
        lock(&self.state).stopping = true;
        for transfer in self.transfers.iter().filter(|t| t.is_in_flight()) {
            session.cancel(transfer);
        }
    }

    /// Flush the sink and free the transfers
    pub fn finish(self, session: &Session) -> anyhow::Result<StreamStats> {
        for transfer in &self.transfers {
            if let Err(e) = session.free_transfer(transfer) {
                warn!("Failed to free transfer {:?}: {}", transfer.id(), e);
            }
        }

        let mut state = lock(&self.state);
        if let Payload::Sink(sink) = &mut state.payload {
            sink.flush()?;
        }
        if let Some(failure) = &state.failure {
            anyhow::bail!("{}", failure);
        }
        Ok(state.stats)
    }
}
