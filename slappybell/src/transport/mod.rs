//! Transport Port: one serial connection with an ordered write pump.
//!
//! ```text
//!  callers ──send──> [job queue] ──> pump thread ──write──> Port
//!                                                            │
//!  subscribers <──events── dispatch <── parser <── reader thread
//!  pending requests <──responses──┘        │
//!  line waiters <──────────raw lines───────┘
//! ```
//!
//! The pump is the only writer, so jobs reach the wire in the order they were
//! queued. A request that expects a reply is registered with the
//! [`Correlator`] before its job is queued, so a fast reply always finds it.

pub mod correlate;
pub mod upload;
pub mod waiters;

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

pub use correlate::{Correlator, FifoCorrelator};
pub use upload::{CHUNK_SIZE, ProgressFn, TransferProgress, UploadOptions};

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig, flush_patiently, write_all_patiently};
use crate::protocol::{Message, MessageKind, MessageParser, Utf8Decoder};
use waiters::LineWaiters;

/// Transport timing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Delay between opening the port and considering it usable.
    pub settle_delay: Duration,
    /// Granularity of cancellable sleeps.
    pub poll_interval: Duration,
    /// Reply timeout used by [`Transport::request`].
    pub response_timeout: Duration,
    /// Reply timeout for uploads whose [`UploadOptions`] leave it unset.
    pub upload_timeout: Duration,
    /// Bytes per payload write.
    pub chunk_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(800),
            poll_interval: Duration::from_millis(20),
            response_timeout: Duration::from_secs(3),
            upload_timeout: Duration::from_secs(10),
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl TransportConfig {
    /// Set the post-open settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the default response timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the default upload response timeout.
    #[must_use]
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortState {
    /// No connection.
    Closed,
    /// Opening and settling.
    Connecting,
    /// Ready for traffic.
    Open,
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Event published to [`Transport::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortEvent {
    /// A Notify message arrived.
    Notify(Message),
    /// A line without a recognized prefix arrived.
    Other(Message),
    /// The connection state changed.
    StateChanged(PortState),
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

enum WriteJob {
    Line {
        data: Vec<u8>,
        request: Option<u64>,
    },
    Upload {
        command: Vec<u8>,
        payload: Vec<u8>,
        delay: Duration,
        chunk_size: usize,
        progress: Option<ProgressFn>,
        request: u64,
        sent: SyncSender<Result<()>>,
    },
}

/// State reachable from the caller side and both worker threads.
struct Shared {
    port_name: String,
    state: Mutex<PortState>,
    pending: Mutex<Box<dyn Correlator>>,
    waiters: Mutex<LineWaiters>,
    subscribers: Mutex<Vec<Sender<PortEvent>>>,
}

impl Shared {
    fn state(&self) -> PortState {
        *lock(&self.state)
    }

    fn set_state(&self, next: PortState) {
        let previous = std::mem::replace(&mut *lock(&self.state), next);
        if previous != next {
            debug!("{}: {previous} -> {next}", self.port_name);
            self.publish(PortEvent::StateChanged(next));
        }
    }

    fn feed_line(&self, line: &str) {
        lock(&self.waiters).offer(line);
    }

    fn dispatch(&self, message: Message) {
        match message.kind() {
            MessageKind::Response => {
                let orphan = lock(&self.pending).resolve(message);
                if let Some(orphan) = orphan {
                    warn!("Orphan response dropped: {orphan}");
                }
            },
            MessageKind::Notify => {
                debug!("Notify: {message}");
                self.publish(PortEvent::Notify(message));
            },
            MessageKind::Unknown => self.publish(PortEvent::Other(message)),
        }
    }

    fn publish(&self, event: PortEvent) {
        lock(&self.subscribers).retain(|tx| {
            tx.send(event.clone())
                .is_ok()
        });
    }

    /// Fail everything in flight and mark the port closed.
    fn shutdown(&self, reason: &str) {
        lock(&self.pending).fail_all(reason);
        lock(&self.waiters).clear();
        self.set_state(PortState::Closed);
    }
}

/// Handles of one live connection.
struct Link {
    jobs: Sender<WriteJob>,
    running: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Link {
    fn stop(self) {
        self.running
            .store(false, Ordering::SeqCst);
        drop(self.jobs);
        if self
            .pump
            .join()
            .is_err()
        {
            warn!("Pump thread panicked");
        }
        if self
            .reader
            .join()
            .is_err()
        {
            warn!("Reader thread panicked");
        }
    }
}

/// A serial connection to one device speaking the line protocol.
pub struct Transport {
    serial: SerialConfig,
    config: TransportConfig,
    opener: Arc<dyn PortOpener>,
    shared: Arc<Shared>,
    generation: AtomicU64,
    link: Mutex<Option<Link>>,
}

impl Transport {
    /// Create a closed transport with FIFO response correlation.
    pub fn new(opener: Arc<dyn PortOpener>, serial: SerialConfig, config: TransportConfig) -> Self {
        Self::with_correlator(opener, serial, config, Box::new(FifoCorrelator::new()))
    }

    /// Create a closed transport with a custom correlation strategy.
    pub fn with_correlator(
        opener: Arc<dyn PortOpener>,
        serial: SerialConfig,
        config: TransportConfig,
        correlator: Box<dyn Correlator>,
    ) -> Self {
        let shared = Arc::new(Shared {
            port_name: serial
                .port_name
                .clone(),
            state: Mutex::new(PortState::Closed),
            pending: Mutex::new(correlator),
            waiters: Mutex::new(LineWaiters::new()),
            subscribers: Mutex::new(Vec::new()),
        });
        Self {
            serial,
            config,
            opener,
            shared,
            generation: AtomicU64::new(0),
            link: Mutex::new(None),
        }
    }

    /// Create a transport for a native serial port.
    #[cfg(feature = "native")]
    pub fn native(port_name: &str) -> Self {
        Self::new(
            Arc::new(crate::port::NativeOpener),
            SerialConfig::new(port_name),
            TransportConfig::default(),
        )
    }

    /// Port name this transport talks to.
    pub fn port_name(&self) -> &str {
        &self
            .serial
            .port_name
    }

    /// Current connection state.
    pub fn state(&self) -> PortState {
        self.shared
            .state()
    }

    /// Timing parameters.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open the port, wait for it to settle and start the worker threads.
    ///
    /// Does nothing when already open. A concurrent [`close`](Self::close)
    /// aborts the attempt with [`Error::Disconnected`].
    pub fn connect(&self) -> Result<()> {
        let mut link = lock(&self.link);
        if let Some(existing) = link.take() {
            if self.shared.state() == PortState::Open {
                *link = Some(existing);
                return Ok(());
            }
            existing.stop();
            // Requests that raced the teardown of the old link must not
            // claim replies on the new one.
            self.shared
                .shutdown("reconnecting");
        }

        let generation = self
            .generation
            .load(Ordering::SeqCst);
        self.shared
            .set_state(PortState::Connecting);
        info!("Connecting to {}", self.serial.port_name);

        match self.open_link(generation) {
            Ok(opened) => {
                *link = Some(opened);
                info!("Connected to {}", self.serial.port_name);
                Ok(())
            },
            Err(e) => {
                debug!("Connect to {} failed: {e}", self.serial.port_name);
                self.shared
                    .shutdown("connect failed");
                Err(e)
            },
        }
    }

    fn open_link(&self, generation: u64) -> Result<Link> {
        let mut port = self
            .opener
            .open(&self.serial)?;
        let reader = match port.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = port.close();
                return Err(e);
            },
        };

        let deadline = Instant::now() + self.config.settle_delay;
        loop {
            if self
                .generation
                .load(Ordering::SeqCst)
                != generation
            {
                let _ = port.close();
                return Err(Error::Disconnected("connection attempt cancelled".to_string()));
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(
                self.config
                    .poll_interval
                    .min(deadline - now),
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let (jobs, queue) = mpsc::channel();
        self.shared
            .set_state(PortState::Open);

        let pump = {
            let shared = Arc::clone(&self.shared);
            let running = Arc::clone(&running);
            let stall_limit = self.serial.write_stall_timeout;
            thread::Builder::new()
                .name(format!("pump {}", self.serial.port_name))
                .spawn(move || run_pump(port, &queue, &shared, &running, stall_limit))?
        };

        let spawned = {
            let shared = Arc::clone(&self.shared);
            let running = Arc::clone(&running);
            let poll = self.config.poll_interval;
            thread::Builder::new()
                .name(format!("reader {}", self.serial.port_name))
                .spawn(move || run_reader(reader, &shared, &running, poll))
        };
        let reader = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::SeqCst);
                drop(jobs);
                let _ = pump.join();
                return Err(e.into());
            },
        };

        Ok(Link {
            jobs,
            running,
            pump,
            reader,
        })
    }

    /// Close the port, failing every pending request and line waiter.
    ///
    /// Safe to call repeatedly and from any thread.
    pub fn close(&self) {
        self.generation
            .fetch_add(1, Ordering::SeqCst);
        let link = lock(&self.link).take();
        if let Some(link) = link {
            info!("Closing {}", self.serial.port_name);
            link.stop();
        }
        self.shared
            .shutdown("port closed");
    }

    fn ensure_open<'a>(&self, link: &'a Option<Link>) -> Result<&'a Link> {
        match link {
            None => Err(Error::NotConnected),
            Some(_) if self.shared.state() != PortState::Open => {
                Err(Error::Disconnected("connection lost".to_string()))
            },
            Some(link) => Ok(link),
        }
    }

    /// Queue text for writing without waiting for a reply.
    ///
    /// Returns once queued, not once written.
    pub fn send_raw(&self, text: &str) -> Result<()> {
        let guard = lock(&self.link);
        let link = self.ensure_open(&guard)?;
        link.jobs
            .send(WriteJob::Line {
                data: text
                    .as_bytes()
                    .to_vec(),
                request: None,
            })
            .map_err(|_| Error::QueueClosed)
    }

    /// Write `text` and wait for the next Response for up to
    /// [`TransportConfig::response_timeout`].
    pub fn request(&self, text: &str) -> Result<Message> {
        self.send_and_receive(text, self.config.response_timeout)
    }

    /// Write `text` and wait for the next Response.
    pub fn send_and_receive(&self, text: &str, timeout: Duration) -> Result<Message> {
        let (tx, rx) = mpsc::sync_channel(1);
        {
            // Holding the link lock keeps registration order equal to queue order.
            let guard = lock(&self.link);
            let link = self.ensure_open(&guard)?;
            let id = lock(&self.shared.pending).register(tx);
            let job = WriteJob::Line {
                data: text
                    .as_bytes()
                    .to_vec(),
                request: Some(id),
            };
            if link
                .jobs
                .send(job)
                .is_err()
            {
                lock(&self.shared.pending).cancel(id);
                return Err(Error::QueueClosed);
            }
        }
        await_response(&rx, timeout, text)
    }

    /// Write a command line followed by a binary payload, then wait for the
    /// Response.
    ///
    /// The payload is written in [`TransportConfig::chunk_size`] slices. The
    /// response timeout starts once the whole payload has been written and
    /// defaults to [`TransportConfig::upload_timeout`].
    pub fn send_and_receive_upload(
        &self,
        command: &str,
        payload: Vec<u8>,
        options: UploadOptions,
    ) -> Result<Message> {
        let (tx, rx) = mpsc::sync_channel(1);
        let (sent_tx, sent_rx) = mpsc::sync_channel(1);
        let timeout = options
            .timeout
            .unwrap_or(self.config.upload_timeout);
        let id = {
            let guard = lock(&self.link);
            let link = self.ensure_open(&guard)?;
            let id = lock(&self.shared.pending).register(tx);
            let job = WriteJob::Upload {
                command: command
                    .as_bytes()
                    .to_vec(),
                payload,
                delay: options.inter_chunk_delay,
                chunk_size: self.config.chunk_size,
                progress: options.progress,
                request: id,
                sent: sent_tx,
            };
            if link
                .jobs
                .send(job)
                .is_err()
            {
                lock(&self.shared.pending).cancel(id);
                return Err(Error::QueueClosed);
            }
            id
        };

        match sent_rx.recv() {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                lock(&self.shared.pending).cancel(id);
                return Err(Error::Disconnected("port closed during upload".to_string()));
            },
        }
        await_response(&rx, timeout, command)
    }

    /// Register interest in the next raw line accepted by `predicate`.
    ///
    /// Registering before triggering the line avoids missing a fast reply.
    pub fn expect_line<F>(&self, predicate: F) -> LineWait
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let id = lock(&self.shared.waiters).add(Box::new(predicate), tx);
        LineWait {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait for the next raw line accepted by `predicate`.
    pub fn wait_for_line<F>(&self, predicate: F, timeout: Duration) -> Result<String>
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        self.expect_line(predicate)
            .wait(timeout)
    }

    /// Receive every future [`PortEvent`].
    pub fn subscribe(&self) -> Receiver<PortEvent> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.subscribers).push(tx);
        rx
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    #[cfg(test)]
    fn waiter_len(&self) -> usize {
        lock(&self.shared.waiters).len()
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.serial.port_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A registered line waiter. Dropping it unregisters the waiter.
pub struct LineWait {
    id: u64,
    rx: Receiver<String>,
    shared: Arc<Shared>,
}

impl LineWait {
    /// Block until the line arrives, the port closes or `timeout` expires.
    pub fn wait(self, timeout: Duration) -> Result<String> {
        match self
            .rx
            .recv_timeout(timeout)
        {
            Ok(line) => Ok(line),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(format!(
                "no matching line within {} ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Disconnected("port closed".to_string()))
            },
        }
    }
}

impl Drop for LineWait {
    fn drop(&mut self) {
        lock(&self.shared.waiters).remove(self.id);
    }
}

fn await_response(
    rx: &Receiver<Result<Message>>,
    timeout: Duration,
    command: &str,
) -> Result<Message> {
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            let command = command.trim_end();
            debug!("No response to '{command}' within {timeout:?}");
            Err(Error::Timeout(format!(
                "no response to '{command}' within {} ms",
                timeout.as_millis()
            )))
        },
        Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected("port closed".to_string())),
    }
}

fn run_pump(
    mut port: Box<dyn Port>,
    queue: &Receiver<WriteJob>,
    shared: &Shared,
    running: &AtomicBool,
    stall_limit: Duration,
) {
    for job in queue {
        if !running.load(Ordering::SeqCst) {
            abandon(shared, job);
            break;
        }

        match job {
            WriteJob::Line { data, request } => {
                trace!(">> {}", String::from_utf8_lossy(&data).trim_end());
                if let Err(e) = write_line(port.as_mut(), &data, stall_limit, running) {
                    write_failed(shared, running, request, &e);
                }
            },
            WriteJob::Upload {
                command,
                payload,
                delay,
                chunk_size,
                mut progress,
                request,
                sent,
            } => {
                trace!(">> {} (+{} bytes)", String::from_utf8_lossy(&command).trim_end(), payload.len());
                let result = write_line(port.as_mut(), &command, stall_limit, running).and_then(|()| {
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    upload::write_chunked(
                        port.as_mut(),
                        &payload,
                        chunk_size,
                        delay,
                        stall_limit,
                        running,
                        &mut progress,
                    )
                });
                match result {
                    Ok(()) => {
                        let _ = sent.send(Ok(()));
                    },
                    Err(e) => {
                        write_failed(shared, running, Some(request), &e);
                        let _ = sent.send(Err(e));
                    },
                }
            },
        }
    }

    for job in queue.try_iter() {
        abandon(shared, job);
    }

    if let Err(e) = port.close() {
        warn!("Closing {} failed: {e}", shared.port_name);
    }
}

fn write_line(port: &mut dyn Port, data: &[u8], stall_limit: Duration, running: &AtomicBool) -> Result<()> {
    write_all_patiently(port, data, stall_limit, running)?;
    flush_patiently(port, stall_limit, running)?;
    Ok(())
}

/// Fail a job the pump will never write.
fn abandon(shared: &Shared, job: WriteJob) {
    let reason = || Error::Disconnected("port closed before write".to_string());
    match job {
        WriteJob::Line {
            request: Some(id), ..
        } => lock(&shared.pending).fail(id, reason()),
        WriteJob::Line { request: None, .. } => {},
        WriteJob::Upload { request, sent, .. } => {
            lock(&shared.pending).fail(request, reason());
            let _ = sent.send(Err(reason()));
        },
    }
}

fn write_failed(shared: &Shared, running: &AtomicBool, request: Option<u64>, error: &Error) {
    // Cleared means a close is already tearing the link down.
    let tear_down = running.swap(false, Ordering::SeqCst);
    if tear_down {
        warn!("Write to {} failed: {error}", shared.port_name);
        shared.set_state(PortState::Closed);
    }
    if let Some(id) = request {
        lock(&shared.pending).fail(id, error.replicate());
    }
    if tear_down {
        shared.shutdown(&format!("write failed: {error}"));
    }
}

fn run_reader(mut reader: Box<dyn Read + Send>, shared: &Shared, running: &AtomicBool, poll: Duration) {
    let mut parser = MessageParser::new();
    let mut decoder = Utf8Decoder::new();
    let mut buf = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        match reader.read(&mut buf) {
            Ok(0) => thread::sleep(poll),
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                let messages = parser.feed(&text, |line| shared.feed_line(line));
                for message in messages {
                    shared.dispatch(message);
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {},
            Err(e) => {
                if running.swap(false, Ordering::SeqCst) {
                    warn!("Read from {} failed: {e}", shared.port_name);
                    shared.shutdown(&format!("connection lost: {e}"));
                }
                break;
            },
        }
    }
    trace!("Reader for {} stopped", shared.port_name);
}
