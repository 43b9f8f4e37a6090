//! Scripted in-memory port for transport and device tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<String> + Send>;

#[derive(Default)]
struct MockState {
    written: Mutex<Vec<u8>>,
    writes: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    responder: Mutex<Option<Responder>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_writes_after: Mutex<Option<usize>>,
    stalled_writes: Mutex<Vec<usize>>,
    dtr: AtomicBool,
    rts: AtomicBool,
}

/// Test double standing in for both the opener and the device behind it.
#[derive(Clone, Default)]
pub(crate) struct MockDevice {
    state: Arc<MockState>,
}

impl MockDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reply to every write with the lines returned by `responder`.
    pub(crate) fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<String> + Send + 'static,
    {
        *self
            .state
            .responder
            .lock()
            .unwrap() = Some(Box::new(responder));
        self
    }

    /// Make the next `open` calls fail.
    pub(crate) fn fail_open(&self, fail: bool) {
        self.state
            .fail_open
            .store(fail, Ordering::SeqCst);
    }

    /// Fail every write once `count` writes have succeeded.
    pub(crate) fn fail_writes_after(&self, count: usize) {
        *self
            .state
            .fail_writes_after
            .lock()
            .unwrap() = Some(count);
    }

    /// Time out the write calls with these indices (0-based, counting
    /// every call including timed-out ones).
    pub(crate) fn stall_writes(&self, calls: &[usize]) {
        *self
            .state
            .stalled_writes
            .lock()
            .unwrap() = calls.to_vec();
    }

    /// Push raw text into the inbound stream.
    pub(crate) fn inject(&self, text: &str) {
        if let Some(tx) = self
            .state
            .inbound
            .lock()
            .unwrap()
            .as_ref()
        {
            let _ = tx.send(text.as_bytes().to_vec());
        }
    }

    /// Drop the inbound stream as if the cable was pulled.
    pub(crate) fn unplug(&self) {
        self.state
            .inbound
            .lock()
            .unwrap()
            .take();
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state
            .written
            .lock()
            .unwrap()
            .clone()
    }

    pub(crate) fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub(crate) fn write_sizes(&self) -> Vec<usize> {
        self.state
            .writes
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect()
    }

    pub(crate) fn opens(&self) -> usize {
        self.state
            .opens
            .load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.state
            .closes
            .load(Ordering::SeqCst)
    }

    pub(crate) fn lines_asserted(&self) -> bool {
        self.state
            .dtr
            .load(Ordering::SeqCst)
            && self
                .state
                .rts
                .load(Ordering::SeqCst)
    }

    pub(crate) fn opener(&self) -> Arc<dyn PortOpener> {
        Arc::new(self.clone())
    }
}

impl PortOpener for MockDevice {
    fn open(&self, _config: &SerialConfig) -> Result<Box<dyn Port>> {
        if self
            .state
            .fail_open
            .load(Ordering::SeqCst)
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no such port",
            )));
        }

        let (tx, rx) = mpsc::channel();
        *self
            .state
            .inbound
            .lock()
            .unwrap() = Some(tx);
        self.state
            .opens
            .fetch_add(1, Ordering::SeqCst);

        let mut port = MockPort {
            calls: 0,
            state: Arc::clone(&self.state),
            reader: Mutex::new(Some(MockReader {
                rx,
                pending: VecDeque::new(),
            })),
        };
        port.set_rts(true)?;
        port.set_dtr(true)?;
        Ok(Box::new(port))
    }
}

struct MockPort {
    calls: usize,
    state: Arc<MockState>,
    reader: Mutex<Option<MockReader>>,
}

impl Port for MockPort {
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        let reader = self
            .reader
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::Io(io::Error::other("reader already taken")))?;
        Ok(Box::new(reader))
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.state
            .dtr
            .store(level, Ordering::SeqCst);
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        self.state
            .rts
            .store(level, Ordering::SeqCst);
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.state
            .closes
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let call = self.calls;
        self.calls += 1;
        if self
            .state
            .stalled_writes
            .lock()
            .unwrap()
            .contains(&call)
        {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"));
        }
        {
            let mut writes = self
                .state
                .writes
                .lock()
                .unwrap();
            let limit = *self
                .state
                .fail_writes_after
                .lock()
                .unwrap();
            if limit.is_some_and(|limit| writes.len() >= limit) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
            }
            writes.push(buf.to_vec());
        }
        self.state
            .written
            .lock()
            .unwrap()
            .extend_from_slice(buf);

        let replies = match self
            .state
            .responder
            .lock()
            .unwrap()
            .as_mut()
        {
            Some(responder) => responder(buf),
            None => Vec::new(),
        };
        if let Some(tx) = self
            .state
            .inbound
            .lock()
            .unwrap()
            .as_ref()
        {
            for reply in replies {
                let _ = tx.send(format!("{reply}\n").into_bytes());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct MockReader {
    rx: mpsc::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

impl Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .pending
            .is_empty()
        {
            match self
                .rx
                .recv_timeout(Duration::from_millis(5))
            {
                Ok(data) => self
                    .pending
                    .extend(data),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
                },
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
                },
            }
        }

        let n = buf
            .len()
            .min(self.pending.len());
        for (slot, byte) in buf
            .iter_mut()
            .zip(self.pending.drain(..n))
        {
            *slot = byte;
        }
        Ok(n)
    }
}
