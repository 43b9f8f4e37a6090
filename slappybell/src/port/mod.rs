//! Hardware-facing serial link abstraction.
//!
//! The transport layer never talks to a serial driver directly. It asks a
//! [`PortOpener`] for a [`Port`], writes through it from a single pump thread
//! and reads from a cloned reader handle on a separate thread:
//!
//! ```text
//! +------------------+
//! |    Transport     |  pump thread ──write──┐
//! |                  |  reader thread <─read─┤
//! +--------+---------+                       |
//!          |                                 v
//! +--------+---------+              +------------------+
//! |   PortOpener     |──open──────> |   Port (trait)   |
//! +------------------+              +--------+---------+
//!                                            |
//!                                   +--------+---------+
//!                                   | NativePort       |
//!                                   |  (serialport)    |
//!                                   +------------------+
//! ```
//!
//! Line parameters are fixed by the device firmware: 115200 baud, 8 data
//! bits, no parity, one stop bit, no flow control. Only the port name and
//! the timeouts vary.
//!
//! Serial drivers apply their timeout to writes as well as reads, so a
//! device that is slow to drain its receive buffer shows up as a timed-out
//! write. The pump retries those through [`write_all_patiently`] and only
//! gives up once nothing has gone out for [`SerialConfig::write_stall_timeout`].

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::Result;

/// Baud rate of the device's virtual COM port.
pub const BAUD_RATE: u32 = 115_200;

/// Line terminator used by the device.
pub const NEWLINE: &str = "\n";

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// How long a single read blocks before reporting no data.
    pub read_timeout: Duration,
    /// How long a write may make no progress before the link is given up.
    pub write_stall_timeout: Duration,
}

impl SerialConfig {
    /// Default read poll timeout.
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

    /// Default write stall limit.
    pub const DEFAULT_WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create the configuration for a port name.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: BAUD_RATE,
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            write_stall_timeout: Self::DEFAULT_WRITE_STALL_TIMEOUT,
        }
    }

    /// Set the read poll timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write stall limit.
    #[must_use]
    pub fn with_write_stall_timeout(mut self, timeout: Duration) -> Self {
        self.write_stall_timeout = timeout;
        self
    }
}

/// An open serial connection.
///
/// Writes go through [`Write`]; reads happen on a separate handle obtained
/// from [`Port::try_clone_reader`]. A reader reports "no data yet" with an
/// [`std::io::ErrorKind::TimedOut`] error.
pub trait Port: Write + Send {
    /// Create an independent reader handle for the inbound thread.
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Close the port and release resources.
    fn close(&mut self) -> Result<()>;
}

fn is_stall(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

fn abandoned() -> io::Error {
    io::Error::new(ErrorKind::Interrupted, "write abandoned")
}

/// Write all of `buf`, riding out receiver backpressure.
///
/// Timed-out writes are retried until no byte has gone out for
/// `stall_limit`. Clearing `running` abandons the write.
pub fn write_all_patiently<W: Write + ?Sized>(
    writer: &mut W,
    mut buf: &[u8],
    stall_limit: Duration,
    running: &AtomicBool,
) -> io::Result<()> {
    let mut last_progress = Instant::now();
    while !buf.is_empty() {
        if !running.load(Ordering::SeqCst) {
            return Err(abandoned());
        }
        match writer.write(buf) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "port accepted no bytes")),
            Ok(n) => {
                buf = &buf[n..];
                last_progress = Instant::now();
            },
            Err(e) if is_stall(&e) => {
                if last_progress.elapsed() >= stall_limit {
                    return Err(e);
                }
                trace!("Write stalled, retrying");
                thread::sleep(Duration::from_millis(1));
            },
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Flush `writer`, retrying timed-out flushes like [`write_all_patiently`].
pub fn flush_patiently<W: Write + ?Sized>(
    writer: &mut W,
    stall_limit: Duration,
    running: &AtomicBool,
) -> io::Result<()> {
    let started = Instant::now();
    loop {
        if !running.load(Ordering::SeqCst) {
            return Err(abandoned());
        }
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(e) if is_stall(&e) && started.elapsed() < stall_limit => {
                thread::sleep(Duration::from_millis(1));
            },
            Err(e) => return Err(e),
        }
    }
}

/// Opens ports by name.
///
/// Implementations configure the line, assert RTS/DTR and discard stale
/// buffered data before handing the port out.
pub trait PortOpener: Send + Sync {
    /// Open and configure a port.
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>>;
}

#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePort};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyACM0");
        assert_eq!(config.port_name, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout, SerialConfig::DEFAULT_READ_TIMEOUT);
        assert_eq!(config.write_stall_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("COM3").with_read_timeout(Duration::from_millis(5));
        assert_eq!(config.read_timeout, Duration::from_millis(5));
    }

    /// Accepts at most `per_write` bytes and times out on scripted calls.
    struct Sluggish {
        out: Vec<u8>,
        per_write: usize,
        stalls: Vec<bool>,
        calls: usize,
    }

    impl Sluggish {
        fn new(per_write: usize, stalls: &[bool]) -> Self {
            Self {
                out: Vec::new(),
                per_write,
                stalls: stalls.to_vec(),
                calls: 0,
            }
        }
    }

    impl Write for Sluggish {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let call = self.calls;
            self.calls += 1;
            if self
                .stalls
                .get(call)
                .copied()
                .unwrap_or(false)
            {
                return Err(io::Error::new(ErrorKind::TimedOut, "Operation timed out"));
            }
            let n = buf.len().min(self.per_write);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_rides_out_timeouts() {
        let mut port = Sluggish::new(3, &[true, false, true, true, false]);
        let running = AtomicBool::new(true);
        write_all_patiently(&mut port, b"abcdefgh", Duration::from_secs(1), &running).unwrap();
        assert_eq!(port.out, b"abcdefgh");
        assert!(port.calls >= 6);
    }

    #[test]
    fn test_write_gives_up_after_stall_limit() {
        let mut port = Sluggish::new(3, &[true; 10_000]);
        let running = AtomicBool::new(true);
        let err = write_all_patiently(&mut port, b"abc", Duration::from_millis(20), &running).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
        assert!(port.out.is_empty());
    }

    #[test]
    fn test_write_abandoned_when_stopped() {
        let mut port = Sluggish::new(3, &[]);
        let running = AtomicBool::new(false);
        let err = write_all_patiently(&mut port, b"abc", Duration::from_secs(1), &running).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert!(flush_patiently(&mut port, Duration::from_secs(1), &running).is_err());
    }
}
