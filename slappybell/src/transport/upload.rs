//! Chunked binary upload with paced writes and progress reporting.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};
use crate::port::{flush_patiently, write_all_patiently};

/// Bytes per payload write.
pub const CHUNK_SIZE: usize = 256;

/// Smallest progress step in bytes.
pub const MIN_REPORT_STEP: u64 = 1024;

/// Upload progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Payload bytes written so far.
    pub sent_bytes: u64,
    /// Total payload size.
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Fraction sent in `0.0..=1.0`; zero for an empty payload.
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.sent_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Progress callback, invoked on the pump thread.
pub type ProgressFn = Box<dyn FnMut(TransferProgress) + Send>;

/// Options for [`Transport::send_and_receive_upload`](crate::transport::Transport::send_and_receive_upload).
pub struct UploadOptions {
    /// Pause after the command line and after every payload chunk.
    pub inter_chunk_delay: Duration,
    /// How long to wait for the device's reply once the payload is sent.
    /// `None` uses [`TransportConfig::upload_timeout`](crate::transport::TransportConfig::upload_timeout).
    pub timeout: Option<Duration>,
    /// Progress observer.
    pub progress: Option<ProgressFn>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            inter_chunk_delay: Duration::ZERO,
            timeout: None,
            progress: None,
        }
    }
}

impl UploadOptions {
    /// Set the pause after the command line and after every chunk.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Observe progress on the pump thread.
    #[must_use]
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: FnMut(TransferProgress) + Send + 'static,
    {
        self.progress = Some(Box::new(progress));
        self
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("inter_chunk_delay", &self.inter_chunk_delay)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Write `payload` in `chunk_size` slices.
///
/// Reports 0 before the first write and the full size after the last one,
/// with intermediate reports at most every `max(1024, total / 100)` bytes.
/// Stops with [`Error::Disconnected`] when `running` is cleared between
/// chunks. A chunk the port is slow to take is retried for up to
/// `stall_limit`.
pub(crate) fn write_chunked<W: Write + ?Sized>(
    writer: &mut W,
    payload: &[u8],
    chunk_size: usize,
    delay: Duration,
    stall_limit: Duration,
    running: &AtomicBool,
    progress: &mut Option<ProgressFn>,
) -> Result<()> {
    let total = payload.len() as u64;
    let step = MIN_REPORT_STEP.max(total / 100);
    let mut report = |sent: u64| {
        if let Some(progress) = progress.as_mut() {
            progress(TransferProgress {
                sent_bytes: sent,
                total_bytes: total,
            });
        }
    };

    report(0);
    let mut sent = 0u64;
    let mut next_report = step;

    for chunk in payload.chunks(chunk_size.max(1)) {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Disconnected("upload cancelled".to_string()));
        }

        write_all_patiently(writer, chunk, stall_limit, running)?;
        sent += chunk.len() as u64;
        trace!("Upload {sent}/{total}");

        if sent >= next_report && sent < total {
            report(sent);
            next_report = sent + step;
        }

        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    flush_patiently(writer, stall_limit, running)?;
    report(total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collect(
        payload: &[u8],
        chunk_size: usize,
    ) -> (Vec<u8>, Vec<TransferProgress>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let mut progress: Option<ProgressFn> = Some(Box::new(move |p| {
            sink.lock()
                .unwrap()
                .push(p);
        }));
        let running = AtomicBool::new(true);
        let mut out = Vec::new();

        write_chunked(
            &mut out,
            payload,
            chunk_size,
            Duration::ZERO,
            Duration::from_secs(1),
            &running,
            &mut progress,
        )
        .unwrap();

        let reports = reports
            .lock()
            .unwrap()
            .clone();
        (out, reports)
    }

    #[test]
    fn test_writes_every_byte_with_final_report() {
        let payload: Vec<u8> = (0..10_000u32)
            .map(|i| (i % 251) as u8)
            .collect();
        let (out, reports) = collect(&payload, CHUNK_SIZE);

        assert_eq!(out, payload);
        assert_eq!(reports.first().unwrap().sent_bytes, 0);
        let last = reports.last().unwrap();
        assert_eq!(last.sent_bytes, 10_000);
        assert_eq!(last.total_bytes, 10_000);
        assert!(
            reports
                .windows(2)
                .all(|w| w[0].sent_bytes < w[1].sent_bytes)
        );
    }

    #[test]
    fn test_report_count_is_bounded() {
        let payload = vec![0u8; 1_000_000];
        let (out, reports) = collect(&payload, CHUNK_SIZE);
        assert_eq!(out.len(), 1_000_000);
        assert!(reports.len() <= 102, "{} reports", reports.len());
    }

    #[test]
    fn test_small_payload_reports_start_and_end() {
        let (out, reports) = collect(b"abc", CHUNK_SIZE);
        assert_eq!(out, b"abc");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].ratio(), 1.0);
    }

    #[test]
    fn test_empty_payload() {
        let (out, reports) = collect(b"", CHUNK_SIZE);
        assert!(out.is_empty());
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1].ratio(), 0.0);
    }

    #[test]
    fn test_stops_when_not_running() {
        let running = AtomicBool::new(false);
        let mut out = Vec::new();
        let result = write_chunked(
            &mut out,
            &[1, 2, 3],
            1,
            Duration::ZERO,
            Duration::from_secs(1),
            &running,
            &mut None,
        );
        assert!(matches!(result, Err(Error::Disconnected(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn test_paces_every_chunk() {
        let running = AtomicBool::new(true);
        let mut out = Vec::new();
        let started = std::time::Instant::now();
        write_chunked(
            &mut out,
            &[7u8; 600],
            CHUNK_SIZE,
            Duration::from_millis(30),
            Duration::from_secs(1),
            &running,
            &mut None,
        )
        .unwrap();
        assert_eq!(out.len(), 600);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
