//! Live Wi-Fi status notifications.

use anyhow::{Context, Result};
use console::style;
use slappybell::{Device, DeviceEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(200);

/// Events command implementation.
pub(crate) fn cmd_events(device: &Device, seconds: Option<u64>, quiet: bool) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let events = device.subscribe();
    if !quiet {
        eprintln!(
            "{} Listening on {} (Ctrl-C to stop)",
            style("👂").cyan(),
            device.info().description()
        );
    }

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    watch(&events, &interrupted, deadline, |line| println!("{line}"))
}

/// Forward events until interrupted, the deadline passes or the bell goes away.
fn watch<F>(
    events: &Receiver<DeviceEvent>,
    interrupted: &AtomicBool,
    deadline: Option<Instant>,
    mut emit: F,
) -> Result<()>
where
    F: FnMut(String),
{
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }

        match events.recv_timeout(POLL) {
            Ok(DeviceEvent::WifiStatusChanged(code)) => emit(format!("wifi: {code}")),
            Ok(DeviceEvent::Disconnected) | Err(RecvTimeoutError::Disconnected) => {
                anyhow::bail!("SlappyBell disconnected")
            },
            Err(RecvTimeoutError::Timeout) => {},
        }
    }
}
