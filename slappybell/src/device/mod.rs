//! Device Session: a SlappyBell behind one [`Transport`].
//!
//! Discovery opens a port, sends a bare newline and waits for the firmware
//! banner:
//!
//! ```text
//! Yonabe Factory / SlappyBell / 1.4.2
//! ```
//!
//! Every command is one request/response exchange. Commands never fail with
//! an `Err`: a device rejection arrives as a non-success [`ResultCode`], and a
//! host-side failure (timeout, I/O error, closed port) is folded into a
//! [`Message`] with [`ResultCode::Error`].

pub mod command;

pub use command::Command;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::port::{NEWLINE, PortOpener, SerialConfig};
use crate::protocol::{FileListing, Message, ResultCode};
use crate::transport::{
    PortEvent, PortState, ProgressFn, TransferProgress, Transport, TransportConfig, UploadOptions,
};

/// Manufacturer name in the banner.
pub const MAKER: &str = "Yonabe Factory";

/// Model name in the banner.
pub const MODEL: &str = "SlappyBell";

static BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Yonabe Factory */ *SlappyBell").expect("banner pattern is valid")
});

/// Identity of a detected device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    /// Serial port the device answered on.
    pub port: String,
    /// Model name from the banner.
    pub model: String,
    /// Firmware version from the banner.
    pub version: String,
}

impl DeviceInfo {
    /// One-line description, `"<port>: <model>/<version>"`.
    pub fn description(&self) -> String {
        format!("{}: {}/{}", self.port, self.model, self.version)
    }
}

/// Parse a banner line received on `port`.
pub fn parse_banner(port: &str, line: &str) -> Option<DeviceInfo> {
    let segments: Vec<&str> = line
        .split('/')
        .map(str::trim)
        .collect();
    let [maker, model, version] = segments.as_slice() else {
        return None;
    };
    if *maker != MAKER || *model != MODEL || version.is_empty() {
        return None;
    }
    Some(DeviceInfo {
        port: port.to_string(),
        model: (*model).to_string(),
        version: (*version).to_string(),
    })
}

/// Events republished by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device reported a Wi-Fi status change.
    WifiStatusChanged(ResultCode),
    /// The connection closed.
    Disconnected,
}

/// Device session timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// How long discovery waits for the banner.
    pub detect_timeout: Duration,
    /// Pause after connecting before the first command.
    pub settle_delay: Duration,
    /// Reply timeout for ordinary commands.
    pub command_timeout: Duration,
    /// Reply timeout for `list`.
    pub list_timeout: Duration,
    /// Reply timeout once an upload payload is written.
    pub upload_timeout: Duration,
    /// Pause between upload payload chunks.
    pub upload_chunk_delay: Duration,
    /// Transport parameters.
    pub transport: TransportConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            detect_timeout: Duration::from_secs(3),
            settle_delay: Duration::from_millis(500),
            command_timeout: Duration::from_secs(3),
            list_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(10),
            upload_chunk_delay: Duration::from_millis(100),
            transport: TransportConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Set the banner wait.
    #[must_use]
    pub fn with_detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = timeout;
        self
    }

    /// Set the post-connect pause.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the command reply timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the `list` reply timeout.
    #[must_use]
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Set the upload reply timeout.
    #[must_use]
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    /// Set the pause between upload chunks.
    #[must_use]
    pub fn with_upload_chunk_delay(mut self, delay: Duration) -> Self {
        self.upload_chunk_delay = delay;
        self
    }

    /// Set the transport parameters.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}

fn identify(transport: &Transport, config: &DeviceConfig) -> Result<DeviceInfo> {
    transport.connect()?;
    let banner = transport.expect_line(|line| BANNER.is_match(line));
    transport.send_raw(NEWLINE)?;
    let line = banner.wait(config.detect_timeout)?;
    parse_banner(transport.port_name(), &line)
        .ok_or_else(|| Error::Protocol(format!("unexpected banner: {line}")))
}

fn transport_for(opener: Arc<dyn PortOpener>, port: &str, config: &DeviceConfig) -> Transport {
    Transport::new(
        opener,
        SerialConfig::new(port),
        config
            .transport
            .clone(),
    )
}

/// Check whether a SlappyBell answers on `port`.
///
/// The port is closed again in every case. Any failure means "not here".
pub fn detect(opener: Arc<dyn PortOpener>, port: &str, config: &DeviceConfig) -> Option<DeviceInfo> {
    let transport = transport_for(opener, port, config);
    let result = identify(&transport, config);
    transport.close();

    match result {
        Ok(info) => {
            info!("Detected {}", info.description());
            Some(info)
        },
        Err(e) => {
            debug!("No SlappyBell on {port}: {e}");
            None
        },
    }
}

/// Detect a SlappyBell on `port` and keep the connection for use.
pub fn discover(opener: Arc<dyn PortOpener>, port: &str, config: DeviceConfig) -> Option<Device> {
    let transport = transport_for(opener, port, &config);
    let info = match identify(&transport, &config) {
        Ok(info) => info,
        Err(e) => {
            transport.close();
            debug!("No SlappyBell on {port}: {e}");
            return None;
        },
    };

    info!("Discovered {}", info.description());
    thread::sleep(config.settle_delay);
    match Device::attach(info, transport, config) {
        Ok(device) => Some(device),
        Err(e) => {
            warn!("Could not start session on {port}: {e}");
            None
        },
    }
}

type Subscribers = Arc<Mutex<Vec<Sender<DeviceEvent>>>>;

fn publish(subscribers: &Subscribers, event: DeviceEvent) {
    subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|tx| {
            tx.send(event)
                .is_ok()
        });
}

fn run_demux(events: &Receiver<PortEvent>, subscribers: &Subscribers) {
    for event in events {
        match event {
            PortEvent::Notify(message) => match message.code() {
                Some(code) if code.is_wifi_status() => {
                    info!("Wi-Fi status: {code}");
                    publish(subscribers, DeviceEvent::WifiStatusChanged(code));
                },
                _ => debug!("Ignoring notify {message}"),
            },
            PortEvent::StateChanged(PortState::Closed) => {
                publish(subscribers, DeviceEvent::Disconnected);
            },
            PortEvent::Other(_) | PortEvent::StateChanged(_) => {},
        }
    }
}

/// A connected SlappyBell.
pub struct Device {
    info: DeviceInfo,
    config: DeviceConfig,
    transport: Transport,
    subscribers: Subscribers,
}

impl Device {
    /// Open a session with a device found earlier by [`detect`].
    pub fn connect(opener: Arc<dyn PortOpener>, info: DeviceInfo, config: DeviceConfig) -> Result<Self> {
        let transport = transport_for(opener, &info.port, &config);
        let device = Self::attach(info, transport, config)?;
        device
            .transport
            .connect()?;
        info!("Connected to {}", device.info.description());
        thread::sleep(device.config.settle_delay);
        Ok(device)
    }

    fn attach(info: DeviceInfo, transport: Transport, config: DeviceConfig) -> Result<Self> {
        let subscribers = Subscribers::default();
        let events = transport.subscribe();
        let sink = Arc::clone(&subscribers);
        // Ends once the transport and its channels are gone.
        thread::Builder::new()
            .name(format!("events {}", info.port))
            .spawn(move || run_demux(&events, &sink))?;

        Ok(Self {
            info,
            config,
            transport,
            subscribers,
        })
    }

    /// Device identity.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Session timing.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Whether the underlying port is open.
    pub fn is_connected(&self) -> bool {
        self.transport
            .state()
            == PortState::Open
    }

    /// Receive Wi-Fi status changes and disconnects.
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Receive every raw port event: all notifications, unclassified lines
    /// and state changes.
    pub fn port_events(&self) -> Receiver<PortEvent> {
        self.transport
            .subscribe()
    }

    /// Close the port. Reconnecting requires a new discovery.
    pub fn disconnect(&self) {
        self.transport
            .close();
    }

    fn execute(&self, command: &Command, timeout: Duration) -> Message {
        match self
            .transport
            .send_and_receive(&command.to_line(), timeout)
        {
            Ok(reply) => {
                if !reply.is_success() {
                    debug!("{} rejected: {reply}", command.verb());
                }
                reply
            },
            Err(e) => {
                warn!("{} failed: {e}", command.verb());
                Message::local_error(e.to_string())
            },
        }
    }

    /// Query the Wi-Fi status.
    pub fn wifi_status(&self) -> Message {
        self.execute(&Command::WifiStatus, self.config.command_timeout)
    }

    /// Ask the device to join a Wi-Fi network.
    pub fn connect_wifi(&self, ssid: &str, password: &str) -> Message {
        let command = Command::ConnectWifi {
            ssid: ssid.to_string(),
            password: password.to_string(),
        };
        self.execute(&command, self.config.command_timeout)
    }

    /// Light LED `slot` with `pattern`.
    pub fn led_on(&self, slot: u8, pattern: &str) -> Message {
        let command = Command::LedOn {
            slot,
            pattern: pattern.to_string(),
        };
        self.execute(&command, self.config.command_timeout)
    }

    /// Turn LED `slot` off.
    pub fn led_off(&self, slot: u8) -> Message {
        self.execute(&Command::LedOff { slot }, self.config.command_timeout)
    }

    /// Play a stored sound or a URL.
    pub fn play(&self, sound: &str) -> Message {
        self.execute(&Command::Play(sound.to_string()), self.config.command_timeout)
    }

    /// Stop playback.
    pub fn stop(&self) -> Message {
        self.execute(&Command::Stop, self.config.command_timeout)
    }

    /// Set the volume (0-100). Out-of-range values are left for the device
    /// to reject.
    pub fn set_volume(&self, volume: u8) -> Message {
        self.execute(&Command::Volume(volume), self.config.command_timeout)
    }

    /// Store `data` on the device as `name`.
    pub fn upload(&self, name: &str, data: Vec<u8>) -> Message {
        self.upload_inner(name, data, None)
    }

    /// Store `data` on the device as `name`, reporting progress.
    pub fn upload_with_progress<F>(&self, name: &str, data: Vec<u8>, progress: F) -> Message
    where
        F: FnMut(TransferProgress) + Send + 'static,
    {
        self.upload_inner(name, data, Some(Box::new(progress)))
    }

    fn upload_inner(&self, name: &str, data: Vec<u8>, progress: Option<ProgressFn>) -> Message {
        let command = Command::Upload {
            name: name.to_string(),
            len: data.len(),
        };
        debug!("Uploading {name} ({} bytes)", data.len());

        let mut options = UploadOptions::default()
            .with_delay(self.config.upload_chunk_delay)
            .with_timeout(self.config.upload_timeout);
        options.progress = progress;

        match self
            .transport
            .send_and_receive_upload(&command.to_line(), data, options)
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("upload failed: {e}");
                Message::local_error(e.to_string())
            },
        }
    }

    /// Delete a stored file.
    pub fn remove(&self, name: &str) -> Message {
        self.execute(&Command::Remove(name.to_string()), self.config.command_timeout)
    }

    /// List stored files. The listing is in the reply body.
    pub fn list(&self) -> Message {
        self.execute(&Command::List, self.config.list_timeout)
    }

    /// List stored files and parse the reply.
    ///
    /// Returns the reply itself when it is not a success.
    pub fn list_files(&self) -> std::result::Result<FileListing, Message> {
        let reply = self.list();
        if !reply.is_success() {
            return Err(reply);
        }
        Ok(FileListing::parse(reply.body().unwrap_or_default()))
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
