//! Command lines understood by the device.

use std::fmt;

/// A device command. `Display` renders the wire form without the newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Query Wi-Fi status.
    WifiStatus,
    /// Join a Wi-Fi network.
    ConnectWifi {
        /// Network name.
        ssid: String,
        /// Network password, sent as plain text.
        password: String,
    },
    /// Light an LED slot with a colour pattern.
    LedOn {
        /// LED slot index.
        slot: u8,
        /// Colour pattern understood by the firmware.
        pattern: String,
    },
    /// Turn an LED slot off.
    LedOff {
        /// LED slot index.
        slot: u8,
    },
    /// Play a stored sound or a URL.
    Play(String),
    /// Stop playback.
    Stop,
    /// Set the volume, 0-100.
    Volume(u8),
    /// Announce a binary upload of `len` bytes.
    Upload {
        /// Target file name on the device.
        name: String,
        /// Payload length in bytes.
        len: usize,
    },
    /// Delete a stored file.
    Remove(String),
    /// List stored files.
    List,
}

impl Command {
    /// The wire line including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }

    /// The command word alone, safe to log.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::WifiStatus | Self::ConnectWifi { .. } => "wifi",
            Self::LedOn { .. } => "led-on",
            Self::LedOff { .. } => "led-off",
            Self::Play(_) => "play",
            Self::Stop => "stop",
            Self::Volume(_) => "volume",
            Self::Upload { .. } => "upload",
            Self::Remove(_) => "remove",
            Self::List => "list",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WifiStatus => write!(f, "wifi"),
            Self::ConnectWifi { ssid, password } => write!(f, "wifi \"{ssid}\" \"{password}\""),
            Self::LedOn { slot, pattern } => write!(f, "led-on {slot} {pattern}"),
            Self::LedOff { slot } => write!(f, "led-off {slot}"),
            Self::Play(sound) => write!(f, "play {sound}"),
            Self::Stop => write!(f, "stop"),
            Self::Volume(volume) => write!(f, "volume {volume}"),
            Self::Upload { name, len } => write!(f, "upload \"{name}\" {len}"),
            Self::Remove(name) => write!(f, "remove {name}"),
            Self::List => write!(f, "list"),
        }
    }
}
