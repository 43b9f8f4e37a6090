//! Typed messages of the SlappyBell line protocol.
//!
//! Every line the device prints is one of:
//!
//! ```text
//! [R@APM] <code> <message>     response to the last command
//! [N@APM] <code> <message>     unsolicited notification
//! anything else                 unknown (boot banner, debug output, ...)
//! ```
//!
//! A response or notification whose message ends with `+` opens a chunked
//! body; see [`MessageParser`](crate::protocol::parser::MessageParser).

use std::fmt;

use crate::error::{Error, Result};

/// Prefix of a response line.
pub const RESPONSE_PREFIX: &str = "[R@APM]";

/// Prefix of a notification line.
pub const NOTIFY_PREFIX: &str = "[N@APM]";

/// Suffix marking the start of a chunked body.
pub const CHUNK_MARKER: char = '+';

/// Message category, decided by the line prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MessageKind {
    /// Reply correlated to a command.
    Response,
    /// Unsolicited device event.
    Notify,
    /// Line without a recognized prefix.
    Unknown,
}

/// Result codes reported by the device.
///
/// The numeric values are the ones printed on the wire. [`ResultCode::Error`]
/// is never sent by the device; it marks failures raised on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum ResultCode {
    /// Command succeeded.
    Success = 0,
    /// Generic command failure.
    CommandError = 10,
    /// Command verb not recognized.
    UnknownCommand = 11,
    /// Command arguments malformed.
    BadCommandFormat = 12,
    /// Integer argument could not be parsed.
    IntegerParseError = 13,
    /// String argument could not be parsed.
    StringParseError = 14,
    /// LED slot out of range.
    SlotError = 20,
    /// LED color pattern invalid.
    BadLedPattern = 21,
    /// Named file does not exist.
    FileNotFound = 22,
    /// Command line too long.
    TooLongCommand = 23,
    /// No space left on device storage.
    StorageFull = 30,
    /// Storage read/write failure.
    FileIoError = 31,
    /// Operation needs Wi-Fi but none is connected.
    NoWifiConnection = 32,
    /// Wi-Fi connection attempt failed.
    WifiConnectFailed = 33,
    /// Wi-Fi connected.
    WifiConnected = 50,
    /// Wi-Fi network not found.
    WifiSsidNotFound = 51,
    /// Wi-Fi authentication failed.
    WifiAuthFail = 52,
    /// Wi-Fi disconnected.
    WifiDisconnected = 53,
    /// Host-side failure (timeout, I/O error, closed port).
    Error = 90,
}

impl ResultCode {
    /// Numeric wire value.
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a code by its wire value.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        let code = match code {
            0 => Self::Success,
            10 => Self::CommandError,
            11 => Self::UnknownCommand,
            12 => Self::BadCommandFormat,
            13 => Self::IntegerParseError,
            14 => Self::StringParseError,
            20 => Self::SlotError,
            21 => Self::BadLedPattern,
            22 => Self::FileNotFound,
            23 => Self::TooLongCommand,
            30 => Self::StorageFull,
            31 => Self::FileIoError,
            32 => Self::NoWifiConnection,
            33 => Self::WifiConnectFailed,
            50 => Self::WifiConnected,
            51 => Self::WifiSsidNotFound,
            52 => Self::WifiAuthFail,
            53 => Self::WifiDisconnected,
            90 => Self::Error,
            _ => return None,
        };
        Some(code)
    }

    /// Whether this code reports a change of the Wi-Fi connection.
    #[must_use]
    pub fn is_wifi_status(self) -> bool {
        matches!(
            self,
            Self::WifiConnected | Self::WifiSsidNotFound | Self::WifiAuthFail | Self::WifiDisconnected
        )
    }

    /// Get a human-readable name for the code.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::CommandError => "CommandError",
            Self::UnknownCommand => "UnknownCommand",
            Self::BadCommandFormat => "BadCommandFormat",
            Self::IntegerParseError => "IntegerParseError",
            Self::StringParseError => "StringParseError",
            Self::SlotError => "SlotError",
            Self::BadLedPattern => "BadLedPattern",
            Self::FileNotFound => "FileNotFound",
            Self::TooLongCommand => "TooLongCommand",
            Self::StorageFull => "StorageFull",
            Self::FileIoError => "FileIoError",
            Self::NoWifiConnection => "NoWifiConnection",
            Self::WifiConnectFailed => "WifiConnectFailed",
            Self::WifiConnected => "WifiConnected",
            Self::WifiSsidNotFound => "WifiSsidNotFound",
            Self::WifiAuthFail => "WifiAuthFail",
            Self::WifiDisconnected => "WifiDisconnected",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// One parsed unit of device communication.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    kind: MessageKind,
    code: Option<ResultCode>,
    message: String,
    body: Option<String>,
}

impl Message {
    /// Classify and parse a single protocol line.
    ///
    /// Lines without a prefix become [`MessageKind::Unknown`] carrying the
    /// trimmed text. A prefixed line must continue with whitespace, a numeric
    /// code, whitespace and a non-empty message; anything else is an
    /// [`Error::Protocol`].
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();

        let Some((kind, rest)) = split_prefix(line) else {
            return Ok(Self {
                kind: MessageKind::Unknown,
                code: None,
                message: line.to_string(),
                body: None,
            });
        };

        let (code, text) = split_code(rest)?;
        Ok(Self {
            kind,
            code: Some(code),
            message: text.to_string(),
            body: None,
        })
    }

    /// Build a response-shaped message for a failure raised on the host.
    #[must_use]
    pub fn local_error(message: impl Into<String>) -> Self {
        Self::response(ResultCode::Error, message)
    }

    /// Build a response message directly, bypassing the wire format.
    #[must_use]
    pub fn response(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Response,
            code: Some(code),
            message: message.into(),
            body: None,
        }
    }

    /// Message category.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Result code; `None` for unknown lines.
    #[must_use]
    pub fn code(&self) -> Option<ResultCode> {
        self.code
    }

    /// Short message text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Chunked body, newline-joined.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Whether the device reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == Some(ResultCode::Success)
    }

    /// Whether this message opens a chunked body.
    pub(crate) fn opens_chunk(&self) -> bool {
        self.kind != MessageKind::Unknown && self.message.ends_with(CHUNK_MARKER)
    }

    pub(crate) fn append_body_line(&mut self, line: &str) {
        match self.body {
            Some(ref mut body) => {
                body.push('\n');
                body.push_str(line);
            },
            None => self.body = Some(line.to_string()),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{:?} {} {}", self.kind, code, self.message),
            None => write!(f, "{:?} {}", self.kind, self.message),
        }
    }
}

/// Locate a known prefix, at the start or after leading garbage.
fn split_prefix(line: &str) -> Option<(MessageKind, &str)> {
    if let Some(rest) = line.strip_prefix(RESPONSE_PREFIX) {
        return Some((MessageKind::Response, rest));
    }
    if let Some(rest) = line.strip_prefix(NOTIFY_PREFIX) {
        return Some((MessageKind::Notify, rest));
    }

    // Recover from noise in front of the prefix (e.g. a half-printed banner).
    if let Some(pos) = line.find(RESPONSE_PREFIX) {
        return Some((MessageKind::Response, &line[pos + RESPONSE_PREFIX.len()..]));
    }
    line.find(NOTIFY_PREFIX)
        .map(|pos| (MessageKind::Notify, &line[pos + NOTIFY_PREFIX.len()..]))
}

/// Split `<ws><code><ws><message>` into the code and the trimmed message.
fn split_code(rest: &str) -> Result<(ResultCode, &str)> {
    if !rest.starts_with(char::is_whitespace) {
        return Err(Error::Protocol(format!("invalid result code in {rest:?}")));
    }

    let rest = rest.trim_start();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, tail) = rest.split_at(digits_end);

    if digits.is_empty() || !tail.starts_with(char::is_whitespace) {
        return Err(Error::Protocol(format!("invalid result code in {rest:?}")));
    }

    let value: u16 = digits
        .parse()
        .map_err(|e| Error::Protocol(format!("invalid result code {digits:?}: {e}")))?;
    let code = ResultCode::from_code(value)
        .ok_or_else(|| Error::Protocol(format!("unknown result code {value}")))?;

    let text = tail.trim();
    if text.is_empty() {
        return Err(Error::Protocol("invalid message".into()));
    }

    Ok((code, text))
}
