//! # slappybell
//!
//! Host-side communication with the SlappyBell doorbell over its USB virtual
//! COM port.
//!
//! The crate is layered:
//!
//! - [`protocol`]: line classification and the stream parser for
//!   `[R@APM]` responses, `[N@APM]` notifications and chunked bodies
//! - [`port`]: the serial port abstraction and its `serialport` backend
//! - [`transport`]: one connection with an ordered write pump, FIFO reply
//!   correlation, line waiters and chunked uploads
//! - [`device`]: discovery by banner and the device command set
//! - [`host`]: port enumeration and scanning
//!
//! ## Features
//!
//! - `native` (default): native serial port support via `serialport`
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use slappybell::{DeviceConfig, NativeOpener, PortOpener, ResultCode};
//!
//! let opener: Arc<dyn PortOpener> = Arc::new(NativeOpener);
//! if let Some(bell) = slappybell::discover(opener, "/dev/ttyACM0", DeviceConfig::default()) {
//!     println!("Found {}", bell.info().description());
//!
//!     let reply = bell.play("chime.mp3");
//!     if reply.code() != Some(ResultCode::Success) {
//!         eprintln!("Device said: {reply}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod host;
pub mod port;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use host::{discover_ports, scan_native};
#[cfg(feature = "native")]
pub use port::{NativeOpener, NativePort};
pub use {
    device::{Command, Device, DeviceConfig, DeviceEvent, DeviceInfo, detect, discover, parse_banner},
    error::{Error, Result},
    host::{CandidatePort, format_port_list, scan},
    port::{Port, PortOpener, SerialConfig},
    protocol::{FileListing, Message, MessageKind, MessageParser, ResultCode, StoredFile},
    transport::{
        Correlator, FifoCorrelator, LineWait, PortEvent, PortState, TransferProgress, Transport,
        TransportConfig, UploadOptions,
    },
};
