//! Host-side serial port enumeration and device scanning.

use std::sync::Arc;

#[cfg(feature = "native")]
use log::{debug, trace};

use crate::device::{self, DeviceConfig, DeviceInfo};
use crate::port::PortOpener;

/// A serial port present on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidatePort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

impl CandidatePort {
    /// A port known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Whether the port sits on USB. The bell enumerates as a USB virtual COM port.
    pub fn is_usb(&self) -> bool {
        self.vid
            .is_some()
    }
}

/// Enumerate serial ports, USB ports first.
#[cfg(feature = "native")]
pub fn discover_ports() -> Vec<CandidatePort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut candidate = CandidatePort::named(port_info.port_name);
                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X})",
                        candidate.name, usb_info.vid, usb_info.pid
                    );
                    candidate.vid = Some(usb_info.vid);
                    candidate.pid = Some(usb_info.pid);
                    candidate.manufacturer = usb_info.manufacturer;
                    candidate.product = usb_info.product;
                    candidate.serial_number = usb_info.serial_number;
                }
                result.push(candidate);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    // Stable, so the platform order is kept within each group.
    result.sort_by_key(|p| !p.is_usb());
    result
}

/// Format ports for display, one line each.
pub fn format_port_list(ports: &[CandidatePort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let ids = match (port.vid, port.pid) {
                (Some(vid), Some(pid)) => format!(" [VID:{vid:04X} PID:{pid:04X}]"),
                _ => String::new(),
            };
            let product = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!("{}{ids}{product}", port.name)
        })
        .collect()
}

/// Run discovery on each named port and collect every bell that answers.
///
/// Ports that fail to open or stay silent are skipped.
pub fn scan<I, S>(opener: &Arc<dyn PortOpener>, names: I, config: &DeviceConfig) -> Vec<DeviceInfo>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .filter_map(|name| device::detect(Arc::clone(opener), name.as_ref(), config))
        .collect()
}

/// Scan every serial port on the host.
#[cfg(feature = "native")]
pub fn scan_native(config: &DeviceConfig) -> Vec<DeviceInfo> {
    let opener: Arc<dyn PortOpener> = Arc::new(crate::port::NativeOpener);
    let names: Vec<String> = discover_ports()
        .into_iter()
        .map(|p| p.name)
        .collect();
    scan(&opener, names, config)
}
