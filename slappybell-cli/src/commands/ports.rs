//! Port listing and bell detection.

use anyhow::Result;
use console::style;
use slappybell::{CandidatePort, DeviceConfig, DeviceInfo, discover_ports, format_port_list};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = discover_ports();

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());
    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for (port, line) in ports
            .iter()
            .zip(format_port_list(&ports))
        {
            print_port(port, &line);
        }
    }
    Ok(())
}

fn print_port(port: &CandidatePort, line: &str) {
    let bullet = if port.is_usb() {
        style("•").green()
    } else {
        style("•").dim()
    };
    eprintln!("  {bullet} {line}");
}

/// Detect command implementation.
pub(crate) fn cmd_detect(config: &DeviceConfig, json: bool, quiet: bool) -> Result<()> {
    if !quiet && !json {
        eprintln!("{} Scanning serial ports...", style("🔍").cyan());
    }
    let found = slappybell::scan_native(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
        return Ok(());
    }

    if found.is_empty() {
        eprintln!("  {}", style("No SlappyBell found").dim());
    } else {
        for line in describe_bells(&found) {
            println!("{line}");
        }
    }
    Ok(())
}

fn describe_bells(found: &[DeviceInfo]) -> Vec<String> {
    found
        .iter()
        .map(DeviceInfo::description)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_bells() {
        let found = [DeviceInfo {
            port: "COM3".to_string(),
            model: "SlappyBell".to_string(),
            version: "1.4".to_string(),
        }];
        assert_eq!(describe_bells(&found), vec!["COM3: SlappyBell/1.4".to_string()]);
    }

    #[test]
    fn test_port_json_shape() {
        let mut port = CandidatePort::named("/dev/ttyACM0");
        port.vid = Some(0x303A);
        let value = serde_json::to_value([port]).unwrap();
        assert_eq!(value[0]["name"], "/dev/ttyACM0");
        assert_eq!(value[0]["vid"], 0x303A);
        assert!(value[0]["product"].is_null());
    }
}
