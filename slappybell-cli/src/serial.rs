//! Bell selection.
//!
//! An explicit port (from `--port`, `SLAPPY_PORT` or the config file) is
//! tried directly. Otherwise every serial port is scanned:
//! - exactly one bell is used without asking
//! - several bells prompt a selection via dialoguer
//! - non-interactive mode fails instead of prompting

use {
    crate::CliError,
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    slappybell::{Device, DeviceConfig, DeviceInfo, NativeOpener, PortOpener},
    std::{cmp::Ordering, io::IsTerminal, sync::Arc},
};

/// How to find the bell for a device command.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Explicit port, skipping the scan.
    pub port: Option<String>,
    /// Non-interactive mode (fail if several bells answer).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Open a session with the selected bell.
pub fn open_device(options: &SessionOptions, config: DeviceConfig) -> Result<Device> {
    let opener: Arc<dyn PortOpener> = Arc::new(NativeOpener);

    if let Some(port_name) = &options.port {
        debug!("Trying {port_name}");
        let device = slappybell::discover(opener, port_name, config)
            .ok_or_else(|| anyhow::anyhow!("No SlappyBell answered on {port_name}"))?;
        info!("Connected to {}", device.info().description());
        return Ok(device);
    }

    let found = slappybell::scan_native(&config);
    let info = if options.non_interactive {
        select_non_interactive(found)?
    } else {
        select_bell(found)?
    };

    let device = Device::connect(opener, info, config)?;
    info!("Connected to {}", device.info().description());
    Ok(device)
}

fn select_non_interactive(found: Vec<DeviceInfo>) -> Result<DeviceInfo> {
    match found
        .len()
        .cmp(&1)
    {
        Ordering::Equal => found
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No SlappyBell found")),
        Ordering::Greater => Err(usage_err(
            "Several SlappyBells found; choose one with --port",
        )),
        Ordering::Less => Err(usage_err("No SlappyBell found")),
    }
}

fn select_bell(found: Vec<DeviceInfo>) -> Result<DeviceInfo> {
    if found.len() > 1 {
        ensure_interactive_terminal()?;
        return select_bell_interactive(found);
    }
    let info = select_non_interactive(found)?;
    info!("Auto-selected {}", info.description());
    Ok(info)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Several SlappyBells found and no terminal to ask on; choose one with --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Selection cancelled".to_string()).into()
            } else {
                usage_err("Could not show the selection prompt")
            }
        },
    }
}

fn bell_labels(found: &[DeviceInfo]) -> Vec<String> {
    found
        .iter()
        .map(|bell| {
            format!(
                "{} [{}]",
                style(&bell.port).bold(),
                style(format!("{}/{}", bell.model, bell.version)).yellow()
            )
        })
        .collect()
}

fn select_bell_interactive(found: Vec<DeviceInfo>) -> Result<DeviceInfo> {
    eprintln!(
        "{} Found {} SlappyBells",
        style("ℹ").blue(),
        found.len()
    );

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a bell")
        .items(&bell_labels(&found))
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => found
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid selection index: {index}")),
        None => Err(CliError::Cancelled("Selection cancelled".to_string()).into()),
    }
}
