//! slappy - Command-line tool for SlappyBell devices.
//!
//! ## Features
//!
//! - Find bells on the host's serial ports
//! - Wi-Fi, LED, playback and volume control
//! - Sound file upload with progress, removal and listing
//! - Live Wi-Fi status notifications
//! - Shell completion generation

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod serial;

use config::Config;
use commands::control::{report, report_status};
use serial::SessionOptions;
use slappybell::{Device, DeviceConfig};

/// slappy - Talk to a SlappyBell over its USB serial port.
///
/// Environment variables:
///   SLAPPY_PORT              - Serial port of the bell
///   SLAPPY_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "slappy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the bell (scanned for if not specified).
    #[arg(short, long, global = true, env = "SLAPPY_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "SLAPPY_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List serial ports on this host.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Scan every serial port for a SlappyBell.
    Detect {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the Wi-Fi connection status.
    WifiStatus,

    /// Join a Wi-Fi network.
    WifiConnect {
        /// Network name.
        ssid: String,
        /// Network password.
        password: String,
    },

    /// Light an LED slot.
    LedOn {
        /// LED slot index.
        slot: u8,
        /// Colour pattern.
        pattern: String,
    },

    /// Turn an LED slot off.
    LedOff {
        /// LED slot index.
        slot: u8,
    },

    /// Play a stored sound or a URL.
    Play {
        /// Sound file name or URL.
        sound: String,
    },

    /// Stop playback.
    Stop,

    /// Set the playback volume.
    Volume {
        /// Volume level.
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        level: u8,
    },

    /// Upload a sound file to the bell.
    Upload {
        /// Local file to send.
        file: PathBuf,
        /// Name to store it under (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a stored file.
    Remove {
        /// Stored file name.
        name: String,
    },

    /// List stored files and storage usage.
    Files {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print Wi-Fi status notifications until Ctrl-C.
    Events {
        /// Stop after this many seconds.
        #[arg(long, value_name = "N")]
        seconds: Option<u64>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

/// Failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or setup, such as no bell to talk to.
    #[error("{0}")]
    Usage(String),
    /// The bell answered with a non-success code.
    #[error("{0}")]
    Rejected(String),
    /// The user backed out of a prompt or pressed Ctrl-C.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Rejected(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_logging(&cli);
    debug!(
        "slappy v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&e))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config_path.as_deref());
    let session = SessionOptions {
        port: cli
            .port
            .clone()
            .or_else(|| {
                config
                    .connection
                    .port
                    .clone()
            }),
        non_interactive: cli.non_interactive,
    };
    let device_config = config.device_config();

    match &cli.command {
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Detect { json } => commands::ports::cmd_detect(&device_config, *json, cli.quiet),
        Commands::WifiStatus => on_device(&session, device_config, |d| report_status(&d.wifi_status())),
        Commands::WifiConnect { ssid, password } => on_device(&session, device_config, |d| {
            report(&d.connect_wifi(ssid, password))
        }),
        Commands::LedOn { slot, pattern } => {
            on_device(&session, device_config, |d| report(&d.led_on(*slot, pattern)))
        },
        Commands::LedOff { slot } => on_device(&session, device_config, |d| report(&d.led_off(*slot))),
        Commands::Play { sound } => on_device(&session, device_config, |d| report(&d.play(sound))),
        Commands::Stop => on_device(&session, device_config, |d| report(&d.stop())),
        Commands::Volume { level } => {
            on_device(&session, device_config, |d| report(&d.set_volume(*level)))
        },
        Commands::Upload { file, name } => on_device(&session, device_config, |d| {
            commands::upload::cmd_upload(d, file, name.as_deref(), cli.quiet)
        }),
        Commands::Remove { name } => on_device(&session, device_config, |d| report(&d.remove(name))),
        Commands::Files { json } => {
            on_device(&session, device_config, |d| commands::control::cmd_files(d, *json))
        },
        Commands::Events { seconds } => on_device(&session, device_config, |d| {
            commands::events::cmd_events(d, *seconds, cli.quiet)
        }),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Open a session with the selected bell and run `action` on it.
fn on_device<F>(session: &SessionOptions, config: DeviceConfig, action: F) -> Result<()>
where
    F: FnOnce(&Device) -> Result<()>,
{
    let device = serial::open_device(session, config)?;
    let result = action(&device);
    device.disconnect();
    result
}
