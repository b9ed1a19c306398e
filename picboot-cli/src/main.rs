//! picboot CLI - Command-line tool for flashing PICDuino boards.
//!
//! ## Features
//!
//! - Upload Intel HEX firmware through the board's serial bootloader
//! - Board auto-detection by USB identifiers and bootloader handshake
//! - Offline firmware inspection
//! - Read-only serial monitor
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod serial;

use {
    config::Config,
    picboot::TargetConfig,
    serial::{SerialOptions, select_serial_port},
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl+C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl+C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// picboot - Upload firmware to PICDuino boards.
///
/// Environment variables:
///   PICBOOT_PORT              - Default serial port
///   PICBOOT_BAUD              - Host baud rate (default: 9600)
///   PICBOOT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "picboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    picboot upload blink.hex\n  \
    picboot -p /dev/ttyACM0 upload --monitor blink.hex\n  \
    picboot info --json blink.hex")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "PICBOOT_PORT")]
    port: Option<String>,

    /// Host baud rate of the USB serial link [default: 9600].
    #[arg(short, long, global = true, env = "PICBOOT_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "PICBOOT_NON_INTERACTIVE")]
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
    /// Upload an Intel HEX file to the board.
    Upload {
        /// Path to the HEX firmware file.
        firmware: PathBuf,

        /// Show the board's serial output after uploading.
        #[arg(long)]
        monitor: bool,

        /// Deadline for each bootloader reply, in milliseconds.
        #[arg(long, value_name = "MS")]
        response_timeout_ms: Option<u64>,

        /// Deadline for the flash erase reply, in milliseconds.
        #[arg(long, value_name = "MS")]
        erase_timeout_ms: Option<u64>,
    },

    /// Show information about a HEX firmware file.
    Info {
        /// Path to the HEX firmware file.
        firmware: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Also send the bootloader handshake to every board candidate.
        #[arg(long)]
        probe: bool,
    },

    /// Show the board's serial output.
    Monitor,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Failures classified for the process exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or a decision the user has to make.
    #[error("{0}")]
    Usage(String),
    /// Unusable configuration file.
    #[error("{0}")]
    Config(String),
    /// No matching serial port or board.
    #[error("{0}")]
    DeviceNotFound(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    /// Process exit code for this class of failure.
    pub(crate) fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for any error returned by a command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(lib) = cause.downcast_ref::<picboot::Error>() {
            if matches!(lib, picboot::Error::Cancelled) {
                return 130;
            }
            if matches!(
                lib,
                picboot::Error::PortResolution(
                    picboot::PortResolutionError::AmbiguousAutoDetect { .. }
                )
            ) {
                return 2;
            }
            if lib.is_device_not_found() {
                return 4;
            }
        }
    }
    1
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

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

    debug!(
        "picboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Failed to install Ctrl+C handler: {e}");
    }
    picboot::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path).map_err(CliError::Config)?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Upload {
            firmware,
            monitor,
            response_timeout_ms,
            erase_timeout_ms,
        } => {
            let target = config.target_config(
                host_baud(cli, &config),
                *response_timeout_ms,
                *erase_timeout_ms,
            );
            let port = commands::upload::cmd_upload(cli, &config, &target, firmware)?;
            if *monitor || config.upload.monitor_after_upload == Some(true) {
                eprintln!();
                commands::monitor::cmd_monitor(cli, &port, target.baud_rate)?;
            }
        },
        Commands::Info { firmware, json } => {
            commands::info::cmd_info(firmware, *json)?;
        },
        Commands::ListPorts { json, probe } => {
            let target = config.target_config(host_baud(cli, &config), None, None);
            commands::info::cmd_list_ports(*json, probe.then_some(&target))?;
        },
        Commands::Monitor => {
            let target = config.target_config(host_baud(cli, &config), None, None);
            let port = get_port(cli, &config, &target)?;
            commands::monitor::cmd_monitor(cli, &port, target.baud_rate)?;
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
        },
    }

    Ok(())
}

/// Baud rate from the command line, the config file, or the default.
fn host_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.baud)
        .unwrap_or(TargetConfig::default().baud_rate)
}

/// Get the serial port from CLI args, config, or auto-detection.
fn get_port(cli: &Cli, config: &Config, target: &TargetConfig) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config, target)
}

#[cfg(test)]
mod cli_tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_upload() {
        let cli = Cli::try_parse_from([
            "picboot",
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "19200",
            "upload",
            "blink.hex",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cli.baud, Some(19200));
        if let Commands::Upload {
            firmware,
            monitor,
            response_timeout_ms,
            erase_timeout_ms,
        } = cli.command
        {
            assert_eq!(firmware.to_str().unwrap(), "blink.hex");
            assert!(!monitor);
            assert!(response_timeout_ms.is_none());
            assert!(erase_timeout_ms.is_none());
        } else {
            panic!("Expected Upload command");
        }
    }

    #[test]
    fn test_cli_parse_upload_with_all_options() {
        let cli = Cli::try_parse_from([
            "picboot",
            "upload",
            "fw.hex",
            "--monitor",
            "--response-timeout-ms",
            "5000",
            "--erase-timeout-ms",
            "30000",
        ])
        .unwrap();
        if let Commands::Upload {
            monitor,
            response_timeout_ms,
            erase_timeout_ms,
            ..
        } = cli.command
        {
            assert!(monitor);
            assert_eq!(response_timeout_ms, Some(5000));
            assert_eq!(erase_timeout_ms, Some(30000));
        } else {
            panic!("Expected Upload command");
        }
    }

    #[test]
    fn test_cli_parse_upload_requires_firmware() {
        assert!(Cli::try_parse_from(["picboot", "upload"]).is_err());
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["picboot", "info", "--json", "fw.hex"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, .. }));
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["picboot", "list-ports"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: false,
                probe: false
            }
        ));

        let cli = Cli::try_parse_from(["picboot", "list-ports", "--json", "--probe"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: true,
                probe: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_monitor() {
        let cli = Cli::try_parse_from(["picboot", "-p", "COM3", "monitor"]).unwrap();
        assert!(matches!(cli.command, Commands::Monitor));
        assert_eq!(cli.port.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["picboot", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["picboot", "list-ports", "-vv", "-q", "--non-interactive"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
    }

    #[test]
    fn test_cli_default_values() {
        let cli = Cli::try_parse_from(["picboot", "list-ports"]).unwrap();
        assert!(cli.port.is_none() || env::var("PICBOOT_PORT").is_ok());
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(cli.config_path.is_none());
    }

    #[test]
    fn test_host_baud_precedence() {
        let mut config = Config::default();
        let cli = Cli::try_parse_from(["picboot", "-b", "19200", "monitor"]).unwrap();
        config.port.baud = Some(38400);
        assert_eq!(host_baud(&cli, &config), 19200);

        let cli = Cli::try_parse_from(["picboot", "monitor"]).unwrap();
        if env::var("PICBOOT_BAUD").is_err() {
            assert_eq!(host_baud(&cli, &config), 38400);
            assert_eq!(host_baud(&cli, &Config::default()), 9600);
        }
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("x".into()).into();
        assert_eq!(exit_code_for(&usage), 2);
        let config: anyhow::Error = CliError::Config("x".into()).into();
        assert_eq!(exit_code_for(&config), 3);
        let missing: anyhow::Error = CliError::DeviceNotFound("x".into()).into();
        assert_eq!(exit_code_for(&missing), 4);
        let cancelled: anyhow::Error = CliError::Cancelled("x".into()).into();
        assert_eq!(exit_code_for(&cancelled), 130);
        let generic = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&generic), 1);
    }

    #[test]
    fn test_exit_codes_for_library_errors() {
        let cancelled = anyhow::Error::from(picboot::Error::Cancelled).context("Upload failed");
        assert_eq!(exit_code_for(&cancelled), 130);

        let no_board: anyhow::Error =
            picboot::Error::from(picboot::PortResolutionError::NoBoardFound { available: vec![] })
                .into();
        assert_eq!(exit_code_for(&no_board), 4);

        let ambiguous = anyhow::Error::from(picboot::Error::from(
            picboot::PortResolutionError::AmbiguousAutoDetect {
                candidates: vec!["/dev/ttyACM0".into(), "/dev/ttyACM1".into()],
            },
        ))
        .context("Upload failed");
        assert_eq!(exit_code_for(&ambiguous), 2);

        let mismatch: anyhow::Error = picboot::Error::ChecksumValidation {
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(exit_code_for(&mismatch), 1);
    }
}
