//! Serial port selection.
//!
//! The port comes from, in order: the command line, the configuration file,
//! or board auto-detection. When auto-detection finds several boards the
//! user picks one interactively; in non-interactive mode that is a usage
//! error.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::debug,
    picboot::{Error, PortResolutionError, TargetConfig, device, host},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

/// Determine the port to talk to.
pub fn select_serial_port(
    options: &SerialOptions,
    config: &Config,
    target: &TargetConfig,
) -> Result<String> {
    let requested = match (&options.port, &config.port.serial) {
        (Some(port), _) => Some(port.as_str()),
        (None, Some(port)) => {
            debug!("Using port from config: {port}");
            Some(port.as_str())
        },
        (None, None) => None,
    };

    let available = device::detect_ports()?;
    match host::resolve_port_with(requested, &available, target, |name| {
        host::open_native(name, target)
    }) {
        Ok(port) => Ok(port),
        Err(Error::PortResolution(err)) => resolution_failure(err, options.non_interactive),
        Err(err) => Err(err.into()),
    }
}

/// Turn a failed resolution into a prompt or a classified CLI error.
fn resolution_failure(err: PortResolutionError, non_interactive: bool) -> Result<String> {
    let message = describe_failure(&err);
    match err {
        PortResolutionError::AmbiguousAutoDetect { candidates } => {
            if non_interactive {
                return Err(CliError::Usage(message).into());
            }
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
        PortResolutionError::NotFound { .. } | PortResolutionError::NoBoardFound { .. } => {
            Err(CliError::DeviceNotFound(message).into())
        },
    }
}

/// Error text with the enumerated ports appended for convenience.
fn describe_failure(err: &PortResolutionError) -> String {
    let available = match err {
        PortResolutionError::NotFound { available, .. }
        | PortResolutionError::NoBoardFound { available } => available,
        PortResolutionError::AmbiguousAutoDetect { .. } => return err.to_string(),
    };

    if available.is_empty() {
        format!("{err}\nNo serial ports available")
    } else {
        format!("{err}\nAvailable ports:\n  {}", available.join("\n  "))
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "several boards found and no terminal to choose one; pass --port".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Port selection failed: {io_err}")).into()
            }
        },
    }
}

/// Let the user pick one of the boards that answered the handshake.
fn select_port_interactive(mut boards: Vec<String>) -> Result<String> {
    eprintln!(
        "{} {} boards answered the handshake",
        style("ℹ").blue(),
        boards.len()
    );

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the board to use")
        .items(&boards)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) if index < boards.len() => Ok(boards.swap_remove(index)),
        Some(index) => Err(anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}
