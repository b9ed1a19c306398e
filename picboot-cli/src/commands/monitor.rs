//! Serial monitor command implementation.
//!
//! Read-only: the board's output is printed line by line until Ctrl+C.

use {
    anyhow::{Context, Result},
    console::style,
    picboot::MonitorSession,
    std::io::{self, Write as _},
};

use crate::Cli;

/// Print the board's serial output until interrupted.
pub(crate) fn cmd_monitor(cli: &Cli, port_name: &str, baud: u32) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Monitoring {} at {} baud",
            style("📡").cyan(),
            style(port_name).green(),
            baud
        );
        eprintln!("{}", style("Press Ctrl+C to exit").dim());
    }

    let mut session = MonitorSession::open(port_name, baud)
        .with_context(|| format!("Failed to open {port_name}"))?;

    let mut stdout = io::stdout().lock();
    let result = session.run(|line| {
        writeln!(stdout, "{line}").ok();
        stdout.flush().ok();
    });

    match result {
        Ok(()) => Ok(()),
        Err(picboot::Error::Cancelled) => {
            let rest = picboot::clean_monitor_text(session.partial_line());
            if !rest.is_empty() {
                writeln!(stdout, "{rest}").ok();
            }
            if !cli.quiet {
                eprintln!("{}", style("Monitor closed").dim());
            }
            Ok(())
        },
        Err(err) => Err(err).context("Serial error"),
    }
}
