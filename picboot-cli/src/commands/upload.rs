//! Upload command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    indicatif::{ProgressBar, ProgressStyle},
    picboot::{Firmware, TargetConfig, host, upload_firmware},
    std::path::Path,
};

use crate::{Cli, CliError, config::Config, get_port, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Upload `firmware` and return the port it went to.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &Config,
    target: &TargetConfig,
    firmware: &Path,
) -> Result<String> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            firmware.display()
        );
    }

    let image = Firmware::from_file(firmware, target)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    if image.is_empty() {
        return Err(picboot::Error::EmptyImage)
            .with_context(|| format!("Nothing to upload from {}", firmware.display()));
    }

    if !cli.quiet {
        eprintln!(
            "{} {} records ({} program, {} config), checksum {:#06x}",
            style("ℹ").blue(),
            image.len(),
            image.program_commands(),
            image.len() - image.program_commands(),
            image.checksum
        );
    }

    ensure_not_interrupted()?;
    let port_name = get_port(cli, config, target)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            port_name,
            target.baud_rate
        );
    }

    let port = host::open_native(&port_name, target)
        .with_context(|| format!("Failed to open {port_name}"))?;

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(image.len() as u64);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message("writing");
        pb
    };

    let result = upload_firmware(port, &image, target, |current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    });

    match result {
        Ok(()) => pb.finish_with_message("verified"),
        Err(err) => {
            pb.abandon();
            return Err(err).with_context(|| format!("Upload to {port_name} failed"));
        },
    }

    if !cli.quiet {
        eprintln!(
            "\n{} Upload complete, checksum {:#06x} verified",
            style("🎉").green().bold(),
            image.checksum
        );
    }

    Ok(port_name)
}
