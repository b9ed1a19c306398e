//! Firmware info and port listing command implementations.

use {
    anyhow::{Context, Result},
    console::style,
    picboot::{
        DetectedPort, Firmware, TargetConfig,
        device::{detect_ports, format_port_list},
        host,
    },
    std::path::Path,
};

/// List ports command implementation.
///
/// With `probe`, every board candidate also gets the bootloader handshake.
pub(crate) fn cmd_list_ports(json: bool, probe: Option<&TargetConfig>) -> Result<()> {
    let detected = detect_ports().context("Failed to enumerate serial ports")?;
    let responders = probe
        .map(host::discover_boards)
        .transpose()
        .context("Failed to probe serial ports")?;

    if json {
        let ports = detected
            .iter()
            .map(|port| port_json(port, responders.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for (port, line) in detected
        .iter()
        .zip(format_port_list(&detected))
    {
        let bullet = if port.device.is_board() {
            style("•").green()
        } else {
            style("•").dim()
        };
        let answered = responders
            .as_ref()
            .filter(|found| found.contains(&port.name))
            .map(|_| format!(" {}", style("(bootloader answered)").green().bold()))
            .unwrap_or_default();
        eprintln!("  {bullet} {line}{answered}");
    }

    if let Some(found) = &responders {
        match found.len() {
            0 => eprintln!("\n{} No board answered the handshake", style("✗").red()),
            1 => eprintln!(
                "\n{} Board found on {}",
                style("→").green().bold(),
                style(&found[0]).cyan().bold()
            ),
            n => eprintln!(
                "\n{} {n} boards answered, pass --port to choose one",
                style("⚠").yellow()
            ),
        }
    }

    Ok(())
}

/// JSON object for one port; `responds` is only present after probing.
fn port_json(
    port: &DetectedPort,
    responders: Option<&[String]>,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(port)?;
    if let (Some(found), Some(object)) = (responders, value.as_object_mut()) {
        object.insert(
            "responds".to_string(),
            serde_json::Value::Bool(found.contains(&port.name)),
        );
    }
    Ok(value)
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let config = TargetConfig::default();
    let image = Firmware::from_file(firmware, &config)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info_json(&image, &config))?
        );
        return Ok(());
    }

    eprintln!(
        "{} Loaded firmware: {}",
        style("📦").cyan(),
        firmware.display()
    );
    eprintln!("\n{}", style("Firmware Information").bold().underlined());
    eprintln!("  Records: {}", image.len());
    eprintln!("    Program memory: {}", image.program_commands());
    eprintln!(
        "    Configuration:  {}",
        image.len() - image.program_commands()
    );
    eprintln!("  Data bytes: {}", image.data_bytes());
    match image.program_range() {
        Some((start, end)) => eprintln!("  Program range: 0x{start:04X}-0x{end:04X}"),
        None => eprintln!("  Program range: {}", style("none").dim()),
    }
    eprintln!(
        "  Application region: 0x{:04X}-0x{:04X}",
        config.app_start,
        config.flash_end - 1
    );
    eprintln!("  Checksum: 0x{:04X}", image.checksum);

    if image.is_empty() {
        eprintln!(
            "\n{} The image has no data records and cannot be uploaded",
            style("⚠").yellow()
        );
    }

    Ok(())
}

/// Structured summary of a parsed image.
fn info_json(image: &Firmware, config: &TargetConfig) -> serde_json::Value {
    let range = image
        .program_range()
        .map(|(start, end)| {
            serde_json::json!({
                "start": format!("0x{start:04X}"),
                "end": format!("0x{end:04X}"),
            })
        });
    let records: Vec<serde_json::Value> = image
        .commands
        .iter()
        .map(|cmd| {
            let kind = if cmd.is_program_memory() {
                "program"
            } else {
                "config"
            };
            serde_json::json!({
                "line": cmd.line(),
                "kind": kind,
                "address": format!("0x{:08X}", cmd.full_address()),
                "length": cmd.length(),
            })
        })
        .collect();

    serde_json::json!({
        "records": image.len(),
        "program_records": image.program_commands(),
        "config_records": image.len() - image.program_commands(),
        "data_bytes": image.data_bytes(),
        "program_range": range,
        "app_start": format!("0x{:04X}", config.app_start),
        "checksum": format!("0x{:04X}", image.checksum),
        "uploadable": !image.is_empty(),
        "writes": records,
    })
}
