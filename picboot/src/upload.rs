//! Upload entry points.

use {
    crate::{
        error::{Error, Result},
        image::hex::Firmware,
        port::Port,
        target::{ProtocolSession, TargetConfig},
    },
    log::{info, warn},
};

#[cfg(feature = "native")]
use {
    crate::{error::UploadError, host},
    std::path::Path,
};

/// Upload `firmware` over `port`.
///
/// The port is owned by the upload and closed before this returns, whether
/// the upload succeeded or not.
pub fn upload_firmware<P, F>(
    port: P,
    firmware: &Firmware,
    config: &TargetConfig,
    progress: F,
) -> Result<()>
where
    P: Port,
    F: FnMut(usize, usize),
{
    if firmware.is_empty() {
        return Err(Error::EmptyImage);
    }

    warn!(
        "The board UART must be set to {} baud",
        TargetConfig::BOARD_UART_BAUD
    );
    info!(
        "Uploading {} records to {} (checksum {:#06x})",
        firmware.len(),
        port.name(),
        firmware.checksum
    );

    let mut session = ProtocolSession::new(port, config.clone());
    session.run(firmware, progress)
}

/// Upload a HEX file with the default board parameters.
///
/// Without `device_path` the board is auto-detected.
#[cfg(feature = "native")]
pub fn upload<Q: AsRef<Path>>(
    firmware_path: Q,
    device_path: Option<&str>,
) -> std::result::Result<(), UploadError> {
    upload_with(firmware_path, device_path, &TargetConfig::default(), |_, _| {})
}

/// Upload a HEX file with explicit parameters and a progress callback.
#[cfg(feature = "native")]
pub fn upload_with<Q, F>(
    firmware_path: Q,
    device_path: Option<&str>,
    config: &TargetConfig,
    progress: F,
) -> std::result::Result<(), UploadError>
where
    Q: AsRef<Path>,
    F: FnMut(usize, usize),
{
    let port_name = host::resolve_port(device_path, config)?;
    let firmware = Firmware::from_file(firmware_path, config)?;
    let port = host::open_native(&port_name, config)?;
    upload_firmware(port, &firmware, config, progress)
}
