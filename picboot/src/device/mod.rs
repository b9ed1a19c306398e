//! Serial port classification.
//!
//! Boards are recognised by the USB identifiers of their PIC16 bridge.
//! Everything here is metadata only; whether a bootloader actually answers
//! is decided by the handshake probe in [`crate::host`].

use crate::port::PortInfo;

#[cfg(feature = "native")]
use {
    crate::{
        error::Result,
        port::{NativePortEnumerator, PortEnumerator},
    },
    log::trace,
};

/// USB vendor ID of the board's PIC16 bridge (Microchip).
pub const PICDUINO_VID: u16 = 0x04D8;

/// USB product ID of the board's PIC16 bridge.
pub const PICDUINO_PID: u16 = 0x000A;

/// What kind of device sits behind a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum DeviceKind {
    /// USB identifiers match the board's bridge.
    Picduino,
    /// Some other USB serial device.
    UsbSerial,
    /// No USB information (built-in UART, Bluetooth, pseudo terminal).
    Unknown,
}

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        if (vid, pid) == (PICDUINO_VID, PICDUINO_PID) {
            Self::Picduino
        } else {
            Self::UsbSerial
        }
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Picduino => "PICDuino",
            Self::UsbSerial => "USB serial",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the identifiers say this is a board.
    pub fn is_board(&self) -> bool {
        matches!(self, Self::Picduino)
    }
}

/// Enumerated port with its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyACM0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Whether the port is a USB device.
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

/// Classify enumerated ports.
pub fn classify_ports(ports: Vec<PortInfo>) -> Vec<DetectedPort> {
    ports
        .into_iter()
        .map(DetectedPort::from)
        .collect()
}

/// Enumerate and classify every serial port of this host.
#[cfg(feature = "native")]
pub fn detect_ports() -> Result<Vec<DetectedPort>> {
    let ports = classify_ports(NativePortEnumerator::list_ports()?);
    for port in &ports {
        trace!(
            "Found port: {} (VID: {:?}, PID: {:?}, Device: {:?})",
            port.name, port.vid, port.pid, port.device
        );
    }
    Ok(ports)
}

/// Ports worth probing with the handshake.
///
/// Boards identified by VID/PID come first and exclusively. When none is
/// identified every USB serial port is a candidate, since some hosts do not
/// report the identifiers of the bridge.
pub fn board_candidates(ports: &[DetectedPort]) -> Vec<&DetectedPort> {
    let boards: Vec<&DetectedPort> = ports
        .iter()
        .filter(|p| p.device.is_board())
        .collect();
    if !boards.is_empty() {
        return boards;
    }
    ports
        .iter()
        .filter(|p| p.is_usb())
        .collect()
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.device.is_board() {
            format!(" [{}]", port.device.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}
