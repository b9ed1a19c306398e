//! PICDuino bootloader requests.
//!
//! Requests starting with the escape byte are handled by the PIC16 USB
//! bridge. Everything else is passed through to the PIC18 bootloader.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+----------+--------+---------+-----------+------------+
//! | Opcode | Count    | Unlock | Address | Ext. Addr | Payload    |
//! +--------+----------+--------+---------+-----------+------------+
//! | 1 byte | 2 bytes  | 55 AA  | 2 bytes | 2 bytes   | write only |
//! +--------+----------+--------+---------+-----------+------------+
//! ```
//!
//! Multi-byte fields are little-endian. Replies to frame commands are 10
//! bytes long with the status in the last byte, except the checksum reply
//! which carries one extra byte.

use {
    crate::{
        error::{Error, Result},
        target::TargetConfig,
    },
    byteorder::{LittleEndian, WriteBytesExt},
};

/// Bridge command prefix.
pub const ESCAPE: u8 = 0x05;

/// Reply to the handshake.
pub const HANDSHAKE_ACK: u8 = 0x99;

/// Reply to a bridge reset.
pub const RESET_ACK: u8 = 0x01;

/// Reply to the bootloader request.
pub const BOOTLOADER_ACK: u8 = 0x69;

/// Status byte of a successful frame command.
pub const STATUS_SUCCESS: u8 = 0x01;

/// Length of the reply to erase and write commands.
pub const STATUS_REPLY_LEN: usize = 10;

/// Length of the reply to the checksum command.
pub const CHECKSUM_REPLY_LEN: usize = 11;

/// Frame opcodes understood by the PIC18 bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameOpcode {
    /// Erase rows of program memory.
    EraseFlash = 0x03,
    /// Compute a checksum over program memory.
    CalcChecksum = 0x08,
}

/// A request of the upload sequence other than the per-record writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Is a board listening on this port?
    Handshake,
    /// Stop forwarding PIC18 UART traffic to the host.
    DisablePassThrough,
    /// Resume forwarding PIC18 UART traffic.
    EnablePassThrough,
    /// Pulse the PIC18 reset line.
    Reset,
    /// Catch the bootloader right after reset.
    RequestBootloader,
    /// Erase the application region.
    Erase,
    /// Checksum the application region.
    Checksum,
}

impl Request {
    /// Encode the request for `config`.
    ///
    /// Fails when the application region does not fit the 16-bit count
    /// fields of the erase and checksum frames.
    pub fn encode(self, config: &TargetConfig) -> Result<Vec<u8>> {
        let frame = match self {
            Self::Handshake => vec![ESCAPE, 0xAA],
            Self::DisablePassThrough => vec![ESCAPE, 0xCC],
            Self::EnablePassThrough => vec![ESCAPE, 0xCD],
            Self::Reset => vec![ESCAPE, 0xBB],
            Self::RequestBootloader => vec![0x55],
            Self::Erase => {
                let mut frame = vec![FrameOpcode::EraseFlash as u8];
                frame.write_u16::<LittleEndian>(count_field("row count", config.row_count())?)?;
                frame.extend_from_slice(&config.unlock_sequence);
                frame.write_u32::<LittleEndian>(config.app_start)?;
                frame
            },
            Self::Checksum => {
                let mut frame = vec![FrameOpcode::CalcChecksum as u8];
                frame.write_u16::<LittleEndian>(count_field(
                    "application length",
                    config.app_length(),
                )?)?;
                frame.extend_from_slice(&[0x00, 0x00]);
                frame.write_u32::<LittleEndian>(config.app_start)?;
                frame
            },
        };
        Ok(frame)
    }

    /// Number of reply bytes, zero for fire-and-forget requests.
    pub fn reply_len(self) -> usize {
        match self {
            Self::DisablePassThrough | Self::EnablePassThrough => 0,
            Self::Handshake | Self::Reset | Self::RequestBootloader => 1,
            Self::Erase => STATUS_REPLY_LEN,
            Self::Checksum => CHECKSUM_REPLY_LEN,
        }
    }

    /// Byte that acknowledges the request.
    pub fn success_code(self) -> Option<u8> {
        match self {
            Self::Handshake => Some(HANDSHAKE_ACK),
            Self::Reset => Some(RESET_ACK),
            Self::RequestBootloader => Some(BOOTLOADER_ACK),
            Self::Erase => Some(STATUS_SUCCESS),
            Self::DisablePassThrough | Self::EnablePassThrough | Self::Checksum => None,
        }
    }

    /// Name used in logs and errors.
    pub fn step(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::DisablePassThrough => "disable pass-through",
            Self::EnablePassThrough => "enable pass-through",
            Self::Reset => "reset",
            Self::RequestBootloader => "request bootloader",
            Self::Erase => "erase flash",
            Self::Checksum => "calculate checksum",
        }
    }
}

fn count_field(what: &str, value: u32) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| Error::Protocol(format!("{what} {value:#x} does not fit a 16-bit field")))
}

/// Extract the checksum from an 11-byte checksum reply.
pub fn reply_checksum(reply: &[u8]) -> Option<u16> {
    match reply {
        [.., lo, hi] if reply.len() == CHECKSUM_REPLY_LEN => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}
