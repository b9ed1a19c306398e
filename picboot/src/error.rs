//! Error types for picboot.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for picboot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by [`crate::upload`]; the same type as [`Error`].
pub type UploadError = Error;

/// Errors raised while turning an Intel HEX file into write commands.
///
/// Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexParseError {
    /// The line does not start with `:` or is not valid hex digit pairs.
    #[error("line {line}: malformed record ({reason})")]
    MalformedRecord {
        /// Line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// Declared data length disagrees with the number of bytes on the line.
    #[error("line {line}: record declares {declared} data bytes but carries {actual}")]
    LengthMismatch {
        /// Line number.
        line: usize,
        /// Length from the record's first byte.
        declared: usize,
        /// Length actually present.
        actual: usize,
    },

    /// The trailing checksum byte does not match the record contents.
    #[error("line {line}: bad checksum, computed {expected:#04x} but record has {actual:#04x}")]
    ChecksumMismatch {
        /// Line number.
        line: usize,
        /// Two's-complement checksum computed over the record.
        expected: u8,
        /// Checksum byte found at the end of the line.
        actual: u8,
    },

    /// A record type this bootloader does not accept.
    #[error("line {line}: unsupported record type {record_type:#04x}")]
    UnsupportedRecord {
        /// Line number.
        line: usize,
        /// Record type byte.
        record_type: u8,
    },

    /// Program data targets the address range occupied by the bootloader.
    #[error(
        "line {line}: data at {address:#06x} would overwrite the bootloader \
         (link the application at or above {boundary:#06x})"
    )]
    BootloaderOverwrite {
        /// Line number.
        line: usize,
        /// Record start address.
        address: u16,
        /// First address available to the application.
        boundary: u32,
    },

    /// The input ended before an end-of-file record.
    #[error("no end-of-file record found")]
    MissingEof,
}

/// A request/response exchange that did not produce the expected reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// Fewer bytes than expected arrived before the deadline.
    #[error("timed out after {timeout:?} waiting for {expected} bytes (got {})", .received.len())]
    Timeout {
        /// Number of reply bytes expected.
        expected: usize,
        /// Bytes collected before the deadline.
        received: Vec<u8>,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The status byte is neither the success code nor a known error code.
    #[error("unexpected reply {actual:#04x} (expected {expected:#04x})")]
    UnexpectedReply {
        /// Success code the caller waited for.
        expected: u8,
        /// Byte that arrived instead.
        actual: u8,
    },
}

/// Error codes reported by the bootloader itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// `0xFF`: command not recognized by the firmware.
    #[error("command unsupported")]
    Unsupported,

    /// `0xFE`: address outside the writable range.
    #[error("address error")]
    AddressError,
}

/// The target port could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortResolutionError {
    /// An explicitly requested port is not among the enumerated ports.
    #[error("invalid port \"{requested}\"")]
    NotFound {
        /// The requested device path.
        requested: String,
        /// Every port that was enumerated.
        available: Vec<String>,
    },

    /// Auto-detection found no board.
    #[error("no board found, specify the port explicitly")]
    NoBoardFound {
        /// Every port that was enumerated.
        available: Vec<String>,
    },

    /// Auto-detection found more than one board.
    #[error("more than one board found ({}), specify the port explicitly", .candidates.join(", "))]
    AmbiguousAutoDetect {
        /// Ports that answered the handshake.
        candidates: Vec<String>,
    },
}

/// Error type for picboot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid HEX firmware image.
    #[error("Invalid HEX: {0}")]
    Hex(#[from] HexParseError),

    /// A protocol step got no usable reply.
    #[error("{step} failed: {source}")]
    Exchange {
        /// Protocol step that was running.
        step: &'static str,
        /// What went wrong on the wire.
        #[source]
        source: ExchangeError,
    },

    /// The bootloader rejected a protocol step.
    #[error("{step} rejected by device: {source}")]
    Device {
        /// Protocol step that was running.
        step: &'static str,
        /// Status code reported by the device.
        #[source]
        source: DeviceError,
    },

    /// The device's checksum after programming differs from the image's.
    #[error("Validation failed: expected checksum {expected:#06x}, device reports {actual:#06x}")]
    ChecksumValidation {
        /// Checksum computed while parsing the image.
        expected: u16,
        /// Checksum reported by the device.
        actual: u16,
    },

    /// The image contains no write commands.
    #[error("Invalid HEX: image contains no data records")]
    EmptyImage,

    /// Port resolution failed.
    #[error(transparent)]
    PortResolution(#[from] PortResolutionError),

    /// A session step was invoked out of order.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The embedding application requested cancellation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an [`ExchangeError`] or [`DeviceError`] outcome with its step name.
    pub(crate) fn at_step(step: &'static str, outcome: StepFailure) -> Self {
        match outcome {
            StepFailure::Exchange(source) => Self::Exchange { step, source },
            StepFailure::Device(source) => Self::Device { step, source },
        }
    }

    /// Whether this error means no device could be found or opened.
    ///
    /// More than one board is a usage problem, not a missing device.
    pub fn is_device_not_found(&self) -> bool {
        match self {
            Self::PortResolution(PortResolutionError::AmbiguousAutoDetect { .. }) => false,
            Self::PortResolution(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(e) => matches!(
                e.kind(),
                serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(io::ErrorKind::NotFound)
            ),
            _ => false,
        }
    }
}

/// Failure of a single exchange before it is attributed to a step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepFailure {
    /// No usable reply.
    #[error(transparent)]
    Exchange(ExchangeError),
    /// The device answered with an error code.
    #[error(transparent)]
    Device(DeviceError),
}

impl From<ExchangeError> for StepFailure {
    fn from(e: ExchangeError) -> Self {
        Self::Exchange(e)
    }
}

impl From<DeviceError> for StepFailure {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}
