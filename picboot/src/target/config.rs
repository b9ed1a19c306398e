//! Target parameters: flash geometry, framing constants and timeouts.
//!
//! Every value the parser and the protocol session depend on lives in one
//! immutable [`TargetConfig`]. Two sessions (or two tests) can run with
//! different geometries side by side without sharing any global state.

use std::time::Duration;

/// Parameters describing one bootloader target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// First program-memory address available to the application.
    pub app_start: u32,
    /// One past the last program-memory address.
    pub flash_end: u32,
    /// Addresses per erase row.
    pub row_size: u32,
    /// Reserved framing byte that must be doubled inside payloads.
    pub escape_byte: u8,
    /// Two bytes the bootloader requires before any flash-modifying command.
    pub unlock_sequence: [u8; 2],
    /// Low address bytes of the reset/interrupt vectors that get relocated
    /// from page zero into the application region.
    pub vector_offsets: Vec<u8>,
    /// Host-side baud rate of the USB serial link.
    pub baud_rate: u32,
    /// Read timeout of a single byte poll.
    pub byte_timeout: Duration,
    /// Deadline for a whole reply in the general case.
    pub response_timeout: Duration,
    /// Deadline for the erase reply.
    pub erase_timeout: Duration,
    /// Deadline for the discovery handshake.
    pub probe_timeout: Duration,
    /// Pause after toggling the UART pass-through.
    pub settle_delay: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            app_start: 0x0900,
            flash_end: 0x10000,
            row_size: 128,
            escape_byte: 0x05,
            unlock_sequence: [0x55, 0xAA],
            vector_offsets: vec![0x00, 0x08, 0x18],
            baud_rate: 9600,
            byte_timeout: Duration::from_millis(100),
            response_timeout: Duration::from_secs(3),
            erase_timeout: Duration::from_secs(3),
            probe_timeout: Duration::from_millis(100),
            settle_delay: Duration::from_millis(100),
        }
    }
}

impl TargetConfig {
    /// Baud rate the board's PIC16-to-PIC18 UART must be configured for.
    pub const BOARD_UART_BAUD: u32 = 19200;

    /// Create the default PICDuino configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the host baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the general response deadline.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the erase deadline.
    #[must_use]
    pub fn with_erase_timeout(mut self, timeout: Duration) -> Self {
        self.erase_timeout = timeout;
        self
    }

    /// Set the discovery handshake deadline.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the pass-through settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the per-byte poll timeout.
    #[must_use]
    pub fn with_byte_timeout(mut self, timeout: Duration) -> Self {
        self.byte_timeout = timeout;
        self
    }

    /// Set the application region bounds.
    #[must_use]
    pub fn with_flash_range(mut self, app_start: u32, flash_end: u32) -> Self {
        self.app_start = app_start;
        self.flash_end = flash_end;
        self
    }

    /// Number of program-memory addresses in the application region.
    pub fn app_length(&self) -> u32 {
        self.flash_end.saturating_sub(self.app_start)
    }

    /// Number of erase rows covering the application region.
    pub fn row_count(&self) -> u32 {
        self.app_length() / self.row_size
    }

    /// Whether `offset` is the low byte of a vector that must be relocated.
    pub fn is_vector_offset(&self, offset: u8) -> bool {
        self.vector_offsets.contains(&offset)
    }
}
