//! # picboot
//!
//! A library for flashing PICDuino boards.
//!
//! A PICDuino pairs a PIC16 USB bridge with a PIC18 that runs a serial
//! bootloader. This crate provides:
//!
//! - Intel HEX parsing into bootloader write commands
//! - The upload sequence (reset, erase, program, verify) over any [`Port`]
//! - Board discovery through the bridge handshake
//! - A read-only monitor for the board's UART output
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for port listings
//!
//! ## Example
//!
//! ```rust,no_run
//! use picboot::{Firmware, TargetConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TargetConfig::default();
//!     let firmware = Firmware::from_file("blink.hex", &config)?;
//!     println!("{} records, checksum {:#06x}", firmware.len(), firmware.checksum);
//!
//!     #[cfg(feature = "native")]
//!     picboot::upload_with("blink.hex", None, &config, |current, total| {
//!         println!("{current}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod monitor;
pub mod port;
pub mod protocol;
pub mod target;
pub mod upload;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Request interruption for the calling test thread only.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    thread_local! {
        static INTERRUPTED: Cell<bool> = const { Cell::new(false) };
    }

    set_interrupt_checker(|| INTERRUPTED.with(Cell::get));
    INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {
    port::{NativePort, NativePortEnumerator},
    upload::{upload, upload_with},
};
pub use {
    device::{DetectedPort, DeviceKind},
    error::{
        DeviceError, Error, ExchangeError, HexParseError, PortResolutionError, Result, UploadError,
    },
    host::{find_boards, probe, resolve_port_with, select_board, validate_port},
    image::{Firmware, HexParser, HexRecord, Opcode, RecordType, WriteCommand},
    monitor::{MonitorSession, clean_monitor_text, drain_utf8_lossy},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::exchange::{Exchange, classify, exchange, exchange_status},
    target::{ProtocolSession, SessionState, TargetConfig},
    upload::upload_firmware,
};

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::port::sim::SimulatedBoard,
        std::time::Duration,
    };

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_cancelled_session_sends_nothing() {
        test_set_interrupted(true);
        let config = TargetConfig::default().with_settle_delay(Duration::ZERO);
        let firmware = Firmware::parse_str(":020A00000501EE\n:00000001FF\n", &config).unwrap();
        let mut session = ProtocolSession::new(SimulatedBoard::new(), config);

        let err = session
            .run(&firmware, |_, _| {})
            .unwrap_err();
        test_set_interrupted(false);

        assert!(matches!(err, Error::Cancelled));
        assert!(session.port().frames.is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }
}
