//! Upload sequence state machine.
//!
//! ```text
//! Idle -> UartDisabled -> Pic18Reset -> UartEnabled -> BootloaderActive
//!      -> FlashErased -> Programming(i of N) -> ChecksumValidated -> Done
//! ```
//!
//! Each transition is gated by one successful exchange. Any failure leaves
//! the session in the state it had reached and the sequence cannot be
//! resumed; a new upload starts again from `Idle`.

use {
    crate::{
        error::{Error, Result},
        image::hex::{Firmware, WriteCommand},
        port::Port,
        protocol::exchange::{self, Exchange, hex_dump},
        target::{
            TargetConfig,
            picduino::protocol::{self as proto, Request},
        },
    },
    log::{debug, info, trace, warn},
    std::{fmt, thread},
};

/// Progress of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    Idle,
    /// PIC18 UART traffic is no longer forwarded.
    UartDisabled,
    /// The PIC18 was reset into its bootloader.
    Pic18Reset,
    /// UART forwarding restored.
    UartEnabled,
    /// The bootloader acknowledged the request to stay resident.
    BootloaderActive,
    /// The application region is erased.
    FlashErased,
    /// `current` of `total` write commands acknowledged.
    Programming {
        /// Commands acknowledged so far.
        current: usize,
        /// Commands in the image.
        total: usize,
    },
    /// Device checksum matches the image.
    ChecksumValidated,
    /// The board was reset into the new application.
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::UartDisabled => write!(f, "UART disabled"),
            Self::Pic18Reset => write!(f, "PIC18 reset"),
            Self::UartEnabled => write!(f, "UART enabled"),
            Self::BootloaderActive => write!(f, "bootloader active"),
            Self::FlashErased => write!(f, "flash erased"),
            Self::Programming { current, total } => write!(f, "programming {current}/{total}"),
            Self::ChecksumValidated => write!(f, "checksum validated"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// One upload over an exclusively owned port.
///
/// The port is closed when the session is dropped, on success and on every
/// error path alike.
pub struct ProtocolSession<P: Port> {
    port: P,
    config: TargetConfig,
    state: SessionState,
}

impl<P: Port> ProtocolSession<P> {
    /// Take ownership of `port` for one upload.
    pub fn new(port: P, config: TargetConfig) -> Self {
        Self {
            port,
            config,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Target parameters.
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    /// Get a reference to the port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Run the whole sequence for `firmware`.
    ///
    /// `progress` is called with `(acknowledged, total)` after every write.
    pub fn run<F>(&mut self, firmware: &Firmware, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.disable_pass_through()?;
        self.reset_target()?;
        self.enable_pass_through()?;
        self.request_bootloader()?;
        self.erase()?;
        self.program(&firmware.commands, progress)?;
        self.validate_checksum(firmware.checksum)?;
        self.finish()
    }

    /// Stop PIC18 UART traffic so that stale output cannot be mistaken for
    /// a reply.
    pub fn disable_pass_through(&mut self) -> Result<()> {
        self.expect_state(SessionState::Idle, Request::DisablePassThrough)?;
        self.fire(Request::DisablePassThrough)?;
        self.port.clear_input()?;
        self.state = SessionState::UartDisabled;
        Ok(())
    }

    /// Reset the PIC18 into its bootloader.
    pub fn reset_target(&mut self) -> Result<()> {
        self.expect_state(SessionState::UartDisabled, Request::Reset)?;
        info!("Resetting PIC18...");
        self.transact(Request::Reset, self.config.response_timeout)?;
        info!("Successfully reset PIC18");
        self.state = SessionState::Pic18Reset;
        Ok(())
    }

    /// Restore the path to the bootloader.
    pub fn enable_pass_through(&mut self) -> Result<()> {
        self.expect_state(SessionState::Pic18Reset, Request::EnablePassThrough)?;
        self.fire(Request::EnablePassThrough)?;
        self.state = SessionState::UartEnabled;
        Ok(())
    }

    /// Keep the bootloader from handing off to the old application.
    pub fn request_bootloader(&mut self) -> Result<()> {
        self.expect_state(SessionState::UartEnabled, Request::RequestBootloader)?;
        info!("Requesting bootloader...");
        self.transact(Request::RequestBootloader, self.config.response_timeout)?;
        info!("Bootloader running");
        self.state = SessionState::BootloaderActive;
        Ok(())
    }

    /// Erase every row of the application region.
    pub fn erase(&mut self) -> Result<()> {
        self.expect_state(SessionState::BootloaderActive, Request::Erase)?;
        info!(
            "Erasing flash ({} rows from {:#06x})...",
            self.config.row_count(),
            self.config.app_start
        );
        self.transact(Request::Erase, self.config.erase_timeout)?;
        info!("Successfully erased flash");
        self.state = SessionState::FlashErased;
        Ok(())
    }

    /// Send every write command in order.
    pub fn program<F>(&mut self, commands: &[WriteCommand], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if self.state != SessionState::FlashErased {
            return Err(self.out_of_order("program"));
        }

        let total = commands.len();
        info!("Programming {total} records...");
        self.state = SessionState::Programming { current: 0, total };
        progress(0, total);

        for (i, command) in commands.iter().enumerate() {
            check_interrupted()?;
            let frame = command.frame();
            debug!(
                "Writing {} bytes at {:#010x} (line {})",
                command.payload().len(),
                command.full_address(),
                command.line()
            );
            Exchange::new(
                "write record",
                &frame,
                proto::STATUS_REPLY_LEN,
                self.config.response_timeout,
            )
            .run_status(&mut self.port, proto::STATUS_SUCCESS)
            .inspect_err(|e| warn!("Failed to write record from line {}: {e}", command.line()))?;

            self.state = SessionState::Programming {
                current: i + 1,
                total,
            };
            progress(i + 1, total);
        }

        info!("Programming complete");
        Ok(())
    }

    /// Compare the device checksum of the application region with
    /// `expected`.
    pub fn validate_checksum(&mut self, expected: u16) -> Result<()> {
        match self.state {
            SessionState::Programming { current, total } if current == total => {},
            _ => return Err(self.out_of_order(Request::Checksum.step())),
        }
        info!("Validating...");
        let reply = self.transact(Request::Checksum, self.config.response_timeout)?;
        let actual = proto::reply_checksum(&reply)
            .ok_or_else(|| Error::Protocol(format!("short checksum reply [{}]", hex_dump(&reply))))?;

        if actual != expected {
            return Err(Error::ChecksumValidation { expected, actual });
        }
        info!("Validation successful ({actual:#06x})");
        self.state = SessionState::ChecksumValidated;
        Ok(())
    }

    /// Reset the board so that the new application starts.
    pub fn finish(&mut self) -> Result<()> {
        self.expect_state(SessionState::ChecksumValidated, Request::Reset)?;
        self.transact(Request::Reset, self.config.response_timeout)?;
        info!("Upload successful");
        self.state = SessionState::Done;
        Ok(())
    }

    /// Close the port now instead of on drop.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }

    fn expect_state(&self, expected: SessionState, request: Request) -> Result<()> {
        check_interrupted()?;
        if self.state == expected {
            Ok(())
        } else {
            Err(self.out_of_order(request.step()))
        }
    }

    fn out_of_order(&self, step: &str) -> Error {
        Error::Protocol(format!("cannot {step} while {}", self.state))
    }

    fn fire(&mut self, request: Request) -> Result<()> {
        debug!("{}", request.step());
        exchange::send(&mut self.port, &request.encode(&self.config)?)?;
        thread::sleep(self.config.settle_delay);
        Ok(())
    }

    fn transact(&mut self, request: Request, timeout: std::time::Duration) -> Result<Vec<u8>> {
        let frame = request.encode(&self.config)?;
        let step = Exchange::new(request.step(), &frame, request.reply_len(), timeout);
        let reply = match request.success_code() {
            Some(success) => step.run_status(&mut self.port, success)?,
            None => step.run(&mut self.port)?,
        };
        trace!("{} -> [{}]", request.step(), hex_dump(&reply));
        Ok(reply)
    }
}

impl<P: Port> Drop for ProtocolSession<P> {
    fn drop(&mut self) {
        if let Err(e) = self.port.close() {
            debug!("Failed to close {}: {e}", self.port.name());
        }
    }
}

fn check_interrupted() -> Result<()> {
    if crate::is_interrupted_requested() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            error::{DeviceError, ExchangeError},
            port::sim::SimulatedBoard,
        },
        std::time::Duration,
    };

    fn fast_config() -> TargetConfig {
        TargetConfig::default()
            .with_settle_delay(Duration::ZERO)
            .with_response_timeout(Duration::from_millis(200))
            .with_erase_timeout(Duration::from_millis(200))
    }

    fn firmware() -> Firmware {
        let text = "\
:0400000012345678E8
:0209000005AA46
:00000001FF
";
        Firmware::parse_str(text, &fast_config()).unwrap()
    }

    #[test]
    fn test_happy_path_reaches_done() {
        let firmware = firmware();
        let board = SimulatedBoard::new().with_checksum(firmware.checksum);
        let mut session = ProtocolSession::new(board, fast_config());
        let mut calls = Vec::new();

        session
            .run(&firmware, |current, total| calls.push((current, total)))
            .unwrap();

        assert_eq!(session.state(), SessionState::Done);
        assert_eq!(calls, vec![(0, 2), (1, 2), (2, 2)]);

        let frames = &session.port().frames;
        assert_eq!(frames[0], vec![0x05, 0xCC]);
        assert_eq!(frames[1], vec![0x05, 0xBB]);
        assert_eq!(frames[2], vec![0x05, 0xCD]);
        assert_eq!(frames[3], vec![0x55]);
        assert_eq!(frames[4][0], 0x03);
        assert_eq!(frames[5], firmware.commands[0].frame());
        assert_eq!(frames[6], firmware.commands[1].frame());
        assert_eq!(frames[7][0], 0x08);
        assert_eq!(frames[8], vec![0x05, 0xBB]);
        assert_eq!(frames.len(), 9);
    }

    #[test]
    fn test_erase_nak_aborts_before_writes() {
        let board = SimulatedBoard::new().with_erase_status(0xFF);
        let mut session = ProtocolSession::new(board, fast_config());

        let err = session
            .run(&firmware(), |_, _| {})
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Device {
                source: DeviceError::Unsupported,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::BootloaderActive);
        assert!(session.port().frames_with_opcode(0x02).is_empty());
        assert!(session.port().frames_with_opcode(0x08).is_empty());
    }

    #[test]
    fn test_checksum_mismatch_fails_validation() {
        let firmware = firmware();
        let board = SimulatedBoard::new().with_checksum(firmware.checksum ^ 0x00FF);
        let mut session = ProtocolSession::new(board, fast_config());

        let err = session
            .run(&firmware, |_, _| {})
            .unwrap_err();

        match err {
            Error::ChecksumValidation { expected, actual } => {
                assert_eq!(expected, firmware.checksum);
                assert_eq!(actual, firmware.checksum ^ 0x00FF);
            },
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.port().frames_with_opcode(0x02).len(), 2);
        assert_eq!(
            session.state(),
            SessionState::Programming {
                current: 2,
                total: 2
            }
        );
    }

    #[test]
    fn test_write_error_stops_remaining_writes() {
        let board = SimulatedBoard::new().failing_write(0, 0xFE);
        let mut session = ProtocolSession::new(board, fast_config());

        let err = session
            .run(&firmware(), |_, _| {})
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Device {
                step: "write record",
                source: DeviceError::AddressError
            }
        ));
        assert_eq!(session.port().frames_with_opcode(0x02).len(), 1);
    }

    #[test]
    fn test_silent_board_times_out_on_reset() {
        let mut board = SimulatedBoard::new().silent();
        board
            .set_timeout(Duration::from_millis(5))
            .unwrap();
        let config = fast_config().with_response_timeout(Duration::from_millis(30));
        let mut session = ProtocolSession::new(board, config);

        let err = session
            .run(&firmware(), |_, _| {})
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Exchange {
                step: "reset",
                source: ExchangeError::Timeout { .. }
            }
        ));
        assert_eq!(session.state(), SessionState::UartDisabled);
    }

    #[test]
    fn test_steps_out_of_order_rejected() {
        let mut session = ProtocolSession::new(SimulatedBoard::new(), fast_config());
        assert!(matches!(session.erase(), Err(Error::Protocol(_))));
        assert!(session.port().frames.is_empty());
    }

    #[test]
    fn test_empty_image_validates() {
        let board = SimulatedBoard::new().with_checksum(0);
        let mut session = ProtocolSession::new(board, fast_config());
        let firmware = Firmware::parse_str(":00000001FF\n", &fast_config()).unwrap();

        session
            .run(&firmware, |_, _| {})
            .unwrap();
        assert_eq!(session.state(), SessionState::Done);
    }

    #[test]
    fn test_port_closed_when_session_ends() {
        let mut session = ProtocolSession::new(SimulatedBoard::new(), fast_config());
        session.close().unwrap();
        assert!(session.port().closed);
    }
}
