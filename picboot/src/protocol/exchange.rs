//! Request/response matching on a half-duplex link.
//!
//! Every bootloader step is the same shape: drop stale input, write one
//! request frame, then collect a fixed number of reply bytes before a
//! wall-clock deadline. Steps differ only in the request, the reply length
//! and the success code carried in the last reply byte.
//!
//! ```text
//! host                         board
//!  |  clear input                |
//!  |---- request frame --------->|
//!  |<--- reply byte 0 -----------|
//!  |<--- ...                     |
//!  |<--- reply byte N-1 (status)-|
//! ```

use {
    crate::{
        error::{DeviceError, Error, ExchangeError, Result, StepFailure},
        port::Port,
    },
    log::{debug, trace},
    std::{
        fmt::Write as _,
        time::{Duration, Instant},
    },
};

/// Status code reported for a command the firmware does not recognize.
pub const STATUS_UNSUPPORTED: u8 = 0xFF;

/// Status code reported for an address outside the writable range.
pub const STATUS_ADDRESS_ERROR: u8 = 0xFE;

/// One request and the reply it should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange<'a> {
    /// Step name used in errors and logs.
    pub step: &'static str,
    /// Bytes written to the port.
    pub request: &'a [u8],
    /// Number of reply bytes to collect.
    pub expected_len: usize,
    /// Deadline for the whole reply.
    pub timeout: Duration,
}

impl<'a> Exchange<'a> {
    /// Create an exchange.
    pub fn new(
        step: &'static str,
        request: &'a [u8],
        expected_len: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            step,
            request,
            expected_len,
            timeout,
        }
    }

    /// Write the request and collect exactly `expected_len` reply bytes.
    pub fn run<P: Port>(&self, port: &mut P) -> Result<Vec<u8>> {
        exchange(port, self.request, self.expected_len, self.timeout)?
            .map_err(|e| Error::at_step(self.step, e.into()))
    }

    /// Like [`Exchange::run`], then classify the last reply byte against
    /// `success`.
    pub fn run_status<P: Port>(&self, port: &mut P, success: u8) -> Result<Vec<u8>> {
        let reply = self.run(port)?;
        let status = reply
            .last()
            .copied()
            .ok_or_else(|| Error::Protocol(format!("{}: empty reply", self.step)))?;
        classify(status, success).map_err(|e| Error::at_step(self.step, e))?;
        Ok(reply)
    }
}

/// Write `request` and poll for `expected_len` reply bytes until `timeout`
/// elapses.
///
/// The outer `Result` carries port failures, the inner one the outcome of
/// the exchange itself.
pub fn exchange<P: Port>(
    port: &mut P,
    request: &[u8],
    expected_len: usize,
    timeout: Duration,
) -> Result<std::result::Result<Vec<u8>, ExchangeError>> {
    port.clear_input()?;
    trace!("TX [{}]", hex_dump(request));
    port.write_all_bytes(request)?;

    let start = Instant::now();
    let mut received = Vec::with_capacity(expected_len);

    while received.len() < expected_len {
        if start.elapsed() >= timeout {
            debug!(
                "Timed out after {:?} with {}/{} bytes",
                timeout,
                received.len(),
                expected_len
            );
            return Ok(Err(ExchangeError::Timeout {
                expected: expected_len,
                received,
                timeout,
            }));
        }
        if let Some(byte) = port.read_byte()? {
            received.push(byte);
        }
    }

    trace!("RX [{}]", hex_dump(&received));
    Ok(Ok(received))
}

/// Single-byte exchange compared against a known status code.
pub fn exchange_status<P: Port>(
    port: &mut P,
    request: &[u8],
    success: u8,
    timeout: Duration,
) -> Result<std::result::Result<(), StepFailure>> {
    Ok(match exchange(port, request, 1, timeout)? {
        Ok(reply) => classify(reply[0], success),
        Err(e) => Err(e.into()),
    })
}

/// Write a request that gets no reply.
pub fn send<P: Port>(port: &mut P, request: &[u8]) -> Result<()> {
    trace!("TX [{}]", hex_dump(request));
    port.write_all_bytes(request)
}

/// Interpret a status byte.
pub fn classify(status: u8, success: u8) -> std::result::Result<(), StepFailure> {
    match status {
        s if s == success => Ok(()),
        STATUS_UNSUPPORTED => Err(DeviceError::Unsupported.into()),
        STATUS_ADDRESS_ERROR => Err(DeviceError::AddressError.into()),
        actual => Err(ExchangeError::UnexpectedReply {
            expected: success,
            actual,
        }
        .into()),
    }
}

/// Space-separated uppercase hex, for logs.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        #[allow(clippy::unwrap_used)] // Writing to String cannot fail
        write!(out, "{b:02X}").unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::SimulatedBoard;

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(0x01, 0x01), Ok(()));
        assert_eq!(
            classify(0xFF, 0x01),
            Err(StepFailure::Device(DeviceError::Unsupported))
        );
        assert_eq!(
            classify(0xFE, 0x01),
            Err(StepFailure::Device(DeviceError::AddressError))
        );
        assert_eq!(
            classify(0x42, 0x01),
            Err(StepFailure::Exchange(ExchangeError::UnexpectedReply {
                expected: 0x01,
                actual: 0x42
            }))
        );
    }

    #[test]
    fn test_exchange_collects_reply() {
        let mut board = SimulatedBoard::new();
        let reply = exchange(&mut board, &[0x05, 0xAA], 1, Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert_eq!(reply, vec![0x99]);
        assert_eq!(board.frames, vec![vec![0x05, 0xAA]]);
    }

    #[test]
    fn test_exchange_clears_stale_input() {
        let mut board = SimulatedBoard::new().with_stale_input(&[0x42, 0x43]);
        let reply = exchange(&mut board, &[0x55], 1, Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert_eq!(reply, vec![0x69]);
        assert_eq!(board.clears, 1);
    }

    #[test]
    fn test_exchange_times_out_within_deadline() {
        let mut board = SimulatedBoard::new().silent();
        board
            .set_timeout(Duration::from_millis(10))
            .unwrap();
        let timeout = Duration::from_millis(50);

        let start = Instant::now();
        let result = exchange(&mut board, &[0x05, 0xAA], 1, timeout).unwrap();
        let elapsed = start.elapsed();

        assert!(matches!(
            result,
            Err(ExchangeError::Timeout { expected: 1, ref received, .. }) if received.is_empty()
        ));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(10) + Duration::from_millis(100));
    }

    #[test]
    fn test_exchange_status_mismatch() {
        let mut board = SimulatedBoard::new().with_handshake_reply(0x00);
        let outcome =
            exchange_status(&mut board, &[0x05, 0xAA], 0x99, Duration::from_millis(200)).unwrap();
        assert_eq!(
            outcome,
            Err(StepFailure::Exchange(ExchangeError::UnexpectedReply {
                expected: 0x99,
                actual: 0x00
            }))
        );
    }

    #[test]
    fn test_run_status_attributes_step() {
        let mut board = SimulatedBoard::new().with_erase_status(0xFE);
        let frame = [0x03, 0xEE, 0x01, 0x55, 0xAA, 0x00, 0x09, 0x00, 0x00];
        let err = Exchange::new("erase flash", &frame, 10, Duration::from_millis(200))
            .run_status(&mut board, 0x01)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Device {
                step: "erase flash",
                source: DeviceError::AddressError
            }
        ));
    }

    #[test]
    fn test_send_expects_no_reply() {
        let mut board = SimulatedBoard::new();
        send(&mut board, &[0x05, 0xCC]).unwrap();
        assert_eq!(board.read_byte().unwrap(), None);
        assert_eq!(board.frames.len(), 1);
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x05, 0xaa, 0x00]), "05 AA 00");
        assert_eq!(hex_dump(&[]), "");
    }
}
