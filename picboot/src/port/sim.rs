//! In-memory PICDuino used by unit tests.
//!
//! The board answers every frame the way the real PIC16/PIC18 pair does.
//! Replies are queued when the frame is written and handed out one byte per
//! read, so the exchange layer sees the same polling behaviour it would see
//! on hardware.

use {
    crate::{error::Result, port::Port},
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
        time::Duration,
    },
};

const IDLE_POLL: Duration = Duration::from_millis(2);

/// Simulated board with scriptable status bytes.
pub(crate) struct SimulatedBoard {
    name: String,
    timeout: Duration,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    /// Every frame written by the host, in order.
    pub(crate) frames: Vec<Vec<u8>>,
    /// Number of times `clear_input` was called.
    pub(crate) clears: usize,
    pub(crate) closed: bool,
    erase_status: u8,
    write_status: u8,
    fail_write_at: Option<usize>,
    checksum: u16,
    silent: bool,
    handshake_reply: u8,
    writes_seen: usize,
}

impl SimulatedBoard {
    pub(crate) fn new() -> Self {
        Self {
            name: "sim0".to_string(),
            timeout: Duration::from_millis(100),
            pending: Vec::new(),
            rx: VecDeque::new(),
            frames: Vec::new(),
            clears: 0,
            closed: false,
            erase_status: 0x01,
            write_status: 0x01,
            fail_write_at: None,
            checksum: 0,
            silent: false,
            handshake_reply: 0x99,
            writes_seen: 0,
        }
    }

    pub(crate) fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::new()
        }
    }

    /// Status byte returned as the last byte of the erase reply.
    pub(crate) fn with_erase_status(mut self, status: u8) -> Self {
        self.erase_status = status;
        self
    }

    /// Status byte returned for every write after `index` writes succeeded.
    pub(crate) fn failing_write(mut self, index: usize, status: u8) -> Self {
        self.fail_write_at = Some(index);
        self.write_status = status;
        self
    }

    /// Checksum reported by the bootloader.
    pub(crate) fn with_checksum(mut self, checksum: u16) -> Self {
        self.checksum = checksum;
        self
    }

    /// Board that never replies.
    pub(crate) fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Byte returned for the handshake instead of `0x99`.
    pub(crate) fn with_handshake_reply(mut self, reply: u8) -> Self {
        self.handshake_reply = reply;
        self
    }

    /// Bytes sitting in the input buffer before the host sends anything.
    pub(crate) fn with_stale_input(mut self, bytes: &[u8]) -> Self {
        self.receive(bytes);
        self
    }

    /// Unsolicited output from the board's application.
    pub(crate) fn receive(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes);
    }

    /// Frames whose first byte is `opcode`.
    pub(crate) fn frames_with_opcode(&self, opcode: u8) -> Vec<&Vec<u8>> {
        self.frames
            .iter()
            .filter(|f| f.first() == Some(&opcode))
            .collect()
    }

    fn status_reply(opcode: u8, status: u8) -> Vec<u8> {
        let mut reply = vec![0u8; 10];
        reply[0] = opcode;
        reply[9] = status;
        reply
    }

    fn respond(&mut self, frame: &[u8]) {
        self.frames.push(frame.to_vec());
        if self.silent {
            return;
        }
        let reply = match frame {
            [0x05, 0xAA] => vec![self.handshake_reply],
            [0x05, 0xCC] | [0x05, 0xCD] => Vec::new(),
            [0x05, 0xBB] => vec![0x01],
            [0x55] => vec![0x69],
            [0x03, ..] => Self::status_reply(0x03, self.erase_status),
            [op @ (0x02 | 0x07), ..] => {
                let index = self.writes_seen;
                self.writes_seen += 1;
                let status = match self.fail_write_at {
                    Some(at) if index >= at => self.write_status,
                    _ => 0x01,
                };
                Self::status_reply(*op, status)
            },
            [0x08, ..] => {
                let mut reply = vec![0u8; 11];
                reply[0] = 0x08;
                let [lo, hi] = self.checksum.to_le_bytes();
                reply[9] = lo;
                reply[10] = hi;
                reply
            },
            _ => Vec::new(),
        };
        self.rx.extend(reply);
    }
}

impl Read for SimulatedBoard {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            },
            None => {
                std::thread::sleep(IDLE_POLL.min(self.timeout));
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            },
        }
    }
}

impl Write for SimulatedBoard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let frame = std::mem::take(&mut self.pending);
            self.respond(&frame);
        }
        Ok(())
    }
}

impl Port for SimulatedBoard {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        self.clears += 1;
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_reply() {
        let mut board = SimulatedBoard::new();
        board.write_all_bytes(&[0x05, 0xAA]).unwrap();
        assert_eq!(board.read_byte().unwrap(), Some(0x99));
        assert_eq!(board.read_byte().unwrap(), None);
    }

    #[test]
    fn test_checksum_reply_layout() {
        let mut board = SimulatedBoard::new().with_checksum(0xBEEF);
        board
            .write_all_bytes(&[0x08, 0x00, 0xF7, 0x00, 0x00, 0x00, 0x09, 0x00, 0x00])
            .unwrap();
        let reply: Vec<u8> = std::iter::from_fn(|| board.read_byte().unwrap()).collect();
        assert_eq!(reply.len(), 11);
        assert_eq!(reply[9], 0xEF);
        assert_eq!(reply[10], 0xBE);
    }

    #[test]
    fn test_closed_board_rejects_io() {
        let mut board = SimulatedBoard::new();
        board.close().unwrap();
        assert!(board.write_all_bytes(&[0x55]).is_err());
    }
}
