//! Read-only console on the board's serial output.
//!
//! After an upload the PIC16 bridge forwards the application's UART output.
//! The monitor decodes it as lossy UTF-8 and hands it out line by line.

use {
    crate::{
        error::{Error, Result},
        port::Port,
    },
    log::debug,
};

/// Upper bound of bytes read by one [`MonitorSession::poll`].
const POLL_CHUNK: usize = 256;

/// A monitor session owning its port.
///
/// The port is closed when the session is dropped.
pub struct MonitorSession<P: Port> {
    port: P,
    raw: Vec<u8>,
    text: String,
}

impl<P: Port> MonitorSession<P> {
    /// Monitor an already opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            raw: Vec::new(),
            text: String::new(),
        }
    }

    /// Get the port name.
    pub fn port_name(&self) -> &str {
        self.port.name()
    }

    /// Read whatever arrives within one read timeout and return the lines
    /// completed by it.
    pub fn poll(&mut self) -> Result<Vec<String>> {
        for _ in 0..POLL_CHUNK {
            match self.port.read_byte()? {
                Some(byte) => self.raw.push(byte),
                None => break,
            }
        }
        self.text
            .push_str(&drain_utf8_lossy(&mut self.raw));
        Ok(self.take_lines())
    }

    /// Call `on_line` for every received line until the embedding
    /// application requests interruption.
    pub fn run<F>(&mut self, mut on_line: F) -> Result<()>
    where
        F: FnMut(&str),
    {
        debug!("Monitoring {}", self.port.name());
        while !crate::is_interrupted_requested() {
            for line in self.poll()? {
                on_line(&line);
            }
        }
        Err(Error::Cancelled)
    }

    /// Text received after the last complete line.
    pub fn partial_line(&self) -> &str {
        &self.text
    }

    fn take_lines(&mut self) -> Vec<String> {
        let Some(end) = self.text.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.text.split_off(end + 1);
        let complete = std::mem::replace(&mut self.text, rest);
        complete
            .lines()
            .map(clean_monitor_text)
            .collect()
    }
}

#[cfg(feature = "native")]
impl MonitorSession<crate::port::NativePort> {
    /// Open a monitor session on the specified port and baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let config = crate::port::SerialConfig::new(port_name, baud_rate)
            .with_timeout(std::time::Duration::from_millis(50));
        Ok(Self::new(crate::port::NativePort::open(&config)?))
    }
}

impl<P: Port> Drop for MonitorSession<P> {
    fn drop(&mut self) {
        if let Err(e) = self.port.close() {
            debug!("Failed to close {}: {e}", self.port.name());
        }
    }
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('�');
                        let drain_to = valid_up_to
                            .saturating_add(invalid_len)
                            .min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Drop control characters other than tabs from one line of output.
pub fn clean_monitor_text(line: &str) -> String {
    line.chars()
        .filter(|&ch| ch == '\t' || !ch.is_control())
        .collect()
}
