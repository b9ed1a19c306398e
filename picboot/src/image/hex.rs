//! Intel HEX firmware images.
//!
//! Turns the text records produced by the PIC toolchain into the write
//! commands understood by the PICDuino bootloader.
//!
//! ## Record Format
//!
//! ```text
//! +---+--------+---------+------+-----------+----------+
//! | : | Length | Address | Type |   Data    | Checksum |
//! +---+--------+---------+------+-----------+----------+
//! |   | 1 byte | 2 bytes | 1    | variable  | 1 byte   |
//! +---+--------+---------+------+-----------+----------+
//! ```
//!
//! Every field is written as pairs of hex digits. The checksum is the
//! two's complement of the sum of all preceding bytes.
//!
//! ## Bootloader Rules
//!
//! - The bootloader lives below [`TargetConfig::app_start`]. Reset and
//!   interrupt vectors linked at page zero are relocated into the
//!   application region; any other data below the boundary is refused.
//! - Payload bytes equal to [`TargetConfig::escape_byte`] are sent twice.
//! - The one's complement of every program-memory payload byte is summed
//!   into a 16-bit checksum that the device reproduces after programming.

use {
    crate::{
        error::{HexParseError, Result},
        target::TargetConfig,
    },
    byteorder::{LittleEndian, WriteBytesExt},
    log::{debug, trace, warn},
    std::{fs, path::Path},
};

/// Bytes in a record besides its data: length, address (2), type, checksum.
const RECORD_OVERHEAD: usize = 5;

/// Bytes in a write command before its payload.
pub const WRITE_HEADER_LEN: usize = 9;

/// Intel HEX record types accepted by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Data bytes at a 16-bit offset.
    Data = 0x00,
    /// Last record of the file.
    EndOfFile = 0x01,
    /// Upper 16 bits of the address for subsequent data records.
    ExtendedAddress = 0x04,
}

impl RecordType {
    /// Decode a record type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Data),
            0x01 => Some(Self::EndOfFile),
            0x04 => Some(Self::ExtendedAddress),
            _ => None,
        }
    }
}

/// One validated line of an Intel HEX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Declared number of data bytes.
    pub byte_count: u8,
    /// 16-bit load offset.
    pub address: u16,
    /// Record type.
    pub record_type: RecordType,
    /// Data bytes.
    pub data: Vec<u8>,
    /// Trailing checksum byte.
    pub checksum: u8,
}

impl HexRecord {
    /// Parse and validate a single record.
    ///
    /// `line` is the 1-based line number used in errors.
    pub fn parse(line: usize, text: &str) -> std::result::Result<Self, HexParseError> {
        let malformed = |reason: &str| HexParseError::MalformedRecord {
            line,
            reason: reason.to_string(),
        };

        let text = text.trim();
        let digits = text
            .strip_prefix(':')
            .ok_or_else(|| malformed("missing ':'"))?;

        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed("non-hex character"));
        }
        if digits.len() % 2 != 0 {
            return Err(malformed("odd number of hex digits"));
        }

        let bytes = digits
            .as_bytes()
            .chunks(2)
            .map(|pair| (hex_value(pair[0]) << 4) | hex_value(pair[1]))
            .collect::<Vec<u8>>();

        let Some(&length) = bytes.first() else {
            return Err(malformed("empty record"));
        };

        let declared = usize::from(length);
        let actual = bytes.len().saturating_sub(RECORD_OVERHEAD);
        if bytes.len() < RECORD_OVERHEAD || declared != actual {
            return Err(HexParseError::LengthMismatch {
                line,
                declared,
                actual,
            });
        }

        let (body, tail) = bytes.split_at(bytes.len() - 1);
        let expected = record_checksum(body);
        if expected != tail[0] {
            return Err(HexParseError::ChecksumMismatch {
                line,
                expected,
                actual: tail[0],
            });
        }

        let record_type =
            RecordType::from_byte(bytes[3]).ok_or(HexParseError::UnsupportedRecord {
                line,
                record_type: bytes[3],
            })?;

        Ok(Self {
            byte_count: bytes[0],
            address: u16::from_be_bytes([bytes[1], bytes[2]]),
            record_type,
            data: bytes[4..bytes.len() - 1].to_vec(),
            checksum: tail[0],
        })
    }
}

/// Two's-complement checksum of a record's bytes (excluding the checksum).
pub fn record_checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// Value of one ASCII hex digit; callers check `is_ascii_hexdigit` first.
fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Bootloader write opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Write program memory (extended address zero).
    WriteFlash = 0x02,
    /// Write configuration/EEPROM space (any other extended address).
    WriteConfig = 0x07,
}

/// One bootloader write instruction built from a data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    opcode: Opcode,
    length: u8,
    unlock: [u8; 2],
    address: u16,
    extended_address: u16,
    payload: Vec<u8>,
    line: usize,
}

impl WriteCommand {
    /// Opcode selected from the extended address.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Number of data bytes before escaping.
    pub fn length(&self) -> u8 {
        self.length
    }

    /// 16-bit target address after vector relocation.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Upper 16 bits of the target address.
    pub fn extended_address(&self) -> u16 {
        self.extended_address
    }

    /// Full 32-bit target address.
    pub fn full_address(&self) -> u32 {
        (u32::from(self.extended_address) << 16) | u32::from(self.address)
    }

    /// Payload with escape bytes already doubled.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Source line of the data record.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Whether the command targets program memory.
    pub fn is_program_memory(&self) -> bool {
        self.opcode == Opcode::WriteFlash
    }

    /// Build the bytes sent to the bootloader.
    ///
    /// ```text
    /// <op> <len> 00 <unlock:2> <addr:2 LE> <ext:2 LE> <payload...>
    /// ```
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn frame(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WRITE_HEADER_LEN + self.payload.len());
        buf.push(self.opcode as u8);
        buf.push(self.length);
        buf.push(0x00);
        buf.extend_from_slice(&self.unlock);
        buf.write_u16::<LittleEndian>(self.address)
            .unwrap();
        buf.write_u16::<LittleEndian>(self.extended_address)
            .unwrap();
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// A parsed firmware image: ordered write commands plus the expected
/// program-memory checksum.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Firmware {
    /// Write commands in file order.
    pub commands: Vec<WriteCommand>,
    /// Sum of the one's complement of every program-memory payload byte,
    /// truncated to 16 bits.
    pub checksum: u16,
}

impl Firmware {
    /// Load and parse a HEX file.
    pub fn from_file<P: AsRef<Path>>(path: P, config: &TargetConfig) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::parse_str(&text, config)
    }

    /// Parse HEX text.
    pub fn parse_str(text: &str, config: &TargetConfig) -> Result<Self> {
        Ok(HexParser::parse(config, text.lines())?)
    }

    /// Number of write commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the image contains no data.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of commands targeting program memory.
    pub fn program_commands(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| c.is_program_memory())
            .count()
    }

    /// Number of data bytes across all records, before escaping.
    pub fn data_bytes(&self) -> usize {
        self.commands
            .iter()
            .map(|c| usize::from(c.length()))
            .sum()
    }

    /// Lowest and highest full address touched in program memory.
    pub fn program_range(&self) -> Option<(u32, u32)> {
        self.commands
            .iter()
            .filter(|c| c.is_program_memory() && c.length() > 0)
            .map(|c| {
                let start = c.full_address();
                (start, start + u32::from(c.length()) - 1)
            })
            .reduce(|(lo, hi), (s, e)| (lo.min(s), hi.max(e)))
    }
}

/// Streaming Intel HEX parser.
///
/// Records are fed one line at a time. A line that fails validation leaves
/// the parser state untouched.
#[derive(Debug)]
pub struct HexParser<'a> {
    config: &'a TargetConfig,
    extended_address: u16,
    commands: Vec<WriteCommand>,
    checksum: u16,
    line: usize,
    finished: bool,
}

impl<'a> HexParser<'a> {
    /// Create a parser for the given target.
    pub fn new(config: &'a TargetConfig) -> Self {
        Self {
            config,
            extended_address: 0,
            commands: Vec::new(),
            checksum: 0,
            line: 0,
            finished: false,
        }
    }

    /// Parse a complete sequence of lines.
    pub fn parse<I, S>(
        config: &'a TargetConfig,
        lines: I,
    ) -> std::result::Result<Firmware, HexParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parser = Self::new(config);
        let mut lines = lines.into_iter();

        for line in lines.by_ref() {
            if parser.feed(line.as_ref())? {
                break;
            }
        }

        let ignored = lines.count();
        if ignored > 0 {
            warn!("Ignoring {ignored} line(s) after end-of-file record");
        }

        parser.finish()
    }

    /// Current value of the extended address register.
    pub fn extended_address(&self) -> u16 {
        self.extended_address
    }

    /// Commands built so far.
    pub fn commands(&self) -> &[WriteCommand] {
        &self.commands
    }

    /// Feed the next line. Returns `true` once the end-of-file record is seen.
    pub fn feed(&mut self, text: &str) -> std::result::Result<bool, HexParseError> {
        self.line += 1;
        if self.finished {
            return Ok(true);
        }

        let record = HexRecord::parse(self.line, text)?;
        trace!(
            "line {}: {:?} @ 0x{:04X} ({} bytes)",
            self.line, record.record_type, record.address, record.byte_count
        );

        match record.record_type {
            RecordType::ExtendedAddress => {
                let &[hi, lo] = record.data.as_slice() else {
                    return Err(HexParseError::MalformedRecord {
                        line: self.line,
                        reason: "extended address record must carry 2 bytes".into(),
                    });
                };
                self.extended_address = u16::from_be_bytes([hi, lo]);
                debug!("Extended address set to 0x{:04X}", self.extended_address);
            },
            RecordType::Data => {
                let command = self.build_command(&record)?;
                if command.is_program_memory() {
                    for byte in &record.data {
                        self.checksum = self
                            .checksum
                            .wrapping_add(u16::from(!byte));
                    }
                }
                self.commands.push(command);
            },
            RecordType::EndOfFile => {
                debug!(
                    "End of file: {} write commands, checksum 0x{:04X}",
                    self.commands.len(),
                    self.checksum
                );
                self.finished = true;
            },
        }

        Ok(self.finished)
    }

    /// Finish parsing. Fails unless an end-of-file record was seen.
    pub fn finish(self) -> std::result::Result<Firmware, HexParseError> {
        if !self.finished {
            return Err(HexParseError::MissingEof);
        }
        Ok(Firmware {
            commands: self.commands,
            checksum: self.checksum,
        })
    }

    fn build_command(&self, record: &HexRecord) -> std::result::Result<WriteCommand, HexParseError> {
        let config = self.config;
        let mut address = record.address;

        if self.extended_address == 0 {
            let overwrite = HexParseError::BootloaderOverwrite {
                line: self.line,
                address: record.address,
                boundary: config.app_start,
            };

            match u8::try_from(address) {
                Ok(offset) if config.is_vector_offset(offset) => {
                    address = u16::try_from(config.app_start + u32::from(offset))
                        .map_err(|_| overwrite)?;
                    debug!(
                        "Relocated vector 0x{:04X} -> 0x{address:04X}",
                        record.address
                    );
                },
                _ if u32::from(address) < config.app_start => return Err(overwrite),
                _ => {},
            }
        }

        let opcode = if self.extended_address == 0 {
            Opcode::WriteFlash
        } else {
            Opcode::WriteConfig
        };

        let escape = config.escape_byte;
        let mut payload = Vec::with_capacity(record.data.len());
        for &byte in &record.data {
            payload.push(byte);
            if byte == escape {
                payload.push(escape);
            }
        }

        Ok(WriteCommand {
            opcode,
            length: record.byte_count,
            unlock: config.unlock_sequence,
            address,
            extended_address: self.extended_address,
            payload,
            line: self.line,
        })
    }
}
