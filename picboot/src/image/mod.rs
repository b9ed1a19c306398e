//! Firmware image formats.

pub mod hex;

pub use hex::{Firmware, HexParser, HexRecord, Opcode, RecordType, WriteCommand};
