//! PICDuino support: a PIC16 USB bridge in front of a PIC18 bootloader.

pub mod protocol;
pub mod session;

pub use {
    protocol::Request,
    session::{ProtocolSession, SessionState},
};
