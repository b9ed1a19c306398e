//! Target definitions.

pub mod config;
pub mod picduino;

pub use config::TargetConfig;
pub use picduino::session::{ProtocolSession, SessionState};
