//! Protocol primitives shared by every target.

pub mod exchange;

pub use exchange::{Exchange, classify, exchange, exchange_status, hex_dump, send};
