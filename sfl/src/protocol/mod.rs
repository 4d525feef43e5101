//! Protocol implementations.

pub mod crc;
pub mod wire;

// Re-export common types
pub use wire::{Ack, Command, Frame, MagicMatcher};
