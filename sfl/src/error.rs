//! Error types for sfl.

use std::io;
use thiserror::Error;

/// Result type for sfl operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sfl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the character channel or a file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The handshake deadline ran out before the acknowledge magic arrived.
    #[error("Handshake timed out after {polls} polls")]
    HandshakeTimeout {
        /// Number of polls spent waiting.
        polls: u32,
    },

    /// The shared failure budget ran out; the session was torn down.
    #[error("Too many consecutive errors ({failures}), aborting")]
    TooManyFailures {
        /// Consecutive failures counted when the session gave up.
        failures: u8,
    },

    /// A frame was announced but not delivered within the frame deadline.
    #[error("Frame stalled after {received} of {expected} bytes")]
    FrameTimeout {
        /// Bytes received so far.
        received: usize,
        /// Bytes the frame header announced.
        expected: usize,
    },

    /// Host-side timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Unexpected data from the other end.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The target refused a frame.
    #[error("Target rejected {command}: {reason}")]
    Rejected {
        /// Name of the refused command.
        command: &'static str,
        /// Acknowledge description.
        reason: &'static str,
    },

    /// Payload does not fit in a frame.
    #[error("Payload of {0} bytes exceeds the 255-byte frame limit")]
    PayloadTooLarge(usize),

    /// The memory capability refused a write.
    #[error("Write of {len} bytes at {address:#010x} refused")]
    MemoryRejected {
        /// First address of the refused write.
        address: u32,
        /// Number of bytes in the refused write.
        len: usize,
    },

    /// The embedding application asked to stop.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
