//! # sfl
//!
//! Serial firmware loading: a small framed, checksum-verified command
//! protocol that lets a host push code and data into the memory of a
//! bare-metal target over a UART and then transfer control to it.
//!
//! This crate provides both ends of the link:
//!
//! - [`target`]: the loader session that runs on the device side. It
//!   performs the magic-string handshake, reads frames, verifies their
//!   CRC-16 and dispatches `LOAD`/`JUMP`/`CMDLINE`/`INITRDSTART`/
//!   `INITRDEND`/`ABORT` commands against a [`Machine`].
//! - [`host`]: the uploader that drives a session from a PC through a
//!   [`Port`].
//! - [`protocol`]: the wire format, CRC-16/XMODEM and the frame codec.
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use sfl::{NativePort, SerialConfig, Uploader};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut uploader = Uploader::new(port);
//!     uploader.connect()?;
//!
//!     let kernel = std::fs::read("kernel.bin")?;
//!     uploader.load(0x4000_0000, &kernel, |sent, total| {
//!         println!("{sent}/{total}");
//!     })?;
//!     uploader.jump(0x4000_0000)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod channel;
pub mod error;
pub mod host;
pub mod port;
pub mod protocol;
pub mod target;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    channel::{Channel, PortChannel},
    error::{Error, Result},
    host::{Uploader, UploaderConfig},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        crc::crc16_xmodem,
        wire::{Ack, Command, Frame, MagicMatcher},
    },
    target::{
        BootParams, BoundedMachine, FrameDeadline, Machine, Region, RetryBudget, Session,
        SessionConfig, SessionEnd,
    },
};
