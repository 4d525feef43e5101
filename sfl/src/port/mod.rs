//! Port abstraction for serial communication.
//!
//! A `Port` is a byte stream with a read timeout. The host uploader talks to
//! it directly; the target session reaches it through
//! [`PortChannel`](crate::channel::PortChannel), which turns timed reads into
//! the blocking/non-blocking byte contract of a [`Channel`](crate::Channel).
//!
//! ```text
//! +------------------+     +------------------+
//! |  Host Uploader   |     |  Target Session  |
//! +--------+---------+     +--------+---------+
//!          |                        |
//!          |               +--------+---------+
//!          |               |   PortChannel    |
//!          |               +--------+---------+
//!          v                        v
//! +--------+------------------------+---------+
//! |                 Port Trait                |
//! +--------+----------------------------------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! Anything that is `Read + Write` with a timeout can stand in for a
//! device, which is how the tests drive both ends in memory.

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Settings used to open a serial device.
///
/// SFL always runs 8N1 without flow control, so only the device, the line
/// rate and the read timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path or name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port_name: String,
    /// Line rate in bits per second.
    pub baud_rate: u32,
    /// Read timeout; expiry surfaces as `TimedOut`.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(1000),
        }
    }
}

impl SerialConfig {
    /// Settings for `port_name` at `baud_rate` with the default timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Replace the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A serial device reported by a [`PortEnumerator`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Path or name accepted by [`SerialConfig::new`].
    pub name: String,
    /// USB vendor ID, for USB adapters.
    pub vid: Option<u16>,
    /// USB product ID, for USB adapters.
    pub pid: Option<u16>,
    /// Adapter manufacturer.
    pub manufacturer: Option<String>,
    /// Adapter product name; shown by `sfl list-ports`.
    pub product: Option<String>,
    /// Adapter serial number.
    pub serial_number: Option<String>,
}

/// A serial link as seen by the uploader and by [`PortChannel`](crate::PortChannel).
///
/// Reads honour the configured timeout and report expiry as
/// [`std::io::ErrorKind::TimedOut`].
pub trait Port: Read + Write + Send {
    /// Change the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Current read timeout.
    fn timeout(&self) -> Duration;

    /// Drop anything pending in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Device name the port was opened with.
    fn name(&self) -> &str;

    /// Release the device; later I/O fails with `NotConnected`.
    fn close(&mut self) -> Result<()>;

    /// Write `buf` and flush it to the line.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Discovery of serial devices, independent of any open port.
pub trait PortEnumerator {
    /// Every serial device the system currently reports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
