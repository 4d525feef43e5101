//! Byte-oriented character channel used by the target session.
//!
//! The session needs exactly three operations from the link: a blocking
//! read, a non-blocking poll and a blocking write. Bare-metal UART drivers
//! implement [`Channel`] directly; on a host the [`PortChannel`] adapter
//! provides it on top of any [`Port`].

use crate::error::{Error, Result};
use crate::port::Port;
use log::trace;
use std::io::ErrorKind;
use std::time::Duration;

/// Default time a single poll waits on a port before reporting "no byte".
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Minimal capability interface of a character link.
pub trait Channel {
    /// Block until one byte arrives.
    fn read_byte(&mut self) -> Result<u8>;

    /// Return a byte if one is available, without waiting for one.
    fn poll_byte(&mut self) -> Result<Option<u8>>;

    /// Send one byte; returns once it was handed to the link.
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Send a byte string.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        bytes
            .iter()
            .try_for_each(|&b| self.write_byte(b))
    }
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn read_byte(&mut self) -> Result<u8> {
        (**self).read_byte()
    }

    fn poll_byte(&mut self) -> Result<Option<u8>> {
        (**self).poll_byte()
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        (**self).write_byte(byte)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_bytes(bytes)
    }
}

/// [`Channel`] over a host [`Port`].
///
/// The port timeout is set to a short poll interval: a timed-out read is a
/// poll that found nothing, and a blocking read simply polls until a byte
/// shows up. Reads and polls fail with [`Error::Interrupted`] once the
/// embedding application requested an interruption.
pub struct PortChannel<P: Port> {
    port: P,
}

impl<P: Port> PortChannel<P> {
    /// Wrap a port, polling with [`DEFAULT_POLL_INTERVAL`].
    pub fn new(port: P) -> Result<Self> {
        Self::with_poll_interval(port, DEFAULT_POLL_INTERVAL)
    }

    /// Wrap a port with a custom poll interval.
    pub fn with_poll_interval(mut port: P, interval: Duration) -> Result<Self> {
        port.set_timeout(interval)?;
        Ok(Self { port })
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the channel and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }
}

impl<P: Port> Channel for PortChannel<P> {
    fn read_byte(&mut self) -> Result<u8> {
        loop {
            if let Some(byte) = self.poll_byte()? {
                return Ok(byte);
            }
        }
    }

    fn poll_byte(&mut self) -> Result<Option<u8>> {
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => {
                trace!("rx {:02X}", buf[0]);
                Ok(Some(buf[0]))
            },
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        trace!("tx {byte:02X}");
        self.port.write_all_bytes(&[byte])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("tx {} bytes", bytes.len());
        self.port.write_all_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// Port that replays scripted reads; `None` entries time out.
    #[derive(Default)]
    struct ScriptedPort {
        reads: VecDeque<Option<u8>>,
        written: Vec<u8>,
        timeout: Duration,
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Some(b)) => {
                    buf[0] = b;
                    Ok(1)
                },
                Some(None) => Err(io::Error::new(ErrorKind::TimedOut, "timeout")),
                None => Err(io::Error::new(ErrorKind::BrokenPipe, "script exhausted")),
            }
        }
    }

    impl Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for ScriptedPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_sets_poll_interval() {
        let channel = PortChannel::new(ScriptedPort::default()).unwrap();
        assert_eq!(channel.port().timeout(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn test_poll_reports_timeout_as_none() {
        let port = ScriptedPort {
            reads: VecDeque::from([None, Some(0x42)]),
            ..Default::default()
        };
        let mut channel = PortChannel::new(port).unwrap();
        assert_eq!(channel.poll_byte().unwrap(), None);
        assert_eq!(channel.poll_byte().unwrap(), Some(0x42));
    }

    #[test]
    fn test_read_waits_through_timeouts() {
        let port = ScriptedPort {
            reads: VecDeque::from([None, None, None, Some(0x17)]),
            ..Default::default()
        };
        let mut channel = PortChannel::new(port).unwrap();
        assert_eq!(channel.read_byte().unwrap(), 0x17);
    }

    #[test]
    fn test_hard_errors_propagate() {
        let mut channel = PortChannel::new(ScriptedPort::default()).unwrap();
        assert!(matches!(channel.read_byte(), Err(Error::Io(_))));
    }

    #[test]
    fn test_writes_reach_port() {
        let mut channel = PortChannel::new(ScriptedPort::default()).unwrap();
        channel.write_byte(b'K').unwrap();
        channel.write_bytes(b"ok").unwrap();
        assert_eq!(channel.into_port().written, b"Kok");
    }
}
