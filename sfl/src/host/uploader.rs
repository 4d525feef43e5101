//! Uploader driving a target session from a PC.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::wire::{Ack, Frame, MAGIC_ACK, MAGIC_REQUEST, MAX_LOAD_CHUNK, MagicMatcher};
use log::{debug, info, trace, warn};
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

/// Time to wait for the target's request magic.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time to wait for the acknowledge of one frame.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of handshake attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: usize = 3;

/// Resends of one frame after a CRC error or a missing acknowledge.
///
/// One frame is sent at most four times, leaving the target's failure
/// budget of five untouched by a frame the host gives up on.
pub const DEFAULT_MAX_RETRIES: u8 = 3;

/// Port read timeout while polling.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Delay between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Uploader tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderConfig {
    /// Time to wait for the request magic in one connection attempt.
    pub handshake_timeout: Duration,
    /// Time to wait for the acknowledge byte of a frame.
    pub ack_timeout: Duration,
    /// Number of connection attempts.
    pub connect_attempts: usize,
    /// Resends of a frame before giving up.
    pub max_retries: u8,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Outcome of waiting for one acknowledge.
enum Reply {
    Ack(Ack),
    Silence,
}

/// Host end of a loader session.
///
/// Generic over the port type `P` so tests and other transports can stand in
/// for a real serial device.
pub struct Uploader<P: Port> {
    port: P,
    config: UploaderConfig,
}

impl<P: Port> Uploader<P> {
    /// Create an uploader with the default configuration.
    pub fn new(port: P) -> Self {
        Self::with_config(port, UploaderConfig::default())
    }

    /// Create an uploader with a custom configuration.
    pub fn with_config(port: P, config: UploaderConfig) -> Self {
        Self { port, config }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the uploader and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Wait for a target and complete the handshake.
    ///
    /// The target announces itself once per boot, so the user usually has to
    /// reset the board while this is waiting.
    pub fn connect(&mut self) -> Result<()> {
        info!("Waiting for target on {}...", self.port.name());
        self.port.set_timeout(READ_TIMEOUT)?;

        let attempts = self.config.connect_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                info!("Connection attempt {attempt}/{attempts}");
            }

            match self.try_connect() {
                Ok(()) => return Ok(()),
                Err(Error::Interrupted) => return Err(Error::Interrupted),
                Err(e) if attempt < attempts => {
                    warn!("Connection failed (attempt {attempt}/{attempts}): {e}");
                    thread::sleep(CONNECT_RETRY_DELAY);
                },
                Err(e) => return Err(e),
            }
        }

        Err(Error::Timeout(format!(
            "Connection failed after {attempts} attempts"
        )))
    }

    fn try_connect(&mut self) -> Result<()> {
        self.port.clear_buffers()?;

        let start = Instant::now();
        let mut matcher = MagicMatcher::new(MAGIC_REQUEST);
        let mut buf = [0u8; 64];

        while start.elapsed() < self.config.handshake_timeout {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            match self.port.read(&mut buf) {
                Ok(n) => {
                    for (i, &byte) in buf[..n].iter().enumerate() {
                        if matcher.feed(byte) {
                            if i + 1 < n {
                                debug!("Dropping {} bytes after the request magic", n - i - 1);
                            }
                            self.port.write_all_bytes(MAGIC_ACK)?;
                            info!("Target connected");
                            return Ok(());
                        }
                    }
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Err(Error::Timeout(format!(
            "No request from target after {} seconds",
            self.config.handshake_timeout.as_secs()
        )))
    }

    /// Send one frame and wait for its acknowledge, resending as needed.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        let name = frame.command_name();
        let sends = u32::from(self.config.max_retries) + 1;

        for attempt in 1..=sends {
            trace!("Sending {name} ({} bytes), attempt {attempt}", bytes.len());
            self.port.write_all_bytes(&bytes)?;

            match self.read_ack()? {
                Reply::Ack(Ack::Success) => return Ok(()),
                Reply::Ack(Ack::CrcError) => {
                    warn!("Target reported a CRC error for {name} (attempt {attempt}/{sends})");
                },
                Reply::Ack(ack) => {
                    return Err(Error::Rejected {
                        command: name,
                        reason: ack.description(),
                    });
                },
                Reply::Silence => {
                    warn!("No acknowledge for {name} (attempt {attempt}/{sends})");
                },
            }
        }

        Err(Error::Timeout(format!(
            "{name} not acknowledged after {sends} attempts"
        )))
    }

    fn read_ack(&mut self) -> Result<Reply> {
        let start = Instant::now();
        let mut buf = [0u8; 1];

        while start.elapsed() < self.config.ack_timeout {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            match self.port.read(&mut buf) {
                Ok(1) => {
                    return Ack::from_byte(buf[0])
                        .map(Reply::Ack)
                        .ok_or_else(|| {
                            Error::Protocol(format!("unexpected reply byte 0x{:02X}", buf[0]))
                        });
                },
                Ok(_) => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(Reply::Silence)
    }

    /// Load `data` at `address`, one frame per chunk.
    ///
    /// `progress` is called with `(bytes_sent, total)` after every chunk.
    pub fn load<F>(&mut self, address: u32, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let total = data.len();
        let end = u64::from(address) + total as u64;
        if end > u64::from(u32::MAX) + 1 {
            return Err(Error::Config(format!(
                "{total} bytes at 0x{address:08X} run past the 32-bit address space"
            )));
        }

        debug!("Loading {total} bytes at 0x{address:08X}");
        let mut sent = 0usize;
        for chunk in data.chunks(MAX_LOAD_CHUNK) {
            // sent + chunk fits in u32 per the range check above
            let chunk_address = address.wrapping_add(sent as u32);
            self.send(&Frame::load(chunk_address, chunk)?)?;
            sent += chunk.len();
            progress(sent, total);
        }
        Ok(())
    }

    /// Pass the kernel command line address.
    pub fn set_cmdline(&mut self, address: u32) -> Result<()> {
        self.send(&Frame::cmdline(address))
    }

    /// Pass the initial ramdisk range.
    pub fn set_initrd(&mut self, start: u32, end: u32) -> Result<()> {
        self.send(&Frame::initrd_start(start))?;
        self.send(&Frame::initrd_end(end))
    }

    /// Transfer control to `address`. The session is over afterwards.
    pub fn jump(&mut self, address: u32) -> Result<()> {
        info!("Jumping to 0x{address:08X}");
        self.send(&Frame::jump(address))
    }

    /// End the session without booting.
    pub fn abort(&mut self) -> Result<()> {
        info!("Aborting session");
        self.send(&Frame::abort())
    }

    /// Close the port.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }
}
