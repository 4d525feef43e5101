//! Frame reader: deserializes one frame from the channel.
//!
//! No validation happens here. The reader pulls the 4-byte header and then
//! exactly `length` payload bytes, never more.

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::protocol::wire::{Frame, HEADER_LEN};
use log::trace;

/// How long the reader waits for each byte of an announced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameDeadline {
    /// Block until the byte arrives, however long that takes.
    #[default]
    Unbounded,
    /// Give up after this many empty polls for a single byte.
    Polls(u32),
}

struct FrameBytes<'a, C: Channel> {
    channel: &'a mut C,
    deadline: FrameDeadline,
    received: usize,
    expected: usize,
}

impl<C: Channel> FrameBytes<'_, C> {
    fn next(&mut self) -> Result<u8> {
        let byte = match self.deadline {
            FrameDeadline::Unbounded => self.channel.read_byte()?,
            FrameDeadline::Polls(limit) => self.poll_within(limit)?,
        };
        self.received += 1;
        Ok(byte)
    }

    fn poll_within(&mut self, limit: u32) -> Result<u8> {
        for _ in 0..limit {
            if let Some(byte) = self.channel.poll_byte()? {
                return Ok(byte);
            }
        }
        Err(Error::FrameTimeout {
            received: self.received,
            expected: self.expected,
        })
    }
}

/// Read one frame into `frame`.
///
/// Only `length`, `crc`, `cmd` and the first `length` payload bytes are
/// overwritten; the rest of the payload buffer keeps its previous contents.
pub fn read_frame<C: Channel>(
    channel: &mut C,
    frame: &mut Frame,
    deadline: FrameDeadline,
) -> Result<()> {
    let mut bytes = FrameBytes {
        channel,
        deadline,
        received: 0,
        expected: HEADER_LEN,
    };

    frame.length = bytes.next()?;
    bytes.expected = HEADER_LEN + usize::from(frame.length);
    frame.crc = u16::from_be_bytes([bytes.next()?, bytes.next()?]);
    frame.cmd = bytes.next()?;
    for slot in &mut frame.payload[..usize::from(frame.length)] {
        *slot = bytes.next()?;
    }

    trace!(
        "Frame cmd=0x{:02X} len={} crc=0x{:04X}",
        frame.cmd, frame.length, frame.crc
    );
    Ok(())
}
