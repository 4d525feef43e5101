//! SFL wire format: command and acknowledge codes, handshake magic and frames.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+---------+-----+--------------------+
//! | Length |  CRC16  | Cmd |      Payload       |
//! +--------+---------+-----+--------------------+
//! | 1 byte | 2 bytes | 1   |   Length bytes     |
//! +--------+---------+-----+--------------------+
//! |   N    | BE crc  | cmd | address ‖ data ... |
//! +--------+---------+-----+--------------------+
//! ```
//!
//! The CRC covers the command byte followed by the first `N` payload bytes.
//! Every frame is answered by exactly one acknowledge byte, except the frame
//! that exhausts the target's failure budget.

use crate::error::{Error, Result};
use crate::protocol::crc::{crc16_xmodem, crc16_xmodem_update};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

/// Maximum number of payload bytes in one frame.
pub const MAX_PAYLOAD: usize = 255;

/// Length, CRC and command bytes preceding the payload.
pub const HEADER_LEN: usize = 4;

/// Size of the big-endian address/value word leading address-bearing payloads.
pub const WORD_LEN: usize = 4;

/// Largest data chunk a single `LOAD` frame can carry.
pub const MAX_LOAD_CHUNK: usize = MAX_PAYLOAD - WORD_LEN;

/// Length of both handshake magic strings.
pub const MAGIC_LEN: usize = 14;

/// Sent by the target to request a session.
pub const MAGIC_REQUEST: &[u8; MAGIC_LEN] = b"sL5DdSMmkekro\n";

/// Sent by the host to accept the session.
pub const MAGIC_ACK: &[u8; MAGIC_LEN] = b"z6IHG7cYDID6o\n";

/// SFL command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    /// End the session without booting (0x00).
    Abort = 0x00,
    /// Write data at an address (0x01).
    Load = 0x01,
    /// Transfer control to an address (0x02).
    Jump = 0x02,
    /// Set the kernel command line address (0x03).
    Cmdline = 0x03,
    /// Set the initrd start address (0x04).
    InitrdStart = 0x04,
    /// Set the initrd end address (0x05).
    InitrdEnd = 0x05,
}

impl Command {
    /// Decode a command byte, `None` for codes outside the protocol.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Abort),
            0x01 => Some(Self::Load),
            0x02 => Some(Self::Jump),
            0x03 => Some(Self::Cmdline),
            0x04 => Some(Self::InitrdStart),
            0x05 => Some(Self::InitrdEnd),
            _ => None,
        }
    }

    /// Protocol name of the command.
    pub fn name(self) -> &'static str {
        match self {
            Self::Abort => "ABORT",
            Self::Load => "LOAD",
            Self::Jump => "JUMP",
            Self::Cmdline => "CMDLINE",
            Self::InitrdStart => "INITRDSTART",
            Self::InitrdEnd => "INITRDEND",
        }
    }
}

/// Acknowledge codes sent back by the target, one per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Ack {
    /// Frame accepted and executed (`'K'`).
    Success = b'K',
    /// CRC mismatch, frame dropped (`'C'`).
    CrcError = b'C',
    /// Unrecognized command, frame dropped (`'U'`).
    UnknownCommand = b'U',
    /// Command could not be carried out (`'E'`).
    Error = b'E',
}

impl Ack {
    /// Decode an acknowledge byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'K' => Some(Self::Success),
            b'C' => Some(Self::CrcError),
            b'U' => Some(Self::UnknownCommand),
            b'E' => Some(Self::Error),
            _ => None,
        }
    }

    /// Human readable meaning.
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CrcError => "CRC error",
            Self::UnknownCommand => "unknown command",
            Self::Error => "command failed",
        }
    }
}

impl From<Ack> for u8 {
    fn from(ack: Ack) -> Self {
        ack as u8
    }
}

/// Checksum of a frame body: CRC-16/XMODEM over `cmd ‖ data`.
pub fn checksum(cmd: u8, data: &[u8]) -> u16 {
    crc16_xmodem_update(crc16_xmodem(&[cmd]), data)
}

/// Streaming matcher for a handshake magic string.
///
/// Counts consecutive matching bytes. A byte that breaks the run restarts
/// the count at 1 when it equals the first magic byte, at 0 otherwise.
#[derive(Debug, Clone)]
pub struct MagicMatcher {
    magic: &'static [u8],
    matched: usize,
}

impl MagicMatcher {
    /// Create a matcher for `magic`.
    pub fn new(magic: &'static [u8]) -> Self {
        Self { magic, matched: 0 }
    }

    /// Feed one received byte; returns `true` once the whole magic was seen.
    pub fn feed(&mut self, byte: u8) -> bool {
        if self.magic.get(self.matched) == Some(&byte) {
            self.matched += 1;
            if self.matched == self.magic.len() {
                self.matched = 0;
                return true;
            }
        } else if self.magic.first() == Some(&byte) {
            self.matched = 1;
        } else {
            self.matched = 0;
        }
        false
    }

    /// Number of bytes currently matched.
    pub fn matched(&self) -> usize {
        self.matched
    }
}

/// One SFL frame.
///
/// The payload is a fixed buffer; only the first `length` bytes are
/// meaningful. The target reuses a single `Frame` for a whole session so
/// bytes past `length` hold whatever an earlier frame left there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Number of meaningful payload bytes.
    pub length: u8,
    /// Checksum as transmitted.
    pub crc: u16,
    /// Command code as transmitted.
    pub cmd: u8,
    /// Payload buffer.
    pub payload: [u8; MAX_PAYLOAD],
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            length: 0,
            crc: 0,
            cmd: 0,
            payload: [0; MAX_PAYLOAD],
        }
    }
}

impl Frame {
    /// Build a frame with a correct checksum from a raw command byte.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(cmd: u8, data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(data.len()));
        }
        let mut frame = Self {
            length: data.len() as u8,
            cmd,
            ..Self::default()
        };
        frame.payload[..data.len()].copy_from_slice(data);
        frame.crc = frame.checksum();
        Ok(frame)
    }

    /// Build a `LOAD` frame writing `data` at `address`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn load(address: u32, data: &[u8]) -> Result<Self> {
        let mut payload = Vec::with_capacity(WORD_LEN + data.len());
        payload.write_u32::<BigEndian>(address).unwrap();
        payload.extend_from_slice(data);
        Self::new(Command::Load as u8, &payload)
    }

    /// Build a `JUMP` frame.
    pub fn jump(address: u32) -> Self {
        Self::with_word(Command::Jump, address)
    }

    /// Build a `CMDLINE` frame.
    pub fn cmdline(address: u32) -> Self {
        Self::with_word(Command::Cmdline, address)
    }

    /// Build an `INITRDSTART` frame.
    pub fn initrd_start(address: u32) -> Self {
        Self::with_word(Command::InitrdStart, address)
    }

    /// Build an `INITRDEND` frame.
    pub fn initrd_end(address: u32) -> Self {
        Self::with_word(Command::InitrdEnd, address)
    }

    /// Build an `ABORT` frame.
    pub fn abort() -> Self {
        let mut frame = Self {
            cmd: Command::Abort as u8,
            ..Self::default()
        };
        frame.crc = frame.checksum();
        frame
    }

    fn with_word(command: Command, word: u32) -> Self {
        let mut frame = Self {
            length: WORD_LEN as u8,
            cmd: command as u8,
            ..Self::default()
        };
        BigEndian::write_u32(&mut frame.payload[..WORD_LEN], word);
        frame.crc = frame.checksum();
        frame
    }

    /// Decoded command, `None` for unknown codes.
    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.cmd)
    }

    /// Meaningful payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.payload[..usize::from(self.length)]
    }

    /// Checksum computed over the command byte and meaningful payload.
    pub fn checksum(&self) -> u16 {
        checksum(self.cmd, self.data())
    }

    /// Whether the transmitted checksum matches the contents.
    pub fn is_intact(&self) -> bool {
        self.crc == self.checksum()
    }

    /// Big-endian word at the start of the payload buffer.
    ///
    /// Always decodes the first four buffer bytes, even when `length` is
    /// smaller; the missing bytes are leftovers from earlier frames.
    pub fn word(&self) -> u32 {
        BigEndian::read_u32(&self.payload[..WORD_LEN])
    }

    /// Data bytes of a `LOAD` frame (payload after the address word).
    pub fn load_data(&self) -> &[u8] {
        self.data().get(WORD_LEN..).unwrap_or(&[])
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + usize::from(self.length)
    }

    /// Serialize the frame in wire order.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.push(self.length);
        buf.extend_from_slice(&self.crc.to_be_bytes());
        buf.push(self.cmd);
        buf.extend_from_slice(self.data());
        buf
    }

    /// Name of the command for diagnostics.
    pub fn command_name(&self) -> &'static str {
        self.command().map_or("unknown command", Command::name)
    }
}
