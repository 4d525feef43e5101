//! The loader session: handshake, then a frame/dispatch loop.
//!
//! Each received frame gets exactly one acknowledge byte, with one
//! exception: the frame that exhausts the [`RetryBudget`] is dropped
//! silently and the session ends with [`Error::TooManyFailures`].
//!
//! CRC mismatches and unknown commands draw on the same budget. Only a
//! successfully executed command refills it; a correct CRC on its own does
//! not.

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::protocol::wire::{Ack, Command, Frame};
use crate::target::handshake::{DEFAULT_HANDSHAKE_POLLS, handshake};
use crate::target::machine::{BootParams, Machine};
use crate::target::reader::{FrameDeadline, read_frame};
use log::{debug, error, info, warn};

/// Default number of consecutive failures after which the session gives up.
pub const DEFAULT_MAX_FAILURES: u8 = 5;

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Polls to wait for the handshake acknowledge.
    pub handshake_polls: u32,
    /// Consecutive failures tolerated before the session is torn down.
    pub max_failures: u8,
    /// Wait policy for bytes of an announced frame.
    pub frame_deadline: FrameDeadline,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_polls: DEFAULT_HANDSHAKE_POLLS,
            max_failures: DEFAULT_MAX_FAILURES,
            frame_deadline: FrameDeadline::Unbounded,
        }
    }
}

impl SessionConfig {
    /// Set the handshake deadline.
    #[must_use]
    pub fn with_handshake_polls(mut self, polls: u32) -> Self {
        self.handshake_polls = polls;
        self
    }

    /// Set the failure threshold.
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: u8) -> Self {
        self.max_failures = max_failures;
        self
    }

    /// Set the frame deadline.
    #[must_use]
    pub fn with_frame_deadline(mut self, deadline: FrameDeadline) -> Self {
        self.frame_deadline = deadline;
        self
    }
}

/// Count of consecutive per-frame failures against a fixed limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    failures: u8,
    limit: u8,
}

impl RetryBudget {
    /// A fresh budget allowing `limit - 1` consecutive failures.
    pub fn new(limit: u8) -> Self {
        Self { failures: 0, limit }
    }

    /// Budget after a successfully executed command.
    #[must_use]
    pub fn reset(self) -> Self {
        Self {
            failures: 0,
            ..self
        }
    }

    /// Budget after a failed frame.
    #[must_use]
    pub fn charge(self) -> Self {
        Self {
            failures: self.failures.saturating_add(1),
            ..self
        }
    }

    /// Consecutive failures so far.
    pub fn failures(self) -> u8 {
        self.failures
    }

    /// Whether the session must give up.
    pub fn is_exhausted(self) -> bool {
        self.failures >= self.limit
    }
}

/// Decision taken for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Send this acknowledge and wait for the next frame.
    Reply(Ack),
    /// Acknowledge and end the session; the host aborted.
    Finish,
    /// Acknowledge and transfer control to this address.
    Boot(u32),
    /// Stop without acknowledging; the failure budget is exhausted.
    GiveUp,
}

/// Command dispatcher owning the state accumulated during a session.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    params: BootParams,
    budget: RetryBudget,
    frames: u32,
    bytes_loaded: u64,
}

impl Dispatcher {
    /// Fresh dispatcher: zeroed boot parameters, full budget.
    pub fn new(max_failures: u8) -> Self {
        Self {
            params: BootParams::default(),
            budget: RetryBudget::new(max_failures),
            frames: 0,
            bytes_loaded: 0,
        }
    }

    /// Boot parameters accumulated so far.
    pub fn params(&self) -> BootParams {
        self.params
    }

    /// Current failure budget.
    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Decide what to do with `frame`, executing it against `machine`.
    pub fn dispatch<M: Machine>(&mut self, frame: &Frame, machine: &mut M) -> Verdict {
        self.frames = self.frames.wrapping_add(1);

        let expected = frame.checksum();
        if frame.crc != expected {
            warn!(
                "CRC mismatch on frame {}: got 0x{:04X}, computed 0x{expected:04X}",
                self.frames, frame.crc
            );
            return self.fail(Ack::CrcError);
        }

        let Some(command) = frame.command() else {
            warn!("Unknown command 0x{:02X}", frame.cmd);
            return self.fail(Ack::UnknownCommand);
        };

        match command {
            Command::Abort => {
                debug!("ABORT");
                self.budget = self.budget.reset();
                Verdict::Finish
            },
            Command::Load => {
                let address = frame.word();
                let data = frame.load_data();
                debug!("LOAD {} bytes at 0x{address:08X}", data.len());
                if let Err(e) = machine.write_memory(address, data) {
                    warn!("LOAD at 0x{address:08X} failed: {e}");
                    return self.fail(Ack::Error);
                }
                self.bytes_loaded += data.len() as u64;
                self.budget = self.budget.reset();
                Verdict::Reply(Ack::Success)
            },
            Command::Jump => {
                let address = frame.word();
                debug!("JUMP to 0x{address:08X}");
                self.budget = self.budget.reset();
                Verdict::Boot(address)
            },
            Command::Cmdline => {
                self.params.cmdline = frame.word();
                debug!("CMDLINE at 0x{:08X}", self.params.cmdline);
                self.budget = self.budget.reset();
                Verdict::Reply(Ack::Success)
            },
            Command::InitrdStart => {
                self.params.initrd_start = frame.word();
                debug!("INITRDSTART at 0x{:08X}", self.params.initrd_start);
                self.budget = self.budget.reset();
                Verdict::Reply(Ack::Success)
            },
            Command::InitrdEnd => {
                self.params.initrd_end = frame.word();
                debug!("INITRDEND at 0x{:08X}", self.params.initrd_end);
                self.budget = self.budget.reset();
                Verdict::Reply(Ack::Success)
            },
        }
    }

    fn fail(&mut self, ack: Ack) -> Verdict {
        self.budget = self.budget.charge();
        if self.budget.is_exhausted() {
            Verdict::GiveUp
        } else {
            Verdict::Reply(ack)
        }
    }
}

/// Summary of a session the host ended with `ABORT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEnd {
    /// Frames received, including failed ones.
    pub frames: u32,
    /// Bytes written to memory by `LOAD` commands.
    pub bytes_loaded: u64,
}

/// One loader session over a channel, acting on a machine.
pub struct Session<C: Channel, M: Machine> {
    channel: C,
    machine: M,
    config: SessionConfig,
}

impl<C: Channel, M: Machine> Session<C, M> {
    /// Create a session with the default configuration.
    pub fn new(channel: C, machine: M) -> Self {
        Self::with_config(channel, machine, SessionConfig::default())
    }

    /// Create a session with a custom configuration.
    pub fn with_config(channel: C, machine: M, config: SessionConfig) -> Self {
        Self {
            channel,
            machine,
            config,
        }
    }

    /// Run the session.
    ///
    /// Returns `Ok` when the host aborted, an error when the handshake timed
    /// out, the failure budget ran out or the channel failed. A `JUMP`
    /// transfers control and never comes back here.
    pub fn run(mut self) -> Result<SessionEnd> {
        info!("Attempting serial firmware loading");
        if let Err(e) = handshake(&mut self.channel, self.config.handshake_polls) {
            error!("Handshake failed: {e}");
            return Err(e);
        }
        info!("Host connected");

        let mut dispatcher = Dispatcher::new(self.config.max_failures);
        let mut frame = Frame::default();
        loop {
            read_frame(&mut self.channel, &mut frame, self.config.frame_deadline)?;

            match dispatcher.dispatch(&frame, &mut self.machine) {
                Verdict::Reply(ack) => self.channel.write_byte(ack.into())?,
                Verdict::Finish => {
                    self.channel.write_byte(Ack::Success.into())?;
                    info!("Host aborted the session");
                    return Ok(SessionEnd {
                        frames: dispatcher.frames,
                        bytes_loaded: dispatcher.bytes_loaded,
                    });
                },
                Verdict::Boot(address) => {
                    self.channel.write_byte(Ack::Success.into())?;
                    let params = dispatcher.params();
                    info!(
                        "Booting 0x{address:08X} (cmdline 0x{:08X}, initrd 0x{:08X}-0x{:08X})",
                        params.cmdline, params.initrd_start, params.initrd_end
                    );
                    self.machine.transfer_control(params, address)
                },
                Verdict::GiveUp => {
                    let failures = dispatcher.budget().failures();
                    error!("Too many consecutive errors ({failures}), aborting");
                    return Err(Error::TooManyFailures { failures });
                },
            }
        }
    }
}
