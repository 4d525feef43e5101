//! Target side of the protocol: the loader session running on the device.
//!
//! A session performs the [handshake](handshake::handshake), then loops
//! reading [frames](reader::read_frame) and handing them to the
//! [`Dispatcher`], until the host sends `ABORT`, sends `JUMP` (control is
//! transferred and the session never returns) or the failure budget runs
//! out.

pub mod handshake;
pub mod machine;
pub mod reader;
pub mod session;

pub use handshake::{DEFAULT_HANDSHAKE_POLLS, handshake};
pub use machine::{BootParams, BoundedMachine, Machine, Region};
pub use reader::{FrameDeadline, read_frame};
pub use session::{
    DEFAULT_MAX_FAILURES, Dispatcher, RetryBudget, Session, SessionConfig, SessionEnd, Verdict,
};
