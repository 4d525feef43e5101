//! Host side of the protocol.
//!
//! The [`Uploader`] waits for a target to announce itself, answers the
//! handshake and then drives the session frame by frame over a [`Port`].
//!
//! [`Port`]: crate::port::Port

mod uploader;

pub use uploader::{
    DEFAULT_ACK_TIMEOUT, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_RETRIES,
    Uploader, UploaderConfig,
};
