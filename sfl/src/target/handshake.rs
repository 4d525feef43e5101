//! Session handshake.
//!
//! The target announces itself with [`MAGIC_REQUEST`] and then polls for
//! [`MAGIC_ACK`]. The deadline is a number of polls rather than a duration so
//! the loader works on boards without a usable timer; a poll that finds no
//! byte still counts.

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::protocol::wire::{MAGIC_ACK, MAGIC_REQUEST, MagicMatcher};
use log::{debug, trace};

/// Default number of polls to wait for the host's acknowledge.
pub const DEFAULT_HANDSHAKE_POLLS: u32 = 4_500_000;

/// Send the request magic and wait up to `polls` polls for the acknowledge.
pub fn handshake<C: Channel>(channel: &mut C, polls: u32) -> Result<()> {
    channel.write_bytes(MAGIC_REQUEST)?;

    let mut matcher = MagicMatcher::new(MAGIC_ACK);
    for poll in 0..polls {
        let Some(byte) = channel.poll_byte()? else {
            continue;
        };
        trace!("Handshake byte 0x{byte:02X} at poll {poll}");
        if matcher.feed(byte) {
            debug!("Host acknowledged after {} polls", poll + 1);
            return Ok(());
        }
    }

    Err(Error::HandshakeTimeout { polls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::ScriptedChannel;

    #[test]
    fn test_handshake_sends_request_and_accepts_ack() {
        let mut channel = ScriptedChannel::new();
        channel.push_bytes(MAGIC_ACK);

        handshake(&mut channel, 100).unwrap();

        assert_eq!(channel.output, MAGIC_REQUEST);
        assert_eq!(channel.remaining(), 0);
    }

    #[test]
    fn test_handshake_skips_noise_and_partial_matches() {
        let mut channel = ScriptedChannel::new();
        channel
            .push_bytes(b"garbage z6IH")
            .push_idle(3)
            .push_bytes(b"zz6IHG7cYDID6o\n");

        handshake(&mut channel, 1000).unwrap();
    }

    #[test]
    fn test_handshake_leaves_following_bytes_unread() {
        let mut channel = ScriptedChannel::new();
        channel
            .push_bytes(MAGIC_ACK)
            .push_bytes(&[0x00, 0x12]);

        handshake(&mut channel, 1000).unwrap();
        assert_eq!(channel.remaining(), 2);
    }

    #[test]
    fn test_handshake_times_out_on_silence() {
        let mut channel = ScriptedChannel::new();
        channel.push_idle(10);

        let err = handshake(&mut channel, 10).unwrap_err();
        assert!(matches!(err, Error::HandshakeTimeout { polls: 10 }));
    }

    #[test]
    fn test_idle_polls_count_against_deadline() {
        // 5 idle polls + 14 magic bytes need 19 polls
        let mut channel = ScriptedChannel::new();
        channel
            .push_idle(5)
            .push_bytes(MAGIC_ACK);
        assert!(handshake(&mut channel, 18).is_err());

        let mut channel = ScriptedChannel::new();
        channel
            .push_idle(5)
            .push_bytes(MAGIC_ACK);
        assert!(handshake(&mut channel, 19).is_ok());
    }

    #[test]
    fn test_broken_ack_does_not_match() {
        let mut channel = ScriptedChannel::new();
        channel.push_bytes(b"z6IHG7cYDID6x\n");

        assert!(handshake(&mut channel, 50).is_err());
    }
}
