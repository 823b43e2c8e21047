//! vrctalk-osc/src/vrchat/mod.rs
//!
//! VRChat-facing pieces: the chatbox transmitter (outbound, port 9000 by
//! default) and the avatar parameter listener (inbound, port 9001).
//!   /chatbox/input <text> <sendImmediately>
//!   /chatbox/typing <bool>
//!   /avatar/parameters/MuteSelf <bool>

pub mod avatar_listener;
pub mod chatbox;

use crate::codec::{OscArgument, OscMessage};

pub const CHATBOX_INPUT: &str = "/chatbox/input";
pub const CHATBOX_TYPING: &str = "/chatbox/typing";
pub const MUTE_SELF: &str = "/avatar/parameters/MuteSelf";

/// `/chatbox/input s T|F`. `send_immediately = false` would open the in-game
/// keyboard pre-filled instead of posting.
pub fn chatbox_input(text: &str, send_immediately: bool) -> OscMessage {
    OscMessage::new(
        CHATBOX_INPUT,
        vec![
            OscArgument::Str(text.to_string()),
            OscArgument::Bool(send_immediately),
        ],
    )
}

pub fn chatbox_typing(is_typing: bool) -> OscMessage {
    OscMessage::new(CHATBOX_TYPING, vec![OscArgument::Bool(is_typing)])
}
