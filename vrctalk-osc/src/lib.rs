//! vrctalk-osc/src/lib.rs
//!
//! Realtime OSC transport for VRChat: chatbox text and typing indicator out,
//! avatar mute state in. `TransportSupervisor::start` is the entry point.

pub mod codec;
pub mod config;
pub mod sink;
pub mod supervisor;
pub mod vrchat;

use std::net::SocketAddr;
use thiserror::Error;

pub use codec::{decode, encode, DecodeError, OscArgument, OscMessage};
pub use config::TransportConfig;
pub use supervisor::{TransportHandle, TransportHealth, TransportSupervisor};
pub use vrchat::avatar_listener::{ListenerStats, MuteState};
pub use vrchat::chatbox::{TransmitterStats, TypingState};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("OSC port unavailable at {addr}: {source}")]
    PortUnavailable {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("OSC socket I/O error: {0}")]
    SocketIo(#[from] std::io::Error),

    /// Expected termination of a task; not reported as a failure.
    #[error("OSC transport shutdown requested")]
    ShutdownRequested,

    #[error("Invalid OSC transport config: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, TransportError::ShutdownRequested)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
