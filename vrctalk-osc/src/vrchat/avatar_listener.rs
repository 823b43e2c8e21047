// File: vrctalk-osc/src/vrchat/avatar_listener.rs

//! Inbound side: listens for VRChat's avatar parameter stream and keeps the
//! local `MuteState` in sync with `/avatar/parameters/MuteSelf`.
//!
//! Anything else that arrives on the port (other parameters, our own chatbox
//! traffic looped back, garbage) is counted and dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{self, OscMessage};
use crate::vrchat::MUTE_SELF;
use crate::{Result, TransportError};

/// Largest payload a UDP datagram can carry; one buffer of this size is
/// reused for every receive.
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Last mute value reported by VRChat. Written only by the listener task.
#[derive(Debug, Clone, Default)]
pub struct MuteState(Arc<AtomicBool>);

impl MuteState {
    pub fn is_muted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, muted: bool) {
        self.0.store(muted, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.set(false);
    }
}

type MuteCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callbacks registered through `on_mute_changed`.
#[derive(Clone, Default)]
pub struct MuteSubscribers {
    callbacks: Arc<RwLock<Vec<MuteCallback>>>,
}

impl MuteSubscribers {
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    fn notify(&self, muted: bool) {
        // Clone outside the lock so a callback may subscribe without deadlocking.
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for cb in callbacks {
            cb(muted);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerStats {
    pub received: u64,
    /// MuteSelf updates that reached every subscriber.
    pub dispatched: u64,
    pub decode_failures: u64,
    pub unrecognized: u64,
}

#[derive(Debug, Default)]
pub struct ListenerCounters {
    received: AtomicU64,
    dispatched: AtomicU64,
    decode_failures: AtomicU64,
    unrecognized: AtomicU64,
}

impl ListenerCounters {
    pub fn snapshot(&self) -> ListenerStats {
        ListenerStats {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
        }
    }
}

/// Everything that survives a listener restart. The supervisor keeps a copy
/// and builds a fresh listener around a newly bound socket from it.
#[derive(Clone)]
pub struct ListenerContext {
    pub mute: MuteState,
    pub subscribers: MuteSubscribers,
    pub counters: Arc<ListenerCounters>,
    pub cancel: CancellationToken,
    pub max_consecutive_errors: u32,
}

pub struct AvatarParameterListener {
    socket: UdpSocket,
    ctx: ListenerContext,
}

impl AvatarParameterListener {
    pub fn new(socket: UdpSocket, ctx: ListenerContext) -> Self {
        Self { socket, ctx }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop. Never returns `Ok`: cancellation yields
    /// `ShutdownRequested`, and `max_consecutive_errors` receive failures in a
    /// row yield the last `SocketIo` error so the supervisor can rebind.
    pub async fn run(self) -> Result<()> {
        let local = self.local_addr()?;
        info!("OSC listener bound on {} (watching {})", local, MUTE_SELF);

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut consecutive_errors = 0u32;

        loop {
            let received = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => {
                    debug!("OSC listener on {} exiting", local);
                    return Err(TransportError::ShutdownRequested);
                }
                res = self.socket.recv_from(&mut buf) => res,
            };

            match received {
                Ok((size, peer)) => {
                    consecutive_errors = 0;
                    self.handle_datagram(&buf[..size], peer);
                }
                Err(e) => {
                    // Windows reports ICMP port-unreachable from our own sends
                    // as a receive error; that alone must not kill the loop.
                    consecutive_errors += 1;
                    warn!(
                        "OSC recv error on {} ({}/{}): {}",
                        local, consecutive_errors, self.ctx.max_consecutive_errors, e
                    );
                    if consecutive_errors >= self.ctx.max_consecutive_errors {
                        return Err(TransportError::SocketIo(e));
                    }
                }
            }
        }
    }

    fn handle_datagram(&self, data: &[u8], peer: SocketAddr) {
        self.ctx.counters.received.fetch_add(1, Ordering::Relaxed);
        match codec::decode(data) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => {
                self.ctx.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                debug!("OSC decode error from {} ({} bytes): {}", peer, data.len(), e);
            }
        }
    }

    fn dispatch(&self, msg: OscMessage) {
        if msg.address == MUTE_SELF {
            if let Some(muted) = msg.args.first().and_then(|a| a.as_bool()) {
                self.ctx.mute.set(muted);
                debug!("[OSC] MuteSelf = {}", muted);
                self.ctx.subscribers.notify(muted);
                // only counted once every subscriber returned
                self.ctx.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                return;
            }
            debug!("[OSC] {} without a bool argument ignored: {:?}", MUTE_SELF, msg.args);
        } else {
            trace!("[OSC] Ignoring {} ({} args)", msg.address, msg.args.len());
        }
        self.ctx.counters.unrecognized.fetch_add(1, Ordering::Relaxed);
    }
}
