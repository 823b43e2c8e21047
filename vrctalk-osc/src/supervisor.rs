//! vrctalk-osc/src/supervisor.rs
//!
//! Lifecycle for the two I/O tasks. `TransportSupervisor::start` binds both
//! sockets (with bounded retry) before returning a `TransportHandle`; the
//! listener is then restarted on abnormal exit, the transmitter is not.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::sink::UdpSink;
use crate::vrchat::avatar_listener::{
    AvatarParameterListener, ListenerContext, ListenerCounters, ListenerStats, MuteState,
    MuteSubscribers,
};
use crate::vrchat::chatbox::{ChatboxSettings, ChatboxTransmitter, TransmitterStats};
use crate::{Result, TransportError};

/// Upper bound for any single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A restarted listener that runs this long counts as recovered even if no
/// mute update arrived.
const STABLE_UPTIME: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHealth {
    /// `oscEnabled` is false; nothing was bound.
    Disabled,
    Running,
    /// The listener exited abnormally and is being rebound.
    ListenerRestarting { attempt: u32 },
    /// Restart attempts exhausted. Chatbox output still works; mute sync does not.
    ListenerDown,
    Stopped,
}

pub struct TransportSupervisor;

impl TransportSupervisor {
    pub async fn start(config: TransportConfig) -> Result<TransportHandle> {
        config.validate()?;

        let mute = MuteState::default();
        let subscribers = MuteSubscribers::default();
        let counters = Arc::new(ListenerCounters::default());
        let cancel = CancellationToken::new();

        if !config.osc_enabled {
            info!("OSC disabled; chatbox output and mute sync are no-ops");
            let (health_tx, _) = watch::channel(TransportHealth::Disabled);
            return Ok(TransportHandle {
                transmitter: None,
                mute,
                subscribers,
                counters,
                health: Arc::new(health_tx),
                listen_addr: None,
                cancel,
                tasks: Mutex::new(Vec::new()),
            });
        }

        let send_addr = config.send_addr()?;
        let listen_addr = config.listen_addr()?;
        let attempts = config.bind_attempts;
        let backoff = config.bind_backoff();

        let sink = bind_with_retry("send", send_addr, attempts, backoff, || {
            UdpSink::bind(send_addr)
        })
        .await?;
        let socket = bind_with_retry("listen", listen_addr, attempts, backoff, || {
            UdpSocket::bind(listen_addr)
        })
        .await?;
        let bound = socket.local_addr()?;

        let (health_tx, _) = watch::channel(TransportHealth::Running);
        let health = Arc::new(health_tx);

        let (transmitter, transmitter_task) = ChatboxTransmitter::spawn(
            Arc::new(sink),
            ChatboxSettings::from(&config),
            cancel.child_token(),
        );

        let ctx = ListenerContext {
            mute: mute.clone(),
            subscribers: subscribers.clone(),
            counters: counters.clone(),
            cancel: cancel.child_token(),
            max_consecutive_errors: config.max_consecutive_recv_errors,
        };
        let policy = RestartPolicy {
            max_attempts: config.listener_restart_attempts,
            backoff: config.listener_restart_backoff(),
        };
        let listener = AvatarParameterListener::new(socket, ctx.clone());
        let supervisor_task = tokio::spawn(supervise_listener(
            listener,
            ctx,
            bound,
            policy,
            health.clone(),
        ));

        info!("OSC transport started: sending to {}, listening on {}", send_addr, bound);

        Ok(TransportHandle {
            transmitter: Some(transmitter),
            mute,
            subscribers,
            counters,
            health,
            listen_addr: Some(bound),
            cancel,
            tasks: Mutex::new(vec![transmitter_task, supervisor_task]),
        })
    }

    pub async fn stop(handle: TransportHandle) {
        handle.stop().await;
    }
}

/// The application's view of a running transport. Every call is
/// non-blocking, and a no-op once stopped or when OSC is disabled.
pub struct TransportHandle {
    transmitter: Option<ChatboxTransmitter>,
    mute: MuteState,
    subscribers: MuteSubscribers,
    counters: Arc<ListenerCounters>,
    health: Arc<watch::Sender<TransportHealth>>,
    listen_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportHandle {
    fn active_transmitter(&self) -> Option<&ChatboxTransmitter> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.transmitter.as_ref()
    }

    pub fn send_translated_text(&self, text: &str) {
        if let Some(tx) = self.active_transmitter() {
            tx.send_text(text);
        }
    }

    pub fn set_typing(&self, is_typing: bool) {
        if let Some(tx) = self.active_transmitter() {
            tx.send_typing(is_typing);
        }
    }

    /// Register a callback for every `MuteSelf` update. Callbacks run on the
    /// listener task and must not block.
    pub fn on_mute_changed<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback);
    }

    pub fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    pub fn mute_state(&self) -> MuteState {
        self.mute.clone()
    }

    pub fn health(&self) -> TransportHealth {
        *self.health.borrow()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<TransportHealth> {
        self.health.subscribe()
    }

    /// Actual bound inbound address (differs from the config when port 0 was requested).
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn listener_stats(&self) -> ListenerStats {
        self.counters.snapshot()
    }

    pub fn transmitter_stats(&self) -> TransmitterStats {
        self.transmitter
            .as_ref()
            .map(ChatboxTransmitter::stats)
            .unwrap_or_default()
    }

    /// Cancel both tasks and wait for them. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("OSC task ended abnormally during stop: {}", e);
            }
        }
        self.mute.reset();
        if self.health() != TransportHealth::Stopped {
            self.health.send_replace(TransportHealth::Stopped);
            info!("OSC transport stopped");
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RestartPolicy {
    max_attempts: u32,
    backoff: Duration,
}

async fn bind_with_retry<T, F, Fut>(
    role: &str,
    addr: SocketAddr,
    attempts: u32,
    backoff: Duration,
    mut bind: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match bind().await {
            Ok(bound) => return Ok(bound),
            Err(e) if attempt >= attempts => {
                error!("OSC {} bind failed on {} after {} attempts: {}", role, addr, attempt, e);
                return Err(TransportError::PortUnavailable { addr, source: e });
            }
            Err(e) => {
                warn!(
                    "OSC {} bind on {} failed (attempt {}/{}): {}. Retrying in {:?}",
                    role, addr, attempt, attempts, e, delay
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
        }
    }
}

/// Run the listener, rebinding `bound` and restarting it whenever it exits
/// for any reason other than shutdown. Each run is its own task so a panic in
/// a mute callback is caught here instead of taking the transport down.
/// `policy.max_attempts` bounds one outage, not the whole session.
async fn supervise_listener(
    first: AvatarParameterListener,
    ctx: ListenerContext,
    bound: SocketAddr,
    policy: RestartPolicy,
    health: Arc<watch::Sender<TransportHealth>>,
) {
    let mut listener = first;
    let mut attempt = 0u32;
    let mut delay = policy.backoff;

    loop {
        let started = Instant::now();
        let dispatched_before = ctx.counters.snapshot().dispatched;

        match tokio::spawn(listener.run()).await {
            Ok(Err(e)) if e.is_shutdown() => break,
            Ok(Err(e)) => warn!("OSC listener on {} exited: {}", bound, e),
            Ok(Ok(())) => warn!("OSC listener on {} returned unexpectedly", bound),
            Err(e) => error!("OSC listener task on {} failed: {}", bound, e),
        }
        if ctx.cancel.is_cancelled() {
            break;
        }

        // A run that delivered a mute update or stayed up long enough ends
        // the outage; the next fault starts a fresh restart budget.
        let delivered = ctx.counters.snapshot().dispatched > dispatched_before;
        if attempt > 0 && (delivered || started.elapsed() >= STABLE_UPTIME) {
            debug!("OSC listener on {} had recovered; restart budget reset", bound);
            attempt = 0;
            delay = policy.backoff;
        }

        listener = loop {
            attempt += 1;
            if attempt > policy.max_attempts {
                error!(
                    "OSC listener on {} gave up after {} restart attempts; mute sync disabled",
                    bound, policy.max_attempts
                );
                health.send_replace(TransportHealth::ListenerDown);
                return;
            }
            health.send_replace(TransportHealth::ListenerRestarting { attempt });

            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                _ = sleep(delay) => {}
            }
            delay = (delay * 2).min(MAX_BACKOFF);

            match UdpSocket::bind(bound).await {
                Ok(socket) => {
                    info!("OSC listener rebound on {} (restart {})", bound, attempt);
                    health.send_replace(TransportHealth::Running);
                    break AvatarParameterListener::new(socket, ctx.clone());
                }
                Err(e) => warn!("OSC listener rebind on {} failed: {}", bound, e),
            }
        };
    }

    debug!("OSC listener supervisor for {} finished", bound);
}
