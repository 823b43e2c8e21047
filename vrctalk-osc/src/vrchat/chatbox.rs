//! vrctalk-osc/src/vrchat/chatbox.rs
//!
//! Outbound side: turns "show this text" / "show typing" intents into
//! datagrams for VRChat's chatbox.
//!
//! Callers never block: `send_text` and `send_typing` overwrite a single-slot
//! cell and poke the transmitter task. The task alone owns the typing state
//! machine and decides when the pending text goes out.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::codec::{self, OscMessage};
use crate::config::TransportConfig;
use crate::sink::DatagramSink;
use crate::vrchat::{chatbox_input, chatbox_typing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypingState {
    #[default]
    Idle,
    Typing,
}

#[derive(Debug, Clone)]
pub struct ChatboxSettings {
    /// Minimum spacing between two `/chatbox/input` datagrams.
    pub rate_limit: Duration,
    /// A `Typing` indicator with no update for this long is cleared.
    pub typing_timeout: Duration,
    pub max_text_length: usize,
}

impl From<&TransportConfig> for ChatboxSettings {
    fn from(cfg: &TransportConfig) -> Self {
        Self {
            rate_limit: cfg.rate_limit(),
            typing_timeout: cfg.typing_timeout(),
            max_text_length: cfg.max_text_length as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmitterStats {
    pub sent: u64,
    pub send_failures: u64,
    /// Text requests overwritten by a newer one before going out.
    pub superseded: u64,
    pub typing: TypingState,
}

/// State shared between callers and the transmitter task. Both slots hold at
/// most one request; a newer request replaces the older one.
#[derive(Default)]
struct Outbox {
    pending_text: Mutex<Option<String>>,
    typing_request: Mutex<Option<bool>>,
    wake: Notify,
    typing_on: AtomicBool,
    sent: AtomicU64,
    send_failures: AtomicU64,
    superseded: AtomicU64,
}

/// Cheap, cloneable front end of the transmitter task.
#[derive(Clone)]
pub struct ChatboxTransmitter {
    outbox: Arc<Outbox>,
    max_text_length: usize,
}

impl ChatboxTransmitter {
    /// Spawn the transmitter task. It runs until `cancel` fires, then clears
    /// a lit typing indicator and drops any unsent text.
    pub fn spawn(
        sink: Arc<dyn DatagramSink>,
        settings: ChatboxSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let outbox = Arc::new(Outbox::default());
        let max_text_length = settings.max_text_length;
        let task = TransmitterTask {
            sink,
            outbox: outbox.clone(),
            settings,
            cancel,
            typing: TypingState::Idle,
            typing_deadline: None,
            flush_at: None,
        };
        let join = tokio::spawn(task.run());
        (Self { outbox, max_text_length }, join)
    }

    /// Queue `text` for the chatbox, replacing anything not yet sent.
    pub fn send_text(&self, text: &str) {
        let text = prepare_text(text, self.max_text_length);
        let previous = lock(&self.outbox.pending_text).replace(text);
        if previous.is_some() {
            self.outbox.superseded.fetch_add(1, Ordering::Relaxed);
        }
        self.outbox.wake.notify_one();
    }

    pub fn send_typing(&self, is_typing: bool) {
        *lock(&self.outbox.typing_request) = Some(is_typing);
        self.outbox.wake.notify_one();
    }

    pub fn stats(&self) -> TransmitterStats {
        TransmitterStats {
            sent: self.outbox.sent.load(Ordering::Relaxed),
            send_failures: self.outbox.send_failures.load(Ordering::Relaxed),
            superseded: self.outbox.superseded.load(Ordering::Relaxed),
            typing: if self.outbox.typing_on.load(Ordering::Relaxed) {
                TypingState::Typing
            } else {
                TypingState::Idle
            },
        }
    }
}

/// Strip NULs (they would end the OSC string early) and cut to
/// `max_chars` Unicode scalar values.
fn prepare_text(text: &str, max_chars: usize) -> String {
    text.chars().filter(|c| *c != '\0').take(max_chars).collect()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Wakeup {
    Shutdown,
    Requests,
    FlushDue,
    TypingExpired,
}

struct TransmitterTask {
    sink: Arc<dyn DatagramSink>,
    outbox: Arc<Outbox>,
    settings: ChatboxSettings,
    cancel: CancellationToken,
    typing: TypingState,
    typing_deadline: Option<Instant>,
    /// Set when text is waiting; the slot goes out once this passes.
    flush_at: Option<Instant>,
}

impl TransmitterTask {
    async fn run(mut self) {
        debug!("Chatbox transmitter started, sending to {}", self.sink.target());
        let cancel = self.cancel.clone();
        let outbox = self.outbox.clone();

        loop {
            let flush_at = self.flush_at;
            let typing_deadline = self.typing_deadline;

            let wakeup = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wakeup::Shutdown,
                _ = outbox.wake.notified() => Wakeup::Requests,
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    Wakeup::FlushDue
                }
                _ = sleep_until(typing_deadline.unwrap_or_else(Instant::now)), if typing_deadline.is_some() => {
                    Wakeup::TypingExpired
                }
            };

            match wakeup {
                Wakeup::Shutdown => break,
                Wakeup::Requests => self.take_requests().await,
                Wakeup::FlushDue => self.flush_text().await,
                Wakeup::TypingExpired => self.expire_typing().await,
            }
        }

        self.shutdown().await;
    }

    async fn take_requests(&mut self) {
        let typing = lock(&self.outbox.typing_request).take();
        if let Some(is_typing) = typing {
            self.apply_typing(is_typing).await;
        }

        let has_text = lock(&self.outbox.pending_text).is_some();
        if has_text && self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.settings.rate_limit);
            trace!("Chatbox text pending, flushing in {:?}", self.settings.rate_limit);
        }
    }

    async fn apply_typing(&mut self, is_typing: bool) {
        match (self.typing, is_typing) {
            (TypingState::Idle, true) => {
                self.transmit(&chatbox_typing(true)).await;
                self.set_typing(TypingState::Typing);
                self.typing_deadline = Some(Instant::now() + self.settings.typing_timeout);
            }
            (TypingState::Typing, true) => {
                self.typing_deadline = Some(Instant::now() + self.settings.typing_timeout);
            }
            (TypingState::Typing, false) => self.clear_typing().await,
            (TypingState::Idle, false) => {}
        }
    }

    async fn flush_text(&mut self) {
        self.flush_at = None;
        let text = lock(&self.outbox.pending_text).take();
        let Some(text) = text else {
            return;
        };
        if self.transmit(&chatbox_input(&text, true)).await {
            // a delivered message ends the "composing" indicator
            self.clear_typing().await;
        }
    }

    async fn expire_typing(&mut self) {
        if self.typing == TypingState::Typing {
            debug!("Chatbox typing indicator timed out");
        }
        self.clear_typing().await;
    }

    async fn clear_typing(&mut self) {
        if self.typing == TypingState::Typing {
            self.transmit(&chatbox_typing(false)).await;
        }
        self.set_typing(TypingState::Idle);
        self.typing_deadline = None;
    }

    fn set_typing(&mut self, state: TypingState) {
        self.typing = state;
        self.outbox
            .typing_on
            .store(state == TypingState::Typing, Ordering::Relaxed);
    }

    async fn shutdown(&mut self) {
        if let Some(text) = lock(&self.outbox.pending_text).take() {
            debug!("Dropping unsent chatbox text ({} chars)", text.chars().count());
        }
        lock(&self.outbox.typing_request).take();
        self.clear_typing().await;
        debug!("Chatbox transmitter stopped");
    }

    /// Best effort: failures are counted and logged, never returned.
    async fn transmit(&self, msg: &OscMessage) -> bool {
        let bytes = codec::encode(msg);
        match self.sink.send_datagram(&bytes).await {
            Ok(n) => {
                self.outbox.sent.fetch_add(1, Ordering::Relaxed);
                debug!("[OSC] Sent {} bytes to {}: {}", n, self.sink.target(), msg.address);
                true
            }
            Err(e) => {
                self.outbox.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!("[OSC] Failed to send {} to {}: {}", msg.address, self.sink.target(), e);
                false
            }
        }
    }
}
