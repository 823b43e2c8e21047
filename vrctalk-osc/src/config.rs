//! vrctalk-osc/src/config.rs
//!
//! Settings handed over by the application's config layer. Every field has a
//! default, so a partial JSON object (or none at all) is a valid config.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportConfig {
    /// When false, `start` succeeds without binding anything and every
    /// chatbox/mute call is a silent no-op.
    pub osc_enabled: bool,
    pub send_host: String,
    pub send_port: u16,
    pub listen_host: String,
    /// 0 binds an ephemeral port.
    pub listen_port: u16,
    pub rate_limit_ms: u32,
    pub typing_timeout_ms: u32,
    /// Counted in Unicode scalar values, not bytes.
    pub max_text_length: u32,
    pub bind_attempts: u32,
    pub bind_backoff_ms: u32,
    pub listener_restart_attempts: u32,
    pub listener_restart_backoff_ms: u32,
    pub max_consecutive_recv_errors: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            osc_enabled: true,
            send_host: "127.0.0.1".to_string(),
            send_port: 9000,
            listen_host: "127.0.0.1".to_string(),
            listen_port: 9001,
            rate_limit_ms: 1500,
            typing_timeout_ms: 10_000,
            max_text_length: 144,
            bind_attempts: 3,
            bind_backoff_ms: 100,
            listener_restart_attempts: 5,
            listener_restart_backoff_ms: 500,
            max_consecutive_recv_errors: 16,
        }
    }
}

impl TransportConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: TransportConfig = serde_json::from_str(json)
            .map_err(|e| TransportError::InvalidConfig(format!("JSON parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a JSON file. A leading UTF-8 BOM (common for files saved by
    /// Windows editors) is skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let bytes = fs::read(p).map_err(|e| {
            TransportError::InvalidConfig(format!("Could not read {}: {e}", p.display()))
        })?;
        let content = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        let text = std::str::from_utf8(content).map_err(|e| {
            TransportError::InvalidConfig(format!("{} is not UTF-8: {e}", p.display()))
        })?;
        tracing::debug!("Loading OSC transport config from {}", p.display());
        Self::from_json_str(text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_ms == 0 {
            return Err(TransportError::InvalidConfig("rateLimitMs must be > 0".into()));
        }
        if self.typing_timeout_ms == 0 {
            return Err(TransportError::InvalidConfig("typingTimeoutMs must be > 0".into()));
        }
        if self.max_text_length == 0 {
            return Err(TransportError::InvalidConfig("maxTextLength must be > 0".into()));
        }
        if self.bind_attempts == 0 {
            return Err(TransportError::InvalidConfig("bindAttempts must be > 0".into()));
        }
        if self.osc_enabled && self.send_port == 0 {
            return Err(TransportError::InvalidConfig("sendPort must be > 0".into()));
        }
        self.send_addr()?;
        self.listen_addr()?;
        Ok(())
    }

    pub fn send_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(parse_host(&self.send_host)?, self.send_port))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(parse_host(&self.listen_host)?, self.listen_port))
    }

    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms.into())
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms.into())
    }

    pub fn bind_backoff(&self) -> Duration {
        Duration::from_millis(self.bind_backoff_ms.into())
    }

    pub fn listener_restart_backoff(&self) -> Duration {
        Duration::from_millis(self.listener_restart_backoff_ms.into())
    }
}

fn parse_host(host: &str) -> Result<IpAddr> {
    let host = host.trim();
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    host.parse::<IpAddr>()
        .map_err(|e| TransportError::InvalidConfig(format!("Invalid host '{host}': {e}")))
}
