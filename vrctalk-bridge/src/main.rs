use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use vrctalk_osc::{TransportConfig, TransportHandle, TransportHealth, TransportSupervisor};

#[derive(Parser, Debug, Clone)]
#[command(name = "vrctalk-bridge")]
#[command(author, version, about = "Forward lines from stdin to the VRChat chatbox over OSC")]
struct Args {
    /// JSON config file (camelCase keys, all optional)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host VRChat receives OSC on
    #[arg(long)]
    send_host: Option<String>,

    /// Port VRChat receives OSC on
    #[arg(long)]
    send_port: Option<u16>,

    /// Port to receive avatar parameters on (0 = ephemeral)
    #[arg(long)]
    listen_port: Option<u16>,

    #[arg(long)]
    rate_limit_ms: Option<u32>,

    /// Run with OSC turned off; every chatbox call becomes a no-op
    #[arg(long, default_value = "false")]
    disable_osc: bool,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<TransportConfig> {
        let mut cfg = match &self.config {
            Some(path) => TransportConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => TransportConfig::default(),
        };
        if let Some(host) = &self.send_host {
            cfg.send_host = host.clone();
        }
        if let Some(port) = self.send_port {
            cfg.send_port = port;
        }
        if let Some(port) = self.listen_port {
            cfg.listen_port = port;
        }
        if let Some(ms) = self.rate_limit_ms {
            cfg.rate_limit_ms = ms;
        }
        if self.disable_osc {
            cfg.osc_enabled = false;
        }
        Ok(cfg)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vrctalk_osc=info,vrctalk_bridge=info"));
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)
        .expect("Failed to set global subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.load_config()?;
    info!(
        "vrctalk-bridge starting. osc_enabled={}, send={}:{}, listen={}:{}",
        config.osc_enabled, config.send_host, config.send_port, config.listen_host, config.listen_port
    );

    let handle = match TransportSupervisor::start(config).await {
        Ok(h) => h,
        Err(e) => {
            error!("OSC transport unavailable: {}", e);
            return Err(e.into());
        }
    };

    handle.on_mute_changed(|muted| info!("VRChat mute => {}", muted));
    spawn_health_logger(&handle);

    info!("Type a line and press Enter to post it. '/typing on|off' toggles the indicator, '/quit' exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(&handle, line.trim()) {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
    }

    handle.stop().await;
    let stats = handle.transmitter_stats();
    drop(handle);
    info!(
        "Sent {} datagrams ({} failed, {} superseded)",
        stats.sent, stats.send_failures, stats.superseded
    );
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_line(handle: &TransportHandle, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" | "/exit" => return false,
        "/typing on" => handle.set_typing(true),
        "/typing off" => handle.set_typing(false),
        "/status" => {
            let s = handle.listener_stats();
            info!(
                "health={:?} muted={} received={} dispatched={} decode_failures={} unrecognized={}",
                handle.health(),
                handle.is_muted(),
                s.received,
                s.dispatched,
                s.decode_failures,
                s.unrecognized
            );
        }
        text => handle.send_translated_text(text),
    }
    true
}

fn spawn_health_logger(handle: &TransportHandle) {
    let mut health = handle.subscribe_health();
    tokio::spawn(async move {
        while health.changed().await.is_ok() {
            let current = *health.borrow_and_update();
            match current {
                TransportHealth::ListenerDown => {
                    warn!("OSC listener is down; mute sync disabled until restart")
                }
                TransportHealth::ListenerRestarting { attempt } => {
                    warn!("OSC listener restarting (attempt {})", attempt)
                }
                other => info!("OSC transport health: {:?}", other),
            }
        }
    });
}
