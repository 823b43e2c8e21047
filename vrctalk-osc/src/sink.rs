//! vrctalk-osc/src/sink.rs
//!
//! The outbound seam. The transmitter only ever hands finished datagrams to a
//! `DatagramSink`; production uses a UDP socket, tests record in memory.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;

#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Fire-and-forget; no timeout, no retry.
    async fn send_datagram(&self, bytes: &[u8]) -> io::Result<usize>;

    /// Where datagrams go, for log lines.
    fn target(&self) -> String;
}

/// UDP sink bound to an ephemeral local port of the target's address family.
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpSink {
    pub async fn bind(target: SocketAddr) -> io::Result<Self> {
        let local = match target.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        tracing::debug!(
            "OSC send socket bound on {} -> {}",
            socket.local_addr()?,
            target
        );
        Ok(Self { socket, target })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramSink for UdpSink {
    async fn send_datagram(&self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send_to(bytes, self.target).await
    }

    fn target(&self) -> String {
        self.target.to_string()
    }
}
