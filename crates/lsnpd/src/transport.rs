//! UDP transport — one socket, unicast and directed broadcast.
//!
//! The socket is bound once at startup with SO_BROADCAST enabled; every
//! record the peer sends or receives passes through it. Receive errors are
//! absorbed so a malformed datagram or an ICMP error can never take the
//! socket down.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Largest datagram this layer will transmit. The file-transfer engine
/// chunks anything bigger long before it gets here.
pub const MAX_DATAGRAM: usize = 60 * 1024;

pub struct Transport {
    socket: Arc<UdpSocket>,
    local_ip: Ipv4Addr,
    port: u16,
    broadcast_addr: SocketAddr,
}

impl Transport {
    /// Bind the peer socket. `port` 0 lets the OS choose (used by tests);
    /// `broadcast_override` replaces the derived /24 directed broadcast.
    pub async fn bind(port: u16, broadcast_override: Option<Ipv4Addr>) -> Result<Self> {
        Self::bind_on(port, broadcast_override, None).await
    }

    /// Like [`Transport::bind`], but with the advertised local address
    /// pinned. Loopback harnesses pin 127.0.0.1 so peer ids match what the
    /// wire reports as the datagram source.
    pub async fn bind_on(
        port: u16,
        broadcast_override: Option<Ipv4Addr>,
        local_ip_override: Option<Ipv4Addr>,
    ) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("socket()")?;
        socket.set_reuse_address(true).context("SO_REUSEADDR")?;
        socket.set_broadcast(true).context("SO_BROADCAST")?;
        socket.set_nonblocking(true).context("O_NONBLOCK")?;
        socket
            .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())
            .with_context(|| format!("failed to bind UDP port {port}"))?;

        let socket = UdpSocket::from_std(socket.into()).context("tokio socket")?;
        let port = match socket.local_addr()? {
            SocketAddr::V4(v4) => v4.port(),
            other => bail!("expected IPv4 local address, got {other}"),
        };

        let local_ip = local_ip_override.unwrap_or_else(own_ipv4);
        let broadcast_ip = broadcast_override.unwrap_or_else(|| directed_broadcast(local_ip));
        let broadcast_addr = SocketAddr::from((broadcast_ip, port));

        tracing::info!(%local_ip, port, broadcast = %broadcast_addr, "transport bound");
        Ok(Self {
            socket: Arc::new(socket),
            local_ip,
            port,
            broadcast_addr,
        })
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Fire-and-forget datagram to one peer.
    pub async fn send_unicast(&self, addr: SocketAddr, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_DATAGRAM {
            bail!("datagram of {} bytes exceeds {MAX_DATAGRAM}", bytes.len());
        }
        self.socket
            .send_to(bytes, addr)
            .await
            .with_context(|| format!("send to {addr} failed"))?;
        Ok(())
    }

    /// Datagram to the subnet's directed broadcast address.
    pub async fn send_broadcast(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_DATAGRAM {
            bail!("datagram of {} bytes exceeds {MAX_DATAGRAM}", bytes.len());
        }
        self.socket
            .send_to(bytes, self.broadcast_addr)
            .await
            .context("broadcast send failed")?;
        Ok(())
    }

    /// Block until a datagram arrives. Transient receive errors are logged
    /// and swallowed; this only returns with data.
    pub async fn recv(&self, buf: &mut [u8]) -> (usize, SocketAddr) {
        loop {
            match self.socket.recv_from(buf).await {
                Ok(pair) => return pair,
                Err(e) => {
                    tracing::debug!(error = %e, "recv_from failed, continuing");
                }
            }
        }
    }
}

/// This host's outward-facing IPv4 address, found by probing a routable
/// destination. Nothing is actually transmitted. Falls back to loopback on
/// hosts with no route.
fn own_ipv4() -> Ipv4Addr {
    let probe = || -> Result<Ipv4Addr> {
        let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
        probe.connect("8.8.8.8:80")?;
        match probe.local_addr()? {
            SocketAddr::V4(v4) => Ok(*v4.ip()),
            other => bail!("expected IPv4, got {other}"),
        }
    };
    probe().unwrap_or(Ipv4Addr::LOCALHOST)
}

/// /24 directed broadcast for an address: a.b.c.255.
fn directed_broadcast(ip: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = ip.octets();
    Ipv4Addr::new(a, b, c, 255)
}
