//! Two-peer loopback harness and a fault-injecting UDP relay.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use lsnp_core::config::LsnpConfig;
use lsnp_services::LogGameSink;
use lsnpd::controller::Controller;
use lsnpd::transport::Transport;

pub struct TestPeer {
    pub controller: Arc<Controller>,
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
}

impl TestPeer {
    /// Bind a peer on an OS-assigned loopback port and start its receive,
    /// send-pump, retry, and housekeeping tasks. No mDNS, no periodic
    /// broadcast: tests introduce peers to each other explicitly.
    pub async fn spawn(user: &str) -> Self {
        let data_dir = std::env::temp_dir().join(format!(
            "lsnp-it-{user}-{}-{}",
            std::process::id(),
            uuid_suffix()
        ));
        let _ = std::fs::remove_dir_all(&data_dir);

        let mut config = LsnpConfig::default();
        config.identity.user = user.to_string();
        config.identity.display_name = format!("{user} (test)");
        config.network.port = 0;
        config.storage.data_dir = data_dir.clone();
        config.timing.chunk_delay_ms = 10;
        config.timing.offer_timeout_secs = 10;

        let transport = Arc::new(
            Transport::bind_on(0, Some(Ipv4Addr::LOCALHOST), Some(Ipv4Addr::LOCALHOST))
                .await
                .expect("bind test transport"),
        );
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, transport.port()));

        let (controller, outbound_rx) = Controller::new(&config, transport, Arc::new(LogGameSink));
        tokio::spawn(controller.clone().run_receive());
        tokio::spawn(controller.clone().run_send_pump(outbound_rx));
        tokio::spawn(controller.clone().run_retry());
        tokio::spawn(controller.clone().run_housekeeping());

        Self {
            controller,
            addr,
            data_dir,
        }
    }

    /// Teach this peer about another, as discovery would. `at` overrides
    /// the registered address so traffic can be routed through a relay.
    pub fn introduce(&self, other: &TestPeer, at: Option<SocketAddr>) {
        let addr = at.unwrap_or(other.addr);
        self.controller.registry.upsert(
            other.controller.me.clone(),
            Some(&other.controller.display_name),
            addr.port(),
        );
    }
}

fn uuid_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    format!(
        "{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

/// A bidirectional loopback relay between two fixed peers that drops the
/// first `drop_count` A→B datagrams whose text contains `drop_matching`.
pub async fn spawn_relay(
    peer_a: SocketAddr,
    peer_b: SocketAddr,
    drop_matching: &'static str,
    drop_count: usize,
) -> SocketAddr {
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind relay");
    let relay_addr = socket.local_addr().unwrap();
    let dropped = AtomicUsize::new(0);

    tokio::spawn(async move {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let datagram = &buf[..len];
            if src == peer_a {
                let text = String::from_utf8_lossy(datagram);
                if text.contains(drop_matching)
                    && dropped.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < drop_count).then_some(n + 1)
                    })
                    .is_ok()
                {
                    continue;
                }
                let _ = socket.send_to(datagram, peer_b).await;
            } else {
                let _ = socket.send_to(datagram, peer_a).await;
            }
        }
    });

    relay_addr
}

/// Poll `probe` every 50 ms until it returns Some or the deadline passes.
pub async fn wait_for<T>(
    deadline: Duration,
    mut probe: impl FnMut() -> Option<T>,
) -> Option<T> {
    let start = tokio::time::Instant::now();
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }
        if start.elapsed() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
