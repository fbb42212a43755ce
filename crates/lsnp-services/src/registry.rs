//! Peer registry — every peer this process has seen, keyed by full id.
//!
//! Written to by discovery, profile broadcasts, and any inbound record that
//! names an unknown sender. Entries are never evicted during a session;
//! stale addresses are tolerated and corrected by re-discovery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use lsnp_core::PeerId;

/// One discovered peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub peer_id: PeerId,
    pub display_name: String,
    pub port: u16,
    /// When we last heard anything from this peer.
    pub last_seen: Instant,
}

impl Peer {
    /// The address this peer listens on.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((self.peer_id.ip(), self.port))
    }
}

/// Outcome of resolving a short handle against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(PeerId),
    /// More than one full id shares the handle; the caller must use `user@ip`.
    Ambiguous,
    NotFound,
}

/// Shared peer table. Cloning is cheap; all clones see the same peers.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer. `display_name = None` keeps whatever name
    /// we already have (inbound records don't carry one).
    pub fn upsert(&self, peer_id: PeerId, display_name: Option<&str>, port: u16) {
        let now = Instant::now();
        match self.peers.get_mut(&peer_id) {
            Some(mut entry) => {
                if let Some(name) = display_name {
                    entry.display_name = name.to_string();
                }
                entry.port = port;
                entry.last_seen = now;
            }
            None => {
                let display_name = display_name.unwrap_or(peer_id.handle()).to_string();
                tracing::info!(peer = %peer_id, %display_name, port, "peer added");
                self.peers.insert(
                    peer_id.clone(),
                    Peer {
                        peer_id,
                        display_name,
                        port,
                        last_seen: now,
                    },
                );
            }
        }
    }

    /// Refresh last_seen without touching anything else.
    pub fn touch(&self, peer_id: &PeerId) {
        if let Some(mut entry) = self.peers.get_mut(peer_id) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn lookup(&self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.get(peer_id).map(|e| e.clone())
    }

    /// Resolve a handle (or a full `user@ip`) to a registered peer id.
    pub fn resolve_short(&self, handle: &str) -> Resolution {
        if handle.contains('@') {
            return match handle.parse::<PeerId>() {
                Ok(id) if self.peers.contains_key(&id) => Resolution::Resolved(id),
                _ => Resolution::NotFound,
            };
        }

        let mut matched = None;
        for entry in self.peers.iter() {
            if entry.key().handle() == handle {
                if matched.is_some() {
                    return Resolution::Ambiguous;
                }
                matched = Some(entry.key().clone());
            }
        }
        match matched {
            Some(id) => Resolution::Resolved(id),
            None => Resolution::NotFound,
        }
    }

    /// Snapshot of all known peers.
    pub fn iter(&self) -> Vec<Peer> {
        self.peers.iter().map(|e| e.clone()).collect()
    }

    /// Peers with no traffic in the last `idle` window.
    pub fn idle_peers(&self, idle: Duration) -> Vec<Peer> {
        let now = Instant::now();
        self.peers
            .iter()
            .filter(|e| now.duration_since(e.last_seen) >= idle)
            .map(|e| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
