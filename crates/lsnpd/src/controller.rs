//! Peer controller — receives, authorizes, deduplicates, and dispatches
//! every inbound record, and drives the periodic PROFILE/PING tasks.
//!
//! Nothing in the receive path may terminate the receive task: handler
//! failures are logged and the loop continues. Authorization failures drop
//! records silently (counted, and logged when verbose).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use lsnp_core::config::LsnpConfig;
use lsnp_core::message::{
    new_message_id, Ack, Dm, FileChunk, FileOffer, FileReceived, FileResponse, Follow, FollowKind,
    GameMeta, GroupCreate, GroupMsg, Like, Ping, Post, Profile, Revoke,
};
use lsnp_core::token::{self, RevocationSet, TokenError};
use lsnp_core::{now_unix, PeerId, Record, Scope};
use lsnp_services::transfer::TransferTiming;
use lsnp_services::{
    FileTransferEngine, GameRouter, GameSink, GroupTable, Outbound, PeerRegistry, SocialState,
};

use crate::reliability::{Delivery, ReliabilityLayer};
use crate::transport::Transport;

/// How long a game session may sit idle before it is destroyed.
const GAME_INACTIVITY: Duration = Duration::from_secs(600);

/// Sweep cadence for transfer stalls and game expiry.
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(15);

/// Cadence of the reliability retry sweep.
const RETRY_SWEEP: Duration = Duration::from_millis(250);

/// Dropped-record counters, reported when verbose logging is on.
#[derive(Default)]
pub struct DropCounters {
    pub codec: AtomicU64,
    pub token: AtomicU64,
    pub unknown_type: AtomicU64,
}

pub struct Controller {
    pub me: PeerId,
    pub display_name: String,
    pub transport: Arc<Transport>,
    pub reliability: Arc<ReliabilityLayer>,
    pub registry: PeerRegistry,
    pub social: Arc<SocialState>,
    pub transfers: Arc<FileTransferEngine>,
    pub groups: Arc<GroupTable>,
    pub games: Arc<GameRouter>,
    pub revocations: RevocationSet,
    pub drops: DropCounters,
    verbose: AtomicBool,
    post_ttl: AtomicU32,
    token_ttl: u64,
    broadcast_period: Duration,
}

impl Controller {
    /// Assemble a controller and its service wiring. The returned receiver
    /// feeds [`Controller::run_send_pump`].
    pub fn new(
        config: &LsnpConfig,
        transport: Arc<Transport>,
        game_sink: Arc<dyn GameSink>,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let me = PeerId::new(config.identity.user.clone(), transport.local_ip());
        let (outbound_tx, outbound_rx) = mpsc::channel(256);

        let transfers = FileTransferEngine::new(
            me.clone(),
            config.storage.data_dir.clone(),
            outbound_tx,
            TransferTiming {
                token_ttl_secs: config.timing.token_ttl_secs,
                offer_timeout: Duration::from_secs(config.timing.offer_timeout_secs),
                stall_timeout: Duration::from_secs(config.timing.transfer_stall_secs),
                chunk_delay: Duration::from_millis(config.timing.chunk_delay_ms),
            },
        );

        let controller = Arc::new(Self {
            me,
            display_name: config.identity.display_name.clone(),
            reliability: Arc::new(ReliabilityLayer::new(
                Duration::from_secs(config.timing.retry_base_secs),
                config.timing.retry_max_attempts,
            )),
            registry: PeerRegistry::new(),
            social: Arc::new(SocialState::new()),
            transfers,
            groups: Arc::new(GroupTable::new()),
            games: Arc::new(GameRouter::new(game_sink)),
            revocations: RevocationSet::new(),
            drops: DropCounters::default(),
            verbose: AtomicBool::new(false),
            post_ttl: AtomicU32::new(config.timing.post_ttl_secs),
            token_ttl: config.timing.token_ttl_secs,
            broadcast_period: Duration::from_secs(config.timing.broadcast_period_secs),
            transport,
        });
        (controller, outbound_rx)
    }

    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    pub fn toggle_verbose(&self) -> bool {
        !self.verbose.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn post_ttl(&self) -> u32 {
        self.post_ttl.load(Ordering::Relaxed)
    }

    pub fn set_post_ttl(&self, secs: u32) {
        self.post_ttl.store(secs, Ordering::Relaxed);
    }

    fn mint(&self, scope: Scope) -> String {
        token::mint(&self.me, scope, self.token_ttl)
    }

    // ── Task loops ───────────────────────────────────────────────────────────

    /// The receive task: parse, authorize, dedup, dispatch. Never exits.
    pub async fn run_receive(self: Arc<Self>) {
        let mut buf = vec![0u8; crate::transport::MAX_DATAGRAM + 1];
        loop {
            let (len, src) = self.transport.recv(&mut buf).await;
            let record = match Record::parse(&buf[..len]) {
                Ok(record) => record,
                Err(e) => {
                    self.drops.codec.fetch_add(1, Ordering::Relaxed);
                    if self.verbose() {
                        tracing::warn!(%src, error = %e, "malformed datagram dropped");
                    }
                    continue;
                }
            };
            self.handle_record(record, src).await;
        }
    }

    /// Drain the services' outbound channel into the transport.
    pub async fn run_send_pump(self: Arc<Self>, mut rx: mpsc::Receiver<Outbound>) {
        while let Some(outbound) = rx.recv().await {
            match self
                .send_record(outbound.dest, &outbound.record, outbound.reliable)
                .await
            {
                Ok(Some(waiter)) => {
                    // Nobody upstream is waiting on service sends; log the
                    // outcome so failures are visible.
                    let message_type = outbound
                        .record
                        .message_type()
                        .unwrap_or("?")
                        .to_string();
                    tokio::spawn(async move {
                        if let Ok(Delivery::Failed) = waiter.await {
                            tracing::warn!(message_type, "service send exhausted its retries");
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "outbound send failed"),
            }
        }
    }

    /// Retransmit due reliability entries.
    pub async fn run_retry(self: Arc<Self>) {
        let mut interval = tokio::time::interval(RETRY_SWEEP);
        loop {
            interval.tick().await;
            for (dest, payload) in self.reliability.due_retries() {
                if let Err(e) = self.transport.send_unicast(dest, &payload).await {
                    tracing::debug!(%dest, error = %e, "retransmission failed");
                }
            }
        }
    }

    /// PROFILE broadcast and PING sweep, every `broadcast_period`.
    pub async fn run_periodic(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.broadcast_period);
        // The immediate first tick is our startup announcement.
        interval.tick().await;
        self.announce().await;
        loop {
            interval.tick().await;
            self.broadcast_profile().await;
            self.ping_idle_peers().await;
        }
    }

    /// Transfer stall sweeps and game expiry.
    pub async fn run_housekeeping(self: Arc<Self>) {
        let mut interval = tokio::time::interval(HOUSEKEEPING_PERIOD);
        loop {
            interval.tick().await;
            self.transfers.abort_stalled();
            self.games.expire_inactive(GAME_INACTIVITY);
        }
    }

    /// Startup announcement: one PROFILE and one PING to the whole subnet,
    /// so peers without mDNS still learn about us.
    pub async fn announce(&self) {
        let profile = Profile {
            user_id: self.me.clone(),
            display_name: self.display_name.clone(),
            timestamp: now_unix(),
        };
        if let Ok(bytes) = profile.to_record().serialize() {
            if let Err(e) = self.transport.send_broadcast(&bytes).await {
                tracing::debug!(error = %e, "profile broadcast failed");
            }
        }
        let ping = Ping {
            user_id: self.me.clone(),
        };
        if let Ok(bytes) = ping.to_record().serialize() {
            if let Err(e) = self.transport.send_broadcast(&bytes).await {
                tracing::debug!(error = %e, "ping broadcast failed");
            }
        }
    }

    /// PROFILE to every known peer.
    pub async fn broadcast_profile(&self) {
        let profile = Profile {
            user_id: self.me.clone(),
            display_name: self.display_name.clone(),
            timestamp: now_unix(),
        };
        let record = profile.to_record();
        let mut sent = 0usize;
        for peer in self.registry.iter() {
            if self
                .send_record(peer.addr(), &record, false)
                .await
                .is_ok()
            {
                sent += 1;
            }
        }
        tracing::info!(peers = sent, "profile broadcast complete");
    }

    /// PING every peer silent for a full broadcast period.
    async fn ping_idle_peers(&self) {
        let ping = Ping {
            user_id: self.me.clone(),
        };
        let record = ping.to_record();
        for peer in self.registry.idle_peers(self.broadcast_period) {
            if let Err(e) = self.send_record(peer.addr(), &record, false).await {
                tracing::debug!(peer = %peer.peer_id, error = %e, "ping failed");
            }
        }
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Serialize and transmit one record. Reliable sends are parked in the
    /// reliability table first; the returned waiter resolves on ACK or
    /// exhaustion.
    pub async fn send_record(
        &self,
        dest: SocketAddr,
        record: &Record,
        reliable: bool,
    ) -> Result<Option<oneshot::Receiver<Delivery>>> {
        let bytes = Bytes::from(record.serialize().context("record serialization")?);
        let waiter = if reliable {
            let message_id = record
                .get("MESSAGE_ID")
                .context("reliable record without MESSAGE_ID")?;
            Some(self.reliability.register(message_id, dest, bytes.clone()))
        } else {
            None
        };
        self.transport.send_unicast(dest, &bytes).await?;
        Ok(waiter)
    }

    async fn send_ack(&self, message_id: &str, dest: SocketAddr) {
        let ack = Ack {
            message_id: message_id.to_string(),
        };
        if let Ok(bytes) = ack.to_record().serialize() {
            if let Err(e) = self.transport.send_unicast(dest, &bytes).await {
                tracing::debug!(%dest, error = %e, "ack send failed");
            }
        }
    }

    // ── Receive path ─────────────────────────────────────────────────────────

    /// Validate a token against scope, clock, source address, and the
    /// revocation set.
    fn authorize(&self, tok: &str, scope: Scope, src_ip: Ipv4Addr) -> bool {
        let result = if self.revocations.is_revoked(tok) {
            Err(TokenError::Revoked)
        } else {
            token::validate(tok, scope, src_ip, now_unix()).map(|_| ())
        };
        if let Err(e) = result {
            self.drops.token.fetch_add(1, Ordering::Relaxed);
            if self.verbose() {
                tracing::warn!(%src_ip, error = %e, "token rejected");
            }
            return false;
        }
        true
    }

    /// The FROM field must name the datagram's source address.
    fn from_matches(&self, from: &PeerId, src_ip: Ipv4Addr) -> bool {
        if from.ip() != src_ip {
            if self.verbose() {
                tracing::warn!(from = %from, %src_ip, "FROM ip does not match source, dropping");
            }
            return false;
        }
        true
    }

    /// Discovery via use: any valid record names its sender, and the
    /// datagram source carries a usable address.
    fn upsert_sender(&self, from: &PeerId, src: SocketAddr) {
        self.registry.upsert(from.clone(), None, src.port());
    }

    /// Dedup helper: true when this `(sender, message_id)` should dispatch.
    /// Duplicates are re-ACKed here.
    async fn first_sight_or_reack(&self, from: &PeerId, message_id: &str, src: SocketAddr) -> bool {
        if self.reliability.first_sight(&from.to_string(), message_id) {
            return true;
        }
        tracing::debug!(%from, message_id, "duplicate record, re-acking");
        self.send_ack(message_id, src).await;
        false
    }

    /// Dispatch one parsed record. Every failure path drops the record and
    /// keeps the loop alive.
    pub async fn handle_record(&self, record: Record, src: SocketAddr) {
        let SocketAddr::V4(src_v4) = src else {
            return;
        };
        let src_ip = *src_v4.ip();
        let Some(message_type) = record.message_type().map(str::to_string) else {
            return;
        };

        if self.verbose() {
            tracing::info!(%src, message_type, "record received");
        }

        match message_type.as_str() {
            "PROFILE" => {
                let Ok(profile) = Profile::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&profile.user_id, src_ip) {
                    return;
                }
                self.registry
                    .upsert(profile.user_id, Some(&profile.display_name), src.port());
            }
            "PING" => {
                let Ok(ping) = Ping::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&ping.user_id, src_ip) {
                    return;
                }
                self.upsert_sender(&ping.user_id, src);
                self.registry.touch(&ping.user_id);
            }
            "ACK" => {
                let Ok(ack) = Ack::from_record(&record) else {
                    return;
                };
                self.reliability.ack(&ack.message_id);
            }
            "DM" => {
                let Ok(dm) = Dm::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&dm.from, src_ip) || dm.to != self.me {
                    return;
                }
                if !self.authorize(&dm.token, Scope::Chat, src_ip) {
                    return;
                }
                self.upsert_sender(&dm.from, src);
                if !self.first_sight_or_reack(&dm.from, &dm.message_id, src).await {
                    return;
                }
                tracing::info!(from = %dm.from, content = %dm.content, "dm received");
                self.social.deliver_dm(&dm);
                self.send_ack(&dm.message_id, src).await;
            }
            "POST" => {
                let Ok(post) = Post::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&post.from, src_ip) {
                    return;
                }
                if !self.authorize(&post.token, Scope::Broadcast, src_ip) {
                    return;
                }
                self.upsert_sender(&post.from, src);
                if !self
                    .first_sight_or_reack(&post.from, &post.message_id, src)
                    .await
                {
                    return;
                }
                if self.social.record_post(&post) {
                    tracing::info!(from = %post.from, content = %post.content, "post stored");
                } else {
                    tracing::debug!(from = %post.from, "post from unfollowed author, not stored");
                }
                self.send_ack(&post.message_id, src).await;
            }
            "LIKE" => {
                let Ok(like) = Like::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&like.from, src_ip) || like.to != self.me {
                    return;
                }
                if !self.authorize(&like.token, Scope::Broadcast, src_ip) {
                    return;
                }
                self.upsert_sender(&like.from, src);
                if !self
                    .first_sight_or_reack(&like.from, &like.message_id, src)
                    .await
                {
                    return;
                }
                if self
                    .social
                    .apply_like(&like.post_id, like.from.clone(), like.action)
                {
                    tracing::info!(
                        from = %like.from,
                        post = %like.post_id,
                        action = like.action.as_str(),
                        "like applied"
                    );
                } else {
                    tracing::debug!(post = %like.post_id, "like for unknown post, ignored");
                }
                self.send_ack(&like.message_id, src).await;
            }
            "FOLLOW" | "UNFOLLOW" => {
                let Ok(follow) = Follow::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&follow.from, src_ip) || follow.to != self.me {
                    return;
                }
                if !self.authorize(&follow.token, Scope::Follow, src_ip) {
                    return;
                }
                self.upsert_sender(&follow.from, src);
                if !self
                    .first_sight_or_reack(&follow.from, &follow.message_id, src)
                    .await
                {
                    return;
                }
                let notice = match follow.kind {
                    FollowKind::Follow => {
                        self.social.add_follower(follow.from.clone());
                        format!("{} is now following you", follow.from.handle())
                    }
                    FollowKind::Unfollow => {
                        self.social.remove_follower(&follow.from);
                        format!("{} unfollowed you", follow.from.handle())
                    }
                };
                tracing::info!(from = %follow.from, "{notice}");
                self.social
                    .deliver_notice(follow.from.clone(), follow.timestamp, notice);
                self.send_ack(&follow.message_id, src).await;
            }
            "FILE_OFFER" => {
                let Ok(offer) = FileOffer::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&offer.from, src_ip) || offer.to != self.me {
                    return;
                }
                if !self.authorize(&offer.token, Scope::File, src_ip) {
                    return;
                }
                self.upsert_sender(&offer.from, src);
                let message_id = offer.message_id.clone();
                if !self.first_sight_or_reack(&offer.from, &message_id, src).await {
                    return;
                }
                self.transfers.handle_offer(offer, src);
                self.send_ack(&message_id, src).await;
            }
            "FILE_ACCEPT" | "FILE_REJECT" => {
                let Ok(response) = FileResponse::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&response.from, src_ip) || response.to != self.me {
                    return;
                }
                if !self.authorize(&response.token, Scope::File, src_ip) {
                    return;
                }
                self.upsert_sender(&response.from, src);
                if !self
                    .first_sight_or_reack(&response.from, &response.message_id, src)
                    .await
                {
                    return;
                }
                self.transfers.handle_response(&response);
                self.send_ack(&response.message_id, src).await;
            }
            "FILE_CHUNK" => {
                let Ok(chunk) = FileChunk::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&chunk.from, src_ip) || chunk.to != self.me {
                    return;
                }
                if !self.authorize(&chunk.token, Scope::File, src_ip) {
                    return;
                }
                if !self
                    .first_sight_or_reack(&chunk.from, &chunk.message_id, src)
                    .await
                {
                    return;
                }
                if let Err(e) = self.transfers.handle_chunk(&chunk).await {
                    tracing::warn!(file_id = %chunk.file_id, error = %e, "transfer aborted");
                }
                self.send_ack(&chunk.message_id, src).await;
            }
            "FILE_RECEIVED" => {
                let Ok(received) = FileReceived::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&received.from, src_ip) || received.to != self.me {
                    return;
                }
                if !self.authorize(&received.token, Scope::File, src_ip) {
                    return;
                }
                if !self
                    .first_sight_or_reack(&received.from, &received.message_id, src)
                    .await
                {
                    return;
                }
                // Terminal acknowledgment: dispatched, never ACKed back.
                self.transfers.handle_received(&received);
            }
            "GAME_INVITE" | "GAME_MOVE" | "GAME_RESULT" => {
                let Ok(meta) = GameMeta::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&meta.from, src_ip) {
                    return;
                }
                if !self.authorize(&meta.token, Scope::Game, src_ip) {
                    return;
                }
                self.upsert_sender(&meta.from, src);
                if !self
                    .first_sight_or_reack(&meta.from, &meta.message_id, src)
                    .await
                {
                    return;
                }
                self.games.handle(&meta, &record, &self.me);
                self.send_ack(&meta.message_id, src).await;
            }
            "GROUP_CREATE" => {
                let Ok(create) = GroupCreate::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&create.from, src_ip) {
                    return;
                }
                if !self.authorize(&create.token, Scope::Group, src_ip) {
                    return;
                }
                self.upsert_sender(&create.from, src);
                if !self
                    .first_sight_or_reack(&create.from, &create.message_id, src)
                    .await
                {
                    return;
                }
                self.groups.install(&create, &self.me);
                self.send_ack(&create.message_id, src).await;
            }
            "GROUP_MSG" => {
                let Ok(msg) = GroupMsg::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&msg.from, src_ip) {
                    return;
                }
                if !self.authorize(&msg.token, Scope::Group, src_ip) {
                    return;
                }
                // Messages for unknown groups or from non-members drop
                // entirely, ACK included.
                if !self.groups.may_route(&msg.group_id, &msg.from) {
                    tracing::debug!(group_id = %msg.group_id, from = %msg.from, "unroutable group message");
                    return;
                }
                self.upsert_sender(&msg.from, src);
                if !self
                    .first_sight_or_reack(&msg.from, &msg.message_id, src)
                    .await
                {
                    return;
                }
                let group_name = self
                    .groups
                    .get(&msg.group_id)
                    .map(|g| g.group_name)
                    .unwrap_or_else(|| msg.group_id.clone());
                tracing::info!(group = %group_name, from = %msg.from, content = %msg.content, "group message");
                self.social.deliver_notice(
                    msg.from.clone(),
                    msg.timestamp,
                    format!("[{group_name}] {}", msg.content),
                );
                self.send_ack(&msg.message_id, src).await;
            }
            "REVOKE" => {
                let Ok(revoke) = Revoke::from_record(&record) else {
                    return;
                };
                if !self.from_matches(&revoke.from, src_ip) {
                    return;
                }
                // Only the token's own minter may revoke it.
                let owner_matches = revoke
                    .revoked_token
                    .split('|')
                    .next()
                    .and_then(|u| u.parse::<PeerId>().ok())
                    .map(|owner| owner == revoke.from)
                    .unwrap_or(false);
                if !owner_matches {
                    tracing::debug!(from = %revoke.from, "revoke for someone else's token, dropping");
                    return;
                }
                self.upsert_sender(&revoke.from, src);
                if !self
                    .first_sight_or_reack(&revoke.from, &revoke.message_id, src)
                    .await
                {
                    return;
                }
                self.revocations.revoke(revoke.revoked_token.clone());
                tracing::info!(from = %revoke.from, "token revoked");
                self.send_ack(&revoke.message_id, src).await;
            }
            other => {
                self.drops.unknown_type.fetch_add(1, Ordering::Relaxed);
                if self.verbose() {
                    tracing::warn!(message_type = other, %src, "unknown TYPE dropped");
                }
            }
        }
    }

    // ── Command-facing operations ────────────────────────────────────────────

    /// Send a DM and wait for the delivery verdict.
    pub async fn send_dm(&self, to: &PeerId, content: &str) -> Result<Delivery> {
        let peer = self
            .registry
            .lookup(to)
            .with_context(|| format!("unknown peer {to}"))?;
        let dm = Dm {
            from: self.me.clone(),
            to: to.clone(),
            content: content.to_string(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: self.mint(Scope::Chat),
        };
        let waiter = self
            .send_record(peer.addr(), &dm.to_record(), true)
            .await?
            .expect("reliable send returns a waiter");
        Ok(waiter.await.unwrap_or(Delivery::Failed))
    }

    /// Follow a peer: update local state and notify them.
    pub async fn follow(&self, to: &PeerId) -> Result<Delivery> {
        if *to == self.me {
            anyhow::bail!("cannot follow yourself");
        }
        if !self.social.start_following(to.clone()) {
            anyhow::bail!("already following {to}");
        }
        self.send_follow_change(to, FollowKind::Follow).await
    }

    /// Unfollow a peer.
    pub async fn unfollow(&self, to: &PeerId) -> Result<Delivery> {
        if !self.social.stop_following(to) {
            anyhow::bail!("not following {to}");
        }
        self.send_follow_change(to, FollowKind::Unfollow).await
    }

    async fn send_follow_change(&self, to: &PeerId, kind: FollowKind) -> Result<Delivery> {
        let peer = self
            .registry
            .lookup(to)
            .with_context(|| format!("unknown peer {to}"))?;
        let follow = Follow {
            kind,
            from: self.me.clone(),
            to: to.clone(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: self.mint(Scope::Follow),
        };
        let waiter = self
            .send_record(peer.addr(), &follow.to_record(), true)
            .await?
            .expect("reliable send returns a waiter");
        Ok(waiter.await.unwrap_or(Delivery::Failed))
    }

    /// Publish a post: fan out one record per follower. Returns how many
    /// followers were addressed.
    pub async fn post(&self, content: &str) -> Result<usize> {
        let post = self.social.create_post(
            self.me.clone(),
            content.to_string(),
            self.post_ttl(),
            now_unix(),
        );
        let mut sent = 0usize;
        for follower in self.social.followers() {
            let Some(peer) = self.registry.lookup(&follower) else {
                tracing::warn!(follower = %follower, "follower not in registry, skipped");
                continue;
            };
            // Each copy gets its own MESSAGE_ID so reliability tracking
            // stays per destination.
            let copy = Post {
                from: self.me.clone(),
                content: post.content.clone(),
                ttl_seconds: post.ttl_seconds,
                message_id: new_message_id(),
                timestamp: post.created_at,
                token: self.mint(Scope::Broadcast),
            };
            match self.send_record(peer.addr(), &copy.to_record(), true).await {
                Ok(Some(waiter)) => {
                    sent += 1;
                    let follower = follower.clone();
                    tokio::spawn(async move {
                        if let Ok(Delivery::Failed) = waiter.await {
                            tracing::warn!(follower = %follower, "post delivery failed");
                        }
                    });
                }
                _ => tracing::warn!(follower = %follower, "post send failed"),
            }
        }
        Ok(sent)
    }

    /// Toggle a like on a post owned by `author`.
    pub async fn like(&self, post_id: &str, author: &PeerId) -> Result<Delivery> {
        let peer = self
            .registry
            .lookup(author)
            .with_context(|| format!("unknown peer {author}"))?;
        let action = self.social.toggle_my_like(post_id);
        let like = Like {
            from: self.me.clone(),
            to: author.clone(),
            post_id: post_id.to_string(),
            action,
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: self.mint(Scope::Broadcast),
        };
        let waiter = self
            .send_record(peer.addr(), &like.to_record(), true)
            .await?
            .expect("reliable send returns a waiter");
        Ok(waiter.await.unwrap_or(Delivery::Failed))
    }

    /// Create a group containing us and `members`, and notify every member.
    pub async fn create_group(&self, name: &str, members: Vec<PeerId>) -> Result<String> {
        let group_id = new_message_id();
        let mut all_members = members;
        if !all_members.contains(&self.me) {
            all_members.push(self.me.clone());
        }

        let create = GroupCreate {
            from: self.me.clone(),
            group_id: group_id.clone(),
            group_name: name.to_string(),
            members: all_members.clone(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: self.mint(Scope::Group),
        };
        self.groups.install(&create, &self.me);

        for member in &all_members {
            if *member == self.me {
                continue;
            }
            let Some(peer) = self.registry.lookup(member) else {
                tracing::warn!(member = %member, "group member not in registry, skipped");
                continue;
            };
            let copy = GroupCreate {
                message_id: new_message_id(),
                ..create.clone()
            };
            match self.send_record(peer.addr(), &copy.to_record(), true).await {
                Ok(Some(waiter)) => {
                    let member = member.clone();
                    tokio::spawn(async move {
                        if let Ok(Delivery::Failed) = waiter.await {
                            tracing::warn!(member = %member, "group create delivery failed");
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(member = %member, error = %e, "group create send failed"),
            }
        }
        Ok(group_id)
    }

    /// Send a message to every member of a group we belong to.
    pub async fn group_message(&self, group_name: &str, content: &str) -> Result<usize> {
        let group = self
            .groups
            .by_name(group_name)
            .with_context(|| format!("unknown group {group_name}"))?;
        let mut sent = 0usize;
        for member in &group.members {
            if *member == self.me {
                continue;
            }
            let Some(peer) = self.registry.lookup(member) else {
                tracing::warn!(member = %member, "group member not in registry, skipped");
                continue;
            };
            let msg = GroupMsg {
                from: self.me.clone(),
                group_id: group.group_id.clone(),
                content: content.to_string(),
                message_id: new_message_id(),
                timestamp: now_unix(),
                token: self.mint(Scope::Group),
            };
            match self.send_record(peer.addr(), &msg.to_record(), true).await {
                Ok(Some(waiter)) => {
                    sent += 1;
                    let member = member.clone();
                    tokio::spawn(async move {
                        if let Ok(Delivery::Failed) = waiter.await {
                            tracing::warn!(member = %member, "group message delivery failed");
                        }
                    });
                }
                Ok(None) => sent += 1,
                Err(e) => tracing::warn!(member = %member, error = %e, "group message send failed"),
            }
        }
        Ok(sent)
    }

    /// Offer a file to a peer; resolves once the receiver accepts.
    pub async fn send_file(
        &self,
        to: &PeerId,
        path: &std::path::Path,
        description: &str,
    ) -> Result<String> {
        let peer = self
            .registry
            .lookup(to)
            .with_context(|| format!("unknown peer {to}"))?;
        let file_id = self
            .transfers
            .offer_file(to.clone(), peer.addr(), path, description)
            .await?;
        Ok(file_id)
    }
}
