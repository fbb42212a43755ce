//! Game message routing.
//!
//! The core transports GAME_* records reliably but never models the board:
//! an injected [`GameSink`] interprets moves. This module only tracks which
//! sessions exist, who participates, and which move ids were already seen.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use lsnp_core::message::GameMeta;
use lsnp_core::{PeerId, Record};

/// Opaque consumer of game records. The rules engine lives behind this.
pub trait GameSink: Send + Sync {
    fn on_message(&self, record: &Record);
}

/// Default sink: log the record and move on.
pub struct LogGameSink;

impl GameSink for LogGameSink {
    fn on_message(&self, record: &Record) {
        tracing::info!(
            game_type = record.message_type().unwrap_or("?"),
            game_id = record.get("GAMEID").unwrap_or("?"),
            from = record.get("FROM").unwrap_or("?"),
            "game message"
        );
    }
}

struct GameSession {
    participants: HashSet<PeerId>,
    seen_moves: HashSet<String>,
    last_activity: Instant,
}

/// Routes game records to the sink, owning session lifecycle only.
pub struct GameRouter {
    sessions: DashMap<String, GameSession>,
    sink: Arc<dyn GameSink>,
}

impl GameRouter {
    pub fn new(sink: Arc<dyn GameSink>) -> Self {
        Self {
            sessions: DashMap::new(),
            sink,
        }
    }

    /// Handle an authorized game record.
    ///
    /// GAME_INVITE creates the session; moves for unknown sessions or with
    /// already-seen ids drop; GAME_RESULT destroys the session after
    /// forwarding.
    pub fn handle(&self, meta: &GameMeta, record: &Record, me: &PeerId) {
        let message_type = record.message_type().unwrap_or_default();
        match message_type {
            "GAME_INVITE" => {
                if self.sessions.contains_key(&meta.game_id) {
                    tracing::debug!(game_id = %meta.game_id, "duplicate invite, dropping");
                    return;
                }
                let mut participants = HashSet::new();
                participants.insert(meta.from.clone());
                participants.insert(me.clone());
                self.sessions.insert(
                    meta.game_id.clone(),
                    GameSession {
                        participants,
                        seen_moves: HashSet::new(),
                        last_activity: Instant::now(),
                    },
                );
                self.sink.on_message(record);
            }
            "GAME_MOVE" => {
                {
                    let Some(mut session) = self.sessions.get_mut(&meta.game_id) else {
                        tracing::debug!(game_id = %meta.game_id, "move for unknown game, dropping");
                        return;
                    };
                    if !session.participants.contains(&meta.from) {
                        tracing::debug!(game_id = %meta.game_id, from = %meta.from, "move from non-participant, dropping");
                        return;
                    }
                    if !session.seen_moves.insert(meta.message_id.clone()) {
                        tracing::debug!(game_id = %meta.game_id, "replayed move, dropping");
                        return;
                    }
                    session.last_activity = Instant::now();
                }
                self.sink.on_message(record);
            }
            "GAME_RESULT" => {
                if self.sessions.remove(&meta.game_id).is_none() {
                    tracing::debug!(game_id = %meta.game_id, "result for unknown game, dropping");
                    return;
                }
                self.sink.on_message(record);
            }
            _ => {}
        }
    }

    /// Drop sessions with no activity inside `timeout`.
    pub fn expire_inactive(&self, timeout: Duration) {
        self.sessions.retain(|game_id, session| {
            let alive = session.last_activity.elapsed() < timeout;
            if !alive {
                tracing::info!(game_id, "game session expired");
            }
            alive
        });
    }

    pub fn active_games(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }
}
