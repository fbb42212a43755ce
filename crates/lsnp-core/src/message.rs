//! Typed views over LSNP records.
//!
//! The wire format is stringly-typed key-value pairs; handlers are not.
//! Each message TYPE gets a facade that validates required fields on
//! construction and fails fast with a typed error. Building the reverse
//! direction (`to_record`) fixes the field order, so serialized output is
//! stable across runs.

use std::str::FromStr;

use crate::identity::PeerId;
use crate::record::Record;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("field {field} has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("record TYPE '{0}' does not match this facade")]
    WrongType(String),
}

/// Fresh UUIDv4 message id.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn require<'a>(record: &'a Record, field: &'static str) -> Result<&'a str, MessageError> {
    record.get(field).ok_or(MessageError::MissingField(field))
}

fn require_parsed<T: FromStr>(record: &Record, field: &'static str) -> Result<T, MessageError> {
    let raw = require(record, field)?;
    raw.parse().map_err(|_| MessageError::InvalidField {
        field,
        value: raw.to_string(),
    })
}

fn check_type(record: &Record, expected: &str) -> Result<(), MessageError> {
    match record.message_type() {
        Some(t) if t == expected => Ok(()),
        Some(t) => Err(MessageError::WrongType(t.to_string())),
        None => Err(MessageError::MissingField("TYPE")),
    }
}

// ── Unacknowledged presence types ────────────────────────────────────────────

/// PROFILE — announces identity and display name. Never ACKed.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_id: PeerId,
    pub display_name: String,
    pub timestamp: u64,
}

impl Profile {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "PROFILE")?;
        Ok(Self {
            user_id: require_parsed(record, "USER_ID")?,
            display_name: require(record, "DISPLAY_NAME")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP").unwrap_or(0),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("PROFILE")
            .with("USER_ID", &self.user_id)
            .with("DISPLAY_NAME", &self.display_name)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", new_message_id())
    }
}

/// PING — keepalive probe. Never ACKed.
#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    pub user_id: PeerId,
}

impl Ping {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "PING")?;
        Ok(Self {
            user_id: require_parsed(record, "USER_ID")?,
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("PING").with("USER_ID", &self.user_id)
    }
}

/// ACK — delivery receipt for a MESSAGE_ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub message_id: String,
}

impl Ack {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "ACK")?;
        Ok(Self {
            message_id: require(record, "MESSAGE_ID")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("ACK")
            .with("MESSAGE_ID", &self.message_id)
            .with("STATUS", "RECEIVED")
    }
}

// ── Social types ─────────────────────────────────────────────────────────────

/// DM — direct message to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Dm {
    pub from: PeerId,
    pub to: PeerId,
    pub content: String,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl Dm {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "DM")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            content: require(record, "CONTENT")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("DM")
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("CONTENT", &self.content)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
    }
}

/// POST — fanned out by the author, one record per follower.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub from: PeerId,
    pub content: String,
    pub ttl_seconds: u32,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl Post {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "POST")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            content: require(record, "CONTENT")?.to_string(),
            ttl_seconds: require_parsed(record, "TTL").unwrap_or(60),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("POST")
            .with("MESSAGE_ID", &self.message_id)
            .with("FROM", &self.from)
            .with("TIMESTAMP", self.timestamp)
            .with("TTL", self.ttl_seconds)
            .with("TOKEN", &self.token)
            .with("CONTENT", &self.content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeAction {
    Like,
    Unlike,
}

impl LikeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LikeAction::Like => "LIKE",
            LikeAction::Unlike => "UNLIKE",
        }
    }
}

/// LIKE — toggles the liker's state on a post identified by its timestamp id.
#[derive(Debug, Clone, PartialEq)]
pub struct Like {
    pub from: PeerId,
    pub to: PeerId,
    pub post_id: String,
    pub action: LikeAction,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl Like {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "LIKE")?;
        let action = match require(record, "ACTION")? {
            "LIKE" => LikeAction::Like,
            "UNLIKE" => LikeAction::Unlike,
            other => {
                return Err(MessageError::InvalidField {
                    field: "ACTION",
                    value: other.to_string(),
                })
            }
        };
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            post_id: require(record, "POST_TIMESTAMP")?.to_string(),
            action,
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("LIKE")
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("POST_TIMESTAMP", &self.post_id)
            .with("ACTION", self.action.as_str())
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowKind {
    Follow,
    Unfollow,
}

/// FOLLOW / UNFOLLOW — mutates the recipient's follower set.
#[derive(Debug, Clone, PartialEq)]
pub struct Follow {
    pub kind: FollowKind,
    pub from: PeerId,
    pub to: PeerId,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl Follow {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        let kind = match record.message_type() {
            Some("FOLLOW") => FollowKind::Follow,
            Some("UNFOLLOW") => FollowKind::Unfollow,
            Some(t) => return Err(MessageError::WrongType(t.to_string())),
            None => return Err(MessageError::MissingField("TYPE")),
        };
        Ok(Self {
            kind,
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        let message_type = match self.kind {
            FollowKind::Follow => "FOLLOW",
            FollowKind::Unfollow => "UNFOLLOW",
        };
        Record::of_type(message_type)
            .with("MESSAGE_ID", &self.message_id)
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("TIMESTAMP", self.timestamp)
            .with("TOKEN", &self.token)
    }
}

// ── File transfer types ──────────────────────────────────────────────────────

/// FILE_OFFER — opens a transfer; the receiver answers accept or reject.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOffer {
    pub from: PeerId,
    pub to: PeerId,
    pub file_id: String,
    pub filename: String,
    pub filesize: u64,
    pub filetype: String,
    pub description: String,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl FileOffer {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "FILE_OFFER")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            file_id: require(record, "FILEID")?.to_string(),
            filename: require(record, "FILENAME")?.to_string(),
            filesize: require_parsed(record, "FILESIZE")?,
            filetype: require(record, "FILETYPE")?.to_string(),
            description: record.get("DESCRIPTION").unwrap_or_default().to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("FILE_OFFER")
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("FILENAME", &self.filename)
            .with("FILESIZE", self.filesize)
            .with("FILETYPE", &self.filetype)
            .with("FILEID", &self.file_id)
            .with("DESCRIPTION", &self.description)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
    }
}

/// FILE_ACCEPT / FILE_REJECT — the receiver's answer to an offer.
#[derive(Debug, Clone, PartialEq)]
pub struct FileResponse {
    pub accepted: bool,
    pub from: PeerId,
    pub to: PeerId,
    pub file_id: String,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl FileResponse {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        let accepted = match record.message_type() {
            Some("FILE_ACCEPT") => true,
            Some("FILE_REJECT") => false,
            Some(t) => return Err(MessageError::WrongType(t.to_string())),
            None => return Err(MessageError::MissingField("TYPE")),
        };
        Ok(Self {
            accepted,
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            file_id: require(record, "FILEID")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        let message_type = if self.accepted {
            "FILE_ACCEPT"
        } else {
            "FILE_REJECT"
        };
        Record::of_type(message_type)
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("FILEID", &self.file_id)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
    }
}

/// FILE_CHUNK — one base64 slice of the file, addressed by index.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChunk {
    pub from: PeerId,
    pub to: PeerId,
    pub file_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub data: String,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl FileChunk {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "FILE_CHUNK")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            file_id: require(record, "FILEID")?.to_string(),
            chunk_index: require_parsed(record, "CHUNK_INDEX")?,
            total_chunks: require_parsed(record, "TOTAL_CHUNKS")?,
            chunk_size: require_parsed(record, "CHUNK_SIZE")?,
            data: require(record, "DATA")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("FILE_CHUNK")
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("FILEID", &self.file_id)
            .with("CHUNK_INDEX", self.chunk_index)
            .with("TOTAL_CHUNKS", self.total_chunks)
            .with("CHUNK_SIZE", self.chunk_size)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
            .with("DATA", &self.data)
    }
}

/// FILE_RECEIVED — terminal receipt from the receiver; not itself ACKed.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReceived {
    pub from: PeerId,
    pub to: PeerId,
    pub file_id: String,
    pub status: String,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl FileReceived {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "FILE_RECEIVED")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            to: require_parsed(record, "TO")?,
            file_id: require(record, "FILEID")?.to_string(),
            status: require(record, "STATUS")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("FILE_RECEIVED")
            .with("FROM", &self.from)
            .with("TO", &self.to)
            .with("FILEID", &self.file_id)
            .with("STATUS", &self.status)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
    }
}

// ── Group types ──────────────────────────────────────────────────────────────

/// GROUP_CREATE — installs a routing entry on every listed member.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCreate {
    pub from: PeerId,
    pub group_id: String,
    pub group_name: String,
    pub members: Vec<PeerId>,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl GroupCreate {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "GROUP_CREATE")?;
        let raw_members = require(record, "MEMBERS")?;
        let members = raw_members
            .split(',')
            .filter(|m| !m.trim().is_empty())
            .map(|m| m.trim().parse())
            .collect::<Result<Vec<PeerId>, _>>()
            .map_err(|_| MessageError::InvalidField {
                field: "MEMBERS",
                value: raw_members.to_string(),
            })?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            group_id: require(record, "GROUP_ID")?.to_string(),
            group_name: require(record, "GROUP_NAME")?.to_string(),
            members,
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        let members = self
            .members
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Record::of_type("GROUP_CREATE")
            .with("FROM", &self.from)
            .with("GROUP_ID", &self.group_id)
            .with("GROUP_NAME", &self.group_name)
            .with("MEMBERS", members)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
    }
}

/// GROUP_MSG — chat line routed to every member of a known group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMsg {
    pub from: PeerId,
    pub group_id: String,
    pub content: String,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

impl GroupMsg {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "GROUP_MSG")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            group_id: require(record, "GROUP_ID")?.to_string(),
            content: require(record, "CONTENT")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
            token: require(record, "TOKEN")?.to_string(),
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("GROUP_MSG")
            .with("FROM", &self.from)
            .with("GROUP_ID", &self.group_id)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.token)
            .with("CONTENT", &self.content)
    }
}

// ── Game and revocation ──────────────────────────────────────────────────────

/// Minimal view of a GAME_* record: enough to authorize, dedup, and route.
/// Move semantics stay opaque to the core.
#[derive(Debug, Clone, PartialEq)]
pub struct GameMeta {
    pub from: PeerId,
    pub game_id: String,
    pub message_id: String,
    pub token: String,
}

impl GameMeta {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        match record.message_type() {
            Some("GAME_INVITE" | "GAME_MOVE" | "GAME_RESULT") => {}
            Some(t) => return Err(MessageError::WrongType(t.to_string())),
            None => return Err(MessageError::MissingField("TYPE")),
        }
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            game_id: require(record, "GAMEID")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            token: require(record, "TOKEN")?.to_string(),
        })
    }
}

/// REVOKE — the named token is no longer to be honored.
#[derive(Debug, Clone, PartialEq)]
pub struct Revoke {
    pub from: PeerId,
    pub revoked_token: String,
    pub message_id: String,
    pub timestamp: u64,
}

impl Revoke {
    pub fn from_record(record: &Record) -> Result<Self, MessageError> {
        check_type(record, "REVOKE")?;
        Ok(Self {
            from: require_parsed(record, "FROM")?,
            revoked_token: require(record, "TOKEN")?.to_string(),
            message_id: require(record, "MESSAGE_ID")?.to_string(),
            timestamp: require_parsed(record, "TIMESTAMP")?,
        })
    }

    pub fn to_record(&self) -> Record {
        Record::of_type("REVOKE")
            .with("FROM", &self.from)
            .with("TIMESTAMP", self.timestamp)
            .with("MESSAGE_ID", &self.message_id)
            .with("TOKEN", &self.revoked_token)
    }
}
