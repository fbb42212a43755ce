//! Command surface — verbs consumed from the external CLI.
//!
//! Lines arrive as `verb arg arg...`; short handles resolve against the
//! peer registry and ambiguity is rejected, never guessed. Execution
//! returns text for the caller to display, or `Outcome::Quit`.

use std::path::PathBuf;
use std::sync::Arc;

use lsnp_core::PeerId;
use lsnp_services::Resolution;

use crate::controller::Controller;
use crate::reliability::Delivery;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Peers,
    Dms,
    Dm { user: String, message: String },
    Post { content: String },
    Like { post_id: String, user: String },
    Follow { user: String },
    Unfollow { user: String },
    Broadcast,
    Ping,
    Ttl { seconds: u32 },
    SendFile { user: String, path: PathBuf, description: String },
    AcceptFile { file_id: String },
    RejectFile { file_id: String },
    PendingFiles,
    Transfers,
    GroupCreate { name: String, users: Vec<String> },
    GroupMsg { name: String, message: String },
    GroupList,
    Verbose,
    Quit,
}

/// What a successfully executed command produced.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Reply(String),
    Quit,
}

/// Parse one input line. Unknown verbs and missing arguments are errors
/// carrying a usage hint.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(' ') {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    match verb {
        "peers" => Ok(Command::Peers),
        "dms" => Ok(Command::Dms),
        "dm" => match rest.split_once(' ') {
            Some((user, message)) if !message.trim().is_empty() => Ok(Command::Dm {
                user: user.to_string(),
                message: message.trim().to_string(),
            }),
            _ => Err("usage: dm <user> <message>".into()),
        },
        "post" => {
            if rest.is_empty() {
                Err("usage: post <content>".into())
            } else {
                Ok(Command::Post {
                    content: rest.to_string(),
                })
            }
        }
        "like" => match rest.split_once(' ') {
            Some((post_id, user)) if !user.trim().is_empty() => Ok(Command::Like {
                post_id: post_id.to_string(),
                user: user.trim().to_string(),
            }),
            _ => Err("usage: like <post_ts> <user>".into()),
        },
        "follow" => {
            if rest.is_empty() {
                Err("usage: follow <user>".into())
            } else {
                Ok(Command::Follow {
                    user: rest.to_string(),
                })
            }
        }
        "unfollow" => {
            if rest.is_empty() {
                Err("usage: unfollow <user>".into())
            } else {
                Ok(Command::Unfollow {
                    user: rest.to_string(),
                })
            }
        }
        "broadcast" => Ok(Command::Broadcast),
        "ping" => Ok(Command::Ping),
        "ttl" => rest
            .parse()
            .map(|seconds| Command::Ttl { seconds })
            .map_err(|_| "usage: ttl <seconds>".into()),
        "sendfile" => {
            let mut parts = rest.splitn(3, ' ');
            match (parts.next(), parts.next()) {
                (Some(user), Some(path)) if !path.is_empty() => Ok(Command::SendFile {
                    user: user.to_string(),
                    path: PathBuf::from(path),
                    description: parts.next().unwrap_or("").to_string(),
                }),
                _ => Err("usage: sendfile <user> <path> [desc]".into()),
            }
        }
        "acceptfile" => {
            if rest.is_empty() {
                Err("usage: acceptfile <fileid>".into())
            } else {
                Ok(Command::AcceptFile {
                    file_id: rest.to_string(),
                })
            }
        }
        "rejectfile" => {
            if rest.is_empty() {
                Err("usage: rejectfile <fileid>".into())
            } else {
                Ok(Command::RejectFile {
                    file_id: rest.to_string(),
                })
            }
        }
        "pendingfiles" => Ok(Command::PendingFiles),
        "transfers" => Ok(Command::Transfers),
        "group" => {
            let (sub, sub_rest) = match rest.split_once(' ') {
                Some((s, r)) => (s, r.trim()),
                None => (rest, ""),
            };
            match sub {
                "list" => Ok(Command::GroupList),
                "create" => match sub_rest.split_once(' ') {
                    Some((name, users)) if !users.trim().is_empty() => Ok(Command::GroupCreate {
                        name: name.to_string(),
                        users: users
                            .split(',')
                            .map(|u| u.trim().to_string())
                            .filter(|u| !u.is_empty())
                            .collect(),
                    }),
                    _ => Err("usage: group create <name> <user,user,...>".into()),
                },
                "msg" => match sub_rest.split_once(' ') {
                    Some((name, message)) if !message.trim().is_empty() => Ok(Command::GroupMsg {
                        name: name.to_string(),
                        message: message.trim().to_string(),
                    }),
                    _ => Err("usage: group msg <name> <message>".into()),
                },
                _ => Err("usage: group list | group create <name> <users> | group msg <name> <message>".into()),
            }
        }
        "verbose" => Ok(Command::Verbose),
        "quit" => Ok(Command::Quit),
        other => Err(format!("unknown command: {other}")),
    }
}

/// Resolve a user argument to a full peer id, rejecting ambiguity.
fn resolve(controller: &Controller, user: &str) -> Result<PeerId, String> {
    match controller.registry.resolve_short(user) {
        Resolution::Resolved(id) => Ok(id),
        Resolution::Ambiguous => Err(format!(
            "'{user}' matches several peers; use the full user@ip form"
        )),
        Resolution::NotFound => Err(format!("unknown peer: {user}")),
    }
}

fn delivery_text(delivery: Delivery, what: &str) -> String {
    match delivery {
        Delivery::Acked => format!("{what} delivered"),
        Delivery::Failed => format!("{what} failed: no ACK after retries"),
    }
}

/// Execute a parsed command against the controller.
pub async fn execute(controller: &Arc<Controller>, command: Command) -> Result<Outcome, String> {
    let reply = match command {
        Command::Peers => {
            let peers = controller.registry.iter();
            if peers.is_empty() {
                "no peers discovered yet".to_string()
            } else {
                peers
                    .iter()
                    .map(|p| format!("- {} ({})", p.display_name, p.peer_id))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Dms => {
            let inbox = controller.social.inbox();
            if inbox.is_empty() {
                "inbox is empty".to_string()
            } else {
                inbox
                    .iter()
                    .map(|e| format!("[{}] {}: {}", e.timestamp, e.from.handle(), e.content))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Dm { user, message } => {
            let to = resolve(controller, &user)?;
            let delivery = controller
                .send_dm(&to, &message)
                .await
                .map_err(|e| e.to_string())?;
            delivery_text(delivery, &format!("dm to {to}"))
        }
        Command::Post { content } => {
            let sent = controller.post(&content).await.map_err(|e| e.to_string())?;
            format!("post sent to {sent} follower(s)")
        }
        Command::Like { post_id, user } => {
            let author = resolve(controller, &user)?;
            let delivery = controller
                .like(&post_id, &author)
                .await
                .map_err(|e| e.to_string())?;
            delivery_text(delivery, &format!("like on {post_id}"))
        }
        Command::Follow { user } => {
            let to = resolve(controller, &user)?;
            let delivery = controller.follow(&to).await.map_err(|e| e.to_string())?;
            delivery_text(delivery, &format!("follow of {to}"))
        }
        Command::Unfollow { user } => {
            let to = resolve(controller, &user)?;
            let delivery = controller.unfollow(&to).await.map_err(|e| e.to_string())?;
            delivery_text(delivery, &format!("unfollow of {to}"))
        }
        Command::Broadcast => {
            controller.broadcast_profile().await;
            "profile broadcast to all known peers".to_string()
        }
        Command::Ping => {
            controller.announce().await;
            "ping broadcast sent".to_string()
        }
        Command::Ttl { seconds } => {
            controller.set_post_ttl(seconds);
            format!("post ttl set to {seconds}s")
        }
        Command::SendFile {
            user,
            path,
            description,
        } => {
            let to = resolve(controller, &user)?;
            let file_id = controller
                .send_file(&to, &path, &description)
                .await
                .map_err(|e| e.to_string())?;
            format!("file accepted by {to}, sending ({file_id})")
        }
        Command::AcceptFile { file_id } => {
            controller
                .transfers
                .accept(&file_id)
                .await
                .map_err(|e| e.to_string())?;
            format!("accepted {file_id}")
        }
        Command::RejectFile { file_id } => {
            controller
                .transfers
                .reject(&file_id)
                .await
                .map_err(|e| e.to_string())?;
            format!("rejected {file_id}")
        }
        Command::PendingFiles => {
            let pending = controller.transfers.pending_offers();
            if pending.is_empty() {
                "no pending offers".to_string()
            } else {
                pending
                    .iter()
                    .map(|o| {
                        format!(
                            "- {} from {} ({} bytes, {}) id={}",
                            o.filename, o.from, o.filesize, o.filetype, o.file_id
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Transfers => {
            let transfers = controller.transfers.transfers();
            if transfers.is_empty() {
                "no active transfers".to_string()
            } else {
                transfers
                    .iter()
                    .map(|t| {
                        format!(
                            "- {} {} {} [{}] id={}",
                            t.direction, t.filename, t.peer, t.state, t.file_id
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::GroupCreate { name, users } => {
            let mut members = Vec::with_capacity(users.len());
            for user in &users {
                members.push(resolve(controller, user)?);
            }
            let group_id = controller
                .create_group(&name, members)
                .await
                .map_err(|e| e.to_string())?;
            format!("group '{name}' created ({group_id})")
        }
        Command::GroupMsg { name, message } => {
            let sent = controller
                .group_message(&name, &message)
                .await
                .map_err(|e| e.to_string())?;
            format!("group message sent to {sent} member(s)")
        }
        Command::GroupList => {
            let groups = controller.groups.iter();
            if groups.is_empty() {
                "no groups".to_string()
            } else {
                groups
                    .iter()
                    .map(|g| {
                        format!(
                            "- {} ({} members, owner {})",
                            g.group_name,
                            g.members.len(),
                            g.owner.handle()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::Verbose => {
            let on = controller.toggle_verbose();
            format!("verbose {}", if on { "enabled" } else { "disabled" })
        }
        Command::Quit => return Ok(Outcome::Quit),
    };
    Ok(Outcome::Reply(reply))
}
