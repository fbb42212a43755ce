//! Authorization tokens.
//!
//! A token is the opaque string `user@ip|expiry_unix|scope`. It is minted by
//! the sender at send time and checked by the receiver against the current
//! clock, the datagram's source address, and the scope the message TYPE
//! requires. Tokens are advisory: they gate processing, not secrecy.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Mutex;

use crate::identity::PeerId;

/// Permission class a token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Chat,
    File,
    Broadcast,
    Follow,
    Game,
    Group,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Chat => "chat",
            Scope::File => "file",
            Scope::Broadcast => "broadcast",
            Scope::Follow => "follow",
            Scope::Game => "game",
            Scope::Group => "group",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Scope::Chat),
            "file" => Ok(Scope::File),
            "broadcast" => Ok(Scope::Broadcast),
            "follow" => Ok(Scope::Follow),
            "game" => Ok(Scope::Game),
            "group" => Ok(Scope::Group),
            _ => Err(()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token expired at {expiry}, now {now}")]
    Expired { expiry: u64, now: u64 },
    #[error("token scope '{actual}' does not grant '{required}'")]
    ScopeMismatch { required: Scope, actual: Scope },
    #[error("token ip {token_ip} does not match datagram source {source_ip}")]
    IpMismatch {
        token_ip: Ipv4Addr,
        source_ip: Ipv4Addr,
    },
    #[error("token has been revoked")]
    Revoked,
}

/// Mint a token for `user` valid for `ttl_seconds` from `now`.
pub fn mint_at(user: &PeerId, scope: Scope, ttl_seconds: u64, now: u64) -> String {
    format!("{user}|{}|{scope}", now + ttl_seconds)
}

/// Mint a token against the system clock.
pub fn mint(user: &PeerId, scope: Scope, ttl_seconds: u64) -> String {
    mint_at(user, scope, ttl_seconds, crate::now_unix())
}

/// Validate `token` for a message requiring `expected_scope`, received from
/// `source_ip` at time `now`.
///
/// The embedded user's IP portion must equal the UDP source address; a
/// spoofed FROM cannot borrow someone else's token.
pub fn validate(
    token: &str,
    expected_scope: Scope,
    source_ip: Ipv4Addr,
    now: u64,
) -> Result<PeerId, TokenError> {
    let mut parts = token.split('|');
    let (Some(user), Some(expiry), Some(scope), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let user: PeerId = user.parse().map_err(|_| TokenError::Malformed)?;
    let expiry: u64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
    let scope: Scope = scope.parse().map_err(|_| TokenError::Malformed)?;

    if now > expiry {
        return Err(TokenError::Expired { expiry, now });
    }
    if scope != expected_scope {
        return Err(TokenError::ScopeMismatch {
            required: expected_scope,
            actual: scope,
        });
    }
    if user.ip() != source_ip {
        return Err(TokenError::IpMismatch {
            token_ip: user.ip(),
            source_ip,
        });
    }
    Ok(user)
}

/// Receiver-side set of revoked tokens, populated by REVOKE records.
#[derive(Debug, Default)]
pub struct RevocationSet {
    revoked: Mutex<HashSet<String>>,
}

impl RevocationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self, token: impl Into<String>) {
        self.revoked.lock().unwrap().insert(token.into());
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.lock().unwrap().contains(token)
    }
}
