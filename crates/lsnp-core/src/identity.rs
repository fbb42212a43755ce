//! Peer identity — the canonical `user@ip` form.
//!
//! A bare handle is ambiguous on a LAN with duplicate usernames; the full
//! form carries the IPv4 address the peer listens on and is the only
//! identifier the protocol trusts.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("peer id '{0}' is missing the '@' separator")]
    MissingSeparator(String),
    #[error("peer id has an empty handle")]
    EmptyHandle,
    #[error("peer id '{0}' has an invalid IPv4 address")]
    InvalidIp(String),
}

/// Canonical peer identifier: `user@ip`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    handle: String,
    ip: Ipv4Addr,
}

impl PeerId {
    pub fn new(handle: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            handle: handle.into(),
            ip,
        }
    }

    /// The short handle, without the address part.
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// The IPv4 address embedded in the id.
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }
}

impl FromStr for PeerId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the LAST '@' so handles containing '@' stay parseable.
        let (handle, ip) = s
            .rsplit_once('@')
            .ok_or_else(|| IdentityError::MissingSeparator(s.to_string()))?;
        if handle.is_empty() {
            return Err(IdentityError::EmptyHandle);
        }
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| IdentityError::InvalidIp(s.to_string()))?;
        Ok(Self {
            handle: handle.to_string(),
            ip,
        })
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.handle, self.ip)
    }
}
