//! lsnp-core — shared types, record codec, tokens, and configuration.
//! All other LSNP crates depend on this one.

pub mod config;
pub mod identity;
pub mod message;
pub mod record;
pub mod token;

pub use identity::PeerId;
pub use record::Record;
pub use token::Scope;

/// Current unix time in whole seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
