//! The seam between services and the transport.
//!
//! Services push fully-formed records here; the daemon's send pump assigns
//! reliability bookkeeping and transmits. Keeping the channel as the only
//! coupling means services stay testable without a socket.

use std::net::SocketAddr;

use lsnp_core::Record;

/// One record queued for transmission.
#[derive(Debug)]
pub struct Outbound {
    pub dest: SocketAddr,
    pub record: Record,
    /// Reliable sends get a retry schedule and wait for an ACK;
    /// fire-and-forget sends (PROFILE, PING, ACK) do not.
    pub reliable: bool,
}

pub type OutboundSender = tokio::sync::mpsc::Sender<Outbound>;
