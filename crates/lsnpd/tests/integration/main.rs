//! LSNP integration test entry point.
//!
//! Peers run over loopback sockets with mDNS disabled; discovery is
//! replaced by direct registry introductions so tests stay hermetic.
//! Loss scenarios run through a fault-injecting UDP relay.
//!
//! Run with: cargo test --test integration

mod files;
mod harness;
mod messaging;
mod protocol;
mod social;
