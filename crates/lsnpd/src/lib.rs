//! lsnpd — the LSNP peer daemon, as a library.
//!
//! Re-exports the daemon's modules so integration tests and main.rs can
//! assemble peers without a real terminal or mDNS environment.

pub mod commands;
pub mod controller;
pub mod discovery;
pub mod reliability;
pub mod transport;

pub use controller::Controller;
