//! lsnp-services — the domain services a peer daemon hosts: the peer
//! registry, social state, file-transfer engine, group routing, and the
//! opaque game sink. Services never own the transport; they emit outbound
//! records through a channel the daemon drains.

pub mod game;
pub mod groups;
pub mod outbound;
pub mod registry;
pub mod social;
pub mod transfer;

pub use game::{GameRouter, GameSink, LogGameSink};
pub use groups::{Group, GroupTable};
pub use outbound::{Outbound, OutboundSender};
pub use registry::{Peer, PeerRegistry, Resolution};
pub use social::SocialState;
pub use transfer::{FileTransferEngine, TransferError, MAX_CHUNK_SIZE};
