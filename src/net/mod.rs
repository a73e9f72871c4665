//! Network endpoints: the client, the server container and what they share.
//!
//! # Modules
//!
//! - [`transport`]: connect with retry, block I/O, address discovery
//! - [`reliability`]: retry loop, MSGUID dedup, wild-disconnect heuristic
//! - [`client`]: [`ClientEndpoint`]
//! - [`server`]: [`ServerContainer`]
//! - [`events`]: [`NetEvent`] reported to the owner of an endpoint
//! - [`status`]: [`ConnectionStatus`] and serializable snapshots

pub mod client;
pub mod error;
pub mod events;
pub mod reliability;
pub mod server;
pub mod status;
pub mod transport;

pub use client::ClientEndpoint;
pub use error::{NetError, NetResult, ProtocolError};
pub use events::{NetEvent, NetEventSender, NetInfo};
pub use reliability::DedupCache;
pub use server::{SendReport, ServerContainer};
pub use status::{ClientNetInfo, ClientRecordInfo, ConnectionStatus, NetCounters, ServerNetInfo};
