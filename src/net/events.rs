//! Events emitted by the client endpoint and the server container.
//!
//! Both endpoints report through a single `mpsc::UnboundedSender<NetEvent>`.
//! The network satellite forwards each event onto the bus as the matching
//! envelope (`RECEIVE`, `NET_STATUS`, `NET_ERROR`, `SEND_ERROR`,
//! `SET_NET_INFO`).

// Rust guideline compliant 2026-02

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::codec::CommandArgs;

use super::status::{ClientNetInfo, ConnectionStatus, ServerNetInfo};

/// Status snapshot carried by `SET_NET_INFO`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NetInfo {
    /// Snapshot of a client endpoint.
    Client(ClientNetInfo),
    /// Snapshot of the server container.
    Server(ServerNetInfo),
}

/// Event from a network endpoint delivered to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    /// A valid, first-seen request was received from a peer.
    Receive {
        /// Sender UID (`None` for requests from a client without UID).
        uid: Option<String>,
        /// Command code of the request, if any.
        netcode: Option<String>,
        /// Command arguments.
        args: CommandArgs,
        /// Message tail.
        msg: String,
        /// MSGUID of the request.
        msguid: Option<String>,
    },

    /// A connection changed status.
    Status {
        /// Peer the status refers to (`None` for the endpoint itself).
        peer: Option<String>,
        /// New status.
        status: ConnectionStatus,
        /// Human-readable reason.
        message: String,
    },

    /// A classified network error.
    Error {
        /// Peer the error refers to.
        peer: Option<String>,
        /// Status after the error.
        status: ConnectionStatus,
        /// Human-readable description.
        message: String,
    },

    /// A send exhausted its retries.
    SendError {
        /// Message that could not be delivered.
        msg: String,
        /// Whether an ack was required.
        confirm: bool,
        /// Peers the send failed for (empty on the client side).
        clients: Vec<String>,
    },

    /// Full status snapshot after I/O.
    Info(NetInfo),
}

/// Sending half used by the endpoints.
pub type NetEventSender = UnboundedSender<NetEvent>;

/// Send an event, ignoring a closed receiver.
///
/// The owner dropping its receiver means nobody listens anymore; the
/// endpoint keeps working and its own state stays authoritative.
pub(crate) fn emit(tx: &NetEventSender, event: NetEvent) {
    if tx.send(event).is_err() {
        log::trace!("[Net] event receiver dropped");
    }
}
