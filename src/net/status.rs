//! Connection status and serializable network snapshots.
//!
//! Snapshots are emitted in `SET_NET_INFO` envelopes after every I/O so the
//! upper layers always see the last observed state of each peer.

use std::fmt;

use serde::Serialize;

/// Status of a connection, as seen by one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// The peer announced it is going away, or the endpoint was shut down.
    Shutdown,
    /// Explicitly disconnected.
    Disconnected,
    /// A fatal error was classified on the last I/O.
    ErrorConnection,
    /// Not known yet, or probably wild-disconnected.
    #[default]
    Undefined,
    /// Last I/O succeeded.
    Connected,
    /// The server refused the connection.
    Rejected,
}

impl ConnectionStatus {
    /// Wire-style name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Shutdown => "SHUTDOWN",
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::ErrorConnection => "ERROR_CONNECTION",
            ConnectionStatus::Undefined => "UNDEFINED",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Rejected => "REJECTED",
        }
    }

    /// Whether the peer went away on purpose or after a fatal error.
    ///
    /// Sends to such peers are skipped.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            ConnectionStatus::Shutdown
                | ConnectionStatus::Disconnected
                | ConnectionStatus::ErrorConnection
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic counters kept per endpoint (client) or per record (server).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetCounters {
    /// Network attempts, first tries and retries together.
    pub attempts: u64,
    /// Sends that succeeded on the first attempt.
    pub unit_sends: u64,
    /// Attempts that were retries.
    pub retries: u64,
    /// Sends that required an ack.
    pub ack_required: u64,
    /// Requests fully received and dispatched.
    pub receives: u64,
    /// Consecutive failed sends since the last success.
    pub send_errors: u32,
    /// Consecutive failed connects since the last success.
    pub connect_errors: u32,
}

impl NetCounters {
    /// Record the outcome of a connect.
    pub fn record_connect(&mut self, ok: bool) {
        if ok {
            self.connect_errors = 0;
        } else {
            self.connect_errors = self.connect_errors.saturating_add(1);
        }
    }

    /// Record the outcome of a whole send (all attempts).
    pub fn record_send(&mut self, ok: bool, attempts: u32, ack: bool) {
        self.attempts += u64::from(attempts);
        self.retries += u64::from(attempts.saturating_sub(1));
        if ack {
            self.ack_required += 1;
        }
        if ok {
            if attempts <= 1 {
                self.unit_sends += 1;
            }
            self.send_errors = 0;
        } else {
            self.send_errors = self.send_errors.saturating_add(1);
        }
    }
}

/// Snapshot of a client endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientNetInfo {
    /// UID assigned by the server.
    pub uid: Option<String>,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Advertised reverse host (empty for local servers).
    pub read_host: Option<String>,
    /// Bound reverse port.
    pub read_port: Option<u16>,
    /// Status of the client itself.
    pub status: ConnectionStatus,
    /// Status of the server, as inferred from recent I/O.
    pub server_status: ConnectionStatus,
    /// Last connect failure.
    pub last_connect_error: Option<String>,
    /// Last send failure.
    pub last_send_error: Option<String>,
    /// Last receive failure.
    pub last_receive_error: Option<String>,
    /// Traffic counters.
    pub counters: NetCounters,
}

/// Snapshot of one client record held by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientRecordInfo {
    /// Client UID.
    pub uid: String,
    /// Peer addresses the client was seen from, most recent last.
    pub addresses: Vec<String>,
    /// Advertised reverse host.
    pub read_host: Option<String>,
    /// Advertised reverse port.
    pub read_port: Option<u16>,
    /// Current status.
    pub status: ConnectionStatus,
    /// Last connect failure.
    pub last_connect_error: Option<String>,
    /// Last send failure.
    pub last_send_error: Option<String>,
    /// Last receive failure.
    pub last_receive_error: Option<String>,
    /// Traffic counters.
    pub counters: NetCounters,
}

/// Snapshot of the server container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerNetInfo {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Server status.
    pub status: ConnectionStatus,
    /// Whether new UIDs are minted.
    pub accept_new_connections: bool,
    /// Number of UIDs minted so far.
    pub minted: u64,
    /// Known clients, ordered by UID.
    pub clients: Vec<ClientRecordInfo>,
}
