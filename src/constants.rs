//! Protocol-wide constants for blocknet.
//!
//! This module centralizes the wire sentinels, fixed identifiers and the
//! numeric reliability policy shared by the codec, the client endpoint and
//! the server container. [`crate::config::NetConfig::default`] is built from
//! these values; everything that can be tuned at runtime goes through
//! `NetConfig` instead of reading these directly.
//!
//! # Categories
//!
//! - **Wire**: block sentinels, buffer size, reserved identifiers
//! - **Retries**: send/connect attempt bounds
//! - **Timing**: delays and socket timeouts
//! - **Addressing**: default endpoint and reverse-channel port allocation

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// Maximum serialized size of one block, in bytes.
///
/// Every block produced by the encoder fits in this many bytes, and the
/// receivers read the socket in chunks of at most this size.
pub const BUFFER_SIZE: usize = 2048;

/// Sentinel opening every block.
pub const BLOCK_PREFIX: &str = "<#bp#>";

/// Sentinel closing every block.
pub const BLOCK_SUFFIX: &str = "<#bs#>";

/// Sender identifier carried in blocks emitted by the server.
pub const SERVER_UID: &str = "gen_svr_id";

/// Sender identifier written when the endpoint has no UID yet.
pub const NULL_UID: &str = "None";

/// MSGUID prefix used when the tagging endpoint has no UID.
pub const MSGUID_AUTO_PREFIX: &str = "CRH_AUTOADD";

/// Body of the reply sent to unknown or refused peers.
pub const CONNECTION_REFUSED_BODY: &str = "Connection refused";

/// Ack body sent when an inbound request could not be decoded.
///
/// It never matches a real character count, so the sender treats the
/// exchange as failed and retries.
pub const FAILED_ACK_BODY: &str = "0";

// ============================================================================
// Retries
// ============================================================================

/// Maximum network attempts for a single send.
pub const SEND_MAX_COUNT: u32 = 15;

/// Multiplier applied to [`SEND_MAX_COUNT`] for `SET_CLIENT_READ_INFOS`.
pub const READ_INFOS_SEND_FACTOR: u32 = 5;

/// Maximum attempts for a single connect or bind.
pub const CONNECTION_MAX_COUNT: u32 = 10;

/// Consecutive failures after which the peer is probably wild-disconnected.
pub const INACTIVE_COUNT: u32 = 20;

// ============================================================================
// Timing
// ============================================================================

/// Delay between two connect attempts.
pub const RECONNECTION_DELAY: Duration = Duration::from_millis(50);

/// Socket timeout applied when talking to an uncertain peer.
pub const RECONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between two send attempts.
pub const RESEND_DELAY: Duration = Duration::from_millis(50);

/// Time allowed for an ack to come back on a certain peer.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll granularity of the listener loops.
pub const SELECT_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Addressing
// ============================================================================

/// Default server host when neither the config file nor the CLI set one.
pub const DEFAULT_HOST: &str = "localhost";

/// Default server port when neither the config file nor the CLI set one.
pub const DEFAULT_PORT: u16 = 10000;

/// Width of the port slice owned by each local client.
///
/// A local client with UID `uidK` listens on `server_port + 200 * (K + 1)`,
/// which caps the scheme at 200 distinct local clients per server port.
pub const LOCAL_PORT_SLICE: u32 = 200;

/// Range of reverse-channel ports picked by remote clients.
pub const REMOTE_PORT_RANGE: std::ops::Range<u16> = 10000..20000;

/// Address probed to discover the local interface IP (no traffic is sent).
pub const DISCOVERY_PROBE_ADDR: &str = "10.255.255.255:1";

/// Number of MSGUIDs remembered by each receiver for deduplication.
pub const DEDUP_CAPACITY: usize = 1024;

/// Maximum number of inbound sockets the server handles concurrently.
pub const ACCEPT_POOL_SIZE: usize = 64;

/// Capacity of each bounded bus queue.
pub const QUEUE_CAPACITY: usize = 256;
