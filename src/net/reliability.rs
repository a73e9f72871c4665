//! Retry policy, MSGUID deduplication and the wild-disconnect heuristic.
//!
//! # Delivery
//!
//! ```text
//! Sender                                   Receiver
//!   │  blocks (MSGUID=uid0_17)                │
//!   │────────────────────────────────────────>│ dispatch upward
//!   │                X ack lost               │
//!   │                                         │
//!   │  (resend_delay, retry same MSGUID)      │
//!   │────────────────────────────────────────>│ duplicate: ack only
//!   │  [cmd:CONFIRM_RECEPTION|]<chars>        │
//!   │<────────────────────────────────────────│
//! ```
//!
//! At-least-once on the wire, at-most-once upward dispatch per MSGUID.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use crate::classify;
use crate::codec::CommandCode;
use crate::config::NetConfig;

use super::error::{NetError, NetResult, ProtocolError};
use super::status::{ConnectionStatus, NetCounters};

// ============================================================================
// Retry
// ============================================================================

/// Result of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final outcome.
    pub result: NetResult<T>,
    /// Network attempts made, first try included.
    pub attempts: u32,
}

/// Whether retrying after `error` cannot help.
///
/// Fatal OS errors and an explicit refusal from the server end the loop.
pub fn is_terminal(error: &NetError) -> bool {
    classify::is_fatal(error) || matches!(error, NetError::Protocol(ProtocolError::Refused))
}

/// Attempt bound for a message carrying `code`.
///
/// `SET_CLIENT_READ_INFOS` gets a larger budget: without it the server can
/// never push to the client.
pub fn max_attempts(cfg: &NetConfig, code: Option<CommandCode>) -> u32 {
    if code == Some(CommandCode::SetClientReadInfos) {
        cfg.read_infos_send_max()
    } else {
        cfg.send_max_count
    }
}

/// Run `op` until it succeeds, fails terminally, or `max` attempts are spent.
///
/// `op` receives the 1-based attempt number. Transient failures are followed
/// by `delay` before the next attempt.
pub async fn retry<T, F, Fut>(max: u32, delay: Duration, mut op: F) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = NetResult<T>>,
{
    let max = max.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) => {
                if is_terminal(&e) || attempt >= max {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
                log::debug!(
                    "[Net] attempt {attempt}/{max} failed ({}): {e}",
                    classify::classify(&e).kind
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ============================================================================
// Deduplication
// ============================================================================

/// Bounded FIFO window of recently seen MSGUIDs.
///
/// Thread-safe; shared between the listener workers of one endpoint.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    inner: Mutex<DedupInner>,
}

#[derive(Debug, Default)]
struct DedupInner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupCache {
    /// Create a cache remembering at most `capacity` MSGUIDs.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(DedupInner::default()),
        }
    }

    /// Record `msguid`; returns `true` the first time it is seen.
    pub fn insert(&self, msguid: &str) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.seen.contains(msguid) {
            return false;
        }
        if inner.order.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        inner.order.push_back(msguid.to_string());
        inner.seen.insert(msguid.to_string());
        true
    }

    /// Whether `msguid` is currently remembered.
    pub fn contains(&self, msguid: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.seen.contains(msguid)
    }

    /// Number of remembered MSGUIDs.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.order.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.order.clear();
        inner.seen.clear();
    }
}

// ============================================================================
// Wild-disconnect heuristic
// ============================================================================

/// Whether the failure streak suggests the peer vanished without notice.
///
/// A streak only counts while the last I/O actually failed.
pub fn wild_disconnect_suspected(
    counters: &NetCounters,
    last_error_present: bool,
    inactive_count: u32,
) -> bool {
    let fact = u32::from(last_error_present);
    fact * counters.send_errors > inactive_count || fact * counters.connect_errors > inactive_count
}

/// Peer status implied by the heuristic.
///
/// Explicit statuses (closed or rejected) are kept as they are.
pub fn evaluate_peer_status(
    current: ConnectionStatus,
    counters: &NetCounters,
    last_error_present: bool,
    inactive_count: u32,
) -> ConnectionStatus {
    if current.is_closed() || current == ConnectionStatus::Rejected {
        return current;
    }
    if wild_disconnect_suspected(counters, last_error_present, inactive_count) {
        ConnectionStatus::Undefined
    } else {
        ConnectionStatus::Connected
    }
}

/// Status a peer moves to after a failed exchange.
///
/// Fatal classification means `ERROR_CONNECTION`; otherwise a connected
/// peer becomes uncertain. Nothing here ever upgrades a status.
pub fn status_after_failure(current: ConnectionStatus, error: &NetError) -> ConnectionStatus {
    if classify::is_fatal(error) {
        ConnectionStatus::ErrorConnection
    } else if current == ConnectionStatus::Connected {
        ConnectionStatus::Undefined
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_stops_at_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out: Attempted<()> = retry(4, Duration::from_millis(1), move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(NetError::Timeout)
            }
        })
        .await;
        assert!(out.result.is_err());
        assert_eq!(out.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let out = retry(15, Duration::from_millis(1), |attempt| async move {
            if attempt < 3 {
                Err(NetError::Timeout)
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(out.result.unwrap(), 3);
        assert_eq!(out.attempts, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_retry_fatal_short_circuits() {
        let out: Attempted<()> = retry(15, Duration::from_millis(1), |_| async {
            Err(NetError::Io(io::Error::from_raw_os_error(libc::ECONNREFUSED)))
        })
        .await;
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_max_attempts() {
        let cfg = NetConfig::default();
        assert_eq!(max_attempts(&cfg, None), 15);
        assert_eq!(max_attempts(&cfg, Some(CommandCode::Ping)), 15);
        assert_eq!(max_attempts(&cfg, Some(CommandCode::SetClientReadInfos)), 75);
    }

    #[tokio::test]
    async fn test_retry_stops_on_refusal() {
        let out: Attempted<()> = retry(15, Duration::from_millis(1), |_| async {
            Err(NetError::Protocol(ProtocolError::Refused))
        })
        .await;
        assert_eq!(out.attempts, 1);
    }

    #[test]
    fn test_dedup_detects_duplicates() {
        let cache = DedupCache::new(8);
        assert!(cache.insert("uid0_1"));
        assert!(!cache.insert("uid0_1"));
        assert!(cache.insert("uid0_2"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_dedup_window_is_bounded() {
        let cache = DedupCache::new(3);
        for i in 0..5 {
            assert!(cache.insert(&format!("m{i}")));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("m0"));
        assert!(!cache.contains("m1"));
        assert!(cache.contains("m4"));
        // Evicted ids are accepted again.
        assert!(cache.insert("m0"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_wild_disconnect_threshold() {
        let mut counters = NetCounters::default();
        for _ in 0..20 {
            counters.record_send(false, 15, true);
        }
        assert!(!wild_disconnect_suspected(&counters, true, 20));
        counters.record_send(false, 15, true);
        assert!(wild_disconnect_suspected(&counters, true, 20));
        assert!(!wild_disconnect_suspected(&counters, false, 20));

        assert_eq!(
            evaluate_peer_status(ConnectionStatus::Connected, &counters, true, 20),
            ConnectionStatus::Undefined
        );
        assert_eq!(
            evaluate_peer_status(ConnectionStatus::Shutdown, &counters, true, 20),
            ConnectionStatus::Shutdown
        );
        counters.record_send(true, 1, true);
        assert_eq!(
            evaluate_peer_status(ConnectionStatus::Undefined, &counters, false, 20),
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn test_status_after_failure_never_upgrades() {
        assert_eq!(
            status_after_failure(ConnectionStatus::Connected, &NetError::Timeout),
            ConnectionStatus::Undefined
        );
        assert_eq!(
            status_after_failure(ConnectionStatus::Undefined, &NetError::Timeout),
            ConnectionStatus::Undefined
        );
        assert_eq!(
            status_after_failure(ConnectionStatus::Disconnected, &NetError::Timeout),
            ConnectionStatus::Disconnected
        );
    }
}
