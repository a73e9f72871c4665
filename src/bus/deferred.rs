//! Deferred actions for satellites.
//!
//! Each action is a spawned tokio task that sleeps for its interval and then
//! posts an envelope back onto the owning satellite's inbound queue, so the
//! action runs inside the satellite loop like any other envelope. The task
//! removes its registry entry when it fires; cancelling aborts the task.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::envelope::Envelope;

/// Identifier of a scheduled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action_{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: u64,
    tasks: HashMap<ActionId, JoinHandle<()>>,
}

/// Pending actions of one satellite.
///
/// Cloning shares the registry.
#[derive(Debug, Clone)]
pub struct DeferredActions {
    registry: Arc<Mutex<Registry>>,
    inbound: mpsc::Sender<Envelope>,
}

impl DeferredActions {
    /// Registry delivering fired actions on `inbound`.
    pub fn new(inbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            inbound,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver `envelope` to the satellite after `delay`.
    pub fn schedule(&self, delay: Duration, envelope: Envelope) -> ActionId {
        // The lock is held across the spawn so a zero delay cannot fire
        // before the handle is registered.
        let mut registry = self.registry();
        let id = ActionId(registry.next_id);
        registry.next_id += 1;

        let shared = self.registry.clone();
        let inbound = self.inbound.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::trace!("[Bus] {id} fired: {envelope}");
            if inbound.send(envelope).await.is_err() {
                log::debug!("[Bus] {id} dropped, satellite stopped");
            }
            shared
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .tasks
                .remove(&id);
        });
        registry.tasks.insert(id, handle);
        id
    }

    /// Cancel `id`. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&self, id: ActionId) -> bool {
        match self.registry().tasks.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending action; returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<JoinHandle<()>> = self.registry().tasks.drain().map(|(_, h)| h).collect();
        let count = drained.len();
        for handle in drained {
            handle.abort();
        }
        if count > 0 {
            log::debug!("[Bus] cancelled {count} pending action(s)");
        }
        count
    }

    /// Number of pending actions.
    pub fn pending(&self) -> usize {
        self.registry().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::Kind;

    #[tokio::test]
    async fn test_action_fires_and_self_cleans() {
        let (tx, mut rx) = mpsc::channel(4);
        let actions = DeferredActions::new(tx);
        actions.schedule(Duration::from_millis(10), Envelope::new(Kind::GetNetInfo));
        assert_eq!(actions.pending(), 1);

        let env = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.kind, Kind::GetNetInfo);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(actions.pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let actions = DeferredActions::new(tx);
        let id = actions.schedule(Duration::from_millis(50), Envelope::new(Kind::CheckConn));
        assert!(actions.cancel(id));
        assert!(!actions.cancel(id));
        assert_eq!(actions.pending(), 0);

        let got = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(got.is_err(), "cancelled action was delivered");
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let (tx, _rx) = mpsc::channel(4);
        let actions = DeferredActions::new(tx);
        for _ in 0..3 {
            actions.schedule(Duration::from_secs(60), Envelope::new(Kind::Send));
        }
        assert_eq!(actions.cancel_all(), 3);
        assert_eq!(actions.pending(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(4);
        let actions = DeferredActions::new(tx);
        let a = actions.schedule(Duration::from_secs(60), Envelope::new(Kind::Send));
        let b = actions.schedule(Duration::from_secs(60), Envelope::new(Kind::Send));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "action_0");
        actions.cancel_all();
    }
}
