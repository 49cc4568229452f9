//! Registry of live peer sessions.
//!
//! Fixed capacity, indexed by session id, scanned by remote pk for sends.
//! At most one live session per remote pk: the rendezvous tie-break makes
//! simultaneous dials converge, and a second session for an already
//! connected pk is refused here and dropped by the caller.

use std::collections::HashMap;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::event::PeerRejection;
use crate::wire::Frame;

/// Peer session capacity.
pub const MAX_PEERS: usize = 30;

/// Handle to one Ready session, held by the registry.
pub(crate) struct PeerHandle {
    pub session_id: u64,
    pub pk_hex: String,
    pub addr: SocketAddr,
    /// Input of the session's writer task; frames are encrypted there.
    pub tx: mpsc::Sender<Frame>,
    /// Aborts the session's receive task on shutdown.
    pub abort: AbortHandle,
}

#[derive(Default)]
pub(crate) struct PeerRegistry {
    inner: Mutex<HashMap<u64, PeerHandle>>,
}

impl PeerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a Ready session. Refused when the table is full or the pk
    /// already has a live session.
    pub(crate) fn insert(&self, handle: PeerHandle) -> Result<(), PeerRejection> {
        let mut inner = self.inner.lock();
        if inner.values().any(|p| p.pk_hex == handle.pk_hex) {
            return Err(PeerRejection::AlreadyConnected);
        }
        if inner.len() >= MAX_PEERS {
            return Err(PeerRejection::TableFull);
        }
        inner.insert(handle.session_id, handle);
        Ok(())
    }

    pub(crate) fn remove(&self, session_id: u64) -> Option<PeerHandle> {
        self.inner.lock().remove(&session_id)
    }

    /// Writer handle for a pk, cloned out so the send happens outside the
    /// lock.
    pub(crate) fn sender_for(&self, pk_hex: &str) -> Option<mpsc::Sender<Frame>> {
        self.inner
            .lock()
            .values()
            .find(|p| p.pk_hex == pk_hex)
            .map(|p| p.tx.clone())
    }

    pub(crate) fn is_connected(&self, pk_hex: &str) -> bool {
        self.inner.lock().values().any(|p| p.pk_hex == pk_hex)
    }

    pub(crate) fn count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Remove every session, for shutdown.
    pub(crate) fn drain(&self) -> Vec<PeerHandle> {
        self.inner.lock().drain().map(|(_, h)| h).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(session_id: u64, pk_byte: u8) -> PeerHandle {
        let (tx, _rx) = mpsc::channel(1);
        let task = tokio::spawn(async {});
        PeerHandle {
            session_id,
            pk_hex: hex::encode([pk_byte; 32]),
            addr: "127.0.0.1:9999".parse().unwrap(),
            tx,
            abort: task.abort_handle(),
        }
    }

    #[tokio::test]
    async fn insert_lookup_remove() {
        let reg = PeerRegistry::new();
        let pk = hex::encode([1u8; 32]);
        reg.insert(handle(1, 1)).unwrap();

        assert!(reg.is_connected(&pk));
        assert!(reg.sender_for(&pk).is_some());
        assert_eq!(reg.count(), 1);

        assert!(reg.remove(1).is_some());
        assert!(!reg.is_connected(&pk));
        assert!(reg.sender_for(&pk).is_none());
        assert!(reg.remove(1).is_none());
    }

    #[tokio::test]
    async fn duplicate_pk_refused() {
        let reg = PeerRegistry::new();
        reg.insert(handle(1, 7)).unwrap();
        assert_eq!(
            reg.insert(handle(2, 7)),
            Err(PeerRejection::AlreadyConnected)
        );
        assert_eq!(reg.count(), 1);
    }

    #[tokio::test]
    async fn capacity_enforced() {
        let reg = PeerRegistry::new();
        for i in 0..MAX_PEERS {
            reg.insert(handle(i as u64, i as u8)).unwrap();
        }
        assert_eq!(
            reg.insert(handle(100, 200)),
            Err(PeerRejection::TableFull)
        );
        assert_eq!(reg.count(), MAX_PEERS);
    }
}
