//! Transfer registry
//!
//! Insertion-ordered set of every transfer submitted through a session and
//! not yet freed. Entries survive completion so a transfer can be resubmitted
//! and rediscovered without re-registration.

use crate::transfer::{TransferId, TransferShared};
use protocol::TransferStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub(crate) struct TransferRegistry {
    entries: Vec<Arc<TransferShared>>,
    /// Position of each transfer in `entries`
    index: HashMap<TransferId, usize>,
}

impl TransferRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a transfer unless it is already registered
    ///
    /// Returns `true` when the transfer was newly added.
    pub(crate) fn register(&mut self, shared: &Arc<TransferShared>) -> bool {
        if self.index.contains_key(&shared.id) {
            return false;
        }
        self.index.insert(shared.id, self.entries.len());
        self.entries.push(Arc::clone(shared));
        debug!(
            "Registered transfer {:?} ({} registered)",
            shared.id,
            self.entries.len()
        );
        true
    }

    pub(crate) fn contains(&self, id: TransferId) -> bool {
        self.index.contains_key(&id)
    }

    pub(crate) fn remove(&mut self, id: TransferId) -> Option<Arc<TransferShared>> {
        let pos = self.index.remove(&id)?;
        let removed = self.entries.remove(pos);
        for entry in &self.entries[pos..] {
            if let Some(slot) = self.index.get_mut(&entry.id) {
                *slot -= 1;
            }
        }
        debug!("Unregistered transfer {:?}", id);
        Some(removed)
    }

    /// Drop entries nobody outside the registry can reach any more
    ///
    /// Only idle entries are dropped. In-flight entries may still be reported
    /// on by the host bridge and terminal ones still owe a callback.
    pub(crate) fn prune_orphans(&mut self) -> usize {
        let orphans: Vec<TransferId> = self
            .entries
            .iter()
            .filter(|e| Arc::strong_count(e) == 1 && e.lock().status == TransferStatus::Unsubmitted)
            .map(|e| e.id)
            .collect();

        for id in &orphans {
            self.remove(*id);
        }
        orphans.len()
    }

    /// Entries in registration order
    pub(crate) fn snapshot(&self) -> Vec<Arc<TransferShared>> {
        self.entries.clone()
    }

    pub(crate) fn ids(&self) -> Vec<TransferId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::Transfer;

    fn transfer(id: u64) -> Transfer {
        Transfer::new(TransferId(id), 0)
    }

    #[test]
    fn test_register_once() {
        let mut registry = TransferRegistry::new();
        let t = transfer(1);

        assert!(registry.register(&t.shared));
        assert!(!registry.register(&t.shared));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insertion_order_kept_after_remove() {
        let mut registry = TransferRegistry::new();
        let (a, b, c) = (transfer(3), transfer(1), transfer(2));
        for t in [&a, &b, &c] {
            registry.register(&t.shared);
        }

        assert!(registry.remove(b.id()).is_some());
        assert_eq!(registry.ids(), vec![a.id(), c.id()]);
        assert!(registry.contains(c.id()));

        // index still points at the shifted entry
        assert!(registry.remove(c.id()).is_some());
        assert_eq!(registry.ids(), vec![a.id()]);
        assert!(registry.remove(c.id()).is_none());
    }

    #[test]
    fn test_prune_orphans() {
        let mut registry = TransferRegistry::new();
        let kept = transfer(1);
        let dropped = transfer(2);
        registry.register(&kept.shared);
        registry.register(&dropped.shared);
        drop(dropped);

        assert_eq!(registry.prune_orphans(), 1);
        assert_eq!(registry.ids(), vec![kept.id()]);
    }

    #[test]
    fn test_prune_keeps_in_flight_orphans() {
        let mut registry = TransferRegistry::new();
        let t = transfer(1);
        t.shared.lock().status = TransferStatus::InFlight;
        registry.register(&t.shared);
        drop(t);

        assert_eq!(registry.prune_orphans(), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_prune_keeps_terminal_orphans() {
        let mut registry = TransferRegistry::new();
        let t = transfer(1);
        t.shared.lock().status = TransferStatus::Completed;
        registry.register(&t.shared);
        drop(t);

        assert_eq!(registry.prune_orphans(), 0);
        assert_eq!(registry.len(), 1);
    }
}
