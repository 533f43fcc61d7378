//! Per-aggregate serialization tokens.
//!
//! Appends for one aggregate queue on that aggregate's slot; appends for
//! different aggregates never share a lock beyond the brief table lookup.
//! Slots carry the cached stream head and are pruned as soon as no append
//! holds or waits on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use innkeeper_core::event::AggregateKey;
use innkeeper_core::storage::StreamHead;
use tokio::sync::Mutex as AsyncMutex;

/// Cached position of a stream, guarded by the aggregate's slot.
#[derive(Debug, Default)]
pub(crate) struct StreamCursor {
    /// `None` until the head has been read from storage.
    pub(crate) head: Option<Option<StreamHead>>,
}

impl StreamCursor {
    pub(crate) fn invalidate(&mut self) {
        self.head = None;
    }
}

type Slot = Arc<AsyncMutex<StreamCursor>>;

/// Lock table keyed by aggregate.
#[derive(Debug, Default)]
pub(crate) struct AggregateLocks {
    slots: Mutex<HashMap<AggregateKey, Slot>>,
}

impl AggregateLocks {
    /// Takes a lease on the aggregate's slot, creating it if needed.
    pub(crate) fn lease(&self, key: &AggregateKey) -> Lease<'_> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        Lease {
            table: self,
            key: key.clone(),
            slot: Some(slot),
        }
    }

    fn prune(&self, key: &AggregateKey) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// A claim on one aggregate's slot. Dropping the lease, including when an
/// append is cancelled while waiting, prunes the slot if it is unused.
pub(crate) struct Lease<'a> {
    table: &'a AggregateLocks,
    key: AggregateKey,
    slot: Option<Slot>,
}

impl Lease<'_> {
    /// A handle for `lock_owned`.
    pub(crate) fn slot(&self) -> Slot {
        self.slot.clone().unwrap_or_default()
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            drop(slot);
            self.table.prune(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_is_pruned_after_last_lease() {
        // Arrange
        let locks = AggregateLocks::default();
        let key = AggregateKey::new("reservation", "R1");

        // Act
        let lease = locks.lease(&key);
        {
            let _guard = lease.slot().lock_owned().await;
            assert_eq!(locks.len(), 1);
        }
        drop(lease);

        // Assert
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiting_lease_keeps_slot_alive() {
        let locks = AggregateLocks::default();
        let key = AggregateKey::new("reservation", "R1");

        let first = locks.lease(&key);
        let second = locks.lease(&key);
        drop(first);
        assert_eq!(locks.len(), 1);

        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_aggregate_shares_a_slot() {
        let locks = AggregateLocks::default();
        let key = AggregateKey::new("reservation", "R1");

        let first = locks.lease(&key);
        let second = locks.lease(&key);

        assert!(Arc::ptr_eq(&first.slot(), &second.slot()));
        assert!(!Arc::ptr_eq(
            &first.slot(),
            &locks.lease(&AggregateKey::new("reservation", "R2")).slot()
        ));
    }
}
