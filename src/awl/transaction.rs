//! Transaction table for the AWL command protocol
//!
//! Every outbound command carries a `tid` in 1..=255 (0 is reserved) and the
//! matching response carries the same `tid`, so at most 255 requests can be
//! in flight on the socket at once. The table owns the id cursor and the
//! pending-result slots; all mutations go through one mutex so allocation,
//! completion and reset never interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::types::{AwlError, Result};

/// Highest usable transaction id; ids live in 1..=255
pub const MAX_LIVE_TRANSACTIONS: usize = 255;

struct Slot {
    /// Generation of the allocation holding this id, so a late timeout for a
    /// finished transaction can never abort a successor reusing the id
    seq: u64,
    tx: oneshot::Sender<Result<Value>>,
}

struct Inner {
    /// Last allocated id; 0 means "start from 1"
    cursor: u8,
    next_seq: u64,
    slots: HashMap<u8, Slot>,
}

/// Pending-result table keyed by transaction id
pub struct TransactionTable {
    inner: Mutex<Inner>,
}

/// Handle to one outstanding transaction
///
/// Dropped without `wait()`, the slot stays registered until the server
/// answers, the table is reset, or a later `expire` clears it.
pub struct PendingTransaction {
    table: Arc<TransactionTable>,
    id: u8,
    seq: u64,
    timeout: Duration,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingTransaction {
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Await the response, bounded by the per-transaction timeout.
    ///
    /// On timeout the slot is expired from the table (making the id eligible
    /// for reuse) and `TransactionTimeout` is returned.
    pub async fn wait(self) -> Result<Value> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without a verdict; treat like a reset
            Ok(Err(_)) => Err(AwlError::Transaction("transaction cancelled".into())),
            Err(_) => {
                self.table.expire(self.id, self.seq);
                Err(AwlError::TransactionTimeout)
            }
        }
    }
}

impl TransactionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                cursor: 0,
                next_seq: 0,
                slots: HashMap::new(),
            }),
        })
    }

    /// Allocate the next free transaction id and register its result slot.
    ///
    /// The cursor advances modulo 256 skipping 0, wrapping to 1; an id is
    /// eligible only while no live transaction holds it. A full cycle without
    /// an eligible id means 255 transactions are outstanding: `Capacity`.
    pub fn allocate(self: &Arc<Self>, timeout: Duration) -> Result<PendingTransaction> {
        let mut inner = self.lock();

        let start = if inner.cursor == 0 { 1 } else { inner.cursor };
        loop {
            let next = inner.cursor.wrapping_add(1);
            inner.cursor = if next == 0 { 1 } else { next };
            if !inner.slots.contains_key(&inner.cursor) {
                break;
            }
            if inner.cursor == start {
                return Err(AwlError::Capacity);
            }
        }

        let id = inner.cursor;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let (tx, rx) = oneshot::channel();
        inner.slots.insert(id, Slot { seq, tx });

        Ok(PendingTransaction {
            table: Arc::clone(self),
            id,
            seq,
            timeout,
            rx,
        })
    }

    /// Fulfill the pending result for `id` with response data.
    ///
    /// Unknown ids are logged and discarded: stale frames are expected
    /// around session renewal and must never kill the receive loop.
    pub fn complete(&self, id: u8, data: Value) {
        match self.lock().slots.remove(&id) {
            Some(slot) => {
                // Receiver may have timed out or been dropped; nothing to do
                let _ = slot.tx.send(Ok(data));
            }
            None => warn!("response for unknown transaction id {}", id),
        }
    }

    /// Fail the pending result for `id`; unknown ids are discarded.
    pub fn abort(&self, id: u8, err: AwlError) {
        match self.lock().slots.remove(&id) {
            Some(slot) => {
                let _ = slot.tx.send(Err(err));
            }
            None => debug!("tried to abort non-existent transaction id {}", id),
        }
    }

    /// Abort every live transaction and reset the id cursor.
    ///
    /// Called whenever a new login cycle begins; prior transaction ids are
    /// meaningless after reauthentication.
    pub fn reset_all(&self) {
        let mut inner = self.lock();
        for (id, slot) in inner.slots.drain() {
            debug!("cancelling transaction id {} for session reset", id);
            let _ = slot
                .tx
                .send(Err(AwlError::Transaction("cancelled by session reset".into())));
        }
        inner.cursor = 0;
    }

    /// Number of live transactions (used by tests and the health endpoint)
    pub fn live(&self) -> usize {
        self.lock().slots.len()
    }

    /// Drop a slot after its awaiter timed out, but only if the same
    /// allocation still holds the id.
    fn expire(&self, id: u8, seq: u64) {
        let mut inner = self.lock();
        if inner.slots.get(&id).is_some_and(|slot| slot.seq == seq) {
            inner.slots.remove(&id);
            debug!("expired timed-out transaction id {}", id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Slot senders don't panic while the lock is held, so poisoning
        // only happens if an allocation itself panicked; propagate the data
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
