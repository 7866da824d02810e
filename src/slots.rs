//! Admission control for concurrent transfers.
//!
//! The slot table is the only state shared between transfer tasks. It holds
//! both the live ids and their cancellation flags behind one mutex, so a flag
//! can never outlive its slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::error::TransferError;
use crate::transfer::TransferId;

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) cancel: CancellationToken,
    pub(crate) flagged: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SlotTable {
    pub(crate) live: HashMap<TransferId, Slot>,
}

pub(crate) type SharedTable = Arc<Mutex<SlotTable>>;

pub(crate) fn lock(table: &SharedTable) -> MutexGuard<'_, SlotTable> {
    // The table stays consistent even if a holder panicked: every mutation
    // is a single map operation.
    table.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Bounded set of running transfer ids. Rejects instead of queueing.
#[derive(Debug, Clone)]
pub struct SlotManager {
    table: SharedTable,
    max: usize,
}

impl SlotManager {
    pub fn new(max: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(SlotTable::default())),
            max: max.max(1),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.max
    }

    /// Record `id` as running if a slot is free.
    ///
    /// Returns the token the transfer should watch for cancellation. A full
    /// table, or an id that is already live, leaves the table untouched.
    pub fn try_reserve(&self, id: &TransferId) -> Result<CancellationToken, TransferError> {
        let mut table = lock(&self.table);
        if table.live.len() >= self.max || table.live.contains_key(id) {
            return Err(TransferError::AdmissionRejected { max: self.max });
        }

        let cancel = CancellationToken::new();
        table.live.insert(
            id.clone(),
            Slot {
                cancel: cancel.clone(),
                flagged: false,
            },
        );
        Ok(cancel)
    }

    /// Idempotent. Also drops any cancellation flag for `id`.
    pub fn release(&self, id: &TransferId) {
        lock(&self.table).live.remove(id);
    }

    pub fn is_active(&self, id: &TransferId) -> bool {
        lock(&self.table).live.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.table).live.len()
    }

    pub fn is_full(&self) -> bool {
        self.active_count() >= self.max
    }

    pub(crate) fn shared_table(&self) -> SharedTable {
        Arc::clone(&self.table)
    }
}
