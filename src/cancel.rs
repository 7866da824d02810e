//! Cooperative cancellation of running transfers.

use tokio_util::sync::CancellationToken;

use crate::slots::{SharedTable, SlotManager, lock};
use crate::transfer::TransferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    Flagged,
    /// The transfer already finished or never started.
    NotActive,
}

/// Flags transfers for abort.
///
/// The pipeline consults the flag after the download returns. Flagging also
/// fires the transfer's token so a backend that watches it can stop early.
#[derive(Debug, Clone)]
pub struct CancellationRegistry {
    table: SharedTable,
}

impl CancellationRegistry {
    pub fn new(slots: &SlotManager) -> Self {
        Self {
            table: slots.shared_table(),
        }
    }

    pub fn flag(&self, id: &TransferId) -> FlagOutcome {
        let token: CancellationToken = {
            let mut table = lock(&self.table);
            let Some(slot) = table.live.get_mut(id) else {
                return FlagOutcome::NotActive;
            };
            slot.flagged = true;
            slot.cancel.clone()
        };

        token.cancel();
        FlagOutcome::Flagged
    }

    pub fn is_flagged(&self, id: &TransferId) -> bool {
        lock(&self.table)
            .live
            .get(id)
            .is_some_and(|slot| slot.flagged)
    }

    /// Idempotent. Does not un-fire a token that was already cancelled.
    pub fn clear(&self, id: &TransferId) {
        if let Some(slot) = lock(&self.table).live.get_mut(id) {
            slot.flagged = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> TransferId {
        TransferId::parse(raw).unwrap()
    }

    #[test]
    fn flag_inactive_is_noop() {
        let slots = SlotManager::new(3);
        let registry = CancellationRegistry::new(&slots);

        assert_eq!(registry.flag(&id("1-1")), FlagOutcome::NotActive);
        assert!(!registry.is_flagged(&id("1-1")));
        assert_eq!(slots.active_count(), 0);
    }

    #[test]
    fn flag_active_fires_token() {
        let slots = SlotManager::new(3);
        let registry = CancellationRegistry::new(&slots);
        let token = slots.try_reserve(&id("1-1")).unwrap();

        assert_eq!(registry.flag(&id("1-1")), FlagOutcome::Flagged);
        assert!(registry.is_flagged(&id("1-1")));
        assert!(token.is_cancelled());
    }

    #[test]
    fn release_drops_flag() {
        let slots = SlotManager::new(3);
        let registry = CancellationRegistry::new(&slots);
        slots.try_reserve(&id("1-1")).unwrap();
        registry.flag(&id("1-1"));

        slots.release(&id("1-1"));
        assert!(!registry.is_flagged(&id("1-1")));
        assert_eq!(registry.flag(&id("1-1")), FlagOutcome::NotActive);
    }

    #[test]
    fn clear_is_idempotent() {
        let slots = SlotManager::new(3);
        let registry = CancellationRegistry::new(&slots);
        slots.try_reserve(&id("1-1")).unwrap();
        registry.flag(&id("1-1"));

        registry.clear(&id("1-1"));
        registry.clear(&id("1-1"));
        registry.clear(&id("9-9"));
        assert!(!registry.is_flagged(&id("1-1")));
        assert!(slots.is_active(&id("1-1")));
    }
}
