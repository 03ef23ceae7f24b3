//! Tracks how far the masternode list and payment votes have been synced from peers.

use std::collections::HashMap;

use log::info;
use parking_lot::RwLock;

use rusty_shared_types::SyncItem;

use crate::constants::SYNC_TIMEOUT_SECONDS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemProgress {
    /// Items peers reported sending
    pub reported: u64,
    /// Last time a report arrived
    pub last_advanced: u64,
    pub synced: bool,
}

#[derive(Default)]
struct SyncState {
    items: HashMap<SyncItem, ItemProgress>,
    blockchain_synced: bool,
}

#[derive(Default)]
pub struct SyncTracker {
    state: RwLock<SyncState>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a `SyncStatusCount` reply.
    pub fn record_count(&self, item: SyncItem, count: u32, now: u64) {
        let mut state = self.state.write();
        let progress = state.items.entry(item).or_default();
        progress.reported += count as u64;
        progress.last_advanced = now;
    }

    pub fn mark_synced(&self, item: SyncItem) {
        let mut state = self.state.write();
        let progress = state.items.entry(item).or_default();
        if !progress.synced {
            info!("Masternode sync: {:?} complete ({} items reported)", item, progress.reported);
            progress.synced = true;
        }
    }

    /// Marks items synced once their replies have gone quiet.
    pub fn check_timeouts(&self, now: u64) {
        let quiet: Vec<SyncItem> = self
            .state
            .read()
            .items
            .iter()
            .filter(|(_, p)| !p.synced && p.last_advanced > 0 && now.saturating_sub(p.last_advanced) >= SYNC_TIMEOUT_SECONDS)
            .map(|(item, _)| *item)
            .collect();
        for item in quiet {
            self.mark_synced(item);
        }
    }

    pub fn is_synced(&self, item: SyncItem) -> bool {
        self.state.read().items.get(&item).map_or(false, |p| p.synced)
    }

    pub fn progress(&self, item: SyncItem) -> ItemProgress {
        self.state.read().items.get(&item).copied().unwrap_or_default()
    }

    pub fn set_blockchain_synced(&self, synced: bool) {
        self.state.write().blockchain_synced = synced;
    }

    pub fn is_blockchain_synced(&self) -> bool {
        self.state.read().blockchain_synced
    }

    pub fn is_fully_synced(&self) -> bool {
        self.is_blockchain_synced() && self.is_synced(SyncItem::List) && self.is_synced(SyncItem::Winners)
    }

    pub fn reset(&self) {
        *self.state.write() = SyncState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_synced_after_quiet_period() {
        let tracker = SyncTracker::new();
        tracker.record_count(SyncItem::List, 12, 1_000);
        tracker.check_timeouts(1_010);
        assert!(!tracker.is_synced(SyncItem::List));

        tracker.check_timeouts(1_000 + SYNC_TIMEOUT_SECONDS);
        assert!(tracker.is_synced(SyncItem::List));
        assert!(!tracker.is_synced(SyncItem::Winners));
        assert_eq!(tracker.progress(SyncItem::List).reported, 12);
    }

    #[test]
    fn test_fully_synced_needs_blockchain() {
        let tracker = SyncTracker::new();
        tracker.mark_synced(SyncItem::List);
        tracker.mark_synced(SyncItem::Winners);
        assert!(!tracker.is_fully_synced());
        tracker.set_blockchain_synced(true);
        assert!(tracker.is_fully_synced());

        tracker.reset();
        assert!(!tracker.is_fully_synced());
    }
}
