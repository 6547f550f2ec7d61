use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::trace;

use crate::page::PageRecord;
use crate::{Slot, SLOT_COUNT};

/// Tracks, per slot, which pages hold rendered rasters.
#[derive(Debug, Default)]
pub struct GarbageCollector {
    rendered: Mutex<[BTreeSet<usize>; SLOT_COUNT]>,
}

impl GarbageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, slot: Slot, page: usize) {
        self.rendered.lock()[slot.index()].insert(page);
    }

    pub fn is_tracked(&self, slot: Slot, page: usize) -> bool {
        self.rendered.lock()[slot.index()].contains(&page)
    }

    pub fn tracked(&self, slot: Slot) -> Vec<usize> {
        self.rendered.lock()[slot.index()].iter().copied().collect()
    }

    /// Clear the `slot` rasters of every tracked page outside
    /// `keep_min..=keep_max` and return how many pages were evicted.
    ///
    /// Record locks are taken while the tracking set is held; this is the one
    /// place where two lock domains nest, always in this order.
    pub fn evict(
        &self,
        pages: &[PageRecord],
        slot: Slot,
        keep_min: usize,
        keep_max: usize,
    ) -> usize {
        let mut rendered = self.rendered.lock();
        let set = &mut rendered[slot.index()];
        let mut evicted = 0;
        set.retain(|&page| {
            if page >= keep_min && page <= keep_max {
                return true;
            }
            if let Some(record) = pages.get(page) {
                record.with_content(|content| content.clear_slot(slot));
            }
            trace!(page, ?slot, "evicted page");
            evicted += 1;
            false
        });
        evicted
    }

    pub fn clear(&self) {
        for set in self.rendered.lock().iter_mut() {
            set.clear();
        }
    }
}
