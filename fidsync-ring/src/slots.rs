// EventSlot store
//
// A fixed ring of event descriptors indexed by the low bits of the fiducial
// tick. Slots are never freed, only taken over by the next timestamp that
// maps onto them.

use fidsync_schema::Timestamp;

/// One in-progress event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSlot {
    /// Timestamp of the event currently owning the slot
    pub timestamp: Option<Timestamp>,

    /// Non-continuous sources that contributed since the last reset
    pub non_continuous_count: usize,

    /// Set once the scheduler has evaluated the slot
    pub retired: bool,
}

impl EventSlot {
    /// Whether some update ever claimed this slot
    pub fn is_occupied(&self) -> bool {
        self.timestamp.is_some()
    }
}

/// Outcome of claiming a slot for a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClaim {
    /// Slot already belongs to this timestamp
    Current,

    /// Slot was empty and now belongs to this timestamp
    Fresh,

    /// Slot held an older event that has been discarded
    Recycled { previous: Timestamp },
}

impl SlotClaim {
    /// Per-source presence flags must be cleared for this slot
    pub fn needs_reset(&self) -> bool {
        !matches!(self, SlotClaim::Current)
    }
}

/// Ring of event slots
#[derive(Debug, Clone)]
pub struct SlotStore {
    slots: Vec<EventSlot>,
    mask: u32,
}

impl SlotStore {
    /// Create a ring of `capacity` slots; `capacity` must be a power of two
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        Self {
            slots: vec![EventSlot::default(); capacity],
            mask: (capacity - 1) as u32,
        }
    }

    /// Mask applied to ticks to get a slot index
    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &EventSlot {
        &self.slots[idx]
    }

    /// Next slot in ring order
    #[inline]
    pub fn next(&self, idx: usize) -> usize {
        (idx + 1) & self.mask as usize
    }

    /// Slot `n` positions behind `idx` in ring order
    #[inline]
    pub fn behind(&self, idx: usize, n: usize) -> usize {
        (idx + self.slots.len() - n) & self.mask as usize
    }

    /// Make `timestamp` the owner of slot `idx`.
    ///
    /// Any other owner is discarded along with its contribution count.
    pub fn claim(&mut self, idx: usize, timestamp: Timestamp) -> SlotClaim {
        let slot = &mut self.slots[idx];
        let claim = match slot.timestamp {
            Some(current) if current == timestamp => return SlotClaim::Current,
            Some(previous) => SlotClaim::Recycled { previous },
            None => SlotClaim::Fresh,
        };

        slot.timestamp = Some(timestamp);
        slot.non_continuous_count = 0;
        slot.retired = false;
        claim
    }

    /// Count one non-continuous contribution to slot `idx`
    #[inline]
    pub fn count_contribution(&mut self, idx: usize) -> usize {
        let slot = &mut self.slots[idx];
        slot.non_continuous_count += 1;
        slot.non_continuous_count
    }

    /// Zero the contribution count so the slot cannot complete
    #[inline]
    pub fn invalidate(&mut self, idx: usize) {
        self.slots[idx].non_continuous_count = 0;
    }

    /// Mark the slot evaluated; it will not be considered again until reclaimed
    #[inline]
    pub fn retire(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];
        slot.retired = true;
        slot.non_continuous_count = 0;
    }
}
