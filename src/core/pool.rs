//! Recycled output values.
//!
//! Units that hand out heavyweight outputs on every activation draw them from
//! an [`OutputPool`] instead of allocating. Items live in an arena; callers
//! hold generation-checked [`PoolHandle`]s and an explicit reference count
//! per item tracks who still uses it. The pool itself always holds one
//! reference, so an item whose count is exactly one is unused and may be
//! recycled.

use crate::core::invariant::{self, assert_invariant};

/// Generation-checked handle to a pooled item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    InUse,
}

struct PoolSlot<T> {
    value: T,
    generation: u32,
    refs: usize,
    state: SlotState,
}

/// The pool's own hold on every item.
const POOL_HOLD: usize = 1;

pub struct OutputPool<T> {
    slots: Vec<PoolSlot<T>>,
    in_use: Vec<u32>,
    free: Vec<u32>,
}

impl<T> Default for OutputPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OutputPool<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            in_use: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Leases an item to the caller.
    ///
    /// A free item is reused as is, keeping whatever content it held;
    /// otherwise `create` builds a new one. The returned handle carries one
    /// reference on top of the pool's hold.
    pub fn acquire(&mut self, create: impl FnOnce() -> T) -> PoolHandle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(PoolSlot {
                    value: create(),
                    generation: 0,
                    refs: POOL_HOLD,
                    state: SlotState::Free,
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        assert_invariant(
            invariant::POOL_REFCOUNT,
            slot.state == SlotState::Free && slot.refs == POOL_HOLD,
            "leased a pool item that is still referenced",
            None,
        );
        slot.state = SlotState::InUse;
        slot.refs = POOL_HOLD + 1;
        self.in_use.push(index);
        PoolHandle {
            index,
            generation: slot.generation,
        }
    }

    fn live_slot(&self, handle: PoolHandle) -> Option<&PoolSlot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.state == SlotState::InUse)
    }

    fn live_slot_mut(&mut self, handle: PoolHandle) -> Option<&mut PoolSlot<T>> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && s.state == SlotState::InUse)
    }

    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        self.live_slot(handle).map(|s| &s.value)
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        self.live_slot_mut(handle).map(|s| &mut s.value)
    }

    /// External references to the item, excluding the pool's hold.
    pub fn external_refs(&self, handle: PoolHandle) -> Option<usize> {
        self.live_slot(handle).map(|s| s.refs - POOL_HOLD)
    }

    /// Adds a reference to a leased item.
    pub fn retain(&mut self, handle: PoolHandle) {
        let slot = self.live_slot_mut(handle);
        assert_invariant(
            invariant::POOL_HANDLE,
            slot.is_some(),
            "retained a stale pool handle",
            None,
        );
        if let Some(slot) = slot {
            slot.refs += 1;
        }
    }

    /// Drops a reference to a leased item. The item stays leased until the
    /// next [`recycle`](Self::recycle).
    pub fn release(&mut self, handle: PoolHandle) {
        let slot = self.live_slot_mut(handle);
        assert_invariant(
            invariant::POOL_HANDLE,
            slot.is_some(),
            "released a stale pool handle",
            None,
        );
        if let Some(slot) = slot {
            if slot.refs <= POOL_HOLD {
                assert_invariant(
                    invariant::POOL_REFCOUNT,
                    false,
                    "released more references than were taken",
                    Some(&format!("refs = {}", slot.refs)),
                );
            }
            slot.refs -= 1;
        }
    }

    /// Moves every leased item held only by the pool back to the free list.
    /// Returns how many items were reclaimed.
    pub fn recycle(&mut self) -> usize {
        let mut reclaimed = 0;
        let slots = &mut self.slots;
        let free = &mut self.free;
        self.in_use.retain(|&index| {
            let slot = &mut slots[index as usize];
            if slot.refs != POOL_HOLD {
                return true;
            }
            slot.state = SlotState::Free;
            slot.generation = slot.generation.wrapping_add(1);
            free.push(index);
            reclaimed += 1;
            false
        });
        if reclaimed > 0 {
            log::trace!("output pool reclaimed {reclaimed} items");
        }
        reclaimed
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn in_use_len(&self) -> usize {
        self.in_use.len()
    }

    /// Total items ever constructed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
