//! Fence Pool
//!
//! GPU fences are pooled and retain-counted. The dependency compiler
//! allocates a fence per cross-encoder dependency group and per disposal
//! edge; attachments to resources (usage fences, aliasing fences) each hold
//! one retain. When the count reaches zero the fence is *staged* rather than
//! recycled immediately, so mid-frame retain/release pairs need not be
//! strictly ordered; staged fences return to the free list on
//! [`FencePool::cycle_frames`].
//!
//! A pooled fence object is always valid to pass to an encoder. Whether its
//! *contents* (the signal) are current is tracked by the owner — the heap
//! allocator tags aliasing fences with `(aliasing index, frame)` for exactly
//! that purpose.

use crate::backend::{Backend, Device};

/// Index of a pooled fence. Copyable; identity is pool-wide.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FenceHandle(u32);

impl FenceHandle {
    /// Raw pool index, for diagnostics.
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

struct FenceSlot<B: Backend> {
    native: B::Fence,
    retain_count: u32,
    /// Already sitting in `frame_end_unused`.
    staged: bool,
}

/// Pool of retain-counted fences.
pub struct FencePool<B: Backend> {
    device: B::Device,
    slots: Vec<FenceSlot<B>>,
    /// LIFO free list; reusing the most recently retired fence keeps the
    /// working set small.
    unused: Vec<u32>,
    /// Fences whose count hit zero this frame; recycled on cycle.
    frame_end_unused: Vec<u32>,
}

impl<B: Backend> FencePool<B> {
    /// Creates an empty pool.
    pub fn new(device: B::Device) -> Self {
        Self {
            device,
            slots: Vec::new(),
            unused: Vec::new(),
            frame_end_unused: Vec::new(),
        }
    }

    /// Allocates a fence with retain count 1.
    pub fn allocate(&mut self) -> FenceHandle {
        if let Some(index) = self.unused.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert_eq!(slot.retain_count, 0);
            slot.retain_count = 1;
            return FenceHandle(index);
        }

        let index = self.slots.len() as u32;
        self.slots.push(FenceSlot {
            native: self.device.make_fence(),
            retain_count: 1,
            staged: false,
        });
        FenceHandle(index)
    }

    /// Increments a fence's retain count.
    ///
    /// # Panics
    ///
    /// Panics if the fence has already been fully released.
    pub fn retain(&mut self, fence: FenceHandle) {
        let slot = &mut self.slots[fence.0 as usize];
        assert!(slot.retain_count > 0, "retain of a dead fence {fence:?}");
        slot.retain_count += 1;
    }

    /// Decrements a fence's retain count; at zero the fence is staged for
    /// recycling at the next frame cycle.
    ///
    /// # Panics
    ///
    /// Panics on over-release.
    pub fn release(&mut self, fence: FenceHandle) {
        let slot = &mut self.slots[fence.0 as usize];
        assert!(slot.retain_count > 0, "over-release of fence {fence:?}");
        slot.retain_count -= 1;
        if slot.retain_count == 0 && !slot.staged {
            slot.staged = true;
            self.frame_end_unused.push(fence.0);
        }
    }

    /// The native fence object behind a handle.
    #[must_use]
    pub fn native(&self, fence: FenceHandle) -> &B::Fence {
        &self.slots[fence.0 as usize].native
    }

    /// Current retain count (0 = staged for recycling).
    #[must_use]
    pub fn retain_count(&self, fence: FenceHandle) -> u32 {
        self.slots[fence.0 as usize].retain_count
    }

    /// Number of fences currently retained somewhere.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.retain_count > 0).count()
    }

    /// Returns staged fences to the free list.
    pub fn cycle_frames(&mut self) {
        // A staged fence may have been resurrected by a retain that landed
        // after its release in the same frame; only recycle the dead ones.
        for index in self.frame_end_unused.drain(..) {
            let slot = &mut self.slots[index as usize];
            slot.staged = false;
            if slot.retain_count == 0 {
                self.unused.push(index);
            }
        }
    }
}
