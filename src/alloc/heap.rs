//! Heap Aliasing Allocator
//!
//! Suballocates transient resources from GPU heaps and lets the same
//! physical bytes back multiple resources whose lifetimes cannot overlap.
//!
//! # Aliasing Algebra
//!
//! Each heap keeps a monotonic `next_aliasing_index`. A resource's interval
//! is `(aliased_from, aliases_through)`:
//!
//! - `aliases_through` is fixed at first use, to the then-current index.
//! - `aliased_from` is assigned at first deposit (`next_aliasing_index++`),
//!   which is also the point the API is told the memory may be aliased.
//!   Until then it is infinite — the resource can never be handed out while
//!   another copy of it is conceptually still in flight.
//!
//! The heap summarises all *currently in-use* resources in one range; a
//! cached resource `R` may be reused iff
//!
//! ```text
//! range.aliased_from > R.aliases_through  ∧  R.aliased_from > range.aliases_through
//! ```
//!
//! i.e. `R`'s interval is disjoint from every in-use interval. New resources
//! are placed only while `next_aliasing_index < range.aliased_from`, which
//! guarantees the fresh interval is likewise disjoint.
//!
//! # Fences
//!
//! `aliasing_fences[k]` holds the fences a next user of aliasing index `k`
//! must wait on. Entries are tagged with the depositing resource's identity
//! (`aliased_from` is unique per heap) and the deposit frame, so a resource
//! re-taking its own slot skips fences it already knows about, and a
//! re-deposit replaces its stale entries from earlier frames.

use smallvec::SmallVec;

use crate::alloc::fence_pool::{FenceHandle, FencePool};
use crate::alloc::pool::PooledResource;
use crate::backend::{
    Backend, BufferDescriptor, CpuCacheMode, Device, HeapDescriptor, PurgeableState, StorageMode,
    TextureDescriptor,
};

// ─── Aliasing Intervals ───────────────────────────────────────────────────────

/// A resource's aliasing interval within its heap.
#[derive(Clone, Copy, Debug)]
pub struct AliasingInterval {
    /// Deposit index; `None` until the first deposit (= infinity).
    pub aliased_from: Option<u32>,
    /// Allocation index, fixed at first use.
    pub aliases_through: u32,
}

impl AliasingInterval {
    fn fresh(aliases_through: u32) -> Self {
        Self {
            aliased_from: None,
            aliases_through,
        }
    }

    fn from_bound(self) -> u32 {
        self.aliased_from.unwrap_or(u32::MAX)
    }
}

/// Summary interval of every currently in-use resource; `None` when nothing
/// is in flight.
#[derive(Clone, Copy, Debug, Default)]
struct InUseRange(Option<(u32, u32)>);

impl InUseRange {
    /// Whether a cached resource's interval is disjoint from every in-use
    /// interval.
    fn allows_reuse(self, candidate: AliasingInterval) -> bool {
        match self.0 {
            None => true,
            Some((from, through)) => {
                from > candidate.aliases_through && candidate.from_bound() > through
            }
        }
    }

    /// Whether a brand-new allocation (interval starting at `next_index`)
    /// would be disjoint from every in-use interval.
    fn allows_new(self, next_index: u32) -> bool {
        match self.0 {
            None => true,
            Some((from, _)) => next_index < from,
        }
    }

    fn expand(&mut self, interval: AliasingInterval) {
        let f = interval.from_bound();
        let t = interval.aliases_through;
        self.0 = Some(match self.0 {
            None => (f, t),
            Some((cf, ct)) => (cf.min(f), ct.max(t)),
        });
    }
}

// ─── Heap State ───────────────────────────────────────────────────────────────

struct AliasingFenceEntry {
    fence: FenceHandle,
    /// Frame the fence was deposited in.
    frame: u64,
    /// `aliased_from` of the depositing resource.
    owner: u32,
}

struct LiveSlot<B: Backend> {
    resource: PooledResource<B>,
    interval: AliasingInterval,
}

struct CachedEntry<B: Backend> {
    resource: PooledResource<B>,
    interval: AliasingInterval,
    frame_deposited: u64,
    /// The entry's own deposit fences. A taker inherits these directly;
    /// the aliasing-fence lookup only contributes *other* resources'
    /// fences (the own ones are skipped there as already known).
    carried_fences: SmallVec<[FenceHandle; 2]>,
}

struct HeapState<B: Backend> {
    heap: B::Heap,
    /// Total byte size the heap was created with.
    size: u64,
    next_aliasing_index: u32,
    in_use: Vec<Option<LiveSlot<B>>>,
    free_slots: Vec<u32>,
    in_use_range: InUseRange,
    cache: Vec<CachedEntry<B>>,
    /// Indexed by aliasing index; grown lazily as indices are consulted.
    aliasing_fences: Vec<Vec<AliasingFenceEntry>>,
}

impl<B: Backend> HeapState<B> {
    fn new(heap: B::Heap, size: u64) -> Self {
        Self {
            heap,
            size,
            next_aliasing_index: 0,
            in_use: Vec::new(),
            free_slots: Vec::new(),
            in_use_range: InUseRange::default(),
            cache: Vec::new(),
            aliasing_fences: Vec::new(),
        }
    }

    fn insert_live(&mut self, slot_data: LiveSlot<B>) -> u32 {
        self.in_use_range.expand(slot_data.interval);
        if let Some(slot) = self.free_slots.pop() {
            self.in_use[slot as usize] = Some(slot_data);
            slot
        } else {
            self.in_use.push(Some(slot_data));
            (self.in_use.len() - 1) as u32
        }
    }

    fn recompute_range(&mut self) {
        let mut range = InUseRange::default();
        for live in self.in_use.iter().flatten() {
            range.expand(live.interval);
        }
        self.in_use_range = range;
    }

    /// Gathers the wait fences a taker of `interval` inherits, skipping the
    /// taker's own entries.
    fn gather_wait_fences(
        &self,
        interval: AliasingInterval,
        own_frame: Option<u64>,
        fences: &mut FencePool<B>,
    ) -> SmallVec<[FenceHandle; 2]> {
        let Some(entries) = self.aliasing_fences.get(interval.aliases_through as usize) else {
            return SmallVec::new();
        };
        let own = interval.aliased_from.zip(own_frame);

        let mut waits = SmallVec::new();
        for entry in entries {
            if own == Some((entry.owner, entry.frame)) {
                continue;
            }
            fences.retain(entry.fence);
            waits.push(entry.fence);
        }
        waits
    }

    /// Merges a deposit's write fences into every aliasing index the
    /// depositing resource's memory can reach.
    fn merge_deposit_fences(
        &mut self,
        interval: AliasingInterval,
        frame: u64,
        write_fences: &[FenceHandle],
        fences: &mut FencePool<B>,
    ) {
        let owner = interval
            .aliased_from
            .expect("deposit fences merged before interval assignment");
        let upper_end = self.next_aliasing_index as usize;
        if self.aliasing_fences.len() < upper_end {
            self.aliasing_fences.resize_with(upper_end, Vec::new);
        }

        // `aliases_through <= aliased_from` always holds (the deposit index
        // is assigned after first use), so only the boundary element can be
        // shared between the two ranges.
        let through = interval.aliases_through as usize;
        let lower = 0..=through;
        let upper = (owner as usize).max(through + 1)..upper_end;
        for k in lower.chain(upper) {
            let list = &mut self.aliasing_fences[k];
            // Drop this owner's stale entries from previous frames.
            list.retain_mut(|entry| {
                if entry.owner == owner {
                    fences.release(entry.fence);
                    false
                } else {
                    true
                }
            });
            for &fence in write_fences {
                fences.retain(fence);
                list.push(AliasingFenceEntry {
                    fence,
                    frame,
                    owner,
                });
            }
        }
    }
}

// ─── Allocations ──────────────────────────────────────────────────────────────

/// Occupancy snapshot of one heap.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapUsage {
    /// Bytes currently allocated out of the heap.
    pub used: u64,
    /// Bytes still available for placement.
    pub free: u64,
}

/// A resource handed out by a heap allocator, plus the fences the first
/// write to it must wait on.
pub struct HeapAllocation<B: Backend> {
    pub resource: PooledResource<B>,
    /// Heap index within the allocator (for the disposal token).
    pub heap: u32,
    /// Live slot within the heap (for the disposal token).
    pub slot: u32,
    /// Retained for the caller; released when replaced or at frame cycle.
    pub write_wait_fences: SmallVec<[FenceHandle; 2]>,
}

// ─── Allocator ────────────────────────────────────────────────────────────────

/// Single-frame heap aliasing allocator for one storage class.
pub struct HeapAllocator<B: Backend> {
    device: B::Device,
    storage_mode: StorageMode,
    cache_mode: CpuCacheMode,
    heap_size: u64,
    frame: u64,
    heaps: Vec<HeapState<B>>,
    label: &'static str,
}

impl<B: Backend> HeapAllocator<B> {
    pub fn new(
        device: B::Device,
        storage_mode: StorageMode,
        cache_mode: CpuCacheMode,
        heap_size: u64,
        label: &'static str,
    ) -> Self {
        Self {
            device,
            storage_mode,
            cache_mode,
            heap_size,
            frame: 0,
            heaps: Vec::new(),
            label,
        }
    }

    /// Takes a buffer for `descriptor`.
    pub fn collect_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        fences: &mut FencePool<B>,
    ) -> HeapAllocation<B> {
        debug_assert_eq!(descriptor.storage_mode, self.storage_mode);

        // 1. Best-fit search across every heap's cache.
        let mut best: Option<(usize, usize, u64)> = None;
        for (hi, heap) in self.heaps.iter().enumerate() {
            for (ci, cached) in heap.cache.iter().enumerate() {
                let PooledResource::Buffer {
                    descriptor: have, ..
                } = &cached.resource
                else {
                    continue;
                };
                if have.length >= descriptor.length
                    && have.usage.contains(descriptor.usage)
                    && have.cache_mode == descriptor.cache_mode
                    && heap.in_use_range.allows_reuse(cached.interval)
                    && best.is_none_or(|(_, _, size)| have.length < size)
                {
                    best = Some((hi, ci, have.length));
                }
            }
        }
        if let Some((hi, ci, _)) = best {
            return self.take_cached(hi, ci, fences);
        }

        // 2. Fresh placement in an existing heap.
        let size = self.device.buffer_size_and_align(descriptor).size;
        for hi in 0..self.heaps.len() {
            let heap = &self.heaps[hi];
            if !heap.in_use_range.allows_new(heap.next_aliasing_index) {
                continue;
            }
            if let Some(buffer) = self
                .device
                .heap_make_buffer(&heap.heap, descriptor, Some(self.label))
            {
                let resource = PooledResource::Buffer {
                    buffer,
                    descriptor: *descriptor,
                };
                return self.place_new(hi, resource, fences);
            }
        }

        // 3. Grow: add a heap sized to fit and place there.
        let hi = self.add_heap(size);
        let buffer = self
            .device
            .heap_make_buffer(&self.heaps[hi].heap, descriptor, Some(self.label))
            .expect("freshly created heap rejected its first allocation");
        let resource = PooledResource::Buffer {
            buffer,
            descriptor: *descriptor,
        };
        self.place_new(hi, resource, fences)
    }

    /// Takes a texture for `descriptor` (exact descriptor match on reuse).
    pub fn collect_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        fences: &mut FencePool<B>,
    ) -> HeapAllocation<B> {
        debug_assert_eq!(descriptor.storage_mode, self.storage_mode);

        let mut found: Option<(usize, usize)> = None;
        'outer: for (hi, heap) in self.heaps.iter().enumerate() {
            for (ci, cached) in heap.cache.iter().enumerate() {
                let matches = matches!(
                    &cached.resource,
                    PooledResource::Texture { descriptor: have, .. } if have == descriptor
                );
                if matches && heap.in_use_range.allows_reuse(cached.interval) {
                    found = Some((hi, ci));
                    break 'outer;
                }
            }
        }
        if let Some((hi, ci)) = found {
            return self.take_cached(hi, ci, fences);
        }

        let size = self.device.texture_size_and_align(descriptor).size;
        for hi in 0..self.heaps.len() {
            let heap = &self.heaps[hi];
            if !heap.in_use_range.allows_new(heap.next_aliasing_index) {
                continue;
            }
            if let Some(texture) = self
                .device
                .heap_make_texture(&heap.heap, descriptor, Some(self.label))
            {
                let resource = PooledResource::Texture {
                    texture,
                    descriptor: *descriptor,
                };
                return self.place_new(hi, resource, fences);
            }
        }

        let hi = self.add_heap(size);
        let texture = self
            .device
            .heap_make_texture(&self.heaps[hi].heap, descriptor, Some(self.label))
            .expect("freshly created heap rejected its first allocation");
        let resource = PooledResource::Texture {
            texture,
            descriptor: *descriptor,
        };
        self.place_new(hi, resource, fences)
    }

    /// Returns a resource to its heap.
    ///
    /// `write_fences` are the disposal-time write fences (outstanding GPU
    /// work on the resource); the allocator takes its own retains on them.
    ///
    /// # Panics
    ///
    /// Panics if `(heap, slot)` does not name a live allocation; depositing
    /// to the wrong heap is fatal.
    pub fn deposit(
        &mut self,
        heap: u32,
        slot: u32,
        write_fences: &[FenceHandle],
        fences: &mut FencePool<B>,
    ) {
        let state = &mut self.heaps[heap as usize];
        let live = state.in_use[slot as usize]
            .take()
            .expect("heap deposit of a slot that is not in use (wrong allocator?)");
        state.free_slots.push(slot);

        let mut interval = live.interval;
        if interval.aliased_from.is_none() {
            interval.aliased_from = Some(state.next_aliasing_index);
            state.next_aliasing_index += 1;
            match &live.resource {
                PooledResource::Buffer { buffer, .. } => self.device.make_aliasable_buffer(buffer),
                PooledResource::Texture { texture, .. } => {
                    self.device.make_aliasable_texture(texture);
                }
            }
        }

        let frame = self.frame;
        state.merge_deposit_fences(interval, frame, write_fences, fences);
        state.recompute_range();

        let mut carried_fences: SmallVec<[FenceHandle; 2]> = SmallVec::new();
        for &fence in write_fences {
            fences.retain(fence);
            carried_fences.push(fence);
        }
        state.cache.push(CachedEntry {
            resource: live.resource,
            interval,
            frame_deposited: frame,
            carried_fences,
        });
    }

    /// Advances the allocator's frame counter and applies the configured
    /// purgeability transition to heaps with nothing in flight.
    pub fn cycle_frames(&mut self, purgeability: PurgeableState) {
        self.frame += 1;
        if purgeability == PurgeableState::KeepCurrent {
            return;
        }
        for heap in &self.heaps {
            if heap.in_use.iter().all(Option::is_none) {
                self.device.set_heap_purgeable_state(&heap.heap, purgeability);
            }
        }
    }

    /// Per-heap `(used, free)` byte counts, in heap-creation order.
    #[must_use]
    pub fn heap_usage(&self) -> Vec<HeapUsage> {
        self.heaps
            .iter()
            .map(|state| {
                let used = self.device.heap_used_size(&state.heap);
                HeapUsage {
                    used,
                    free: state.size.saturating_sub(used),
                }
            })
            .collect()
    }

    /// Bytes currently allocated out of all heaps.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.heap_usage().iter().map(|h| h.used).sum()
    }

    /// Number of heaps owned.
    #[must_use]
    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn take_cached(
        &mut self,
        heap_index: usize,
        cache_index: usize,
        fences: &mut FencePool<B>,
    ) -> HeapAllocation<B> {
        let state = &mut self.heaps[heap_index];
        let cached = state.cache.swap_remove(cache_index);

        // Own deposit fences transfer their retains to the caller; foreign
        // aliasing fences are retained on gather.
        let mut write_wait_fences = cached.carried_fences;
        write_wait_fences.extend(state.gather_wait_fences(
            cached.interval,
            Some(cached.frame_deposited),
            fences,
        ));

        let slot = state.insert_live(LiveSlot {
            resource: cached.resource.clone(),
            interval: cached.interval,
        });
        HeapAllocation {
            resource: cached.resource,
            heap: heap_index as u32,
            slot,
            write_wait_fences,
        }
    }

    fn place_new(
        &mut self,
        heap_index: usize,
        resource: PooledResource<B>,
        fences: &mut FencePool<B>,
    ) -> HeapAllocation<B> {
        let state = &mut self.heaps[heap_index];
        let interval = AliasingInterval::fresh(state.next_aliasing_index);
        let write_wait_fences = state.gather_wait_fences(interval, None, fences);

        let slot = state.insert_live(LiveSlot {
            resource: resource.clone(),
            interval,
        });
        HeapAllocation {
            resource,
            heap: heap_index as u32,
            slot,
            write_wait_fences,
        }
    }

    fn add_heap(&mut self, minimum_size: u64) -> usize {
        let size = self.heap_size.max(minimum_size);
        let descriptor = HeapDescriptor {
            size,
            storage_mode: self.storage_mode,
            cache_mode: self.cache_mode,
        };
        let heap = self.device.make_heap(&descriptor);
        self.heaps.push(HeapState::new(heap, size));
        self.heaps.len() - 1
    }
}

// ─── Multi-Frame Variant ──────────────────────────────────────────────────────

/// `N` independent single-frame heap allocators rotated per frame.
///
/// Small private resources round-robin through the ring, so a resource
/// deposited in frame `F` cannot be re-taken until frame `F + N`, by which
/// time its GPU work is long complete. This trades memory for eliminating
/// intra-stream fence waits entirely.
pub struct MultiFrameHeapAllocator<B: Backend> {
    allocators: Vec<HeapAllocator<B>>,
    index: usize,
}

impl<B: Backend> MultiFrameHeapAllocator<B> {
    pub fn new(
        device: B::Device,
        num_frames: usize,
        storage_mode: StorageMode,
        cache_mode: CpuCacheMode,
        heap_size: u64,
        label: &'static str,
    ) -> Self {
        assert!(num_frames >= 2);
        Self {
            allocators: (0..num_frames)
                .map(|_| {
                    HeapAllocator::new(device.clone(), storage_mode, cache_mode, heap_size, label)
                })
                .collect(),
            index: 0,
        }
    }

    /// The ring slot currently serving allocations.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Per-heap occupancy across every ring slot.
    #[must_use]
    pub fn heap_usage(&self) -> Vec<HeapUsage> {
        self.allocators
            .iter()
            .flat_map(|allocator| allocator.heap_usage())
            .collect()
    }

    pub fn collect_buffer(
        &mut self,
        descriptor: &BufferDescriptor,
        fences: &mut FencePool<B>,
    ) -> HeapAllocation<B> {
        self.allocators[self.index].collect_buffer(descriptor, fences)
    }

    pub fn collect_texture(
        &mut self,
        descriptor: &TextureDescriptor,
        fences: &mut FencePool<B>,
    ) -> HeapAllocation<B> {
        self.allocators[self.index].collect_texture(descriptor, fences)
    }

    /// Deposits back to the ring slot that made the allocation (transient
    /// lifetimes never span a cycle, so that is always the current slot).
    pub fn deposit(
        &mut self,
        heap: u32,
        slot: u32,
        write_fences: &[FenceHandle],
        fences: &mut FencePool<B>,
    ) {
        self.allocators[self.index].deposit(heap, slot, write_fences, fences);
    }

    /// Rotates to the next ring slot.
    pub fn cycle_frames(&mut self, purgeability: PurgeableState) {
        self.allocators[self.index].cycle_frames(PurgeableState::KeepCurrent);
        self.index = (self.index + 1) % self.allocators.len();
        // The slot becoming current gets the purgeability sweep: anything
        // still volatile in it is about to be reused.
        self.allocators[self.index].cycle_frames(purgeability);
    }
}
