//! Temporary Buffer Arena
//!
//! Ring-buffered bump allocation of CPU-visible bytes. One arena instance
//! serves one storage/cache class; the registry owns one per class (shared,
//! managed, write-combined, argument-buffer) with class-appropriate block
//! sizes.
//!
//! # Design
//!
//! Each of the `num_frames` ring slots owns a list of fixed-size blocks. An
//! allocation bumps a cursor inside the current block; on overflow the block
//! moves to `used` and the next block comes from the `available` free list
//! (or is created, sized to fit oversized requests). Nothing is ever freed:
//! [`TemporaryBufferArena::cycle_frames`] advances the ring and returns the
//! new slot's `used` blocks to `available`; by then the GPU can no longer be reading them.
//!
//! Deposit is a no-op — every byte handed out this frame is implicitly
//! reclaimed when the ring wraps back to the same slot.

use crate::backend::{Backend, BufferDescriptor, BufferUsage, CpuCacheMode, Device, StorageMode};

/// Fixed alignment of every buffer handout.
pub const ARENA_ALIGNMENT: u64 = 256;

struct ArenaBlock<B: Backend> {
    buffer: B::Buffer,
    capacity: u64,
    cursor: u64,
}

struct FrameSlot<B: Backend> {
    current: Option<ArenaBlock<B>>,
    used: Vec<ArenaBlock<B>>,
    available: Vec<ArenaBlock<B>>,
}

impl<B: Backend> FrameSlot<B> {
    fn new() -> Self {
        Self {
            current: None,
            used: Vec::new(),
            available: Vec::new(),
        }
    }
}

/// Ring of per-frame bump arenas over CPU-visible buffer blocks.
pub struct TemporaryBufferArena<B: Backend> {
    device: B::Device,
    storage_mode: StorageMode,
    cache_mode: CpuCacheMode,
    usage: BufferUsage,
    default_block_size: u64,
    label: &'static str,
    slots: Vec<FrameSlot<B>>,
    frame_index: usize,
}

impl<B: Backend> TemporaryBufferArena<B> {
    /// Creates an arena with `num_frames` ring slots.
    pub fn new(
        device: B::Device,
        num_frames: usize,
        storage_mode: StorageMode,
        cache_mode: CpuCacheMode,
        usage: BufferUsage,
        default_block_size: u64,
        label: &'static str,
    ) -> Self {
        assert!(num_frames >= 2, "arena ring needs at least two slots");
        Self {
            device,
            storage_mode,
            cache_mode,
            usage,
            default_block_size,
            label,
            slots: (0..num_frames).map(|_| FrameSlot::new()).collect(),
            frame_index: 0,
        }
    }

    /// Bump-allocates `bytes` with the default 256-byte alignment.
    ///
    /// Returns the backing block and the byte offset of the allocation
    /// within it.
    pub fn allocate(&mut self, bytes: u64) -> (B::Buffer, u64) {
        self.allocate_aligned(bytes, ARENA_ALIGNMENT)
    }

    /// Bump-allocates `bytes` at a caller-chosen power-of-two alignment.
    pub fn allocate_aligned(&mut self, bytes: u64, alignment: u64) -> (B::Buffer, u64) {
        debug_assert!(alignment.is_power_of_two());
        let slot = &mut self.slots[self.frame_index];

        if let Some(block) = slot.current.as_mut() {
            let offset = block.cursor.next_multiple_of(alignment);
            if offset + bytes <= block.capacity {
                block.cursor = offset + bytes;
                return (block.buffer.clone(), offset);
            }
            // Overflow: retire the current block.
            let full = slot.current.take().unwrap();
            slot.used.push(full);
        }

        // Pop a recycled block large enough, or create one.
        let wanted = bytes.max(self.default_block_size);
        let recycled = slot
            .available
            .iter()
            .position(|b| b.capacity >= bytes)
            .map(|i| slot.available.swap_remove(i));

        let mut block = recycled.unwrap_or_else(|| {
            let descriptor = BufferDescriptor {
                length: wanted,
                usage: self.usage,
                storage_mode: self.storage_mode,
                cache_mode: self.cache_mode,
            };
            ArenaBlock {
                buffer: self.device.make_buffer(&descriptor, Some(self.label)),
                capacity: wanted,
                cursor: 0,
            }
        });

        block.cursor = bytes;
        let result = (block.buffer.clone(), 0);
        slot.current = Some(block);
        result
    }

    /// Advances the ring. The new slot's blocks become available again: by
    /// the time the ring wraps, the GPU work that read them has completed.
    pub fn cycle_frames(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.slots.len();
        let slot = &mut self.slots[self.frame_index];
        if let Some(block) = slot.current.take() {
            slot.used.push(block);
        }
        for mut block in slot.used.drain(..) {
            block.cursor = 0;
            slot.available.push(block);
        }
    }

    /// Total number of blocks owned across all ring slots.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.slots
            .iter()
            .map(|s| s.used.len() + s.available.len() + usize::from(s.current.is_some()))
            .sum()
    }
}
