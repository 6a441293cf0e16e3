//! Frame Graph Options
//!
//! Tunables for the per-frame compilation pipeline and the allocator state
//! machine. Everything has a sensible default; most applications only ever
//! touch [`FrameGraphOptions::num_inflight_frames`].

use crate::backend::PurgeableState;

/// Default size of a CPU-visible arena block for `Shared` storage.
pub const SHARED_BLOCK_SIZE: u64 = 256 * 1024;
/// Default size of a CPU-visible arena block for `Managed` storage.
pub const MANAGED_BLOCK_SIZE: u64 = 1024 * 1024;
/// Default size of a CPU-visible arena block for write-combined memory.
pub const WRITE_COMBINED_BLOCK_SIZE: u64 = 2 * 1024 * 1024;
/// Default size of an argument-buffer arena block.
pub const ARGUMENT_BUFFER_BLOCK_SIZE: u64 = 2 * 1024 * 1024;

/// Configuration for a [`FrameGraph`](crate::graph::FrameGraph).
///
/// # Defaults
///
/// | Option | Default |
/// |--------|---------|
/// | `num_inflight_frames` | 3 |
/// | `small_allocation_threshold` | 2 MiB |
/// | `pool_eviction_age` | 2 frames |
/// | `supports_memory_barriers` | `true` |
/// | `supports_memoryless` | `false` |
/// | `frame_purgeability` | `KeepCurrent` |
#[derive(Clone, Debug)]
pub struct FrameGraphOptions {
    /// Depth of the per-frame ring buffers (arenas, pools, small-resource
    /// heaps). Must be at least 2 so that CPU recording for frame `N+1` never
    /// touches memory the GPU may still read for frame `N`.
    pub num_inflight_frames: usize,

    /// Private transient resources at or below this byte size are served by
    /// the multi-frame small-resource heap allocator; larger ones go to the
    /// single-frame aliasing heaps.
    pub small_allocation_threshold: u64,

    /// Number of frames a pooled resource may sit unused before eviction.
    pub pool_eviction_age: u32,

    /// Whether the platform supports stage-scoped memory barriers inside a
    /// single encoder. When `false`, the compiler falls back to plain
    /// texture barriers.
    pub supports_memory_barriers: bool,

    /// Whether the platform supports memoryless render targets.
    pub supports_memoryless: bool,

    /// Purgeable-state transition applied to empty heaps on frame cycle.
    pub frame_purgeability: PurgeableState,

    /// Byte size of newly created aliasing heaps (grown to fit oversized
    /// resources on demand).
    pub heap_size: u64,
}

impl Default for FrameGraphOptions {
    fn default() -> Self {
        Self {
            num_inflight_frames: 3,
            small_allocation_threshold: 2 * 1024 * 1024,
            pool_eviction_age: 2,
            supports_memory_barriers: true,
            supports_memoryless: false,
            frame_purgeability: PurgeableState::KeepCurrent,
            heap_size: 128 * 1024 * 1024,
        }
    }
}

impl FrameGraphOptions {
    /// Validates option consistency, clamping `num_inflight_frames` to the
    /// supported minimum.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.num_inflight_frames < 2 {
            log::warn!(
                "FrameGraphOptions: num_inflight_frames {} below minimum, clamping to 2",
                self.num_inflight_frames
            );
            self.num_inflight_frames = 2;
        }
        self
    }
}
