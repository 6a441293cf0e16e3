//! Transient Resource Allocators
//!
//! The allocator state machine behind resource materialisation:
//!
//! - [`TemporaryBufferArena`]: O(1) bump suballocation of ring-buffered
//!   CPU-visible bytes (per-frame data, argument buffers)
//! - [`ResourcePool`]: LRU reuse of whole buffers/textures (staging,
//!   history buffers, memoryless targets)
//! - [`HeapAllocator`] / [`MultiFrameHeapAllocator`]: heap suballocation
//!   with lifetime-based aliasing for private transients
//! - [`FencePool`]: pooled, retain-counted synchronisation primitives
//!
//! Allocator internals are not thread-safe; everything here is driven from
//! the frame thread via the resource registry.

pub mod arena;
pub mod fence_pool;
pub mod heap;
pub mod pool;

pub use arena::{ARENA_ALIGNMENT, TemporaryBufferArena};
pub use fence_pool::{FenceHandle, FencePool};
pub use heap::{AliasingInterval, HeapAllocation, HeapAllocator, HeapUsage, MultiFrameHeapAllocator};
pub use pool::{PooledResource, ResourcePool};
