//! Allocator Tests
//!
//! Covers:
//! - bump arena alignment, overflow and ring recycling
//! - pool best-fit, ring grace and idle eviction
//! - fence pool retain counts and deferred recycling
//! - heap aliasing legality and fence hand-off
//! - multi-frame ring rotation for small private resources

mod common;

use common::{Event, MockBackend, MockDevice};
use forge::alloc::{
    FencePool, HeapAllocator, MultiFrameHeapAllocator, PooledResource, ResourcePool,
    TemporaryBufferArena,
};
use forge::backend::{
    BufferDescriptor, BufferUsage, CpuCacheMode, PixelFormat, PurgeableState, StorageMode,
    TextureDescriptor,
};

fn private_buffer(length: u64) -> BufferDescriptor {
    BufferDescriptor::private(length, BufferUsage::SHADER_READ | BufferUsage::SHADER_WRITE)
}

// ─── Arena ────────────────────────────────────────────────────────────────────

#[test]
fn arena_bumps_with_fixed_alignment() {
    let device = MockDevice::new();
    let mut arena = TemporaryBufferArena::<MockBackend>::new(
        device,
        2,
        StorageMode::Shared,
        CpuCacheMode::DefaultCache,
        BufferUsage::CONSTANT_BUFFER,
        4096,
        "test arena",
    );

    let (first, offset_a) = arena.allocate(100);
    let (second, offset_b) = arena.allocate(100);
    assert_eq!(offset_a, 0);
    assert_eq!(offset_b, 256, "handouts are 256-byte aligned");
    assert_eq!(first.id, second.id, "same block serves both");
}

#[test]
fn arena_overflow_opens_a_new_block() {
    let device = MockDevice::new();
    let mut arena = TemporaryBufferArena::<MockBackend>::new(
        device,
        2,
        StorageMode::Shared,
        CpuCacheMode::DefaultCache,
        BufferUsage::CONSTANT_BUFFER,
        1024,
        "test arena",
    );

    let (first, _) = arena.allocate(1000);
    let (second, _) = arena.allocate(1000);
    assert_ne!(first.id, second.id);
    assert_eq!(arena.block_count(), 2);

    // Oversized requests get a block of their own size.
    let (big, offset) = arena.allocate(10_000);
    assert_eq!(offset, 0);
    assert_eq!(big.length, 10_000);
}

#[test]
fn arena_ring_recycles_blocks_without_freeing() {
    let device = MockDevice::new();
    let mut arena = TemporaryBufferArena::<MockBackend>::new(
        device.clone(),
        2,
        StorageMode::Shared,
        CpuCacheMode::DefaultCache,
        BufferUsage::CONSTANT_BUFFER,
        1024,
        "test arena",
    );

    // Fill both ring slots once.
    arena.allocate(512);
    arena.cycle_frames();
    arena.allocate(512);
    arena.cycle_frames();
    let blocks_after_warmup = arena.block_count();
    device.drain();

    // Steady state: no further buffer creation.
    for _ in 0..6 {
        arena.allocate(512);
        arena.cycle_frames();
    }
    assert_eq!(arena.block_count(), blocks_after_warmup);
    assert!(
        !device
            .drain()
            .iter()
            .any(|e| matches!(e, Event::CreateBuffer { .. })),
        "steady-state frames reuse ring blocks"
    );
}

// ─── Pool ─────────────────────────────────────────────────────────────────────

#[test]
fn pool_collect_is_best_fit() {
    let device = MockDevice::new();
    let mut pool = ResourcePool::<MockBackend>::new(device.clone(), 1, 2, "test pool");

    for length in [4096, 1024, 2048] {
        let descriptor = BufferDescriptor::shared(length, BufferUsage::SHADER_READ);
        let buffer = device_buffer(&device, &descriptor);
        pool.deposit(PooledResource::Buffer {
            buffer,
            descriptor,
        });
    }
    // Single-bucket pool: staged entries land back in the current bucket.
    pool.cycle_frames();

    let collected =
        pool.collect_buffer(&BufferDescriptor::shared(1000, BufferUsage::SHADER_READ));
    assert_eq!(collected.length, 1024, "smallest satisfying entry wins");
}

#[test]
fn pool_mismatched_storage_creates_new() {
    let device = MockDevice::new();
    let mut pool = ResourcePool::<MockBackend>::new(device.clone(), 1, 2, "test pool");

    let descriptor = BufferDescriptor::shared(1024, BufferUsage::SHADER_READ);
    let buffer = device_buffer(&device, &descriptor);
    pool.deposit(PooledResource::Buffer {
        buffer,
        descriptor,
    });
    pool.cycle_frames();
    device.drain();

    let wanted = private_buffer(1024);
    let _ = pool.collect_buffer(&wanted);
    assert!(
        device
            .drain()
            .iter()
            .any(|e| matches!(e, Event::CreateBuffer { .. })),
        "storage mismatch must not reuse the pooled entry"
    );
}

#[test]
fn pool_ring_delays_reuse_and_evicts_idle_entries() {
    let device = MockDevice::new();
    let mut pool = ResourcePool::<MockBackend>::new(device.clone(), 3, 2, "test pool");

    let descriptor = BufferDescriptor::shared(1024, BufferUsage::SHADER_READ);
    let buffer = device_buffer(&device, &descriptor);
    let deposited_id = buffer.id;
    pool.deposit(PooledResource::Buffer {
        buffer,
        descriptor,
    });

    // The entry is staged; it only joins the bucket that becomes current at
    // the next cycle, so a same-frame collect misses.
    let other = pool.collect_buffer(&descriptor);
    assert_ne!(other.id, deposited_id);

    pool.cycle_frames();
    let reused = pool.collect_buffer(&descriptor);
    assert_eq!(reused.id, deposited_id);

    // An entry that nobody collects ages out after the eviction window.
    pool.deposit(PooledResource::Buffer {
        buffer: reused,
        descriptor,
    });
    for _ in 0..12 {
        pool.cycle_frames();
    }
    assert!(pool.is_empty(), "idle entries are evicted");
}

fn device_buffer(device: &MockDevice, descriptor: &BufferDescriptor) -> common::MockBuffer {
    use forge::backend::Device;
    device.make_buffer(descriptor, None)
}

// ─── Fence Pool ───────────────────────────────────────────────────────────────

#[test]
fn fence_pool_retain_release_and_deferred_recycle() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device);

    let fence = fences.allocate();
    assert_eq!(fences.retain_count(fence), 1);
    fences.retain(fence);
    assert_eq!(fences.retain_count(fence), 2);
    fences.release(fence);
    fences.release(fence);
    assert_eq!(fences.retain_count(fence), 0);
    assert_eq!(fences.live_count(), 0);

    // Not recycled until the frame cycles.
    let second = fences.allocate();
    assert_ne!(second, fence);
    fences.release(second);

    fences.cycle_frames();
    let third = fences.allocate();
    assert!(third == fence || third == second, "staged fences recycle");
}

#[test]
#[should_panic(expected = "over-release")]
fn fence_over_release_panics() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device);
    let fence = fences.allocate();
    fences.release(fence);
    fences.release(fence);
}

// ─── Heap Aliasing ────────────────────────────────────────────────────────────

#[test]
fn heap_reuses_deposited_resource_when_nothing_is_in_flight() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device.clone(),
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        64 * 1024 * 1024,
        "test heap",
    );

    let descriptor = private_buffer(1024 * 1024);
    let a = heaps.collect_buffer(&descriptor, &mut fences);
    let a_id = match &a.resource {
        PooledResource::Buffer { buffer, .. } => buffer.id,
        PooledResource::Texture { .. } => unreachable!(),
    };
    heaps.deposit(a.heap, a.slot, &[], &mut fences);

    // Nothing in flight: the cached resource is legal to alias.
    let b = heaps.collect_buffer(&descriptor, &mut fences);
    let b_id = match &b.resource {
        PooledResource::Buffer { buffer, .. } => buffer.id,
        PooledResource::Texture { .. } => unreachable!(),
    };
    assert_eq!(a_id, b_id, "same physical placement reused");

    // The first deposit told the API the memory is aliasable.
    assert!(
        device
            .drain()
            .iter()
            .any(|e| matches!(e, Event::MakeAliasable { id } if *id == a_id))
    );
}

#[test]
fn heap_refuses_reuse_against_concurrent_lifetime() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device,
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        64 * 1024 * 1024,
        "test heap",
    );

    let descriptor = private_buffer(1024 * 1024);
    let a = heaps.collect_buffer(&descriptor, &mut fences);
    let b = heaps.collect_buffer(&descriptor, &mut fences);
    let a_id = buffer_id(&a.resource);
    let b_id = buffer_id(&b.resource);
    assert_ne!(a_id, b_id, "concurrent lifetimes get distinct placements");

    // A deposited while B is still in flight: their aliasing intervals
    // overlap, so a new request must not reuse A's bytes.
    heaps.deposit(a.heap, a.slot, &[], &mut fences);
    let c = heaps.collect_buffer(&descriptor, &mut fences);
    assert_ne!(buffer_id(&c.resource), a_id);

    // Once B and C are back too, the heap serves from the cache again.
    heaps.deposit(b.heap, b.slot, &[], &mut fences);
    heaps.deposit(c.heap, c.slot, &[], &mut fences);
    let d = heaps.collect_buffer(&descriptor, &mut fences);
    let d_id = buffer_id(&d.resource);
    assert!(d_id == a_id || d_id == b_id || d_id == buffer_id(&c.resource));
}

#[test]
fn heap_deposit_fences_reach_the_next_user() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device,
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        64 * 1024 * 1024,
        "test heap",
    );

    let descriptor = private_buffer(1024 * 1024);
    let a = heaps.collect_buffer(&descriptor, &mut fences);
    assert!(a.write_wait_fences.is_empty(), "fresh placement has no debt");

    let guard = fences.allocate();
    heaps.deposit(a.heap, a.slot, &[guard], &mut fences);
    assert!(fences.retain_count(guard) > 1, "allocator retains on insert");

    let b = heaps.collect_buffer(&descriptor, &mut fences);
    assert_eq!(
        b.write_wait_fences.as_slice(),
        &[guard],
        "the next user inherits the deposit fence"
    );
}

#[test]
fn heap_grows_when_exhausted() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    // Heap fits one 1 MiB buffer only.
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device.clone(),
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        1024 * 1024,
        "test heap",
    );

    let descriptor = private_buffer(1024 * 1024);
    let _a = heaps.collect_buffer(&descriptor, &mut fences);
    let _b = heaps.collect_buffer(&descriptor, &mut fences);
    assert_eq!(heaps.heap_count(), 2, "exhaustion adds a heap, never fails");
}

#[test]
fn heap_usage_reports_per_heap_used_and_free() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device,
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        4 * 1024 * 1024,
        "test heap",
    );
    assert!(heaps.heap_usage().is_empty());

    let descriptor = private_buffer(1024 * 1024);
    let _a = heaps.collect_buffer(&descriptor, &mut fences);
    let _b = heaps.collect_buffer(&descriptor, &mut fences);

    let usage = heaps.heap_usage();
    assert_eq!(usage.len(), 1, "both placements fit one heap");
    assert_eq!(usage[0].used, 2 * 1024 * 1024);
    assert_eq!(usage[0].free, 2 * 1024 * 1024);
    assert_eq!(heaps.used_bytes(), 2 * 1024 * 1024);
}

#[test]
fn heap_purgeability_sweep_targets_idle_heaps() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device.clone(),
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        64 * 1024 * 1024,
        "test heap",
    );

    let descriptor = private_buffer(1024 * 1024);
    let a = heaps.collect_buffer(&descriptor, &mut fences);
    heaps.deposit(a.heap, a.slot, &[], &mut fences);
    device.drain();

    heaps.cycle_frames(PurgeableState::Volatile);
    assert!(
        device
            .drain()
            .iter()
            .any(|e| matches!(e, Event::SetPurgeable { state: PurgeableState::Volatile, .. }))
    );
}

#[test]
fn multi_frame_allocator_round_robins() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut ring = MultiFrameHeapAllocator::<MockBackend>::new(
        device.clone(),
        3,
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        64 * 1024 * 1024,
        "small heap ring",
    );

    let descriptor = private_buffer(1024 * 1024);
    let mut first_frame_id = None;
    let mut created = Vec::new();

    for frame in 0..4 {
        assert_eq!(ring.current_index(), frame % 3);
        let allocation = ring.collect_buffer(&descriptor, &mut fences);
        assert!(
            allocation.write_wait_fences.is_empty(),
            "ring rotation replaces fence waits entirely"
        );
        let id = buffer_id(&allocation.resource);
        if frame == 0 {
            first_frame_id = Some(id);
        }
        if frame == 3 {
            assert_eq!(
                Some(id),
                first_frame_id,
                "frame 4 reuses the bucket first seen in frame 1"
            );
        } else if !created.contains(&id) {
            created.push(id);
        }
        ring.deposit(allocation.heap, allocation.slot, &[], &mut fences);
        ring.cycle_frames(PurgeableState::KeepCurrent);
    }
    assert_eq!(created.len(), 3, "one placement per ring slot");
}

fn buffer_id(resource: &PooledResource<MockBackend>) -> u64 {
    match resource {
        PooledResource::Buffer { buffer, .. } => buffer.id,
        PooledResource::Texture { .. } => unreachable!(),
    }
}

// ─── Texture pooling through heaps ────────────────────────────────────────────

#[test]
fn heap_texture_reuse_requires_exact_descriptor() {
    let device = MockDevice::new();
    let mut fences = FencePool::<MockBackend>::new(device.clone());
    let mut heaps = HeapAllocator::<MockBackend>::new(
        device,
        StorageMode::Private,
        CpuCacheMode::DefaultCache,
        64 * 1024 * 1024,
        "test heap",
    );

    let mut descriptor = TextureDescriptor::render_target_2d(256, 256, PixelFormat::Rgba16Float);
    descriptor.storage_mode = StorageMode::Private;

    let a = heaps.collect_texture(&descriptor, &mut fences);
    heaps.deposit(a.heap, a.slot, &[], &mut fences);

    // A mismatched descriptor never reuses the cached texture, and while
    // it is in flight the cached one stays off limits (its interval now
    // overlaps the new lifetime).
    let mut smaller = descriptor;
    smaller.width = 128;
    let b = heaps.collect_texture(&smaller, &mut fences);
    assert_ne!(texture_id(&a.resource), texture_id(&b.resource));
    heaps.deposit(b.heap, b.slot, &[], &mut fences);

    // Nothing in flight again: the exact-match request reuses A.
    let c = heaps.collect_texture(&descriptor, &mut fences);
    assert_eq!(texture_id(&a.resource), texture_id(&c.resource));
}

fn texture_id(resource: &PooledResource<MockBackend>) -> u64 {
    match resource {
        PooledResource::Texture { texture, .. } => texture.id,
        PooledResource::Buffer { .. } => unreachable!(),
    }
}
