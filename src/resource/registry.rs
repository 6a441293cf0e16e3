//! Resource Registry
//!
//! Maps stable resource handles to their per-frame backings and routes every
//! materialise/dispose to the right allocator:
//!
//! | Resource | Allocator |
//! |----------|-----------|
//! | persistent | native device objects |
//! | history buffer | single-bucket history pool |
//! | non-private transient | multi-bucket staging pool |
//! | private transient ≤ 2 MiB | multi-frame small-resource heaps |
//! | private transient, colour RT | colour render-target heaps |
//! | private transient, depth/stencil RT | depth render-target heaps |
//! | private transient, other | generic private heaps |
//! | memoryless texture | memoryless pool |
//! | window handle | presentation layer (never pooled) |
//!
//! # Threading
//!
//! Argument-buffer materialisation may run on the recording thread while the
//! frame thread accesses ordinary references, so the argument-buffer map
//! *and* the arena it suballocates from live behind one mutex, taken in its
//! entirety per materialisation. The buffer/texture maps and all other
//! allocator internals are frame-thread-only and take no lock.

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::alloc::{
    FenceHandle, FencePool, HeapAllocation, HeapAllocator, HeapUsage, MultiFrameHeapAllocator,
    PooledResource, ResourcePool, TemporaryBufferArena,
};
use crate::backend::{
    ArgumentEncoder, Backend, BufferUsage, CpuCacheMode, Device, DrawableSource, StorageMode,
    TextureDescriptor, TextureUsage,
};
use crate::errors::{ForgeError, Result};
use crate::graph::command::FenceRole;
use crate::options::{
    ARGUMENT_BUFFER_BLOCK_SIZE, FrameGraphOptions, MANAGED_BLOCK_SIZE, SHARED_BLOCK_SIZE,
    WRITE_COMBINED_BLOCK_SIZE,
};
use crate::resource::handle::{ResourceDescriptor, ResourceFlags, ResourceHandle, ResourceTable};
use crate::resource::reference::{
    AllocatorToken, BufferReference, HeapAllocatorKind, TextureReference,
};

/// Argument-buffer state shared with the recording thread.
struct ArgumentBufferState<B: Backend> {
    map: FxHashMap<ResourceHandle, BufferReference<B>>,
    arena: TemporaryBufferArena<B>,
    /// Evicted wholesale at the frame cycle.
    transient: Vec<ResourceHandle>,
}

/// Snapshot of heap occupancy across the registry's private allocators,
/// one [`HeapUsage`] per heap.
#[derive(Debug, Default)]
pub struct HeapUsageReport {
    pub small_private: Vec<HeapUsage>,
    pub private: Vec<HeapUsage>,
    pub color_render_target: Vec<HeapUsage>,
    pub depth_render_target: Vec<HeapUsage>,
}

impl HeapUsageReport {
    fn all(&self) -> impl Iterator<Item = &HeapUsage> {
        self.small_private
            .iter()
            .chain(&self.private)
            .chain(&self.color_render_target)
            .chain(&self.depth_render_target)
    }

    /// Number of heaps across all allocators.
    #[must_use]
    pub fn heap_count(&self) -> usize {
        self.all().count()
    }

    /// Total bytes allocated out of every heap.
    #[must_use]
    pub fn total_used(&self) -> u64 {
        self.all().map(|h| h.used).sum()
    }

    /// Total unallocated bytes across every heap.
    #[must_use]
    pub fn total_free(&self) -> u64 {
        self.all().map(|h| h.free).sum()
    }
}

/// The per-frame resource state machine (component C5).
pub struct ResourceRegistry<B: Backend> {
    device: B::Device,
    options: FrameGraphOptions,

    // Frame-thread-only maps.
    buffers: FxHashMap<ResourceHandle, BufferReference<B>>,
    textures: FxHashMap<ResourceHandle, TextureReference<B>>,
    /// Window textures acquired this frame, in acquisition order.
    acquired_windows: Vec<ResourceHandle>,
    argument_buffers: Mutex<ArgumentBufferState<B>>,

    // Allocators.
    staging_pool: ResourcePool<B>,
    history_pool: ResourcePool<B>,
    memoryless_pool: ResourcePool<B>,
    small_private: MultiFrameHeapAllocator<B>,
    private_heaps: HeapAllocator<B>,
    color_rt_heaps: HeapAllocator<B>,
    depth_rt_heaps: HeapAllocator<B>,
    shared_arena: TemporaryBufferArena<B>,
    managed_arena: TemporaryBufferArena<B>,
    write_combined_arena: TemporaryBufferArena<B>,

    /// Handles touched only by the CPU this frame; dropped without fences.
    cpu_touched: Vec<ResourceHandle>,
    /// Textures the frame driver derived as memoryless-eligible from this
    /// frame's render-target plan; routed to the memoryless pool.
    memoryless_candidates: FxHashSet<ResourceHandle>,

    frame_index: u64,
}

impl<B: Backend> ResourceRegistry<B> {
    pub fn new(device: B::Device, options: &FrameGraphOptions) -> Self {
        let frames = options.num_inflight_frames;
        let eviction = options.pool_eviction_age;
        Self {
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            acquired_windows: Vec::new(),
            argument_buffers: Mutex::new(ArgumentBufferState {
                map: FxHashMap::default(),
                arena: TemporaryBufferArena::new(
                    device.clone(),
                    frames,
                    StorageMode::Shared,
                    CpuCacheMode::DefaultCache,
                    BufferUsage::ARGUMENT_BUFFER,
                    ARGUMENT_BUFFER_BLOCK_SIZE,
                    "argument arena",
                ),
                transient: Vec::new(),
            }),

            staging_pool: ResourcePool::new(device.clone(), frames, eviction, "staging pool"),
            history_pool: ResourcePool::new(device.clone(), 1, eviction, "history pool"),
            memoryless_pool: ResourcePool::new(device.clone(), frames, eviction, "memoryless pool"),
            small_private: MultiFrameHeapAllocator::new(
                device.clone(),
                frames,
                StorageMode::Private,
                CpuCacheMode::DefaultCache,
                options.heap_size,
                "small private heap",
            ),
            private_heaps: HeapAllocator::new(
                device.clone(),
                StorageMode::Private,
                CpuCacheMode::DefaultCache,
                options.heap_size,
                "private heap",
            ),
            color_rt_heaps: HeapAllocator::new(
                device.clone(),
                StorageMode::Private,
                CpuCacheMode::DefaultCache,
                options.heap_size,
                "color render-target heap",
            ),
            depth_rt_heaps: HeapAllocator::new(
                device.clone(),
                StorageMode::Private,
                CpuCacheMode::DefaultCache,
                options.heap_size,
                "depth render-target heap",
            ),
            shared_arena: TemporaryBufferArena::new(
                device.clone(),
                frames,
                StorageMode::Shared,
                CpuCacheMode::DefaultCache,
                BufferUsage::SHADER_READ | BufferUsage::CONSTANT_BUFFER,
                SHARED_BLOCK_SIZE,
                "shared arena",
            ),
            managed_arena: TemporaryBufferArena::new(
                device.clone(),
                frames,
                StorageMode::Managed,
                CpuCacheMode::DefaultCache,
                BufferUsage::SHADER_READ | BufferUsage::CONSTANT_BUFFER,
                MANAGED_BLOCK_SIZE,
                "managed arena",
            ),
            write_combined_arena: TemporaryBufferArena::new(
                device.clone(),
                frames,
                StorageMode::Shared,
                CpuCacheMode::WriteCombined,
                BufferUsage::SHADER_READ | BufferUsage::CONSTANT_BUFFER,
                WRITE_COMBINED_BLOCK_SIZE,
                "write-combined arena",
            ),

            cpu_touched: Vec::new(),
            memoryless_candidates: FxHashSet::default(),
            frame_index: 0,
            device,
            options: options.clone(),
        }
    }

    /// Installs the frame's memoryless-eligible textures: private render
    /// targets the driver found confined to a single encoder with no stored
    /// contents. Cleared at the frame cycle.
    pub fn set_memoryless_candidates(&mut self, candidates: &[ResourceHandle]) {
        self.memoryless_candidates.clear();
        self.memoryless_candidates.extend(candidates.iter().copied());
    }

    // ── Queries ────────────────────────────────────────────────────────────

    /// Whether the handle currently has a backing.
    #[must_use]
    pub fn has_backing(&self, handle: ResourceHandle) -> bool {
        self.buffers.contains_key(&handle)
            || self.textures.contains_key(&handle)
            || self.argument_buffers.lock().map.contains_key(&handle)
    }

    /// The materialised buffer reference, if any.
    #[must_use]
    pub fn buffer(&self, handle: ResourceHandle) -> Option<&BufferReference<B>> {
        self.buffers.get(&handle)
    }

    /// The materialised texture reference, if any.
    #[must_use]
    pub fn texture(&self, handle: ResourceHandle) -> Option<&TextureReference<B>> {
        self.textures.get(&handle)
    }

    /// Clones the native object + offset of an argument buffer (takes the
    /// cross-thread lock).
    #[must_use]
    pub fn argument_buffer_native(&self, handle: ResourceHandle) -> Option<(B::Buffer, u64)> {
        self.argument_buffers
            .lock()
            .map
            .get(&handle)
            .map(|r| (r.buffer.clone(), r.offset))
    }

    /// Fences attached by the previous frame that this frame's first reader
    /// or writer must wait on.
    #[must_use]
    pub fn multiframe_wait_fences(
        &self,
        handle: ResourceHandle,
        role: FenceRole,
    ) -> SmallVec<[FenceHandle; 2]> {
        let attachments = if let Some(r) = self.buffers.get(&handle) {
            &r.usage_fences
        } else if let Some(r) = self.textures.get(&handle) {
            &r.usage_fences
        } else {
            return SmallVec::new();
        };
        match role {
            FenceRole::Read => attachments.read_wait.clone(),
            // A writer must order itself against both the last write and all
            // outstanding reads.
            FenceRole::Write => {
                let mut all = attachments.read_wait.clone();
                all.extend_from_slice(&attachments.write_wait);
                all
            }
        }
    }

    /// Whether the compiler must emit `update-fence` / `set-disposal-fences`
    /// pairs for this resource at frame completion.
    #[must_use]
    pub fn needs_wait_fences_on_frame_completion(
        &self,
        table: &ResourceTable,
        handle: ResourceHandle,
    ) -> bool {
        let info = table.info(handle);
        if info.flags.contains(ResourceFlags::WINDOW_HANDLE) {
            return false;
        }
        if info.flags.contains(ResourceFlags::PERSISTENT) {
            return true;
        }
        if info.flags.contains(ResourceFlags::HISTORY_BUFFER) {
            // First use: the next frame reads it, so fences are required.
            // The second (final) frame deposits into the history pool, whose
            // ring grace covers in-flight work instead.
            return !info.is_initialised();
        }
        if self.memoryless_candidates.contains(&handle) {
            // Tile-memory contents never reach main memory.
            return false;
        }
        match info.descriptor.storage_mode() {
            // Large private transients share heap memory across frames; the
            // multi-frame small heaps and the staging/memoryless pools rely
            // on ring rotation instead.
            Some(StorageMode::Private) => {
                info.descriptor.approximate_size() > self.options.small_allocation_threshold
            }
            _ => false,
        }
    }

    // ── Materialisation ────────────────────────────────────────────────────

    /// Materialises a buffer handle, choosing the allocator by flags,
    /// storage mode and size.
    pub fn materialise_buffer(
        &mut self,
        table: &ResourceTable,
        handle: ResourceHandle,
        fences: &mut FencePool<B>,
    ) {
        if let Some(reference) = self.buffers.get_mut(&handle) {
            reference.used_this_frame = true;
            return;
        }
        let info = table.info(handle);
        let ResourceDescriptor::Buffer(descriptor) = info.descriptor else {
            panic!("materialise_buffer on a non-buffer handle");
        };

        let reference = if info.flags.contains(ResourceFlags::PERSISTENT) {
            let buffer = self.device.make_buffer(&descriptor, info.label);
            BufferReference::new(buffer, 0, AllocatorToken::Persistent)
        } else if descriptor.storage_mode == StorageMode::Private {
            let (allocation, kind) =
                if descriptor.length <= self.options.small_allocation_threshold {
                    (
                        self.small_private.collect_buffer(&descriptor, fences),
                        HeapAllocatorKind::SmallPrivate,
                    )
                } else {
                    (
                        self.private_heaps.collect_buffer(&descriptor, fences),
                        HeapAllocatorKind::Private,
                    )
                };
            Self::buffer_reference_from_heap(allocation, kind)
        } else {
            let buffer = self.staging_pool.collect_buffer(&descriptor);
            BufferReference::new(buffer, 0, AllocatorToken::StagingPool)
        };
        self.buffers.insert(handle, reference);
    }

    /// Materialises a texture handle. Window-handle textures acquire their
    /// drawable here and may fail.
    pub fn materialise_texture(
        &mut self,
        table: &ResourceTable,
        handle: ResourceHandle,
        fences: &mut FencePool<B>,
        drawables: Option<&mut dyn DrawableSource<B>>,
    ) -> Result<()> {
        if let Some(reference) = self.textures.get_mut(&handle) {
            reference.used_this_frame = true;
            return Ok(());
        }
        let info = table.info(handle);
        let ResourceDescriptor::Texture(descriptor) = info.descriptor else {
            panic!("materialise_texture on a non-texture handle");
        };

        let reference = if info.flags.contains(ResourceFlags::WINDOW_HANDLE) {
            let source = drawables.ok_or_else(|| {
                ForgeError::DrawableAcquisitionFailed(
                    "no drawable source attached to the submission".into(),
                )
            })?;
            let (texture, drawable) = source.next_drawable()?;
            let mut reference = TextureReference::new(texture, AllocatorToken::WindowHandle);
            reference.drawable = Some(drawable);
            self.acquired_windows.push(handle);
            reference
        } else if info.flags.contains(ResourceFlags::PERSISTENT) {
            let texture = self.device.make_texture(&descriptor, info.label);
            TextureReference::new(texture, AllocatorToken::Persistent)
        } else if info.flags.contains(ResourceFlags::HISTORY_BUFFER) {
            let texture = self.history_pool.collect_texture(&descriptor);
            TextureReference::new(texture, AllocatorToken::HistoryPool)
        } else if descriptor.storage_mode == StorageMode::Memoryless
            || self.memoryless_candidates.contains(&handle)
        {
            assert!(
                self.options.supports_memoryless,
                "memoryless texture on a platform without memoryless support"
            );
            let descriptor = Self::memoryless_variant(&descriptor);
            let texture = self.memoryless_pool.collect_texture(&descriptor);
            TextureReference::new(texture, AllocatorToken::MemorylessPool)
        } else if descriptor.storage_mode == StorageMode::Private {
            let (allocation, kind) = if descriptor.approximate_size()
                <= self.options.small_allocation_threshold
            {
                (
                    self.small_private.collect_texture(&descriptor, fences),
                    HeapAllocatorKind::SmallPrivate,
                )
            } else if descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
                if descriptor.pixel_format.is_depth_stencil() {
                    (
                        self.depth_rt_heaps.collect_texture(&descriptor, fences),
                        HeapAllocatorKind::DepthRenderTarget,
                    )
                } else {
                    (
                        self.color_rt_heaps.collect_texture(&descriptor, fences),
                        HeapAllocatorKind::ColorRenderTarget,
                    )
                }
            } else {
                (
                    self.private_heaps.collect_texture(&descriptor, fences),
                    HeapAllocatorKind::Private,
                )
            };
            Self::texture_reference_from_heap(allocation, kind)
        } else {
            let texture = self.staging_pool.collect_texture(&descriptor);
            TextureReference::new(texture, AllocatorToken::StagingPool)
        };
        self.textures.insert(handle, reference);
        Ok(())
    }

    /// Materialises a texture view. The parent must already be materialised.
    pub fn materialise_texture_view(
        &mut self,
        table: &ResourceTable,
        handle: ResourceHandle,
    ) -> Result<()> {
        if self.textures.contains_key(&handle) {
            return Ok(());
        }
        let info = table.info(handle);
        let ResourceDescriptor::TextureView { parent, descriptor } = info.descriptor else {
            panic!("materialise_texture_view on a non-view handle");
        };

        let parent_texture = self
            .textures
            .get(&parent)
            .ok_or(ForgeError::BackingMissing("texture view parent"))?
            .texture
            .clone();
        let view = self
            .device
            .make_texture_view(&parent_texture, &descriptor)
            .ok_or_else(|| {
                ForgeError::TextureViewCreationFailed(format!(
                    "view {:?} as {:?}",
                    info.label, descriptor.pixel_format
                ))
            })?;
        self.textures
            .insert(handle, TextureReference::new(view, AllocatorToken::View));
        Ok(())
    }

    /// Materialises an argument buffer through the reflection layer's
    /// encoder, caching the slice until the frame cycles.
    ///
    /// Safe to call from the recording thread; takes the mutex in its
    /// entirety.
    pub fn materialise_argument_buffer(
        &self,
        handle: ResourceHandle,
        encoder: &dyn ArgumentEncoder<B>,
    ) {
        let mut state = self.argument_buffers.lock();
        if state.map.contains_key(&handle) {
            return;
        }
        let length = encoder.encoded_length();
        let alignment = encoder.alignment().max(1);
        let (buffer, offset) = state.arena.allocate_aligned(length, alignment);
        encoder.encode(&buffer, offset);

        state.map.insert(
            handle,
            BufferReference::new(buffer, offset, AllocatorToken::Arena),
        );
        state.transient.push(handle);
    }

    /// Bump-allocates per-frame CPU-visible bytes outside the handle system
    /// (uniforms, upload staging). Implicitly freed when the ring wraps.
    pub fn temporary_buffer(
        &mut self,
        bytes: u64,
        storage_mode: StorageMode,
        cache_mode: CpuCacheMode,
    ) -> (B::Buffer, u64) {
        match (storage_mode, cache_mode) {
            (StorageMode::Managed, _) => self.managed_arena.allocate(bytes),
            (_, CpuCacheMode::WriteCombined) => self.write_combined_arena.allocate(bytes),
            _ => self.shared_arena.allocate(bytes),
        }
    }

    /// Records that a resource was touched only by the CPU this frame; it
    /// is dropped without fences at the frame cycle.
    pub fn note_cpu_touched(&mut self, handle: ResourceHandle) {
        self.cpu_touched.push(handle);
    }

    // ── Fence Wiring ───────────────────────────────────────────────────────

    /// Stages next frame's usage fences. Ownership of the fence retains
    /// moves to the reference.
    pub fn set_disposal_fences(
        &mut self,
        handle: ResourceHandle,
        read_fence: Option<FenceHandle>,
        write_fences: &[FenceHandle],
        fences: &mut FencePool<B>,
    ) {
        let attachments = if let Some(r) = self.buffers.get_mut(&handle) {
            &mut r.disposal_fences
        } else if let Some(r) = self.textures.get_mut(&handle) {
            &mut r.disposal_fences
        } else {
            panic!("set_disposal_fences on an unmaterialised resource");
        };
        attachments.reset(fences);
        attachments.read_wait.extend(read_fence);
        attachments.write_wait.extend_from_slice(write_fences);
    }

    /// Releases the previous frame's usage fences once their waits have been
    /// issued.
    pub fn release_multiframe_fences(&mut self, handle: ResourceHandle, fences: &mut FencePool<B>) {
        if let Some(r) = self.buffers.get_mut(&handle) {
            r.usage_fences.release_all(fences);
        } else if let Some(r) = self.textures.get_mut(&handle) {
            r.usage_fences.release_all(fences);
        }
    }

    // ── Disposal ───────────────────────────────────────────────────────────

    /// Disposes a resource at the end of its last use this frame, returning
    /// transient backings to their allocator.
    ///
    /// # Panics
    ///
    /// Panics when the handle has no backing (disposing an unknown handle is
    /// an invariant violation) or when a backing is routed to an allocator
    /// that did not produce it.
    pub fn dispose(
        &mut self,
        table: &mut ResourceTable,
        handle: ResourceHandle,
        fences: &mut FencePool<B>,
    ) {
        if let Some(token) = self.buffers.get(&handle).map(|r| r.allocator) {
            self.dispose_buffer(table, handle, token, fences);
        } else if let Some(token) = self.textures.get(&handle).map(|r| r.allocator) {
            self.dispose_texture(table, handle, token, fences);
        } else {
            panic!("dispose of an unknown resource handle");
        }
    }

    fn dispose_buffer(
        &mut self,
        table: &ResourceTable,
        handle: ResourceHandle,
        token: AllocatorToken,
        fences: &mut FencePool<B>,
    ) {
        match token {
            // Per-frame disposal of a persistent resource only wires fences;
            // the backing stays.
            AllocatorToken::Persistent => {}
            AllocatorToken::Arena => {
                // Arena bytes are reclaimed wholesale on cycle.
                let mut reference = self.buffers.remove(&handle).unwrap();
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            AllocatorToken::StagingPool => {
                let mut reference = self.buffers.remove(&handle).unwrap();
                let ResourceDescriptor::Buffer(descriptor) = table.info(handle).descriptor else {
                    unreachable!()
                };
                self.staging_pool.deposit(PooledResource::Buffer {
                    buffer: reference.buffer.clone(),
                    descriptor,
                });
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            AllocatorToken::Heap { kind, heap, slot } => {
                let mut reference = self.buffers.remove(&handle).unwrap();
                let write_fences = Self::aliasing_deposit_fences(
                    &reference.disposal_fences.read_wait,
                    &reference.disposal_fences.write_wait,
                );
                self.deposit_to_heap(kind, heap, slot, &write_fences, fences);
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            AllocatorToken::HistoryPool
            | AllocatorToken::MemorylessPool
            | AllocatorToken::WindowHandle
            | AllocatorToken::View => {
                panic!("buffer backed by a texture-only allocator (wrong deposit route)");
            }
        }
    }

    fn dispose_texture(
        &mut self,
        table: &mut ResourceTable,
        handle: ResourceHandle,
        token: AllocatorToken,
        fences: &mut FencePool<B>,
    ) {
        match token {
            AllocatorToken::Persistent => {}
            // Backing belongs to the presentation layer; the reference lives
            // on until present + cycle.
            AllocatorToken::WindowHandle => {}
            AllocatorToken::View => {
                let mut reference = self.textures.remove(&handle).unwrap();
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            AllocatorToken::HistoryPool => {
                if table.info(handle).is_initialised() {
                    // Second frame: the history window is over. The handle
                    // starts its next generation uninitialised.
                    let mut reference = self.textures.remove(&handle).unwrap();
                    let ResourceDescriptor::Texture(descriptor) = table.info(handle).descriptor
                    else {
                        unreachable!()
                    };
                    self.history_pool.deposit(PooledResource::Texture {
                        texture: reference.texture.clone(),
                        descriptor,
                    });
                    reference.usage_fences.release_all(fences);
                    reference.disposal_fences.release_all(fences);
                    table.clear_initialised(handle);
                } else {
                    // First frame: keep the backing alive across the
                    // boundary so next frame can read it.
                    table.mark_initialised(handle);
                }
            }
            AllocatorToken::StagingPool | AllocatorToken::MemorylessPool => {
                let mut reference = self.textures.remove(&handle).unwrap();
                let ResourceDescriptor::Texture(descriptor) = table.info(handle).descriptor else {
                    unreachable!()
                };
                if token == AllocatorToken::StagingPool {
                    self.staging_pool.deposit(PooledResource::Texture {
                        texture: reference.texture.clone(),
                        descriptor,
                    });
                } else {
                    // Deposit under the same pool key the backing was
                    // collected with.
                    self.memoryless_pool.deposit(PooledResource::Texture {
                        texture: reference.texture.clone(),
                        descriptor: Self::memoryless_variant(&descriptor),
                    });
                }
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            AllocatorToken::Heap { kind, heap, slot } => {
                let mut reference = self.textures.remove(&handle).unwrap();
                let write_fences = Self::aliasing_deposit_fences(
                    &reference.disposal_fences.read_wait,
                    &reference.disposal_fences.write_wait,
                );
                self.deposit_to_heap(kind, heap, slot, &write_fences, fences);
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            AllocatorToken::Arena => panic!("texture backed by the buffer arena"),
        }
    }

    /// Client-driven disposal of a persistent resource.
    pub fn dispose_persistent(&mut self, handle: ResourceHandle, fences: &mut FencePool<B>) {
        if let Some(mut reference) = self.buffers.remove(&handle) {
            assert!(
                reference.allocator == AllocatorToken::Persistent,
                "dispose_persistent on a transient buffer"
            );
            reference.usage_fences.release_all(fences);
            reference.disposal_fences.release_all(fences);
        } else if let Some(mut reference) = self.textures.remove(&handle) {
            assert!(
                reference.allocator == AllocatorToken::Persistent,
                "dispose_persistent on a transient texture"
            );
            reference.usage_fences.release_all(fences);
            reference.disposal_fences.release_all(fences);
        }
    }

    // ── Presentation ───────────────────────────────────────────────────────

    /// Takes every drawable acquired this frame, in acquisition order.
    pub fn take_drawables(&mut self) -> Vec<B::Drawable> {
        let mut drawables = Vec::new();
        for handle in &self.acquired_windows {
            if let Some(reference) = self.textures.get_mut(handle) {
                if let Some(drawable) = reference.drawable.take() {
                    drawables.push(drawable);
                }
            }
        }
        drawables
    }

    // ── Frame Boundary ─────────────────────────────────────────────────────

    /// Ends the frame: transient entries are dropped, persistent/history
    /// entries promote their disposal fences to usage fences, and every
    /// allocator advances its ring.
    pub fn cycle_frames(&mut self, fences: &mut FencePool<B>) {
        // Argument buffers never survive their frame.
        {
            let mut state = self.argument_buffers.lock();
            let handles: Vec<_> = state.transient.drain(..).collect();
            for handle in handles {
                if let Some(mut reference) = state.map.remove(&handle) {
                    reference.usage_fences.release_all(fences);
                    reference.disposal_fences.release_all(fences);
                }
            }
            state.arena.cycle_frames();
        }

        // CPU-touched resources are dropped without fences.
        for handle in self.cpu_touched.drain(..) {
            if let Some(mut reference) = self.buffers.remove(&handle) {
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            } else if let Some(mut reference) = self.textures.remove(&handle) {
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
        }
        self.acquired_windows.clear();

        // Every transient entry is dropped; persistent and history entries
        // survive with their staged fences promoted.
        self.textures.retain(|_, reference| {
            let keep = matches!(
                reference.allocator,
                AllocatorToken::Persistent | AllocatorToken::HistoryPool
            );
            if keep {
                let (usage, disposal) =
                    (&mut reference.usage_fences, &mut reference.disposal_fences);
                usage.replace_with(disposal, fences);
                reference.used_this_frame = false;
            } else {
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            keep
        });
        self.buffers.retain(|_, reference| {
            let keep = reference.allocator == AllocatorToken::Persistent;
            if keep {
                let (usage, disposal) =
                    (&mut reference.usage_fences, &mut reference.disposal_fences);
                usage.replace_with(disposal, fences);
                reference.used_this_frame = false;
            } else {
                reference.usage_fences.release_all(fences);
                reference.disposal_fences.release_all(fences);
            }
            keep
        });

        let purge = self.options.frame_purgeability;
        self.staging_pool.cycle_frames();
        self.history_pool.cycle_frames();
        self.memoryless_pool.cycle_frames();
        self.small_private.cycle_frames(purge);
        self.private_heaps.cycle_frames(purge);
        self.color_rt_heaps.cycle_frames(purge);
        self.depth_rt_heaps.cycle_frames(purge);
        self.shared_arena.cycle_frames();
        self.managed_arena.cycle_frames();
        self.write_combined_arena.cycle_frames();

        self.memoryless_candidates.clear();
        self.frame_index += 1;
    }

    /// Frames completed since creation.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Index of the small-heap ring slot serving this frame (diagnostics).
    #[must_use]
    pub fn small_heap_ring_index(&self) -> usize {
        self.small_private.current_index()
    }

    /// Per-heap occupancy across the private allocators.
    #[must_use]
    pub fn heap_usage(&self) -> HeapUsageReport {
        HeapUsageReport {
            small_private: self.small_private.heap_usage(),
            private: self.private_heaps.heap_usage(),
            color_render_target: self.color_rt_heaps.heap_usage(),
            depth_render_target: self.depth_rt_heaps.heap_usage(),
        }
    }

    /// Entries currently held by the memoryless pool (diagnostics).
    #[must_use]
    pub fn memoryless_pool_size(&self) -> usize {
        self.memoryless_pool.len()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    /// The pool key for a memoryless backing: same shape, tile-memory
    /// storage.
    fn memoryless_variant(descriptor: &TextureDescriptor) -> TextureDescriptor {
        let mut descriptor = *descriptor;
        descriptor.storage_mode = StorageMode::Memoryless;
        descriptor
    }

    fn buffer_reference_from_heap(
        allocation: HeapAllocation<B>,
        kind: HeapAllocatorKind,
    ) -> BufferReference<B> {
        let PooledResource::Buffer { buffer, .. } = allocation.resource else {
            panic!("heap returned a texture for a buffer request");
        };
        let mut reference = BufferReference::new(
            buffer,
            0,
            AllocatorToken::Heap {
                kind,
                heap: allocation.heap,
                slot: allocation.slot,
            },
        );
        // The aliasing fences replace the fresh (empty) write-wait set; the
        // heap already took a retain on each for us.
        reference.usage_fences.write_wait = allocation.write_wait_fences;
        reference
    }

    fn texture_reference_from_heap(
        allocation: HeapAllocation<B>,
        kind: HeapAllocatorKind,
    ) -> TextureReference<B> {
        let PooledResource::Texture { texture, .. } = allocation.resource else {
            panic!("heap returned a buffer for a texture request");
        };
        let mut reference = TextureReference::new(
            texture,
            AllocatorToken::Heap {
                kind,
                heap: allocation.heap,
                slot: allocation.slot,
            },
        );
        reference.usage_fences.write_wait = allocation.write_wait_fences;
        reference
    }

    /// The next user of aliased bytes must order itself against both the
    /// last write (read-side fence) and all outstanding reads (write-side
    /// fences).
    fn aliasing_deposit_fences(
        read_wait: &[FenceHandle],
        write_wait: &[FenceHandle],
    ) -> SmallVec<[FenceHandle; 4]> {
        let mut all: SmallVec<[FenceHandle; 4]> = SmallVec::new();
        all.extend_from_slice(write_wait);
        all.extend_from_slice(read_wait);
        all
    }

    fn deposit_to_heap(
        &mut self,
        kind: HeapAllocatorKind,
        heap: u32,
        slot: u32,
        write_fences: &[FenceHandle],
        fences: &mut FencePool<B>,
    ) {
        match kind {
            HeapAllocatorKind::SmallPrivate => {
                self.small_private.deposit(heap, slot, write_fences, fences);
            }
            HeapAllocatorKind::Private => {
                self.private_heaps.deposit(heap, slot, write_fences, fences);
            }
            HeapAllocatorKind::ColorRenderTarget => {
                self.color_rt_heaps.deposit(heap, slot, write_fences, fences);
            }
            HeapAllocatorKind::DepthRenderTarget => {
                self.depth_rt_heaps.deposit(heap, slot, write_fences, fences);
            }
        }
    }
}
