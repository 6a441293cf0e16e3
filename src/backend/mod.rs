//! GPU Backend Abstraction
//!
//! The frame graph core is API-agnostic: everything it needs from the GPU is
//! expressed through the [`Backend`] family of traits in this module.
//!
//! - [`Backend`]: type bundle (buffers, textures, heaps, fences, drawables)
//! - [`Device`]: object creation and heap placement queries
//! - [`CommandBuffer`] / [`Encoder`]: per-frame command emission
//! - [`DrawableSource`] / [`ArgumentEncoder`]: frame collaborators
//!
//! # Creation Contract
//!
//! Object creation is infallible from the core's point of view: a device
//! that cannot create a buffer has no meaningful recovery path inside frame
//! compilation, so backends panic (matching the behaviour of the major GPU
//! APIs' validation layers). The two *recoverable* acquisition points —
//! drawables and re-formatted texture views — return `Result`/`Option`.

pub mod descriptors;
pub mod encoder;

use std::fmt;

pub use descriptors::{
    BufferDescriptor, BufferUsage, CpuCacheMode, HeapDescriptor, LoadAction, PixelFormat,
    PurgeableState, SizeAlign, StorageMode, StoreAction, TextureDescriptor, TextureType,
    TextureUsage, TextureViewDescriptor,
};
pub use encoder::{
    ArgumentEncoder, BarrierScope, CommandBuffer, DrawableSource, Encoder, MAX_COLOR_ATTACHMENTS,
    NativeResource, RenderPassDescriptor, ResolvedColorAttachment, ResolvedDepthAttachment,
    ResolvedStencilAttachment,
};

/// Type bundle tying together one backend's native object types.
///
/// Native buffer/texture/fence types are cheap-clone handles (internally
/// reference counted, like every modern GPU API's object model); cloning one
/// never duplicates GPU memory.
pub trait Backend: Sized + 'static {
    type Device: Device<Self> + Clone;
    type Buffer: Clone + fmt::Debug + Send + Sync + 'static;
    type Texture: Clone + fmt::Debug + Send + Sync + 'static;
    type Heap: fmt::Debug + 'static;
    type Fence: Clone + fmt::Debug + 'static;
    type Drawable: fmt::Debug + 'static;
    type CommandBuffer: CommandBuffer<Self>;
}

/// Object creation and placement queries.
pub trait Device<B: Backend> {
    // ── Creation ───────────────────────────────────────────────────────────

    fn make_buffer(&self, descriptor: &BufferDescriptor, label: Option<&str>) -> B::Buffer;
    fn make_texture(&self, descriptor: &TextureDescriptor, label: Option<&str>) -> B::Texture;

    /// Creates a view over `texture`. Returns `None` when the backend
    /// rejects the format/mip combination (a transient failure; the owning
    /// pass is skipped).
    fn make_texture_view(
        &self,
        texture: &B::Texture,
        descriptor: &TextureViewDescriptor,
    ) -> Option<B::Texture>;

    fn make_heap(&self, descriptor: &HeapDescriptor) -> B::Heap;
    fn make_fence(&self) -> B::Fence;

    // ── Heap Placement ─────────────────────────────────────────────────────

    /// Size and alignment a buffer of this description occupies in a heap.
    fn buffer_size_and_align(&self, descriptor: &BufferDescriptor) -> SizeAlign;
    /// Size and alignment a texture of this description occupies in a heap.
    fn texture_size_and_align(&self, descriptor: &TextureDescriptor) -> SizeAlign;

    /// Suballocates a buffer from `heap`; `None` when the heap lacks a free
    /// interval large enough.
    fn heap_make_buffer(
        &self,
        heap: &B::Heap,
        descriptor: &BufferDescriptor,
        label: Option<&str>,
    ) -> Option<B::Buffer>;

    /// Suballocates a texture from `heap`; `None` on exhaustion.
    fn heap_make_texture(
        &self,
        heap: &B::Heap,
        descriptor: &TextureDescriptor,
        label: Option<&str>,
    ) -> Option<B::Texture>;

    /// Bytes currently allocated out of `heap`.
    fn heap_used_size(&self, heap: &B::Heap) -> u64;

    /// Tells the API the resource's memory may be reused by a later
    /// allocation from the same heap.
    fn make_aliasable_buffer(&self, buffer: &B::Buffer);
    /// Texture variant of [`Device::make_aliasable_buffer`].
    fn make_aliasable_texture(&self, texture: &B::Texture);

    /// Applies a purgeability transition to a heap.
    fn set_heap_purgeable_state(&self, heap: &B::Heap, state: PurgeableState);

    // ── Submission ─────────────────────────────────────────────────────────

    fn new_command_buffer(&self) -> B::CommandBuffer;
}
