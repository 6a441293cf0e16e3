//! Backing References
//!
//! A [`BufferReference`] / [`TextureReference`] exists **iff** its handle is
//! materialised. The reference bundles the native object, the suballocation
//! offset, and two fence attachments:
//!
//! - `usage_fences`: what *this* frame's readers/writers must wait on
//!   (populated from last frame's disposal fences, or from aliasing fences
//!   when the backing came out of a heap).
//! - `disposal_fences`: staged during this frame by `set-disposal-fences`;
//!   promoted to `usage_fences` at the frame cycle.
//!
//! Fences are held as retain-counted [`FenceHandle`]s, never as owning
//! pointers — this is what breaks the resource↔fence reference cycle.

use smallvec::SmallVec;

use crate::alloc::fence_pool::{FenceHandle, FencePool};
use crate::backend::Backend;

/// Which allocator a transient backing must be returned to.
///
/// Returning a backing to the wrong allocator corrupts the aliasing
/// bookkeeping, so the token carries enough routing detail to make the check
/// exact (and fatal on mismatch).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocatorToken {
    /// Persistent backing; disposal is client-driven.
    Persistent,
    /// Ring-buffered CPU-visible arena; deposit is a no-op.
    Arena,
    /// The multi-bucket staging pool.
    StagingPool,
    /// The single-bucket history-buffer pool.
    HistoryPool,
    /// The memoryless render-target pool.
    MemorylessPool,
    /// A heap aliasing allocator slot.
    Heap {
        /// Which of the registry's heap allocators.
        kind: HeapAllocatorKind,
        /// Heap index within the allocator.
        heap: u32,
        /// Live-entry slot within the heap.
        slot: u32,
    },
    /// Swap-chain drawable; never pooled.
    WindowHandle,
    /// Texture view; owns no memory of its own.
    View,
}

/// The registry's heap allocator instances.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HeapAllocatorKind {
    /// Multi-frame allocator for small private resources.
    SmallPrivate,
    /// Colour render targets.
    ColorRenderTarget,
    /// Depth/stencil render targets.
    DepthRenderTarget,
    /// Everything else private and large.
    Private,
}

/// Read/write fence sets attached to a reference.
///
/// `release-multiframe-fences` decrements retain counts *without* dropping
/// the handles (waits issued later in the same frame still need to resolve
/// them), so the attachment remembers that its counts are already gone.
#[derive(Clone, Debug, Default)]
pub struct FenceAttachments {
    /// Fences future *readers* must wait on (signalled after the last
    /// write).
    pub read_wait: SmallVec<[FenceHandle; 2]>,
    /// Fences future *writers* must wait on (signalled after outstanding
    /// reads).
    pub write_wait: SmallVec<[FenceHandle; 2]>,
    /// Retain counts already released; the handles are kept only for wait
    /// resolution and must not be released again.
    released: bool,
}

impl FenceAttachments {
    /// Whether both sets are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_wait.is_empty() && self.write_wait.is_empty()
    }

    /// Releases every held fence's retain count (once). The handles stay in
    /// place so pending waits can still resolve their natives.
    pub fn release_all<B: Backend>(&mut self, fences: &mut FencePool<B>) {
        if self.released {
            return;
        }
        self.released = true;
        for &fence in &self.read_wait {
            fences.release(fence);
        }
        for &fence in &self.write_wait {
            fences.release(fence);
        }
    }

    /// Releases (if still owed) and empties the sets, ready for new fences.
    pub fn reset<B: Backend>(&mut self, fences: &mut FencePool<B>) {
        self.release_all(fences);
        self.read_wait.clear();
        self.write_wait.clear();
        self.released = false;
    }

    /// Takes `other`'s fences, releasing whatever this attachment held.
    ///
    /// Used at the frame cycle to promote disposal fences to usage fences
    /// without touching retain counts (ownership moves with the handles).
    pub fn replace_with<B: Backend>(&mut self, other: &mut Self, fences: &mut FencePool<B>) {
        self.release_all(fences);
        self.read_wait = std::mem::take(&mut other.read_wait);
        self.write_wait = std::mem::take(&mut other.write_wait);
        self.released = other.released;
        other.released = false;
    }
}

/// Materialised state of a buffer handle.
#[derive(Debug)]
pub struct BufferReference<B: Backend> {
    pub buffer: B::Buffer,
    /// Non-zero only for arena suballocations.
    pub offset: u64,
    pub usage_fences: FenceAttachments,
    pub disposal_fences: FenceAttachments,
    pub used_this_frame: bool,
    pub allocator: AllocatorToken,
}

/// Materialised state of a texture handle.
#[derive(Debug)]
pub struct TextureReference<B: Backend> {
    pub texture: B::Texture,
    pub usage_fences: FenceAttachments,
    pub disposal_fences: FenceAttachments,
    pub used_this_frame: bool,
    pub allocator: AllocatorToken,
    /// Present only for window-handle textures between acquisition and
    /// presentation.
    pub drawable: Option<B::Drawable>,
}

impl<B: Backend> BufferReference<B> {
    /// A freshly materialised reference with no fence history.
    pub fn new(buffer: B::Buffer, offset: u64, allocator: AllocatorToken) -> Self {
        Self {
            buffer,
            offset,
            usage_fences: FenceAttachments::default(),
            disposal_fences: FenceAttachments::default(),
            used_this_frame: true,
            allocator,
        }
    }
}

impl<B: Backend> TextureReference<B> {
    /// A freshly materialised reference with no fence history.
    pub fn new(texture: B::Texture, allocator: AllocatorToken) -> Self {
        Self {
            texture,
            usage_fences: FenceAttachments::default(),
            disposal_fences: FenceAttachments::default(),
            used_this_frame: true,
            allocator,
            drawable: None,
        }
    }
}
