//! Encoder Abstraction
//!
//! The frame driver talks to the GPU through these traits only. A concrete
//! backend (Metal, Vulkan, a test recorder) supplies one encoder type per
//! pass kind; the driver opens and closes them according to the merged
//! render-target plan and interleaves compiled resource commands with the
//! pass's own commands.
//!
//! # Deduplication Contract
//!
//! Concrete encoders must deduplicate synchronisation: the same
//! `(fence, stages)` wait is issued at most once per encoder, and an encoder
//! never waits on a fence it has itself updated. The compiler relies on this
//! when it routes several resources through one encoder-pair fence.
//!
//! A backend may fan render encoding out across threads (one sub-encoder
//! per thread, each with its own dedup sets, joined at `end_encoding`);
//! that weakens no ordering guarantee, because the compiled fence pairs
//! already establish the only order that matters.

use smallvec::SmallVec;

use crate::backend::{Backend, LoadAction, StoreAction};
use crate::graph::command::FrameCommand;
use crate::resource::usage::{RenderStages, UsageMask};

/// Maximum number of colour attachments in one render pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// A borrowed native resource handed to residency / barrier calls.
pub enum NativeResource<'a, B: Backend> {
    Buffer(&'a B::Buffer),
    Texture(&'a B::Texture),
}

/// What a memory barrier covers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BarrierScope {
    Buffers,
    Textures,
    RenderTargets,
}

// ─── Resolved Render-Pass Descriptors ─────────────────────────────────────────

/// A colour attachment with its backing resolved to a native texture and its
/// load/store actions already derived.
#[derive(Clone, Debug)]
pub struct ResolvedColorAttachment<B: Backend> {
    pub texture: B::Texture,
    pub slice: u32,
    pub level: u32,
    pub depth_plane: u32,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: [f64; 4],
}

/// A resolved depth attachment.
#[derive(Clone, Debug)]
pub struct ResolvedDepthAttachment<B: Backend> {
    pub texture: B::Texture,
    pub slice: u32,
    pub level: u32,
    pub depth_plane: u32,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_depth: f32,
}

/// A resolved stencil attachment.
#[derive(Clone, Debug)]
pub struct ResolvedStencilAttachment<B: Backend> {
    pub texture: B::Texture,
    pub slice: u32,
    pub level: u32,
    pub depth_plane: u32,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_stencil: u32,
}

/// Everything a backend needs to begin a render command encoder.
pub struct RenderPassDescriptor<B: Backend> {
    pub label: Option<&'static str>,
    pub color_attachments: SmallVec<[Option<ResolvedColorAttachment<B>>; MAX_COLOR_ATTACHMENTS]>,
    pub depth_attachment: Option<ResolvedDepthAttachment<B>>,
    pub stencil_attachment: Option<ResolvedStencilAttachment<B>>,
    pub visibility_result_buffer: Option<B::Buffer>,
    pub render_target_array_length: u32,
}

// ─── Encoder Trait ────────────────────────────────────────────────────────────

/// Operations common to every encoder kind.
pub trait Encoder<B: Backend> {
    fn set_label(&mut self, label: &str);
    fn push_debug_group(&mut self, label: &str);
    fn pop_debug_group(&mut self);

    /// Signals `fence` once all work up to `after_stages` has completed.
    fn update_fence(&mut self, fence: &B::Fence, after_stages: RenderStages);

    /// Stalls `before_stages` until `fence` has been signalled.
    fn wait_for_fence(&mut self, fence: &B::Fence, before_stages: RenderStages);

    /// Declares a resource resident for indirect (argument-buffer) access.
    fn use_resource(
        &mut self,
        resource: NativeResource<'_, B>,
        usage: UsageMask,
        stages: RenderStages,
    );

    /// Intra-encoder execution barrier between `after_stages` and
    /// `before_stages`.
    fn memory_barrier(
        &mut self,
        scope: BarrierScope,
        after_stages: RenderStages,
        before_stages: RenderStages,
    );

    /// Coarse render-target flush for platforms without stage-scoped
    /// barriers.
    fn texture_barrier(&mut self);

    /// Applies one recorded pass command (draw, dispatch, copy, marker).
    fn execute(&mut self, command: &FrameCommand);

    /// Finishes encoding. Called exactly once, before the encoder is
    /// dropped.
    fn end_encoding(&mut self);
}

// ─── Command Buffer ───────────────────────────────────────────────────────────

/// One frame's submission unit: opens encoders, presents, commits.
///
/// At most one encoder is open at a time; the driver guarantees
/// `end_encoding` is called before the next encoder is requested.
pub trait CommandBuffer<B: Backend> {
    type RenderEncoder: Encoder<B>;
    type ComputeEncoder: Encoder<B>;
    type BlitEncoder: Encoder<B>;
    /// Wraps externally pre-encoded work; only the synchronisation surface
    /// of [`Encoder`] is meaningful on it.
    type ExternalEncoder: Encoder<B>;

    fn render_command_encoder(&mut self, descriptor: &RenderPassDescriptor<B>)
    -> Self::RenderEncoder;
    fn compute_command_encoder(&mut self) -> Self::ComputeEncoder;
    fn blit_command_encoder(&mut self) -> Self::BlitEncoder;
    fn external_command_encoder(&mut self) -> Self::ExternalEncoder;

    /// Enqueues a drawable for presentation once the buffer completes.
    fn present(&mut self, drawable: B::Drawable);

    /// Submits the buffer. `on_complete` fires when the GPU finishes.
    fn commit(self, on_complete: Option<Box<dyn FnOnce() + Send>>);
}

// ─── Frame Collaborators ──────────────────────────────────────────────────────

/// Supplies window-handle backings from the presentation layer.
///
/// Acquisition happens mid-frame, the first time the window texture is
/// materialised; it may block on the compositor and it may fail, in which
/// case the owning draw pass is skipped.
pub trait DrawableSource<B: Backend> {
    fn next_drawable(&mut self) -> crate::errors::Result<(B::Texture, B::Drawable)>;
}

/// Writes an argument (descriptor) table into a buffer slice.
///
/// Owned by the pipeline-reflection layer; the registry only asks for the
/// encoded size and hands over the destination slice.
pub trait ArgumentEncoder<B: Backend> {
    /// Bytes the encoded table occupies.
    fn encoded_length(&self) -> u64;
    /// Required offset alignment within the destination buffer.
    fn alignment(&self) -> u64;
    /// Encodes the table at `offset` within `buffer`.
    fn encode(&self, buffer: &B::Buffer, offset: u64);
}
