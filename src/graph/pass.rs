//! Pass Records and Render-Target Descriptors
//!
//! A [`PassRecord`] is the declarative description of one unit of GPU work:
//! its kind, its slice of the global command stream, and (for draw passes)
//! the render-target attachments it binds. The merger combines consecutive
//! draw passes whose attachments are compatible into a single encoder.

use std::ops::Range;

use smallvec::SmallVec;

use crate::backend::MAX_COLOR_ATTACHMENTS;
use crate::resource::handle::ResourceHandle;

/// The kind of work a pass records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PassKind {
    /// Rasterisation work inside a render command encoder.
    Draw,
    /// Compute dispatches.
    Compute,
    /// Copy/blit operations.
    Blit,
    /// Pre-encoded work submitted by external code.
    External,
    /// Host-side work; never touches an encoder.
    Cpu,
}

/// Location of one attachment: which texture, and where in it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AttachmentLocation {
    pub texture: ResourceHandle,
    pub slice: u32,
    pub level: u32,
    pub depth_plane: u32,
}

impl AttachmentLocation {
    /// A whole-texture attachment at mip 0.
    #[must_use]
    pub fn whole(texture: ResourceHandle) -> Self {
        Self {
            texture,
            slice: 0,
            level: 0,
            depth_plane: 0,
        }
    }
}

/// A colour attachment as declared by a draw pass.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct ColorAttachment {
    pub location: AttachmentLocation,
    /// Whether this pass wants the attachment cleared on load.
    pub wants_clear: bool,
    pub clear_color: [f64; 4],
}

impl ColorAttachment {
    /// An attachment that loads/keeps existing contents.
    #[must_use]
    pub fn keep(texture: ResourceHandle) -> Self {
        Self {
            location: AttachmentLocation::whole(texture),
            wants_clear: false,
            clear_color: [0.0; 4],
        }
    }

    /// An attachment cleared to `clear_color` at encoder start.
    #[must_use]
    pub fn clear(texture: ResourceHandle, clear_color: [f64; 4]) -> Self {
        Self {
            location: AttachmentLocation::whole(texture),
            wants_clear: true,
            clear_color,
        }
    }
}

/// A depth attachment as declared by a draw pass.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct DepthAttachment {
    pub location: AttachmentLocation,
    pub wants_clear: bool,
    pub clear_depth: f32,
}

/// A stencil attachment as declared by a draw pass.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StencilAttachment {
    pub location: AttachmentLocation,
    pub wants_clear: bool,
    pub clear_stencil: u32,
}

/// The render-target bindings of one draw pass.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct RenderTargetDescriptor {
    pub color_attachments: SmallVec<[Option<ColorAttachment>; MAX_COLOR_ATTACHMENTS]>,
    pub depth_attachment: Option<DepthAttachment>,
    pub stencil_attachment: Option<StencilAttachment>,
    /// Buffer receiving occlusion-query results, if any.
    pub visibility_result_buffer: Option<ResourceHandle>,
    /// Layer count for layered rendering; 0 for non-layered.
    pub render_target_array_length: u32,
}

impl RenderTargetDescriptor {
    /// A descriptor with a single colour attachment.
    #[must_use]
    pub fn single_color(attachment: ColorAttachment) -> Self {
        let mut color_attachments = SmallVec::new();
        color_attachments.push(Some(attachment));
        Self {
            color_attachments,
            ..Default::default()
        }
    }
}

/// One recorded pass.
#[derive(Clone, Debug)]
pub struct PassRecord {
    pub kind: PassKind,
    /// Debug label; also used as the encoder label for the first pass of an
    /// encoder.
    pub label: &'static str,
    /// Passes are assumed pre-culled; inactive passes contribute no usages,
    /// commands or encoders.
    pub is_active: bool,
    /// Stable position in the submitted pass list.
    pub pass_index: usize,
    /// Slice of the global command stream belonging to this pass.
    pub command_range: Range<usize>,
    /// Render-target bindings; `Some` exactly for draw passes.
    pub render_target_descriptor: Option<RenderTargetDescriptor>,
}

impl PassRecord {
    /// A non-draw pass.
    #[must_use]
    pub fn new(
        kind: PassKind,
        label: &'static str,
        pass_index: usize,
        command_range: Range<usize>,
    ) -> Self {
        debug_assert!(kind != PassKind::Draw, "draw passes need a render target");
        Self {
            kind,
            label,
            is_active: true,
            pass_index,
            command_range,
            render_target_descriptor: None,
        }
    }

    /// A draw pass with its render-target bindings.
    #[must_use]
    pub fn draw(
        label: &'static str,
        pass_index: usize,
        command_range: Range<usize>,
        render_target: RenderTargetDescriptor,
    ) -> Self {
        Self {
            kind: PassKind::Draw,
            label,
            is_active: true,
            pass_index,
            command_range,
            render_target_descriptor: Some(render_target),
        }
    }
}
