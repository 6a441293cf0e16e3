//! Command Streams
//!
//! Two command vocabularies meet in the frame driver:
//!
//! - [`FrameCommand`]: the pass-recorded GPU commands (draws, dispatches,
//!   copies, markers). Their *contents* are opaque to the compilation
//!   pipeline; only their indices matter.
//! - [`ResourceCommand`]: commands the dependency compiler *inserts between*
//!   them — materialisations, disposals, residency declarations, barriers
//!   and fence operations — each anchored to a command index with an
//!   ordering side and a priority.

use smallvec::SmallVec;

use crate::alloc::fence_pool::FenceHandle;
use crate::resource::handle::ResourceHandle;
use crate::resource::usage::{RenderStages, UsageMask};

// ─── Pass Commands ────────────────────────────────────────────────────────────

/// A recorded pass command, applied to the encoder of its owning pass.
///
/// The recording API that produces these is out of scope; the core only
/// forwards them. The variants carry just enough payload for a backend (or
/// a test recorder) to act on them.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameCommand {
    /// Non-indexed draw.
    Draw { vertices: std::ops::Range<u32>, instances: u32 },
    /// Compute dispatch in threadgroups.
    Dispatch { groups: [u32; 3] },
    /// Buffer/texture copy within a blit encoder.
    Copy { bytes: u64 },
    PushDebugGroup(&'static str),
    PopDebugGroup,
}

// ─── Resource Commands ────────────────────────────────────────────────────────

/// Whether a next-frame wait applies to readers or writers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FenceRole {
    Read,
    Write,
}

/// Which side of a pass command a resource command executes on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CommandOrder {
    Before = 0,
    After = 1,
}

/// The operations the compiler may interleave with pass commands.
#[derive(Clone, Debug)]
pub enum ResourceCommandKind {
    MaterialiseBuffer {
        resource: ResourceHandle,
    },
    MaterialiseTexture {
        resource: ResourceHandle,
    },
    MaterialiseTextureView {
        resource: ResourceHandle,
    },
    DisposeResource {
        resource: ResourceHandle,
    },
    /// Declares argument-buffer-referenced residency for a span of usages.
    UseResource {
        resource: ResourceHandle,
        usage: UsageMask,
        stages: RenderStages,
    },
    /// Intra-encoder hazard barrier.
    MemoryBarrier {
        resource: ResourceHandle,
        after_stages: RenderStages,
        before_stages: RenderStages,
    },
    /// Coarse fallback for platforms without scoped barriers.
    TextureBarrier {
        resource: ResourceHandle,
    },
    UpdateFence {
        fence: FenceHandle,
        after_stages: RenderStages,
    },
    WaitForFence {
        fence: FenceHandle,
        before_stages: RenderStages,
    },
    /// Waits on the fences the previous frame attached to this resource via
    /// `SetDisposalFences`.
    WaitForMultiframeFence {
        resource: ResourceHandle,
        role: FenceRole,
        stages: RenderStages,
    },
    /// Stages next frame's usage fences on the resource's reference.
    SetDisposalFences {
        resource: ResourceHandle,
        read_fence: Option<FenceHandle>,
        write_fences: SmallVec<[FenceHandle; 2]>,
    },
    /// Releases the usage fences consumed by `WaitForMultiframeFence`.
    ReleaseMultiframeFences {
        resource: ResourceHandle,
    },
    RetainFence {
        fence: FenceHandle,
    },
    ReleaseFence {
        fence: FenceHandle,
    },
}

impl ResourceCommandKind {
    /// Sort priority within one `(index, order)` position. Guarantees that
    /// allocation precedes first use, fence retains precede observation,
    /// and disposal follows both the last use and fence staging.
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::MaterialiseBuffer { .. }
            | Self::MaterialiseTexture { .. }
            | Self::MaterialiseTextureView { .. } => 0,
            Self::UseResource { .. }
            | Self::MemoryBarrier { .. }
            | Self::TextureBarrier { .. }
            | Self::UpdateFence { .. }
            | Self::WaitForFence { .. }
            | Self::WaitForMultiframeFence { .. }
            | Self::ReleaseMultiframeFences { .. } => 1,
            Self::RetainFence { .. } => 2,
            Self::ReleaseFence { .. } => 3,
            Self::SetDisposalFences { .. } => 4,
            Self::DisposeResource { .. } => 5,
        }
    }

    /// Whether the driver can execute this against the registry alone
    /// (no encoder required).
    #[must_use]
    pub fn is_registry_command(&self) -> bool {
        matches!(
            self,
            Self::MaterialiseBuffer { .. }
                | Self::MaterialiseTexture { .. }
                | Self::MaterialiseTextureView { .. }
                | Self::DisposeResource { .. }
                | Self::SetDisposalFences { .. }
                | Self::ReleaseMultiframeFences { .. }
                | Self::RetainFence { .. }
                | Self::ReleaseFence { .. }
        )
    }
}

/// One compiled resource command, anchored into the pass command stream.
#[derive(Clone, Debug)]
pub struct ResourceCommand {
    pub kind: ResourceCommandKind,
    /// Index into the global pass command stream.
    pub index: usize,
    pub order: CommandOrder,
}

impl ResourceCommand {
    /// Total-order sort key: `(index, order, priority)`.
    #[must_use]
    pub fn sort_key(&self) -> (usize, CommandOrder, u8) {
        (self.index, self.order, self.kind.priority())
    }
}

/// Sorts a compiled command stream into execution order.
pub fn sort_commands(commands: &mut [ResourceCommand]) {
    commands.sort_by_key(ResourceCommand::sort_key);
}
