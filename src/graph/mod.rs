//! Frame Graph Compilation and Execution
//!
//! The per-frame pipeline:
//!
//! 1. [`merger`]: coalesce consecutive draw passes into shared render-target
//!    encoders and derive load/store actions
//! 2. [`compiler`]: one linear scan per resource producing the sorted
//!    resource-command stream and cross-encoder fence pairs
//! 3. [`executor`]: walk the passes, open/close encoders, interleave
//!    resource commands with pass commands, present and cycle
//!
//! [`pass`] and [`command`] hold the data vocabulary shared by all three.

pub mod command;
pub mod compiler;
pub mod executor;
pub mod merger;
pub mod pass;

pub use command::{
    CommandOrder, FenceRole, FrameCommand, ResourceCommand, ResourceCommandKind,
};
pub use compiler::{CompiledFrame, compile_frame};
pub use executor::{FrameGraph, FrameSubmission};
pub use merger::{MergedRenderTarget, RenderTargetPlan, plan_render_targets};
pub use pass::{
    AttachmentLocation, ColorAttachment, DepthAttachment, PassKind, PassRecord,
    RenderTargetDescriptor, StencilAttachment,
};
