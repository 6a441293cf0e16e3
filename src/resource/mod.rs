//! Resource Model
//!
//! Handles, usage records, backing references and the registry that ties
//! them together:
//!
//! - [`ResourceHandle`] / [`ResourceTable`]: stable identity + descriptors
//! - [`ResourceUsage`] / [`ResourceUsageLog`]: how each pass touches what
//! - [`BufferReference`] / [`TextureReference`]: per-frame backings
//! - [`ResourceRegistry`]: materialise/dispose routing and fence wiring
//! - [`ResourceBindingPath`]: packed shader-argument locations

pub mod binding_path;
pub mod handle;
pub mod reference;
pub mod registry;
pub mod usage;

pub use binding_path::{BindingType, ResourceBindingPath};
pub use handle::{
    ResourceDescriptor, ResourceFlags, ResourceHandle, ResourceInfo, ResourceStateFlags,
    ResourceTable,
};
pub use reference::{
    AllocatorToken, BufferReference, FenceAttachments, HeapAllocatorKind, TextureReference,
};
pub use registry::{HeapUsageReport, ResourceRegistry};
pub use usage::{RenderStages, ResourceUsage, ResourceUsageLog, ResourceUsageType, UsageMask};
