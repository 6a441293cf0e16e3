#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! # Forge
//!
//! A frame graph compilation and execution core for GPU command-submission
//! backends.
//!
//! Client code declares passes that read and write transient or persistent
//! resources; Forge decides what to allocate (and from which allocator),
//! which consecutive draw passes share a render-target encoder, what
//! inter-encoder fences and intra-encoder barriers preserve ordering, which
//! load/store actions avoid useless memory traffic, and how transient
//! resources alias one another's heap memory.
//!
//! The GPU itself sits behind the [`backend::Backend`] trait family; the
//! core never names a concrete API.
//!
//! # Per-Frame Pipeline
//!
//! 1. **Merge** — consecutive draw passes with compatible attachments are
//!    coalesced into one encoder ([`graph::merger`])
//! 2. **Compile** — a linear scan per resource emits materialise/dispose,
//!    residency, barrier and fence commands, sorted into the pass command
//!    stream ([`graph::compiler`])
//! 3. **Execute** — the driver walks passes, opens encoders, interleaves
//!    the two streams, presents and commits ([`graph::executor`])
//! 4. **Cycle** — pools, arenas, heaps and the fence pool advance their
//!    per-frame rings

pub mod alloc;
pub mod backend;
pub mod errors;
pub mod graph;
pub mod options;
pub mod resource;

pub use backend::{Backend, CommandBuffer, Device, DrawableSource, Encoder};
pub use errors::{ForgeError, Result};
pub use graph::{FrameGraph, FrameSubmission, PassKind, PassRecord};
pub use options::FrameGraphOptions;
pub use resource::{
    ResourceFlags, ResourceHandle, ResourceTable, ResourceUsage, ResourceUsageLog,
    ResourceUsageType,
};
