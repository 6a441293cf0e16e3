//! Resource Usage Records
//!
//! The command-recording layer logs, for every resource, an ordered list of
//! [`ResourceUsage`] records describing how each pass touches it. The
//! dependency compiler consumes this log read-only; it is the single source
//! of truth for materialisation points, fence edges and residency spans.

use std::ops::Range;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use super::handle::ResourceHandle;

// ─── Pipeline Stages ──────────────────────────────────────────────────────────

bitflags! {
    /// Pipeline stages a usage participates in.
    ///
    /// `CPU_BEFORE_RENDER` is a sentinel for host-side work that happens
    /// before any encoder runs; usages carrying it never produce encoder
    /// commands or fences.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct RenderStages: u8 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
        const BLIT     = 1 << 3;
        /// Host-side access before the frame's first encoder.
        const CPU_BEFORE_RENDER = 1 << 4;
    }
}

impl RenderStages {
    /// The earliest stage in the set (lowest set bit). Fence waits are
    /// qualified with the first stage that observes the data.
    #[must_use]
    pub fn first(self) -> Self {
        if self.is_empty() {
            return self;
        }
        Self::from_bits_truncate(1 << self.bits().trailing_zeros())
    }

    /// Whether this is the host-side sentinel.
    #[must_use]
    pub fn is_cpu(self) -> bool {
        self.contains(Self::CPU_BEFORE_RENDER)
    }
}

bitflags! {
    /// Access mask attached to a `use-resource` residency command.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
    pub struct UsageMask: u8 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        /// Set in addition to `READ` when a texture is sampled.
        const SAMPLE = 1 << 2;
    }
}

// ─── Usage Records ────────────────────────────────────────────────────────────

/// How a single pass touches a resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResourceUsageType {
    Read,
    Write,
    ReadWrite,
    /// Bound as a render target that is both read (blend/load) and written.
    ReadWriteRenderTarget,
    /// Bound as a render target that is only written.
    WriteOnlyRenderTarget,
    /// Bound as an input attachment of the render target it belongs to.
    InputAttachmentRenderTarget,
    /// Present in the render-target descriptor but untouched by the pass.
    UnusedRenderTarget,
    /// Referenced by an argument buffer but never accessed.
    UnusedArgumentBuffer,
}

impl ResourceUsageType {
    /// Whether this usage reads the resource's contents.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(
            self,
            Self::Read
                | Self::ReadWrite
                | Self::ReadWriteRenderTarget
                | Self::InputAttachmentRenderTarget
        )
    }

    /// Whether this usage writes the resource's contents.
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::Write
                | Self::ReadWrite
                | Self::ReadWriteRenderTarget
                | Self::WriteOnlyRenderTarget
                | Self::InputAttachmentRenderTarget
        )
    }

    /// Whether this usage binds the resource as a render-target attachment.
    #[must_use]
    pub const fn is_render_target(self) -> bool {
        matches!(
            self,
            Self::ReadWriteRenderTarget
                | Self::WriteOnlyRenderTarget
                | Self::InputAttachmentRenderTarget
                | Self::UnusedRenderTarget
        )
    }

    /// Whether the pass never actually touches the data.
    #[must_use]
    pub const fn is_unused(self) -> bool {
        matches!(self, Self::UnusedRenderTarget | Self::UnusedArgumentBuffer)
    }
}

/// One record in a resource's per-frame usage list.
///
/// Produced by command recording (out of scope here) and consumed read-only
/// by the render-target merger and the dependency compiler.
#[derive(Clone, Debug)]
pub struct ResourceUsage {
    /// Index of the owning pass in the submitted pass list.
    pub pass_index: usize,
    /// Half-open range within the global command stream this usage spans.
    pub command_range: Range<usize>,
    pub usage_type: ResourceUsageType,
    pub stages: RenderStages,
    /// Whether the resource is referenced through an argument buffer (and
    /// therefore needs an explicit residency command).
    pub in_argument_buffer: bool,
}

impl ResourceUsage {
    /// Command index a materialisation for this usage must precede.
    #[must_use]
    pub fn first_command(&self) -> usize {
        self.command_range.start
    }

    /// Command index a disposal for this usage must follow.
    #[must_use]
    pub fn last_command(&self) -> usize {
        self.command_range.end.saturating_sub(1)
    }
}

// ─── Usage Log ────────────────────────────────────────────────────────────────

/// Per-frame, per-resource ordered usage lists.
///
/// Iteration order is the order in which resources were first recorded, so
/// compilation output is deterministic; the hash map only accelerates
/// lookups and never drives iteration.
#[derive(Default)]
pub struct ResourceUsageLog {
    resources: Vec<(ResourceHandle, Vec<ResourceUsage>)>,
    index: FxHashMap<ResourceHandle, usize>,
}

impl ResourceUsageLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a usage record for `resource`, keeping per-resource order.
    pub fn record(&mut self, resource: ResourceHandle, usage: ResourceUsage) {
        match self.index.get(&resource) {
            Some(&slot) => self.resources[slot].1.push(usage),
            None => {
                self.index.insert(resource, self.resources.len());
                self.resources.push((resource, vec![usage]));
            }
        }
    }

    /// The ordered usage list for one resource (empty if never recorded).
    #[must_use]
    pub fn usages(&self, resource: ResourceHandle) -> &[ResourceUsage] {
        self.index
            .get(&resource)
            .map_or(&[], |&slot| &self.resources[slot].1)
    }

    /// Iterates `(resource, usages)` in first-recorded order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceHandle, &[ResourceUsage])> {
        self.resources.iter().map(|(h, v)| (*h, v.as_slice()))
    }

    /// Number of distinct resources recorded this frame.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Clears the log for reuse next frame (retains capacity).
    pub fn clear(&mut self) {
        self.resources.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn handles(n: usize) -> Vec<ResourceHandle> {
        let mut sm: SlotMap<ResourceHandle, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    fn usage(pass: usize, range: Range<usize>) -> ResourceUsage {
        ResourceUsage {
            pass_index: pass,
            command_range: range,
            usage_type: ResourceUsageType::Read,
            stages: RenderStages::VERTEX,
            in_argument_buffer: false,
        }
    }

    #[test]
    fn test_first_stage() {
        let stages = RenderStages::FRAGMENT | RenderStages::COMPUTE;
        assert_eq!(stages.first(), RenderStages::FRAGMENT);
        assert_eq!(RenderStages::empty().first(), RenderStages::empty());
    }

    #[test]
    fn test_usage_type_classification() {
        assert!(ResourceUsageType::ReadWriteRenderTarget.is_read());
        assert!(ResourceUsageType::ReadWriteRenderTarget.is_write());
        assert!(ResourceUsageType::WriteOnlyRenderTarget.is_write());
        assert!(!ResourceUsageType::WriteOnlyRenderTarget.is_read());
        assert!(ResourceUsageType::UnusedRenderTarget.is_unused());
        assert!(!ResourceUsageType::Read.is_write());
    }

    #[test]
    fn test_log_preserves_first_recorded_order() {
        let h = handles(3);
        let mut log = ResourceUsageLog::new();
        log.record(h[2], usage(0, 0..1));
        log.record(h[0], usage(0, 1..2));
        log.record(h[2], usage(1, 2..3));

        let order: Vec<_> = log.iter().map(|(handle, _)| handle).collect();
        assert_eq!(order, vec![h[2], h[0]]);
        assert_eq!(log.usages(h[2]).len(), 2);
        assert_eq!(log.usages(h[1]).len(), 0);
    }
}
