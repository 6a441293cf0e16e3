//! Dependency Compiler
//!
//! The per-frame linear scan that turns the pass list + usage log into a
//! sorted resource-command stream. For every resource it decides:
//!
//! - where to materialise and dispose the backing,
//! - which usages need residency (`use-resource`) declarations,
//! - which read-after-write / write-after-write / write-after-read pairs
//!   cross an encoder boundary and therefore need a fence,
//! - which same-encoder hazards need a memory/texture barrier instead,
//! - which fences must be staged for the *next* frame (`set-disposal-fences`).
//!
//! Cross-encoder dependencies are coalesced: all pairs between the same two
//! encoders share one fence, updated after the latest source command and
//! waited on before the earliest dependent command.

use std::ops::Range;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::alloc::FencePool;
use crate::backend::Backend;
use crate::graph::command::{
    CommandOrder, FenceRole, ResourceCommand, ResourceCommandKind, sort_commands,
};
use crate::graph::merger::RenderTargetPlan;
use crate::graph::pass::{PassKind, PassRecord};
use crate::options::FrameGraphOptions;
use crate::resource::handle::{
    ResourceDescriptor, ResourceFlags, ResourceHandle, ResourceTable,
};
use crate::resource::registry::ResourceRegistry;
use crate::resource::usage::{RenderStages, ResourceUsage, ResourceUsageLog, UsageMask};

/// The compiler's per-frame output.
#[derive(Debug, Default)]
pub struct CompiledFrame {
    /// Commands interleaved with pass commands, sorted by
    /// `(index, order, priority)`.
    pub resource_commands: Vec<ResourceCommand>,
    /// Registry-only commands executed before any encoder opens, sorted
    /// separately.
    pub pre_frame_commands: Vec<ResourceCommand>,
    /// Encoder slot per pass; `None` for inactive or CPU passes.
    pub pass_encoder_index: Vec<Option<usize>>,
    /// Number of encoder slots assigned.
    pub encoder_count: usize,
    /// Resources touched only by the CPU this frame; dropped without fences
    /// at the cycle.
    pub cpu_touched: Vec<ResourceHandle>,
}

/// A usage projected down to what dependency tracking needs.
#[derive(Clone, Debug)]
struct DepUsage {
    encoder: usize,
    command_range: Range<usize>,
    stages: RenderStages,
    is_render_target: bool,
}

impl DepUsage {
    fn of(usage: &ResourceUsage, encoder: usize) -> Self {
        Self {
            encoder,
            command_range: usage.command_range.clone(),
            stages: usage.stages,
            is_render_target: usage.usage_type.is_render_target(),
        }
    }
}

/// One coalesced cross-encoder dependency.
#[derive(Debug)]
struct DependencyGroup {
    update_index: usize,
    wait_index: usize,
    after_stages: RenderStages,
    before_stages: RenderStages,
}

/// Insertion-ordered map of encoder pairs to their dependency group, so
/// fence allocation order is deterministic.
#[derive(Default)]
struct DependencyMatrix {
    index: FxHashMap<(usize, usize), usize>,
    groups: Vec<((usize, usize), DependencyGroup)>,
}

impl DependencyMatrix {
    fn record(&mut self, source: &DepUsage, dependent: &DepUsage) {
        let key = (source.encoder, dependent.encoder);
        let slot = *self.index.entry(key).or_insert_with(|| {
            self.groups.push((
                key,
                DependencyGroup {
                    update_index: 0,
                    wait_index: usize::MAX,
                    after_stages: RenderStages::empty(),
                    before_stages: RenderStages::empty(),
                },
            ));
            self.groups.len() - 1
        });
        let group = &mut self.groups[slot].1;
        group.update_index = group
            .update_index
            .max(source.command_range.end.saturating_sub(1));
        group.wait_index = group.wait_index.min(dependent.command_range.start);
        group.after_stages |= source.stages;
        group.before_stages |= dependent.stages;
    }
}

/// Compiles one frame.
///
/// `passes` and the per-resource usage lists are assumed ordered by command
/// index (the recording layer produces them that way).
pub fn compile_frame<B: Backend>(
    passes: &[PassRecord],
    usages: &ResourceUsageLog,
    table: &ResourceTable,
    plan: &RenderTargetPlan,
    registry: &ResourceRegistry<B>,
    fences: &mut FencePool<B>,
    options: &FrameGraphOptions,
) -> CompiledFrame {
    let mut compiled = CompiledFrame {
        pass_encoder_index: assign_encoders(passes, plan),
        ..Default::default()
    };
    compiled.encoder_count = compiled
        .pass_encoder_index
        .iter()
        .flatten()
        .copied()
        .max()
        .map_or(0, |max| max + 1);

    let mut dependencies = DependencyMatrix::default();

    for (resource, usage_list) in usages.iter() {
        compile_resource(
            resource,
            usage_list,
            passes,
            table,
            registry,
            fences,
            options,
            &compiled.pass_encoder_index,
            &mut dependencies,
            &mut compiled.resource_commands,
            &mut compiled.pre_frame_commands,
            &mut compiled.cpu_touched,
        );
    }

    // One fence per encoder pair, widened over every contributing resource.
    for ((_, _), group) in &dependencies.groups {
        debug_assert!(group.wait_index != usize::MAX);
        let fence = fences.allocate();
        compiled.resource_commands.push(ResourceCommand {
            kind: ResourceCommandKind::UpdateFence {
                fence,
                after_stages: group.after_stages,
            },
            index: group.update_index,
            order: CommandOrder::After,
        });
        compiled.resource_commands.push(ResourceCommand {
            kind: ResourceCommandKind::WaitForFence {
                fence,
                before_stages: group.before_stages,
            },
            index: group.wait_index,
            order: CommandOrder::Before,
        });
        compiled.pre_frame_commands.push(ResourceCommand {
            kind: ResourceCommandKind::ReleaseFence { fence },
            index: group.update_index,
            order: CommandOrder::After,
        });
    }

    sort_commands(&mut compiled.resource_commands);
    sort_commands(&mut compiled.pre_frame_commands);

    log::debug!(
        "compiled frame: {} passes, {} encoders, {} resource commands, {} fence pairs",
        passes.len(),
        compiled.encoder_count,
        compiled.resource_commands.len(),
        dependencies.groups.len(),
    );
    compiled
}

// ─── Encoder Assignment ───────────────────────────────────────────────────────

/// A new encoder begins on every pass-kind change and on every draw pass
/// whose merged render target differs from its predecessor's.
fn assign_encoders(passes: &[PassRecord], plan: &RenderTargetPlan) -> Vec<Option<usize>> {
    let mut encoder_indices = vec![None; passes.len()];
    let mut encoder_count = 0usize;
    let mut previous: Option<usize> = None;

    for (index, pass) in passes.iter().enumerate() {
        if !pass.is_active || pass.kind == PassKind::Cpu {
            continue;
        }
        let new_encoder = match previous {
            None => true,
            Some(prev) => {
                passes[prev].kind != pass.kind
                    || (pass.kind == PassKind::Draw && !plan.same_target(prev, index))
            }
        };
        if new_encoder {
            encoder_count += 1;
        }
        encoder_indices[index] = Some(encoder_count - 1);
        previous = Some(index);
    }
    encoder_indices
}

// ─── Per-Resource Compilation ─────────────────────────────────────────────────

fn compile_resource<B: Backend>(
    resource: ResourceHandle,
    usage_list: &[ResourceUsage],
    passes: &[PassRecord],
    table: &ResourceTable,
    registry: &ResourceRegistry<B>,
    fences: &mut FencePool<B>,
    options: &FrameGraphOptions,
    encoder_indices: &[Option<usize>],
    dependencies: &mut DependencyMatrix,
    commands: &mut Vec<ResourceCommand>,
    pre_frame: &mut Vec<ResourceCommand>,
    cpu_touched: &mut Vec<ResourceHandle>,
) {
    let info = table.info(resource);
    let flags = info.flags;
    let is_texture = info.descriptor.is_texture();

    let active: SmallVec<[&ResourceUsage; 8]> = usage_list
        .iter()
        .filter(|u| passes[u.pass_index].is_active)
        .collect();
    let Some(&first) = active.first() else {
        return;
    };
    let last = *active.last().unwrap();

    // Writing an immutable, already-initialised resource is unrecoverable.
    if flags.contains(ResourceFlags::IMMUTABLE_ONCE_INITIALISED) && info.is_initialised() {
        assert!(
            active.iter().all(|u| !u.usage_type.is_write()),
            "write to immutable initialised resource {:?}",
            info.label,
        );
    }

    let already_backed = registry.has_backing(resource);
    let is_persistent = flags.contains(ResourceFlags::PERSISTENT);
    let cpu_only = active.iter().all(|u| u.stages.is_cpu());

    // CPU-only resources live entirely in the pre-frame stream and are
    // reclaimed without fences at the cycle.
    if cpu_only {
        if !already_backed && !is_persistent {
            pre_frame.push(ResourceCommand {
                kind: materialise_kind(&info.descriptor, resource),
                index: 0,
                order: CommandOrder::Before,
            });
        }
        cpu_touched.push(resource);
        return;
    }

    // Materialise strictly before the first active usage.
    if !is_persistent && !already_backed {
        commands.push(ResourceCommand {
            kind: materialise_kind(&info.descriptor, resource),
            index: first.command_range.start,
            order: CommandOrder::Before,
        });
    }

    // ── Residency stretches ────────────────────────────────────────────────
    let mut residency: Option<(usize, usize, UsageMask, RenderStages)> = None;
    for usage in &active {
        let Some(encoder) = encoder_indices[usage.pass_index] else {
            flush_residency(resource, residency.take(), commands);
            continue;
        };
        let eligible =
            usage.in_argument_buffer && !usage.stages.is_cpu() && !usage.usage_type.is_unused();
        if eligible {
            let mut mask = UsageMask::empty();
            if usage.usage_type.is_read() {
                mask |= UsageMask::READ;
                if is_texture {
                    mask |= UsageMask::SAMPLE;
                }
            }
            if usage.usage_type.is_write() {
                mask |= UsageMask::WRITE;
            }
            match &mut residency {
                Some((current, _, acc_mask, acc_stages)) if *current == encoder => {
                    *acc_mask |= mask;
                    *acc_stages |= usage.stages;
                }
                Some(_) => {
                    flush_residency(resource, residency.take(), commands);
                    residency = Some((encoder, usage.command_range.start, mask, usage.stages));
                }
                None => {
                    residency = Some((encoder, usage.command_range.start, mask, usage.stages));
                }
            }
        } else if residency.is_some() {
            flush_residency(resource, residency.take(), commands);
        }
    }
    flush_residency(resource, residency.take(), commands);

    // ── Dependency scan ────────────────────────────────────────────────────
    let mut previous_write: Option<DepUsage> = None;
    let mut reads_since_last_write: SmallVec<[DepUsage; 4]> = SmallVec::new();
    let mut encoders_seen: SmallVec<[usize; 4]> = SmallVec::new();
    let mut multiframe_wait_emitted = false;

    for usage in &active {
        if usage.usage_type.is_unused() || usage.stages.is_cpu() {
            continue;
        }
        let Some(encoder) = encoder_indices[usage.pass_index] else {
            continue;
        };
        let current = DepUsage::of(usage, encoder);
        let is_read = usage.usage_type.is_read();
        let is_write = usage.usage_type.is_write();

        // First touch of this resource in a new encoder, with nothing
        // written earlier in the frame: honour the fences the previous
        // frame staged on the reference.
        if !encoders_seen.contains(&encoder) {
            encoders_seen.push(encoder);
            if previous_write.is_none() {
                commands.push(ResourceCommand {
                    kind: ResourceCommandKind::WaitForMultiframeFence {
                        resource,
                        role: if is_write {
                            FenceRole::Write
                        } else {
                            FenceRole::Read
                        },
                        stages: usage.stages.first(),
                    },
                    index: usage.command_range.start,
                    order: CommandOrder::Before,
                });
                multiframe_wait_emitted = true;
            }
        }

        if is_write {
            for read in &reads_since_last_write {
                if read.encoder != encoder {
                    dependencies.record(read, &current);
                }
            }
            if let Some(write) = &previous_write {
                if write.encoder != encoder {
                    dependencies.record(write, &current);
                } else if is_read && !(write.is_render_target && current.is_render_target) {
                    push_hazard_barrier(resource, is_texture, write, &current, options, commands);
                }
            }
            previous_write = Some(current);
            reads_since_last_write.clear();
        } else if is_read {
            if let Some(write) = &previous_write {
                if write.encoder != encoder {
                    dependencies.record(write, &current);
                } else if !(write.is_render_target && current.is_render_target) {
                    push_hazard_barrier(resource, is_texture, write, &current, options, commands);
                }
            }
            reads_since_last_write.push(current);
        }
    }

    // ── Disposal fencing ───────────────────────────────────────────────────
    if registry.needs_wait_fences_on_frame_completion(table, resource) {
        let read_fence = previous_write.as_ref().map(|write| {
            let fence = fences.allocate();
            commands.push(ResourceCommand {
                kind: ResourceCommandKind::UpdateFence {
                    fence,
                    after_stages: write.stages,
                },
                index: write.command_range.end.saturating_sub(1),
                order: CommandOrder::After,
            });
            fence
        });

        let mut write_fences: SmallVec<[crate::alloc::FenceHandle; 2]> = SmallVec::new();
        if !flags.contains(ResourceFlags::IMMUTABLE_ONCE_INITIALISED) {
            for read in &reads_since_last_write {
                let fence = fences.allocate();
                commands.push(ResourceCommand {
                    kind: ResourceCommandKind::UpdateFence {
                        fence,
                        after_stages: read.stages,
                    },
                    index: read.command_range.end.saturating_sub(1),
                    order: CommandOrder::After,
                });
                write_fences.push(fence);
            }
        }

        commands.push(ResourceCommand {
            kind: ResourceCommandKind::SetDisposalFences {
                resource,
                read_fence,
                write_fences,
            },
            index: last.command_range.end.saturating_sub(1),
            order: CommandOrder::After,
        });
    }

    // ── Dispose ────────────────────────────────────────────────────────────
    if !is_persistent {
        commands.push(ResourceCommand {
            kind: ResourceCommandKind::DisposeResource { resource },
            index: last.command_range.end.saturating_sub(1),
            order: CommandOrder::After,
        });
    }

    // Resources that entered the frame with staged fences release those
    // counts once their waits are in the stream.
    if already_backed && multiframe_wait_emitted {
        pre_frame.push(ResourceCommand {
            kind: ResourceCommandKind::ReleaseMultiframeFences { resource },
            index: last.command_range.end.saturating_sub(1),
            order: CommandOrder::After,
        });
    }
}

fn materialise_kind(
    descriptor: &ResourceDescriptor,
    resource: ResourceHandle,
) -> ResourceCommandKind {
    match descriptor {
        ResourceDescriptor::Buffer(_) => ResourceCommandKind::MaterialiseBuffer { resource },
        ResourceDescriptor::Texture(_) => ResourceCommandKind::MaterialiseTexture { resource },
        ResourceDescriptor::TextureView { .. } => {
            ResourceCommandKind::MaterialiseTextureView { resource }
        }
    }
}

fn flush_residency(
    resource: ResourceHandle,
    stretch: Option<(usize, usize, UsageMask, RenderStages)>,
    commands: &mut Vec<ResourceCommand>,
) {
    if let Some((_, first_index, mask, stages)) = stretch {
        commands.push(ResourceCommand {
            kind: ResourceCommandKind::UseResource {
                resource,
                usage: mask,
                stages,
            },
            index: first_index,
            order: CommandOrder::Before,
        });
    }
}

/// Same-encoder read-after-write: a stage-scoped memory barrier where the
/// platform has one, otherwise a coarse texture barrier (texture resources
/// only; buffer access within one encoder is ordered by the scoped barrier
/// path everywhere it exists).
fn push_hazard_barrier(
    resource: ResourceHandle,
    is_texture: bool,
    write: &DepUsage,
    read: &DepUsage,
    options: &FrameGraphOptions,
    commands: &mut Vec<ResourceCommand>,
) {
    let kind = if options.supports_memory_barriers || !is_texture {
        ResourceCommandKind::MemoryBarrier {
            resource,
            after_stages: write.stages,
            before_stages: read.stages,
        }
    } else {
        ResourceCommandKind::TextureBarrier { resource }
    };
    commands.push(ResourceCommand {
        kind,
        index: read.command_range.start,
        order: CommandOrder::Before,
    });
}
