//! Render-Target Merger
//!
//! Greedily coalesces consecutive draw passes that render to compatible
//! attachments into a single encoder, then derives per-attachment
//! load/store actions from the usage log so nothing is needlessly fetched
//! from or written back to memory.
//!
//! Merged descriptors are identified by index into the per-frame plan;
//! "same encoder" is index equality, which is what the dependency compiler
//! keys encoder boundaries on.

use smallvec::SmallVec;

use crate::backend::{LoadAction, StoreAction};
use crate::graph::pass::{PassKind, PassRecord, RenderTargetDescriptor};
use crate::resource::handle::{ResourceFlags, ResourceHandle, ResourceTable};
use crate::resource::usage::ResourceUsageLog;

/// One coalesced encoder's worth of draw passes.
#[derive(Debug)]
pub struct MergedRenderTarget {
    pub descriptor: RenderTargetDescriptor,
    /// Pass indices merged into this encoder, in order.
    pub passes: SmallVec<[usize; 4]>,
    /// Derived `(load, store)` per colour slot, parallel to
    /// `descriptor.color_attachments`.
    pub color_actions: SmallVec<[(LoadAction, StoreAction); 8]>,
    pub depth_actions: (LoadAction, StoreAction),
    pub stencil_actions: (LoadAction, StoreAction),
}

/// The merger's per-frame output.
#[derive(Debug, Default)]
pub struct RenderTargetPlan {
    /// Merged-target index per pass; `None` for non-draw or inactive
    /// passes.
    pub per_pass: Vec<Option<usize>>,
    pub targets: Vec<MergedRenderTarget>,
    /// Textures whose derived store action is `Store` (consumed by the
    /// memoryless-eligibility computation).
    pub stored_textures: Vec<ResourceHandle>,
}

impl RenderTargetPlan {
    /// Whether two draw passes ended up in the same encoder.
    #[must_use]
    pub fn same_target(&self, pass_a: usize, pass_b: usize) -> bool {
        match (self.per_pass[pass_a], self.per_pass[pass_b]) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Walks the pass list and produces the frame's merged render targets.
pub fn plan_render_targets(
    passes: &[PassRecord],
    usages: &ResourceUsageLog,
    table: &ResourceTable,
) -> RenderTargetPlan {
    let mut plan = RenderTargetPlan {
        per_pass: vec![None; passes.len()],
        ..Default::default()
    };
    let mut current: Option<usize> = None;

    for (index, pass) in passes.iter().enumerate() {
        if !pass.is_active {
            continue;
        }
        if pass.kind != PassKind::Draw {
            current = None;
            continue;
        }
        let descriptor = pass
            .render_target_descriptor
            .as_ref()
            .expect("draw pass without a render-target descriptor");

        if let Some(target_index) = current {
            let target = &mut plan.targets[target_index];
            if let Some(merged) = try_merge(&target.descriptor, descriptor) {
                target.descriptor = merged;
                target.passes.push(index);
                plan.per_pass[index] = Some(target_index);
                continue;
            }
        }

        // Start a new merge group.
        let target_index = plan.targets.len();
        plan.targets.push(MergedRenderTarget {
            descriptor: descriptor.clone(),
            passes: SmallVec::from_slice(&[index]),
            color_actions: SmallVec::new(),
            depth_actions: (LoadAction::DontCare, StoreAction::DontCare),
            stencil_actions: (LoadAction::DontCare, StoreAction::DontCare),
        });
        plan.per_pass[index] = Some(target_index);
        current = Some(target_index);
    }

    for target in &mut plan.targets {
        finalise(target, passes, usages, table, &mut plan.stored_textures);
    }
    plan
}

// ─── Merging ──────────────────────────────────────────────────────────────────

/// Attempts to fold `new` into `current`, returning the combined descriptor.
///
/// Merging fails when the attachment arity differs, when an attachment the
/// encoder has already rendered to asks to be cleared (a clear mid-encoder
/// would wipe earlier draws), when locations disagree, or when both passes
/// name different visibility-result buffers.
fn try_merge(
    current: &RenderTargetDescriptor,
    new: &RenderTargetDescriptor,
) -> Option<RenderTargetDescriptor> {
    if current.color_attachments.len() != new.color_attachments.len() {
        return None;
    }

    let mut merged = current.clone();

    for (slot, new_attachment) in new.color_attachments.iter().enumerate() {
        match (&current.color_attachments[slot], new_attachment) {
            (Some(existing), Some(incoming)) => {
                if incoming.wants_clear {
                    return None;
                }
                if existing.location != incoming.location {
                    return None;
                }
            }
            (None, Some(_)) => {
                // Inherit the slot the current descriptor lacks.
                merged.color_attachments[slot] = *new_attachment;
            }
            _ => {}
        }
    }

    match (&current.depth_attachment, &new.depth_attachment) {
        (Some(existing), Some(incoming)) => {
            if incoming.wants_clear || existing.location != incoming.location {
                return None;
            }
        }
        (None, Some(incoming)) => merged.depth_attachment = Some(*incoming),
        _ => {}
    }

    match (&current.stencil_attachment, &new.stencil_attachment) {
        (Some(existing), Some(incoming)) => {
            if incoming.wants_clear || existing.location != incoming.location {
                return None;
            }
        }
        (None, Some(incoming)) => merged.stencil_attachment = Some(*incoming),
        _ => {}
    }

    match (current.visibility_result_buffer, new.visibility_result_buffer) {
        (Some(a), Some(b)) if a != b => return None,
        (None, Some(b)) => merged.visibility_result_buffer = Some(b),
        _ => {}
    }

    merged.render_target_array_length = current
        .render_target_array_length
        .max(new.render_target_array_length);
    Some(merged)
}

// ─── Load/Store Derivation ────────────────────────────────────────────────────

fn finalise(
    target: &mut MergedRenderTarget,
    passes: &[PassRecord],
    usages: &ResourceUsageLog,
    table: &ResourceTable,
    stored_textures: &mut Vec<ResourceHandle>,
) {
    let merged_passes: SmallVec<[usize; 4]> = target.passes.clone();
    let last_merged_pass = *merged_passes.last().expect("merged target with no passes");

    let color_actions = target
        .descriptor
        .color_attachments
        .iter()
        .map(|attachment| {
            attachment.as_ref().map_or(
                (LoadAction::DontCare, StoreAction::DontCare),
                |attachment| {
                    derive_actions(
                        attachment.location.texture,
                        attachment.wants_clear,
                        &merged_passes,
                        last_merged_pass,
                        passes,
                        usages,
                        table,
                        stored_textures,
                    )
                },
            )
        })
        .collect();

    let depth_actions = target.descriptor.depth_attachment.as_ref().map_or(
        (LoadAction::DontCare, StoreAction::DontCare),
        |attachment| {
            derive_actions(
                attachment.location.texture,
                attachment.wants_clear,
                &merged_passes,
                last_merged_pass,
                passes,
                usages,
                table,
                stored_textures,
            )
        },
    );

    let stencil_actions = target.descriptor.stencil_attachment.as_ref().map_or(
        (LoadAction::DontCare, StoreAction::DontCare),
        |attachment| {
            derive_actions(
                attachment.location.texture,
                attachment.wants_clear,
                &merged_passes,
                last_merged_pass,
                passes,
                usages,
                table,
                stored_textures,
            )
        },
    );

    target.color_actions = color_actions;
    target.depth_actions = depth_actions;
    target.stencil_actions = stencil_actions;
}

fn derive_actions(
    texture: ResourceHandle,
    wants_clear: bool,
    merged_passes: &[usize],
    last_merged_pass: usize,
    passes: &[PassRecord],
    usages: &ResourceUsageLog,
    table: &ResourceTable,
    stored_textures: &mut Vec<ResourceHandle>,
) -> (LoadAction, StoreAction) {
    let info = table.info(texture);

    // Load action: clear wins; otherwise the texture's previous contents
    // matter only if something has produced them.
    let load = if wants_clear {
        LoadAction::Clear
    } else {
        let first_active = usages
            .usages(texture)
            .iter()
            .find(|u| passes[u.pass_index].is_active && !u.usage_type.is_unused());
        let first_use_is_here =
            first_active.is_some_and(|u| merged_passes.contains(&u.pass_index));
        if first_use_is_here && !info.is_initialised() {
            LoadAction::DontCare
        } else {
            LoadAction::Load
        }
    };

    // Store action: scan usages after the merged passes for a conclusive
    // reader (store) or a clearing write-only rebind (discard). A declared
    // read wins over a clear on the same pass: storing is always safe,
    // discarding under a reader is not.
    let mut store = None;
    for usage in usages.usages(texture) {
        if usage.pass_index <= last_merged_pass || !passes[usage.pass_index].is_active {
            continue;
        }
        if usage.usage_type.is_unused() {
            continue;
        }
        if usage.usage_type.is_read() {
            store = Some(StoreAction::Store);
            break;
        }
        if usage.usage_type.is_render_target()
            && pass_clears_texture(&passes[usage.pass_index], texture)
        {
            // The next encoder wipes the contents; nothing to keep.
            store = Some(StoreAction::DontCare);
            break;
        }
        // Writes alone are ambiguous; keep scanning.
    }

    let store = store.unwrap_or_else(|| {
        let must_keep = info
            .flags
            .intersects(ResourceFlags::PERSISTENT | ResourceFlags::WINDOW_HANDLE)
            || (info.flags.contains(ResourceFlags::HISTORY_BUFFER) && !info.is_initialised());
        if must_keep {
            StoreAction::Store
        } else {
            StoreAction::DontCare
        }
    });

    if store == StoreAction::Store && !stored_textures.contains(&texture) {
        stored_textures.push(texture);
    }
    (load, store)
}

fn pass_clears_texture(pass: &PassRecord, texture: ResourceHandle) -> bool {
    let Some(descriptor) = &pass.render_target_descriptor else {
        return false;
    };
    let colors = descriptor
        .color_attachments
        .iter()
        .flatten()
        .any(|a| a.location.texture == texture && a.wants_clear);
    let depth = descriptor
        .depth_attachment
        .as_ref()
        .is_some_and(|a| a.location.texture == texture && a.wants_clear);
    let stencil = descriptor
        .stencil_attachment
        .as_ref()
        .is_some_and(|a| a.location.texture == texture && a.wants_clear);
    colors || depth || stencil
}
