//! Frame Driver
//!
//! [`FrameGraph`] orchestrates one frame: merge render targets, compile the
//! dependency stream, execute pre-frame registry commands, walk the passes
//! opening/closing encoders per the plan while interleaving resource
//! commands with pass commands, present, commit, and cycle every ring.
//!
//! # Pass Skipping
//!
//! A draw pass whose window drawable cannot be acquired (or whose
//! render-target view fails to resolve) is skipped with a diagnostic; its
//! compiled resource commands still execute (materialising without drawing
//! is harmless), except those referencing the failed backing.

use rustc_hash::FxHashSet;

use crate::alloc::FencePool;
use crate::backend::{
    Backend, BarrierScope, CommandBuffer, Device, DrawableSource, Encoder, NativeResource,
    RenderPassDescriptor, ResolvedColorAttachment, ResolvedDepthAttachment,
    ResolvedStencilAttachment, StorageMode, TextureUsage,
};
use crate::errors::{ForgeError, Result};
use crate::graph::command::{CommandOrder, FrameCommand, ResourceCommand, ResourceCommandKind};
use crate::graph::compiler::{CompiledFrame, compile_frame};
use crate::graph::merger::{MergedRenderTarget, RenderTargetPlan, plan_render_targets};
use crate::graph::pass::{PassKind, PassRecord};
use crate::options::FrameGraphOptions;
use crate::resource::handle::{ResourceDescriptor, ResourceFlags, ResourceHandle, ResourceTable};
use crate::resource::registry::ResourceRegistry;
use crate::resource::usage::ResourceUsageLog;

/// Everything one frame needs from the recording layer.
pub struct FrameSubmission<'a, B: Backend> {
    pub passes: &'a [PassRecord],
    pub usages: &'a ResourceUsageLog,
    /// The flat command stream referenced by pass `command_range`s.
    pub commands: &'a [FrameCommand],
    /// Presentation-layer hook for window-handle textures.
    pub drawables: Option<&'a mut dyn DrawableSource<B>>,
    /// Fires when the GPU finishes the frame.
    pub on_complete: Option<Box<dyn FnOnce() + Send>>,
}

/// The frame graph execution core.
pub struct FrameGraph<B: Backend> {
    device: B::Device,
    options: FrameGraphOptions,
    table: ResourceTable,
    registry: ResourceRegistry<B>,
    fences: FencePool<B>,
}

impl<B: Backend> FrameGraph<B> {
    pub fn new(device: B::Device, options: FrameGraphOptions) -> Self {
        let options = options.validated();
        Self {
            registry: ResourceRegistry::new(device.clone(), &options),
            fences: FencePool::new(device.clone()),
            table: ResourceTable::new(),
            options,
            device,
        }
    }

    /// The handle table, for declaring resources.
    #[must_use]
    pub fn resources(&self) -> &ResourceTable {
        &self.table
    }

    /// Mutable handle table access.
    pub fn resources_mut(&mut self) -> &mut ResourceTable {
        &mut self.table
    }

    /// The registry (argument-buffer materialisation, diagnostics).
    #[must_use]
    pub fn registry(&self) -> &ResourceRegistry<B> {
        &self.registry
    }

    /// The fence pool (retain-count diagnostics).
    #[must_use]
    pub fn fences(&self) -> &FencePool<B> {
        &self.fences
    }

    /// Materialises a persistent resource on explicit client request.
    pub fn materialise_persistent(&mut self, handle: ResourceHandle) -> Result<()> {
        match self.table.info(handle).descriptor {
            ResourceDescriptor::Buffer(_) => {
                self.registry
                    .materialise_buffer(&self.table, handle, &mut self.fences);
                Ok(())
            }
            ResourceDescriptor::Texture(_) => {
                self.registry
                    .materialise_texture(&self.table, handle, &mut self.fences, None)
            }
            ResourceDescriptor::TextureView { .. } => {
                self.registry.materialise_texture_view(&self.table, handle)
            }
        }
    }

    /// Disposes a persistent resource on explicit client request.
    pub fn dispose_persistent(&mut self, handle: ResourceHandle) {
        self.registry.dispose_persistent(handle, &mut self.fences);
    }

    /// Executes one frame.
    pub fn execute(&mut self, submission: FrameSubmission<'_, B>) -> Result<()> {
        validate_submission(&submission)?;
        let FrameSubmission {
            passes,
            usages,
            commands,
            drawables,
            on_complete,
        } = submission;

        let plan = plan_render_targets(passes, usages, &self.table);
        let memoryless = memoryless_candidates(&plan, passes, usages, &self.table, &self.options);
        self.registry.set_memoryless_candidates(&memoryless);
        let compiled = compile_frame(
            passes,
            usages,
            &self.table,
            &plan,
            &self.registry,
            &mut self.fences,
            &self.options,
        );

        let mut ctx = ExecutionCtx {
            table: &mut self.table,
            registry: &mut self.registry,
            fences: &mut self.fences,
            drawables,
            failed: FxHashSet::default(),
        };

        // Pre-frame registry work: CPU-side materialisations and fence
        // bookkeeping staged by the compiler.
        for command in &compiled.pre_frame_commands {
            ctx.run_registry_command(command);
        }
        for handle in &compiled.cpu_touched {
            ctx.registry.note_cpu_touched(*handle);
        }

        let mut command_buffer = self.device.new_command_buffer();
        ctx.encode_passes(&mut command_buffer, &compiled, &plan, passes, commands);

        // Present whatever drawables this frame acquired, then commit.
        for drawable in ctx.registry.take_drawables() {
            command_buffer.present(drawable);
        }
        command_buffer.commit(on_complete);

        let heaps = self.registry.heap_usage();
        log::debug!(
            "frame {}: {} passes, {} encoders, {} resource commands; {} heaps, {} bytes used / {} free",
            self.registry.frame_index(),
            passes.len(),
            compiled.encoder_count,
            compiled.resource_commands.len(),
            heaps.heap_count(),
            heaps.total_used(),
            heaps.total_free(),
        );

        self.registry.cycle_frames(&mut self.fences);
        self.fences.cycle_frames();
        Ok(())
    }
}

/// Derives the frame's memoryless-eligible textures from the merged
/// render-target plan.
///
/// A private render target can live entirely in tile memory when its
/// derived store actions never write it back (it is absent from the plan's
/// stored-texture set) and every active usage is a render-target usage
/// confined to one merged encoder. Persistent, history and window backings
/// cross frame or ownership boundaries and never qualify.
fn memoryless_candidates(
    plan: &RenderTargetPlan,
    passes: &[PassRecord],
    usages: &ResourceUsageLog,
    table: &ResourceTable,
    options: &FrameGraphOptions,
) -> Vec<ResourceHandle> {
    if !options.supports_memoryless {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for target in &plan.targets {
        let attachments = target
            .descriptor
            .color_attachments
            .iter()
            .flatten()
            .map(|a| a.location.texture)
            .chain(
                target
                    .descriptor
                    .depth_attachment
                    .as_ref()
                    .map(|a| a.location.texture),
            )
            .chain(
                target
                    .descriptor
                    .stencil_attachment
                    .as_ref()
                    .map(|a| a.location.texture),
            );

        for texture in attachments {
            if candidates.contains(&texture) || plan.stored_textures.contains(&texture) {
                continue;
            }
            let info = table.info(texture);
            if info.flags.intersects(
                ResourceFlags::PERSISTENT
                    | ResourceFlags::HISTORY_BUFFER
                    | ResourceFlags::WINDOW_HANDLE,
            ) {
                continue;
            }
            if info.descriptor.storage_mode() != Some(StorageMode::Private) {
                continue;
            }

            let texture_usages = usages.usages(texture);
            let confined = !texture_usages.is_empty()
                && texture_usages
                    .iter()
                    .filter(|u| passes[u.pass_index].is_active)
                    .all(|u| {
                        u.usage_type.is_render_target() && target.passes.contains(&u.pass_index)
                    });
            if confined {
                candidates.push(texture);
            }
        }
    }
    candidates
}

fn validate_submission<B: Backend>(submission: &FrameSubmission<'_, B>) -> Result<()> {
    for (index, pass) in submission.passes.iter().enumerate() {
        if pass.pass_index != index {
            return Err(ForgeError::InvalidSubmission(format!(
                "pass {:?} carries pass_index {} at position {index}",
                pass.label, pass.pass_index
            )));
        }
        if pass.command_range.end > submission.commands.len() {
            return Err(ForgeError::InvalidSubmission(format!(
                "pass {:?} command range {:?} exceeds the command stream ({})",
                pass.label,
                pass.command_range,
                submission.commands.len()
            )));
        }
    }
    Ok(())
}

/// Reborrows an optional encoder with a lifetime bounded by `opt` itself
/// rather than the lifetime baked into the trait object reference. Plain
/// `Option::as_deref_mut` can't shorten `&mut dyn Trait` across loop
/// iterations because mutable references are invariant over their type
/// parameter; going through a free function sidesteps that.
fn reborrow_encoder<'s, B: Backend>(
    opt: &'s mut Option<&mut dyn Encoder<B>>,
) -> Option<&'s mut dyn Encoder<B>> {
    match opt {
        Some(encoder) => Some(&mut **encoder),
        None => None,
    }
}

/// Same rationale as [`reborrow_encoder`], for drawable sources.
fn reborrow_drawable<'s, B: Backend>(
    opt: &'s mut Option<&mut dyn DrawableSource<B>>,
) -> Option<&'s mut dyn DrawableSource<B>> {
    match opt {
        Some(drawable) => Some(&mut **drawable),
        None => None,
    }
}

// ─── Execution Context ────────────────────────────────────────────────────────

/// One encoder of whichever kind is currently open.
enum ActiveEncoder<B: Backend> {
    Render(<B::CommandBuffer as CommandBuffer<B>>::RenderEncoder),
    Compute(<B::CommandBuffer as CommandBuffer<B>>::ComputeEncoder),
    Blit(<B::CommandBuffer as CommandBuffer<B>>::BlitEncoder),
    External(<B::CommandBuffer as CommandBuffer<B>>::ExternalEncoder),
    /// Drawable acquisition failed; commands for this encoder are dropped.
    Skipped,
}

impl<B: Backend> ActiveEncoder<B> {
    fn as_dyn(&mut self) -> Option<&mut dyn Encoder<B>> {
        match self {
            Self::Render(encoder) => Some(encoder),
            Self::Compute(encoder) => Some(encoder),
            Self::Blit(encoder) => Some(encoder),
            Self::External(encoder) => Some(encoder),
            Self::Skipped => None,
        }
    }

    fn finish(&mut self) {
        if let Some(encoder) = self.as_dyn() {
            encoder.end_encoding();
        }
    }
}

struct ExecutionCtx<'a, 'd, B: Backend> {
    table: &'a mut ResourceTable,
    registry: &'a mut ResourceRegistry<B>,
    fences: &'a mut FencePool<B>,
    drawables: Option<&'d mut dyn DrawableSource<B>>,
    /// Backings that failed to materialise; commands referencing them are
    /// dropped.
    failed: FxHashSet<ResourceHandle>,
}

impl<B: Backend> ExecutionCtx<'_, '_, B> {
    // ── Pass Walk ──────────────────────────────────────────────────────────

    fn encode_passes(
        &mut self,
        command_buffer: &mut B::CommandBuffer,
        compiled: &CompiledFrame,
        plan: &RenderTargetPlan,
        passes: &[PassRecord],
        frame_commands: &[FrameCommand],
    ) {
        let commands = &compiled.resource_commands;
        let mut cursor = 0usize;
        let mut open: Option<(usize, ActiveEncoder<B>)> = None;

        for (index, pass) in passes.iter().enumerate() {
            if !pass.is_active {
                continue;
            }
            let slot = compiled.pass_encoder_index[index];

            let boundary = match (&open, slot) {
                (Some((current, _)), Some(wanted)) => *current != wanted,
                (None, Some(_)) => true,
                // CPU pass: any open encoder stays open across it.
                (_, None) => false,
            };
            if boundary {
                // Registry-phase commands (materialise has priority 0) must
                // land before the encoder observes the attachments.
                self.advance(
                    commands,
                    &mut cursor,
                    (pass.command_range.start, CommandOrder::Before, 0),
                    None,
                );
                if let Some((_, mut encoder)) = open.take() {
                    encoder.finish();
                }
                let encoder = self.open_encoder(command_buffer, pass, index, plan);
                open = Some((slot.unwrap(), encoder));
            }

            let mut dyn_encoder = open
                .as_mut()
                .and_then(|(_, encoder)| encoder.as_dyn());

            #[cfg(debug_assertions)]
            if let Some(encoder) = dyn_encoder.as_deref_mut() {
                encoder.push_debug_group(pass.label);
            }

            let executes_commands =
                pass.kind != PassKind::Cpu && pass.kind != PassKind::External;
            for command_index in pass.command_range.clone() {
                self.advance(
                    commands,
                    &mut cursor,
                    (command_index, CommandOrder::Before, u8::MAX),
                    reborrow_encoder(&mut dyn_encoder),
                );
                if executes_commands {
                    if let Some(encoder) = reborrow_encoder(&mut dyn_encoder) {
                        encoder.execute(&frame_commands[command_index]);
                    }
                }
                self.advance(
                    commands,
                    &mut cursor,
                    (command_index, CommandOrder::After, u8::MAX),
                    reborrow_encoder(&mut dyn_encoder),
                );
            }

            #[cfg(debug_assertions)]
            if let Some(encoder) = reborrow_encoder(&mut dyn_encoder) {
                encoder.pop_debug_group();
            }
        }

        if let Some((_, mut encoder)) = open.take() {
            encoder.finish();
        }
        // Whatever is left is registry-phase cleanup.
        self.advance(
            commands,
            &mut cursor,
            (usize::MAX, CommandOrder::After, u8::MAX),
            None,
        );
    }

    fn open_encoder(
        &mut self,
        command_buffer: &mut B::CommandBuffer,
        pass: &PassRecord,
        pass_index: usize,
        plan: &RenderTargetPlan,
    ) -> ActiveEncoder<B> {
        match pass.kind {
            PassKind::Draw => {
                let target_index = plan.per_pass[pass_index]
                    .expect("draw pass missing from the render-target plan");
                let target = &plan.targets[target_index];
                match self.resolve_render_target(target, pass.label) {
                    Ok(descriptor) => {
                        ActiveEncoder::Render(command_buffer.render_command_encoder(&descriptor))
                    }
                    Err(error) => {
                        log::warn!(
                            "skipping draw pass {:?}: render target unavailable: {error}",
                            pass.label
                        );
                        ActiveEncoder::Skipped
                    }
                }
            }
            PassKind::Compute => {
                let mut encoder = command_buffer.compute_command_encoder();
                encoder.set_label(pass.label);
                ActiveEncoder::Compute(encoder)
            }
            PassKind::Blit => {
                let mut encoder = command_buffer.blit_command_encoder();
                encoder.set_label(pass.label);
                ActiveEncoder::Blit(encoder)
            }
            PassKind::External => {
                let mut encoder = command_buffer.external_command_encoder();
                encoder.set_label(pass.label);
                ActiveEncoder::External(encoder)
            }
            PassKind::Cpu => unreachable!("CPU passes never open an encoder"),
        }
    }

    /// Resolves a merged render target to native textures with the derived
    /// load/store actions.
    fn resolve_render_target(
        &self,
        target: &MergedRenderTarget,
        label: &'static str,
    ) -> Result<RenderPassDescriptor<B>> {
        let mut descriptor = RenderPassDescriptor {
            label: Some(label),
            color_attachments: smallvec::SmallVec::new(),
            depth_attachment: None,
            stencil_attachment: None,
            visibility_result_buffer: None,
            render_target_array_length: target.descriptor.render_target_array_length,
        };

        for (slot, attachment) in target.descriptor.color_attachments.iter().enumerate() {
            let resolved = match attachment {
                None => None,
                Some(attachment) => {
                    let texture = self
                        .registry
                        .texture(attachment.location.texture)
                        .ok_or(ForgeError::BackingMissing("colour attachment"))?
                        .texture
                        .clone();
                    let (load_action, store_action) = target.color_actions[slot];
                    Some(ResolvedColorAttachment {
                        texture,
                        slice: attachment.location.slice,
                        level: attachment.location.level,
                        depth_plane: attachment.location.depth_plane,
                        load_action,
                        store_action,
                        clear_color: attachment.clear_color,
                    })
                }
            };
            descriptor.color_attachments.push(resolved);
        }

        if let Some(attachment) = &target.descriptor.depth_attachment {
            let texture = self
                .registry
                .texture(attachment.location.texture)
                .ok_or(ForgeError::BackingMissing("depth attachment"))?
                .texture
                .clone();
            let (load_action, store_action) = target.depth_actions;
            descriptor.depth_attachment = Some(ResolvedDepthAttachment {
                texture,
                slice: attachment.location.slice,
                level: attachment.location.level,
                depth_plane: attachment.location.depth_plane,
                load_action,
                store_action,
                clear_depth: attachment.clear_depth,
            });
        }

        if let Some(attachment) = &target.descriptor.stencil_attachment {
            let texture = self
                .registry
                .texture(attachment.location.texture)
                .ok_or(ForgeError::BackingMissing("stencil attachment"))?
                .texture
                .clone();
            let (load_action, store_action) = target.stencil_actions;
            descriptor.stencil_attachment = Some(ResolvedStencilAttachment {
                texture,
                slice: attachment.location.slice,
                level: attachment.location.level,
                depth_plane: attachment.location.depth_plane,
                load_action,
                store_action,
                clear_stencil: attachment.clear_stencil,
            });
        }

        if let Some(buffer) = target.descriptor.visibility_result_buffer {
            descriptor.visibility_result_buffer = Some(
                self.registry
                    .buffer(buffer)
                    .ok_or(ForgeError::BackingMissing("visibility result buffer"))?
                    .buffer
                    .clone(),
            );
        }
        Ok(descriptor)
    }

    // ── Resource-Command Dispatch ──────────────────────────────────────────

    /// Executes pending resource commands whose sort key is at or before
    /// `limit`: registry commands directly, encoder commands against the
    /// open encoder (dropped with a diagnostic if the pass was skipped).
    fn advance(
        &mut self,
        commands: &[ResourceCommand],
        cursor: &mut usize,
        limit: (usize, CommandOrder, u8),
        mut encoder: Option<&mut dyn Encoder<B>>,
    ) {
        while *cursor < commands.len() && commands[*cursor].sort_key() <= limit {
            let command = &commands[*cursor];
            *cursor += 1;
            if command.kind.is_registry_command() {
                self.run_registry_command(command);
            } else if let Some(encoder) = encoder.as_deref_mut() {
                self.run_encoder_command(command, encoder);
            } else {
                log::debug!("dropping encoder command for a skipped pass: {command:?}");
            }
        }
    }

    fn run_registry_command(&mut self, command: &ResourceCommand) {
        match &command.kind {
            ResourceCommandKind::MaterialiseBuffer { resource } => {
                self.registry
                    .materialise_buffer(self.table, *resource, self.fences);
            }
            ResourceCommandKind::MaterialiseTexture { resource } => {
                let result = self.registry.materialise_texture(
                    self.table,
                    *resource,
                    self.fences,
                    reborrow_drawable(&mut self.drawables),
                );
                if let Err(error) = result {
                    log::warn!("texture materialisation failed: {error}");
                    self.failed.insert(*resource);
                }
            }
            ResourceCommandKind::MaterialiseTextureView { resource } => {
                if let Err(error) = self.registry.materialise_texture_view(self.table, *resource)
                {
                    log::warn!("texture view materialisation failed: {error}");
                    self.failed.insert(*resource);
                }
            }
            ResourceCommandKind::DisposeResource { resource } => {
                if !self.failed.contains(resource) {
                    self.registry.dispose(self.table, *resource, self.fences);
                }
            }
            ResourceCommandKind::SetDisposalFences {
                resource,
                read_fence,
                write_fences,
            } => {
                if self.failed.contains(resource) {
                    // The reference never existed; drop the counts the
                    // compiler allocated for it.
                    for fence in read_fence.iter().chain(write_fences.iter()) {
                        self.fences.release(*fence);
                    }
                } else {
                    self.registry.set_disposal_fences(
                        *resource,
                        *read_fence,
                        write_fences,
                        self.fences,
                    );
                }
            }
            ResourceCommandKind::ReleaseMultiframeFences { resource } => {
                self.registry
                    .release_multiframe_fences(*resource, self.fences);
            }
            ResourceCommandKind::RetainFence { fence } => self.fences.retain(*fence),
            ResourceCommandKind::ReleaseFence { fence } => self.fences.release(*fence),
            other => {
                unreachable!("encoder command routed to the registry: {other:?}");
            }
        }
    }

    fn run_encoder_command(&mut self, command: &ResourceCommand, encoder: &mut dyn Encoder<B>) {
        match &command.kind {
            ResourceCommandKind::UseResource {
                resource,
                usage,
                stages,
            } => {
                if self.failed.contains(resource) {
                    return;
                }
                if let Some(reference) = self.registry.buffer(*resource) {
                    encoder.use_resource(
                        NativeResource::Buffer(&reference.buffer),
                        *usage,
                        *stages,
                    );
                } else if let Some(reference) = self.registry.texture(*resource) {
                    encoder.use_resource(
                        NativeResource::Texture(&reference.texture),
                        *usage,
                        *stages,
                    );
                } else if let Some((buffer, _)) = self.registry.argument_buffer_native(*resource)
                {
                    encoder.use_resource(NativeResource::Buffer(&buffer), *usage, *stages);
                }
            }
            ResourceCommandKind::MemoryBarrier {
                resource,
                after_stages,
                before_stages,
            } => {
                let scope = self.barrier_scope(*resource);
                encoder.memory_barrier(scope, *after_stages, *before_stages);
            }
            ResourceCommandKind::TextureBarrier { .. } => encoder.texture_barrier(),
            ResourceCommandKind::UpdateFence {
                fence,
                after_stages,
            } => {
                encoder.update_fence(self.fences.native(*fence), *after_stages);
            }
            ResourceCommandKind::WaitForFence {
                fence,
                before_stages,
            } => {
                encoder.wait_for_fence(self.fences.native(*fence), *before_stages);
            }
            ResourceCommandKind::WaitForMultiframeFence {
                resource,
                role,
                stages,
            } => {
                if self.failed.contains(resource) {
                    return;
                }
                for fence in self.registry.multiframe_wait_fences(*resource, *role) {
                    encoder.wait_for_fence(self.fences.native(fence), *stages);
                }
            }
            other => unreachable!("registry command routed to an encoder: {other:?}"),
        }
    }

    fn barrier_scope(&self, resource: ResourceHandle) -> BarrierScope {
        match self.table.info(resource).descriptor {
            ResourceDescriptor::Buffer(_) => BarrierScope::Buffers,
            ResourceDescriptor::Texture(descriptor) => {
                if descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
                    BarrierScope::RenderTargets
                } else {
                    BarrierScope::Textures
                }
            }
            ResourceDescriptor::TextureView { .. } => BarrierScope::Textures,
        }
    }
}
