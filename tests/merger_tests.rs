//! Render-Target Merger Tests
//!
//! Covers:
//! - greedy coalescing of compatible consecutive draw passes
//! - merge refusal on clears, arity mismatches and attachment conflicts
//! - load/store derivation from the usage log
//! - visibility-buffer adoption and array-length max-reduction

use forge::backend::{LoadAction, PixelFormat, StoreAction, TextureDescriptor};
use forge::graph::pass::{
    ColorAttachment, DepthAttachment, AttachmentLocation, PassKind, PassRecord,
    RenderTargetDescriptor,
};
use forge::graph::plan_render_targets;
use forge::resource::{
    RenderStages, ResourceFlags, ResourceHandle, ResourceTable, ResourceUsage, ResourceUsageLog,
    ResourceUsageType,
};

fn texture(table: &mut ResourceTable, flags: ResourceFlags) -> ResourceHandle {
    table.new_texture(
        TextureDescriptor::render_target_2d(64, 64, PixelFormat::Rgba8Unorm),
        flags,
        None,
    )
}

fn depth_texture(table: &mut ResourceTable) -> ResourceHandle {
    table.new_texture(
        TextureDescriptor::render_target_2d(64, 64, PixelFormat::Depth32Float),
        ResourceFlags::empty(),
        None,
    )
}

fn rt_usage(
    log: &mut ResourceUsageLog,
    texture: ResourceHandle,
    pass: usize,
    range: std::ops::Range<usize>,
    usage_type: ResourceUsageType,
) {
    log.record(
        texture,
        ResourceUsage {
            pass_index: pass,
            command_range: range,
            usage_type,
            stages: RenderStages::FRAGMENT,
            in_argument_buffer: false,
        },
    );
}

fn draw_pass(index: usize, range: std::ops::Range<usize>, rt: RenderTargetDescriptor) -> PassRecord {
    PassRecord::draw("draw", index, range, rt)
}

#[test]
fn compatible_consecutive_draws_share_one_target() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());
    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, color, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
        draw_pass(1, 1..2, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
    ];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets.len(), 1);
    assert_eq!(plan.per_pass, vec![Some(0), Some(0)]);
    assert_eq!(plan.targets[0].passes.as_slice(), &[0, 1]);
    assert!(plan.same_target(0, 1));
}

#[test]
fn second_clear_refuses_merge_and_derives_actions() {
    // Two draws share one colour target; the second clears it. The merge is
    // refused, the first encoder must store (the second declares a read),
    // and the second encoder clears on load.
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());
    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, color, 1, 1..2, ResourceUsageType::ReadWriteRenderTarget);

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
        draw_pass(
            1,
            1..2,
            RenderTargetDescriptor::single_color(ColorAttachment::clear(color, [0.0; 4])),
        ),
    ];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets.len(), 2);
    assert!(!plan.same_target(0, 1));

    // First target: first use of an uninitialised texture, stored for the
    // second encoder's declared read.
    assert_eq!(
        plan.targets[0].color_actions[0],
        (LoadAction::DontCare, StoreAction::Store)
    );
    // Second target: clears, and nothing reads afterwards.
    assert_eq!(
        plan.targets[1].color_actions[0],
        (LoadAction::Clear, StoreAction::DontCare)
    );
}

#[test]
fn initialised_texture_loads_instead_of_dont_care() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());
    table.mark_initialised(color);

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![draw_pass(
        0,
        0..1,
        RenderTargetDescriptor::single_color(ColorAttachment::keep(color)),
    )];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets[0].color_actions[0].0, LoadAction::Load);
}

#[test]
fn arity_mismatch_splits_targets() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());
    let extra = texture(&mut table, ResourceFlags::empty());

    let mut two_colors = RenderTargetDescriptor::single_color(ColorAttachment::keep(color));
    two_colors
        .color_attachments
        .push(Some(ColorAttachment::keep(extra)));

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, color, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, extra, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
        draw_pass(1, 1..2, two_colors),
    ];
    let plan = plan_render_targets(&passes, &log, &table);
    assert_eq!(plan.targets.len(), 2);
}

#[test]
fn different_textures_split_targets() {
    let mut table = ResourceTable::new();
    let a = texture(&mut table, ResourceFlags::empty());
    let b = texture(&mut table, ResourceFlags::empty());

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, a, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, b, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(a))),
        draw_pass(1, 1..2, RenderTargetDescriptor::single_color(ColorAttachment::keep(b))),
    ];
    let plan = plan_render_targets(&passes, &log, &table);
    assert_eq!(plan.targets.len(), 2);
}

#[test]
fn depth_attachment_inherited_from_later_pass() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());
    let depth = depth_texture(&mut table);

    let mut with_depth = RenderTargetDescriptor::single_color(ColorAttachment::keep(color));
    with_depth.depth_attachment = Some(DepthAttachment {
        location: AttachmentLocation::whole(depth),
        wants_clear: false,
        clear_depth: 0.0,
    });

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, color, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, depth, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
        draw_pass(1, 1..2, with_depth),
    ];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets.len(), 1);
    assert!(plan.targets[0].descriptor.depth_attachment.is_some());
}

#[test]
fn array_length_is_max_reduced() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());

    let mut short = RenderTargetDescriptor::single_color(ColorAttachment::keep(color));
    short.render_target_array_length = 2;
    let mut long = RenderTargetDescriptor::single_color(ColorAttachment::keep(color));
    long.render_target_array_length = 6;

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    rt_usage(&mut log, color, 1, 1..2, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![draw_pass(0, 0..1, short), draw_pass(1, 1..2, long)];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets.len(), 1);
    assert_eq!(plan.targets[0].descriptor.render_target_array_length, 6);
}

#[test]
fn persistent_texture_stores_without_a_reader() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::PERSISTENT);

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![draw_pass(
        0,
        0..1,
        RenderTargetDescriptor::single_color(ColorAttachment::keep(color)),
    )];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets[0].color_actions[0].1, StoreAction::Store);
    assert_eq!(plan.stored_textures, vec![color]);
}

#[test]
fn transient_without_reader_is_not_stored() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);

    let passes = vec![draw_pass(
        0,
        0..1,
        RenderTargetDescriptor::single_color(ColorAttachment::keep(color)),
    )];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets[0].color_actions[0].1, StoreAction::DontCare);
    assert!(plan.stored_textures.is_empty());
}

#[test]
fn later_compute_reader_forces_store() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    log.record(
        color,
        ResourceUsage {
            pass_index: 1,
            command_range: 1..2,
            usage_type: ResourceUsageType::Read,
            stages: RenderStages::COMPUTE,
            in_argument_buffer: false,
        },
    );

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
        PassRecord::new(PassKind::Compute, "sample", 1, 1..2),
    ];
    let plan = plan_render_targets(&passes, &log, &table);

    assert_eq!(plan.targets[0].color_actions[0].1, StoreAction::Store);
}

#[test]
fn inactive_pass_usages_are_ignored() {
    let mut table = ResourceTable::new();
    let color = texture(&mut table, ResourceFlags::empty());

    let mut log = ResourceUsageLog::new();
    rt_usage(&mut log, color, 0, 0..1, ResourceUsageType::WriteOnlyRenderTarget);
    log.record(
        color,
        ResourceUsage {
            pass_index: 1,
            command_range: 1..2,
            usage_type: ResourceUsageType::Read,
            stages: RenderStages::COMPUTE,
            in_argument_buffer: false,
        },
    );

    let mut reader = PassRecord::new(PassKind::Compute, "disabled", 1, 1..2);
    reader.is_active = false;

    let passes = vec![
        draw_pass(0, 0..1, RenderTargetDescriptor::single_color(ColorAttachment::keep(color))),
        reader,
    ];
    let plan = plan_render_targets(&passes, &log, &table);

    // The only reader is inactive, so nothing forces a store.
    assert_eq!(plan.targets[0].color_actions[0].1, StoreAction::DontCare);
}
