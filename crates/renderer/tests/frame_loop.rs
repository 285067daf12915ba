//! Integration tests for the frame loop on the null backend.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use parking_lot::Mutex;

use forge_core::Settings;
use forge_renderer::{
    DepthMode, FramePhase, FrameView, GpuScene, MeshDraw, NoOverlay, Renderer, ShaderSet,
};
use forge_rhi::hal::SurfaceHandle;
use forge_rhi::null::{Command, Null};
use forge_rhi::types::{ComparisonFunc, DescriptorHeapType, PresentStatus, ResourceState};
use forge_rhi::RhiError;
use forge_scene::{Primitive, Scene, SceneObject, Transform};

fn shaders() -> ShaderSet {
    // Opaque to the null backend; it only rejects empty bytecode.
    ShaderSet::from_bytes(b"DXBC-vs".to_vec(), b"DXBC-ps".to_vec())
}

fn create(settings: &Settings, width: u32, height: u32) -> Renderer<Null> {
    Renderer::new(&SurfaceHandle::headless(), width, height, settings, shaders())
        .expect("Failed to create renderer")
}

fn single_box(renderer: &Renderer<Null>) -> (Scene, Vec<MeshDraw>) {
    let mut scene = Scene::default();
    scene.add(SceneObject::new(Primitive::Box, Transform::new(), Vec4::ONE));
    let gpu_scene = GpuScene::<Null>::new(renderer.device(), &scene).expect("Failed to upload scene");
    let draws = gpu_scene.draws(&scene);
    (scene, draws)
}

fn index_of(commands: &[Command], pred: impl Fn(&Command) -> bool) -> usize {
    commands
        .iter()
        .position(pred)
        .expect("command not recorded")
}

fn draw_count(commands: &[Command]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, Command::DrawIndexedInstanced { .. }))
        .count()
}

#[test]
fn test_two_frame_steady_state() {
    let mut renderer = create(&Settings::default(), 1280, 720);
    let (scene, draws) = single_box(&renderer);
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].index_count, 36);
    let view = FrameView::from_camera(&scene.camera);

    // Frame 0
    renderer.begin_frame().unwrap();
    renderer.setup_frame(&view).unwrap();
    renderer.record_frame(&draws, &mut NoOverlay).unwrap();
    renderer.submit_frame().unwrap();
    assert_eq!(renderer.context().fence_value(0), 1);
    renderer.end_frame().unwrap();
    assert_eq!(renderer.frame_index(), 1);

    // Frame 1
    renderer.render_frame(&view, &draws, &mut NoOverlay).unwrap();
    assert_eq!(renderer.context().fence_value(1), 2);
    assert_eq!(renderer.frame_index(), 0);

    // Two 256-byte per-object blocks per frame, one frame per slot.
    assert_eq!(renderer.frame_ring().used(0), 512);
    assert_eq!(renderer.frame_ring().used(1), 512);
    assert_eq!(renderer.frame_ring().submitted_fence(0), 1);
    assert_eq!(renderer.frame_ring().submitted_fence(1), 2);

    let stats = renderer.device().stats();
    assert_eq!(stats.command_lists_executed, 2, "one submission per frame");
    assert_eq!(stats.signals, 2, "one signal per frame");
    assert_eq!(stats.presents, 2);
    assert_eq!(stats.draws, 2);

    let commands = renderer.device().gpu().last_command_list();
    assert_eq!(draw_count(&commands), 1);
    assert!(commands.contains(&Command::DrawIndexedInstanced {
        index_count: 36,
        instance_count: 1,
        start_index: 0,
        base_vertex: 0,
        start_instance: 0,
    }));
}

#[test]
fn test_recorded_frame_order() {
    let mut renderer = create(&Settings::default(), 1280, 720);
    let (scene, draws) = single_box(&renderer);
    renderer
        .render_frame(&FrameView::from_camera(&scene.camera), &draws, &mut NoOverlay)
        .unwrap();

    let commands = renderer.device().gpu().last_command_list();
    let first_barrier = index_of(&commands, |c| matches!(c, Command::Barrier { .. }));
    let clear = index_of(&commands, |c| matches!(c, Command::ClearRenderTarget { .. }));
    let heaps = index_of(&commands, |c| matches!(c, Command::SetDescriptorHeaps(_)));
    let draw = index_of(&commands, |c| matches!(c, Command::DrawIndexedInstanced { .. }));
    assert_eq!(first_barrier, 0, "back buffer transitions first");
    assert!(clear < heaps && heaps < draw);

    // Depth and back buffer are returned to their between-frame states last.
    let tail: Vec<_> = commands[commands.len() - 2..].to_vec();
    assert!(tail.iter().all(|c| matches!(c, Command::Barrier { .. })));
    assert!(matches!(
        tail[1],
        Command::Barrier {
            after: ResourceState::Present,
            ..
        }
    ));

    // Reversed-Z by default: depth cleared to 0, no stencil on D32.
    assert!(commands.contains(&Command::ClearDepthStencil {
        dsv: renderer.depth_buffer().dsv(),
        depth: Some(0.0),
        stencil: None,
    }));
}

#[test]
fn test_ring_slot_reuse_waits_for_fence() {
    let mut settings = Settings::default();
    settings.ring_buffer_capacity_per_frame = 4096;
    let mut renderer = create(&settings, 1280, 720);
    let view = FrameView::default();
    let block = [0u8; 256];

    for (slot, fence) in [(0, 1), (1, 2)] {
        renderer.begin_frame().unwrap();
        assert_eq!(renderer.frame_index(), slot);
        for _ in 0..10 {
            renderer
                .frame_ring()
                .allocate_constant_buffer(&block)
                .unwrap();
        }
        assert_eq!(renderer.frame_ring().used(slot), 2560);
        renderer.setup_frame(&view).unwrap();
        renderer.record_frame(&[], &mut NoOverlay).unwrap();
        renderer.submit_frame().unwrap();
        assert_eq!(renderer.frame_ring().submitted_fence(slot), fence);
        renderer.end_frame().unwrap();
    }

    // The null GPU only retires work when the CPU waits for it.
    assert_eq!(renderer.context().completed_fence_value(), 0);

    renderer.begin_frame().unwrap();
    assert_eq!(renderer.frame_index(), 0);
    assert!(renderer.context().completed_fence_value() >= 1);
    assert_eq!(renderer.frame_ring().used(0), 0);
    assert_eq!(renderer.frame_ring().used(1), 2560);

    for _ in 0..16 {
        renderer
            .frame_ring()
            .allocate_constant_buffer(&block)
            .unwrap();
    }
    assert_eq!(renderer.frame_ring().used(0), 4096);

    let overflow = renderer.frame_ring().allocate_constant_buffer(&block);
    assert!(matches!(
        overflow,
        Err(RhiError::RingBufferExhausted {
            requested: 256,
            offset: 4096,
            capacity: 4096,
        })
    ));
    assert_eq!(renderer.frame_ring().used(0), 4096);
}

#[test]
fn test_failed_recording_blocks_later_frames() {
    // Room for the vertex constants of one draw but not its pixel constants.
    let mut settings = Settings::default();
    settings.ring_buffer_capacity_per_frame = 256;
    let mut renderer = create(&settings, 1280, 720);
    let (scene, draws) = single_box(&renderer);
    let view = FrameView::from_camera(&scene.camera);

    renderer.begin_frame().unwrap();
    renderer.setup_frame(&view).unwrap();
    assert!(matches!(
        renderer.record_frame(&draws, &mut NoOverlay),
        Err(RhiError::RingBufferExhausted { offset: 256, capacity: 256, .. })
    ));
    assert_eq!(renderer.scheduler().phase(), FramePhase::SetUp);

    assert!(matches!(
        renderer.begin_frame(),
        Err(RhiError::FrameOutOfOrder { .. })
    ));
    assert!(matches!(
        renderer.resize(800, 600),
        Err(RhiError::FrameOutOfOrder { .. })
    ));
    assert!(matches!(
        renderer.set_depth_mode(DepthMode::Standard),
        Err(RhiError::FrameOutOfOrder { .. })
    ));
    assert_eq!(renderer.frame_count(), 0);
}

#[test]
fn test_resize_round_trip() {
    let mut renderer = create(&Settings::default(), 1280, 720);
    let (scene, draws) = single_box(&renderer);
    let view = FrameView::from_camera(&scene.camera);
    renderer.render_frame(&view, &draws, &mut NoOverlay).unwrap();

    let back_buffer_ids = |renderer: &Renderer<Null>| -> Vec<u64> {
        (0..renderer.swapchain().buffer_count())
            .filter_map(|i| renderer.swapchain().back_buffer(i).map(|b| b.id()))
            .collect()
    };
    let rtvs_before = renderer.swapchain().rtv_indices();
    let ids_before = back_buffer_ids(&renderer);
    let dsv_before = renderer.depth_buffer().dsv_index();
    assert_eq!(rtvs_before, vec![0, 1]);

    assert!(renderer.resize(1920, 1080).unwrap());

    assert_eq!(renderer.swapchain().rtv_indices(), rtvs_before);
    let ids_after = back_buffer_ids(&renderer);
    assert_eq!(ids_after.len(), ids_before.len());
    assert!(
        ids_after.iter().all(|id| !ids_before.contains(id)),
        "back buffers should be recreated"
    );
    assert_eq!(renderer.depth_buffer().dsv_index(), dsv_before);
    assert_eq!(renderer.depth_buffer().width(), 1920);
    assert_eq!(renderer.depth_buffer().height(), 1080);

    let viewport = renderer.viewport();
    assert_eq!(viewport.width, 1920.0);
    assert_eq!(viewport.height, 1080.0);
    assert_eq!(viewport.min_depth, 1.0);
    assert_eq!(viewport.max_depth, 0.0);

    // Minimized window: nothing happens.
    assert!(!renderer.resize(0, 0).unwrap());
    assert_eq!(renderer.width(), 1920);

    renderer.render_frame(&view, &draws, &mut NoOverlay).unwrap();
    assert_eq!(renderer.frame_count(), 2);
}

#[test]
fn test_depth_mode_switch() {
    let mut renderer = create(&Settings::default(), 1280, 720);
    assert_eq!(renderer.depth_convention().mode(), DepthMode::ReversedZ);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let observer = seen.clone();
    let _subscription = renderer
        .depth_convention()
        .subscribe(move |mode| observer.lock().push(mode));

    assert!(renderer.set_depth_mode(DepthMode::Standard).unwrap());
    assert!(!renderer.set_depth_mode(DepthMode::Standard).unwrap());
    assert_eq!(*seen.lock(), vec![DepthMode::Standard]);

    let convention = renderer.depth_convention();
    assert_eq!(convention.clear_depth(), 1.0);
    assert_eq!(convention.comparison(), ComparisonFunc::LessEqual);

    let projection = convention.perspective(60.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
    let ndc_depth = |z: f32| {
        let clip = projection * Vec3::new(0.0, 0.0, z).extend(1.0);
        clip.z / clip.w
    };
    assert!(ndc_depth(0.1).abs() < 1e-5);
    assert!((ndc_depth(100.0) - 1.0).abs() < 1e-5);

    // The depth buffer and pipeline follow the new convention.
    assert_eq!(renderer.depth_buffer().clear_depth(), 1.0);
    assert_eq!(renderer.pipeline().depth_mode(), DepthMode::Standard);
    assert_eq!(
        renderer.pipeline().pipeline().depth_compare,
        ComparisonFunc::LessEqual
    );
    assert_eq!(renderer.viewport().min_depth, 0.0);
    assert_eq!(renderer.viewport().max_depth, 1.0);

    renderer
        .render_frame(&FrameView::default(), &[], &mut NoOverlay)
        .unwrap();
    let commands = renderer.device().gpu().last_command_list();
    assert!(commands.contains(&Command::ClearDepthStencil {
        dsv: renderer.depth_buffer().dsv(),
        depth: Some(1.0),
        stencil: None,
    }));
}

#[test]
fn test_out_of_date_swapchain_is_recreated() {
    let mut renderer = create(&Settings::default(), 1280, 720);
    let view = FrameView::default();
    renderer.render_frame(&view, &[], &mut NoOverlay).unwrap();
    assert_eq!(renderer.frame_index(), 1);

    renderer
        .device()
        .gpu()
        .inject_present_status(PresentStatus::OutOfDate);
    let status = renderer.render_frame(&view, &[], &mut NoOverlay).unwrap();
    assert_eq!(status, PresentStatus::OutOfDate);

    // Recreated buffers start over at index 0, in the Present state.
    assert_eq!(renderer.frame_index(), 0);
    assert_eq!(
        renderer.swapchain().back_buffer_state(0),
        Some(ResourceState::Present)
    );
    assert_eq!(renderer.width(), 1280);

    let status = renderer.render_frame(&view, &[], &mut NoOverlay).unwrap();
    assert_eq!(status, PresentStatus::Presented);
}

#[test]
fn test_three_frames_in_flight() {
    let mut settings = Settings::default();
    settings.frames_in_flight = 3;
    let mut renderer = create(&settings, 800, 600);
    let (scene, draws) = single_box(&renderer);
    let view = FrameView::from_camera(&scene.camera);

    let mut slots = Vec::new();
    for _ in 0..6 {
        slots.push(renderer.frame_index());
        renderer.render_frame(&view, &draws, &mut NoOverlay).unwrap();
    }
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    assert_eq!(renderer.context().timeline().values(), &[4, 5, 6]);
    // The CPU never waited for more than the slot it was about to reuse.
    assert!(renderer.context().completed_fence_value() <= 3);
}

#[test]
fn test_state_mismatch_fails_submission() {
    let mut settings = Settings::default();
    settings.enable_gpu_validation = true;
    let mut renderer = create(&settings, 640, 480);
    let depth = renderer.depth_buffer().resource().clone();

    renderer.begin_frame().unwrap();
    renderer.setup_frame(&FrameView::default()).unwrap();
    // The depth buffer rests in DepthRead, not RenderTarget.
    renderer
        .barrier(&depth, ResourceState::RenderTarget, ResourceState::DepthWrite)
        .unwrap();
    drop(depth);
    renderer.record_frame(&[], &mut NoOverlay).unwrap();

    assert!(matches!(
        renderer.submit_frame(),
        Err(RhiError::Validation(_))
    ));
    assert_eq!(renderer.scheduler().phase(), FramePhase::Recorded);
}

/// Counters a freshly created renderer must start from.
fn assert_initial_state(renderer: &Renderer<Null>) {
    let timeline = renderer.context().timeline();
    assert_eq!(timeline.values(), &[0, 0]);
    assert_eq!(timeline.next_value(), 1);
    assert_eq!(timeline.last_signaled(), 0);

    let ring = renderer.frame_ring();
    for slot in 0..ring.frames_in_flight() {
        assert_eq!(ring.used(slot), 0);
        assert_eq!(ring.submitted_fence(slot), 0);
    }

    // Back buffers, depth buffer, null texture and the sampler table.
    let expected = [
        (DescriptorHeapType::RenderTarget, 2),
        (DescriptorHeapType::DepthStencil, 1),
        (DescriptorHeapType::ShaderResource, 1),
        (DescriptorHeapType::Sampler, 33),
    ];
    for (ty, count) in expected {
        let heap = renderer.heaps().heap(ty);
        assert_eq!(heap.allocator().cursor(), count, "{ty:?} cursor");
        assert_eq!(heap.issued_count(), count, "{ty:?} issued");
        assert_eq!(heap.allocator().free_list_len(), 0, "{ty:?} free list");
    }
    assert_eq!(renderer.swapchain().rtv_indices(), vec![0, 1]);
    assert_eq!(renderer.depth_buffer().dsv_index(), 0);
    assert_eq!(renderer.frame_index(), 0);
    assert_eq!(renderer.frame_count(), 0);
    assert_eq!(renderer.scheduler().phase(), FramePhase::Idle);
}

#[test]
fn test_shutdown_and_reinitialize() {
    let settings = Settings::default();
    for _ in 0..2 {
        let mut renderer = create(&settings, 1280, 720);
        assert_initial_state(&renderer);

        let (scene, draws) = single_box(&renderer);
        let view = FrameView::from_camera(&scene.camera);
        for _ in 0..3 {
            renderer.render_frame(&view, &draws, &mut NoOverlay).unwrap();
        }
        assert_eq!(renderer.frame_count(), 3);
        assert_eq!(renderer.context().timeline().next_value(), 4);
        assert_eq!(renderer.heaps().heap(DescriptorHeapType::ShaderResource).issued_count(), 1);
        drop(renderer);
    }
}
