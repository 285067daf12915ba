//! Integration tests for descriptor allocation through the renderer.

use forge_core::config::DescriptorCapacities;
use forge_core::Settings;
use forge_renderer::sampler_table::{SamplerTable, SAMPLER_COUNT};
use forge_renderer::{Renderer, ShaderSet};
use forge_rhi::descriptor::DescriptorHeapManager;
use forge_rhi::device::{DeviceConfig, DeviceContext};
use forge_rhi::hal::SurfaceHandle;
use forge_rhi::null::{Null, ViewRecord};
use forge_rhi::types::{AddressMode, DescriptorHeapType, Filter};
use forge_rhi::RhiError;

fn heaps(ctx: &DeviceContext<Null>) -> DescriptorHeapManager<Null> {
    DescriptorHeapManager::new(ctx.device(), &DescriptorCapacities::default())
        .expect("Failed to create descriptor heaps")
}

#[test]
fn test_free_list_reuse_is_lifo() {
    let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
    let heaps = heaps(&ctx);
    let ty = DescriptorHeapType::ShaderResource;

    let handles: Vec<_> = (0..10).map(|_| heaps.allocate_handle(ty).unwrap()).collect();
    let indices: Vec<u32> = handles.iter().map(|h| h.index).collect();
    assert_eq!(indices, (0..10).collect::<Vec<_>>());

    assert!(heaps.free(ty, handles[4]));
    assert!(heaps.free(ty, handles[7]));
    assert_eq!(heaps.allocate_handle(ty).unwrap().index, 7);
    assert_eq!(heaps.allocate_handle(ty).unwrap().index, 4);
    assert_eq!(heaps.allocate_handle(ty).unwrap().index, 10);
}

#[test]
fn test_contiguous_sampler_block() {
    let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
    let heaps = heaps(&ctx);
    let ty = DescriptorHeapType::Sampler;
    let increment = heaps.heap(ty).increment_size() as usize;

    let block = heaps.allocate_contiguous(ty, 33).unwrap();
    assert_eq!(block.first().index, 0);
    let cpu: Vec<usize> = block.iter().map(|h| h.cpu.0).collect();
    assert_eq!(cpu.len(), 33);
    for (i, address) in cpu.iter().enumerate() {
        assert_eq!(*address, cpu[0] + i * increment);
    }

    let (first, count) = block.into_raw();
    assert_eq!(heaps.free_contiguous(ty, first, count), 33);

    // The cursor stays at 33; the free list hands back the last slot pushed.
    assert_eq!(heaps.heap(ty).allocator().cursor(), 33);
    assert_eq!(heaps.allocate_handle(ty).unwrap().index, 32);
}

#[test]
fn test_renderer_descriptor_layout() {
    let renderer = Renderer::<Null>::new(
        &SurfaceHandle::headless(),
        1280,
        720,
        &Settings::default(),
        ShaderSet::from_bytes(b"vs".to_vec(), b"ps".to_vec()),
    )
    .unwrap();

    // The sampler table owns the start of the sampler heap.
    let samplers = renderer.samplers();
    assert_eq!(samplers.first_index(), 0);
    assert_eq!(samplers.len(), SAMPLER_COUNT);
    let anisotropic_clamp = SamplerTable::index_of(Filter::Anisotropic, AddressMode::Clamp);
    let handle = renderer
        .heaps()
        .heap(DescriptorHeapType::Sampler)
        .handle_at(anisotropic_clamp)
        .unwrap();
    match renderer.device().gpu().view(handle.cpu) {
        Some(ViewRecord::Sampler(desc)) => {
            assert_eq!(desc.filter, Filter::Anisotropic);
            assert_eq!(desc.address_mode, AddressMode::Clamp);
        }
        other => panic!("expected a sampler, found {other:?}"),
    }

    // SRV slot 0 holds the null texture bound until a real one is set.
    let table = renderer.texture_table();
    assert_eq!(table, renderer.heaps().heap(DescriptorHeapType::ShaderResource).gpu_start());
    let srv = renderer.allocate_descriptor(DescriptorHeapType::ShaderResource).unwrap();
    assert_eq!(srv.index, 1);
    assert!(renderer.free_descriptor(DescriptorHeapType::ShaderResource, srv));
    assert!(!renderer.free_descriptor(DescriptorHeapType::ShaderResource, srv));

    // Back buffers and the depth buffer took the first RTV and DSV slots.
    assert_eq!(renderer.swapchain().rtv_indices(), vec![0, 1]);
    assert_eq!(renderer.depth_buffer().dsv_index(), 0);
}

#[test]
fn test_exhausted_heap_reports_error() {
    let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
    let heaps = DescriptorHeapManager::<Null>::new(
        ctx.device(),
        &DescriptorCapacities {
            render_target: 2,
            ..DescriptorCapacities::default()
        },
    )
    .unwrap();
    let ty = DescriptorHeapType::RenderTarget;
    let _a = heaps.allocate(ty).unwrap();
    let _b = heaps.allocate(ty).unwrap();
    assert!(matches!(
        heaps.allocate(ty),
        Err(RhiError::DescriptorHeapExhausted { capacity: 2, .. })
    ));
}
