mod common;

use std::sync::Arc;

use common::*;
use memory::DenseMemory;
use vgpu_devices_gpu::{
    DeviceError, NullDisplayBackend, VirtioGpu, VirtioGpuDeviceConfig, VirtioGpuHost,
};
use virtio_gpu_proto::protocol::*;

fn bare_host() -> VirtioGpuHost {
    let (control, _) = test_queue();
    let (cursor, _) = test_queue();
    VirtioGpuHost::new(
        Box::new(NullDisplayBackend::new()),
        Arc::new(DenseMemory::new(0x1000).unwrap()),
        Box::new(control),
        Box::new(cursor),
        Arc::new(CountingInterrupts::default()),
    )
}

fn no_blob() -> VirtioGpuDeviceConfig {
    VirtioGpuDeviceConfig {
        allow_dmabuf: false,
        ..test_config(Blob::Disabled)
    }
}

#[test]
fn only_one_device_per_registry() {
    let dev = new_device(Blob::Disabled);
    assert!(dev.registry.is_claimed());

    let second = VirtioGpu::new(no_blob(), bare_host(), &dev.registry);
    assert!(matches!(second, Err(DeviceError::Registry(_))));

    let registry = dev.registry.clone();
    drop(dev);
    assert!(!registry.is_claimed());
    let third = VirtioGpu::new(no_blob(), bare_host(), &registry).unwrap();
    assert!(!third.blob_supported());
}

#[test]
fn injected_allocator_is_ignored_when_blobs_are_disallowed() {
    let registry = vgpu_devices_gpu::DeviceRegistry::new();
    let host = bare_host().with_dmabuf_allocator(Box::new(FakeAllocator::default()));
    let gpu = VirtioGpu::new(no_blob(), host, &registry).unwrap();
    assert!(!gpu.blob_supported());
}

#[test]
fn dropping_the_device_releases_every_buffer() {
    let dev = new_device(Blob::Enabled);
    dev.control(req::guest_blob(1, 0x10000, &[(0x10_0000, 0x10000)]));
    let buf = dev
        .gpu
        .with_core(|core| core.resources().get(1).and_then(|r| r.dmabuf().cloned()))
        .unwrap()
        .unwrap();
    assert!(!buf.is_closed());

    let TestDevice { gpu, control, .. } = dev;
    drop(gpu);
    assert!(buf.is_closed());
    assert_eq!(buf.ref_count(), 0);

    // No response is produced after teardown.
    control.push(req::get_display_info(), 4096);
    assert!(control.used().is_empty());
}

#[test]
fn the_worker_answers_after_many_kicks() {
    let dev = new_device(Blob::Disabled);
    for id in 1..=32u32 {
        dev.control
            .push(req::create_2d(id, VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM, 2, 2), 4096);
        dev.gpu.notify_queue(vgpu_devices_gpu::CONTROL_QUEUE);
    }
    // Unknown queue indexes are ignored.
    dev.gpu.notify_queue(7);
    dev.gpu.sync().unwrap();
    assert_eq!(dev.control.used().len(), 32);
    assert_eq!(dev.gpu.resource_ids().unwrap(), (1..=32).collect::<Vec<_>>());
}
