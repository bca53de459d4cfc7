use std::sync::{Arc, Mutex, MutexGuard};

use virtio_gpu_proto::VirtioGpuConfigSpace;
use vgpu_vga::LegacyVga;

use crate::scanout::{PixelFormat, PixelImage, Surface, SurfaceData};

/// Device state touched from more than one thread: the vCPU (register access), the display worker
/// and the legacy VGA poller.
#[derive(Debug)]
pub struct SharedState {
    /// The legacy framebuffer path owns the display.
    pub vga_enabled: bool,
    pub vga: LegacyVga,
    /// Geometry of the VGA surface last handed to the display.
    pub displayed: (u32, u32),
    pub config: VirtioGpuConfigSpace,
    pub driver_features: u64,
    pub status: u8,
    pub vga_thread_running: bool,
}

impl SharedState {
    pub fn new(vga: LegacyVga) -> Self {
        Self {
            vga_enabled: true,
            vga,
            displayed: (0, 0),
            config: VirtioGpuConfigSpace::default(),
            driver_features: 0,
            status: 0,
            vga_thread_running: false,
        }
    }

    /// Surface presenting the VBE framebuffer at the current graphics-controller size.
    pub fn vga_surface(&self) -> Surface {
        let gc = self.vga.gc();
        let image = PixelImage::from_shared(
            Arc::clone(self.vga.vram()),
            gc.width,
            gc.height,
            gc.stride(),
            PixelFormat::B8G8R8A8,
        );
        Surface {
            x: 0,
            y: 0,
            width: gc.width,
            height: gc.height,
            stride: gc.stride(),
            data: SurfaceData::Pixels(image),
        }
    }
}

pub type SharedHandle = Arc<Mutex<SharedState>>;

/// Locks the shared state. A panic on another thread does not make the registers unusable.
pub fn lock_shared(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
