use std::sync::{Arc, Mutex};

use memory::GuestMemory;
use virtio_gpu_proto::protocol::{
    VIRTIO_F_VERSION_1, VIRTIO_GPU_EVENT_DISPLAY, VIRTIO_GPU_F_EDID, VIRTIO_GPU_F_RESOURCE_BLOB,
};
use vgpu_vga::{GfxImage, LegacyVga, VbeWriteEffect};

use crate::backend::DisplayBackend;
use crate::bh::{BhHandle, DisplayWorker};
use crate::config::VirtioGpuDeviceConfig;
use crate::dispatch::GpuCore;
use crate::dmabuf::DmaBufAllocator;
use crate::error::DeviceError;
use crate::pci::{decode_bar2, Bar2Region, EDID_WINDOW_SIZE};
use crate::queue::{InterruptSink, VirtQueue, CONTROL_QUEUE, CURSOR_QUEUE};
use crate::registry::{DeviceRegistration, DeviceRegistry};
use crate::state::{lock_shared, SharedHandle, SharedState};
use crate::udmabuf::probe_blob_support;
use crate::vga_bridge::{LegacyVgaRenderer, LoggingVgaRenderer, VgaBridge};

/// Collaborators supplied by the machine model.
pub struct VirtioGpuHost {
    pub backend: Box<dyn DisplayBackend>,
    pub memory: Arc<dyn GuestMemory + Send + Sync>,
    pub control_queue: Box<dyn VirtQueue>,
    pub cursor_queue: Box<dyn VirtQueue>,
    pub interrupts: Arc<dyn InterruptSink>,
    pub vga_renderer: Option<Arc<dyn LegacyVgaRenderer>>,
    /// Replaces host probing for blob support when set.
    pub dmabuf_allocator: Option<Box<dyn DmaBufAllocator>>,
}

impl VirtioGpuHost {
    pub fn new(
        backend: Box<dyn DisplayBackend>,
        memory: Arc<dyn GuestMemory + Send + Sync>,
        control_queue: Box<dyn VirtQueue>,
        cursor_queue: Box<dyn VirtQueue>,
        interrupts: Arc<dyn InterruptSink>,
    ) -> Self {
        Self {
            backend,
            memory,
            control_queue,
            cursor_queue,
            interrupts,
            vga_renderer: None,
            dmabuf_allocator: None,
        }
    }

    pub fn with_dmabuf_allocator(mut self, allocator: Box<dyn DmaBufAllocator>) -> Self {
        self.dmabuf_allocator = Some(allocator);
        self
    }

    pub fn with_vga_renderer(mut self, renderer: Arc<dyn LegacyVgaRenderer>) -> Self {
        self.vga_renderer = Some(renderer);
        self
    }
}

/// Outcome of a register-BAR access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bar2Access {
    Handled,
    /// The offset belongs to the virtio transport (common config, ISR, notify).
    Transport,
}

/// A virtio-gpu device instance.
pub struct VirtioGpu {
    worker: Option<DisplayWorker<GpuCore>>,
    bh: BhHandle<GpuCore>,
    shared: SharedHandle,
    vga: VgaBridge,
    interrupts: Arc<dyn InterruptSink>,
    edid: [u8; EDID_WINDOW_SIZE],
    blob_supported: bool,
    _registration: DeviceRegistration,
}

impl VirtioGpu {
    pub fn new(
        config: VirtioGpuDeviceConfig,
        host: VirtioGpuHost,
        registry: &DeviceRegistry,
    ) -> Result<Self, DeviceError> {
        let registration = registry.claim()?;

        let allocator = match host.dmabuf_allocator {
            Some(allocator) if config.allow_dmabuf => Some(allocator),
            Some(_) => None,
            None => match probe_blob_support(&config) {
                Ok(allocator) => Some(allocator),
                Err(err) => {
                    tracing::info!(%err, "blob resources disabled");
                    None
                }
            },
        };
        let blob_supported = allocator.is_some();

        let mut edid = [0u8; EDID_WINDOW_SIZE];
        host.backend.get_edid(&mut edid);
        let info = host.backend.get_display_info();

        let shared: SharedHandle = Arc::new(Mutex::new(SharedState::new(LegacyVga::new(
            info.width,
            info.height,
            config.vram_size,
        ))));
        let core = GpuCore::new(
            host.backend,
            host.memory,
            allocator,
            Arc::clone(&shared),
            host.control_queue,
            host.cursor_queue,
        );
        let worker = DisplayWorker::spawn("vgpu-display", core).map_err(DeviceError::WorkerSpawn)?;
        let bh = worker.handle();

        let renderer = host
            .vga_renderer
            .unwrap_or_else(|| Arc::new(LoggingVgaRenderer));
        let vga = VgaBridge::new(
            Arc::clone(&shared),
            bh.clone(),
            renderer,
            config.vga_poll_interval,
        );
        vga.arm();

        tracing::debug!(
            blob_supported,
            width = info.width,
            height = info.height,
            "virtio-gpu ready"
        );
        Ok(Self {
            worker: Some(worker),
            bh,
            shared,
            vga,
            interrupts: host.interrupts,
            edid,
            blob_supported,
            _registration: registration,
        })
    }

    pub fn blob_supported(&self) -> bool {
        self.blob_supported
    }

    pub fn device_features(&self) -> u64 {
        let mut features = (1u64 << VIRTIO_F_VERSION_1) | (1u64 << VIRTIO_GPU_F_EDID);
        if self.blob_supported {
            features |= 1u64 << VIRTIO_GPU_F_RESOURCE_BLOB;
        }
        features
    }

    pub fn set_driver_features(&self, features: u64) {
        let offered = self.device_features();
        if features & !offered != 0 {
            tracing::warn!(features, offered, "driver accepted features the device does not offer");
        }
        lock_shared(&self.shared).driver_features = features;
    }

    pub fn driver_features(&self) -> u64 {
        lock_shared(&self.shared).driver_features
    }

    pub fn set_status(&self, status: u8) {
        lock_shared(&self.shared).status = status;
    }

    pub fn status(&self) -> u8 {
        lock_shared(&self.shared).status
    }

    /// Guest kicked queue `queue`. The queue is drained later on the display worker.
    pub fn notify_queue(&self, queue: u16) {
        let submitted = match queue {
            CONTROL_QUEUE => self.bh.submit(GpuCore::drain_control_queue),
            CURSOR_QUEUE => self.bh.submit(GpuCore::drain_cursor_queue),
            other => {
                tracing::warn!(queue = other, "notify for unknown queue");
                return;
            }
        };
        if let Err(err) = submitted {
            tracing::error!(%err, queue, "dropping queue notification");
        }
    }

    /// Releases every resource and gives the display back to the legacy VGA path.
    pub fn reset(&self) {
        {
            let mut shared = lock_shared(&self.shared);
            shared.driver_features = 0;
            shared.status = 0;
        }
        let vga = self.vga.clone();
        let submitted = self.bh.submit(move |core| {
            core.reset();
            vga.arm();
        });
        if let Err(err) = submitted {
            tracing::error!(%err, "dropping device reset");
        }
    }

    pub fn read_config(&self, offset: u64, data: &mut [u8]) {
        lock_shared(&self.shared).config.read(offset, data);
    }

    pub fn write_config(&self, offset: u64, data: &[u8]) {
        if let Err(err) = lock_shared(&self.shared).config.write(offset, data) {
            tracing::warn!(%err, "config space write ignored");
        }
    }

    /// The display geometry changed: flag it in the config space and interrupt the guest.
    pub fn notify_display_changed(&self) {
        lock_shared(&self.shared).config.events_read |= VIRTIO_GPU_EVENT_DISPLAY;
        self.interrupts.raise_config_change();
    }

    pub fn bar0_read(&self, offset: u64, data: &mut [u8]) {
        lock_shared(&self.shared).vga.vram_read(offset, data);
    }

    pub fn bar0_write(&self, offset: u64, data: &[u8]) {
        lock_shared(&self.shared).vga.vram_write(offset, data);
    }

    pub fn bar2_read(&self, offset: u64, data: &mut [u8]) -> Bar2Access {
        match decode_bar2(offset) {
            Bar2Region::Edid(start) => {
                data.fill(0);
                let end = start.saturating_add(data.len()).min(self.edid.len());
                if start < end {
                    data[..end - start].copy_from_slice(&self.edid[start..end]);
                }
            }
            Bar2Region::VgaIo(port) => {
                let mut shared = lock_shared(&self.shared);
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = shared.vga.io_read(port.wrapping_add(i as u16));
                }
            }
            Bar2Region::Vbe(index) => {
                let value = lock_shared(&self.shared).vga.vbe_read(index).to_le_bytes();
                let first = (offset & 1) as usize;
                for (i, byte) in data.iter_mut().enumerate() {
                    *byte = value.get(first + i).copied().unwrap_or(0);
                }
            }
            Bar2Region::DeviceConfig(off) => self.read_config(off, data),
            Bar2Region::Transport => return Bar2Access::Transport,
        }
        Bar2Access::Handled
    }

    pub fn bar2_write(&self, offset: u64, data: &[u8]) -> Bar2Access {
        match decode_bar2(offset) {
            Bar2Region::Edid(_) => tracing::warn!(offset, "write to read-only EDID window"),
            Bar2Region::VgaIo(port) => {
                let mut shared = lock_shared(&self.shared);
                for (i, &byte) in data.iter().enumerate() {
                    shared.vga.io_write(port.wrapping_add(i as u16), byte);
                }
            }
            Bar2Region::Vbe(index) => {
                let &[lo, hi] = data else {
                    tracing::warn!(offset, len = data.len(), "VBE registers are 16 bits wide");
                    return Bar2Access::Handled;
                };
                if offset & 1 != 0 {
                    tracing::warn!(offset, "unaligned VBE register write");
                    return Bar2Access::Handled;
                }
                let effect = {
                    let mut shared = lock_shared(&self.shared);
                    let effect = shared.vga.vbe_write(index, u16::from_le_bytes([lo, hi]));
                    if matches!(effect, VbeWriteEffect::EnableWritten { .. }) {
                        shared.vga_enabled = true;
                    }
                    effect
                };
                if matches!(effect, VbeWriteEffect::EnableWritten { .. }) {
                    self.vga.arm();
                }
            }
            Bar2Region::DeviceConfig(off) => self.write_config(off, data),
            Bar2Region::Transport => return Bar2Access::Transport,
        }
        Bar2Access::Handled
    }

    /// EDID exposed in the register BAR.
    pub fn edid(&self) -> &[u8; EDID_WINDOW_SIZE] {
        &self.edid
    }

    /// Waits until every bottom half queued so far has run.
    pub fn sync(&self) -> Result<(), DeviceError> {
        self.bh.sync().map_err(|_| DeviceError::WorkerGone)
    }

    /// Runs `f` against the worker-side state and returns its result.
    pub fn with_core<R, F>(&self, f: F) -> Result<R, DeviceError>
    where
        R: Send + 'static,
        F: FnOnce(&mut GpuCore) -> R + Send + 'static,
    {
        self.bh.call(f).map_err(|_| DeviceError::WorkerGone)
    }

    pub fn resource_ids(&self) -> Result<Vec<u32>, DeviceError> {
        self.with_core(|core| core.resources().ids())
    }

    pub fn scanout_resource(&self) -> Result<Option<u32>, DeviceError> {
        self.with_core(|core| core.scanout_resource())
    }

    pub fn vga_enabled(&self) -> bool {
        lock_shared(&self.shared).vga_enabled
    }

    pub fn vga_thread_running(&self) -> bool {
        self.vga.is_running()
    }

    pub fn vga_image(&self) -> GfxImage {
        lock_shared(&self.shared).vga.gc()
    }
}

impl Drop for VirtioGpu {
    fn drop(&mut self) {
        let _ = self.bh.submit(GpuCore::release_all);
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown();
        }
        // With the worker gone the poller's next redraw fails and it exits.
        self.vga.join();
    }
}
