use std::path::PathBuf;
use std::time::Duration;

use vgpu_vga::DEFAULT_VRAM_SIZE;

/// Host-side knobs for a [`crate::VirtioGpu`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtioGpuDeviceConfig {
    /// Allow zero-copy blob resources when the host supports them.
    pub allow_dmabuf: bool,
    pub udmabuf_device: PathBuf,
    /// Kernel parameter holding the maximum number of entries per udmabuf.
    pub udmabuf_list_limit_path: PathBuf,
    /// Blob support needs at least this many entries per udmabuf.
    pub min_udmabuf_list_limit: u32,
    pub vram_size: usize,
    /// How often the legacy VGA bridge redraws the framebuffer.
    pub vga_poll_interval: Duration,
}

impl Default for VirtioGpuDeviceConfig {
    fn default() -> Self {
        Self {
            allow_dmabuf: true,
            udmabuf_device: PathBuf::from("/dev/udmabuf"),
            udmabuf_list_limit_path: PathBuf::from("/sys/module/udmabuf/parameters/list_limit"),
            min_udmabuf_list_limit: 4096,
            vram_size: DEFAULT_VRAM_SIZE,
            vga_poll_interval: Duration::from_millis(33),
        }
    }
}
