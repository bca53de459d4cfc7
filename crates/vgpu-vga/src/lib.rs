//! Legacy VGA / Bochs VBE state for a virtio-gpu device.
//!
//! The virtio-gpu device exposes a VGA-compatible boot path until the guest driver programs its
//! first accelerated scanout. This crate holds the state behind that path:
//! - the VBE ("VBE_DISPI") register file, reached through the device's register BAR,
//! - the VGA I/O register file (`0x3c0..0x3e0`),
//! - the graphics-controller image (current legacy mode and resolution), and
//! - the VRAM backing the VBE linear framebuffer.
//!
//! Nothing here spawns threads or talks to a display; the device crate polls [`LegacyVga`] and
//! presents the framebuffer itself.

mod ports;
mod vbe;

use std::sync::{Arc, RwLock};

pub use ports::{VgaPorts, VGA_IO_BASE, VGA_IO_LEN};
pub use vbe::{
    VbeRegs, VbeWriteEffect, VBE_DISPI_ENABLED, VBE_DISPI_ID5, VBE_DISPI_INDEX_BANK,
    VBE_DISPI_INDEX_BPP, VBE_DISPI_INDEX_ENABLE, VBE_DISPI_INDEX_ID, VBE_DISPI_INDEX_NB,
    VBE_DISPI_INDEX_VIDEO_MEMORY_64K, VBE_DISPI_INDEX_VIRT_HEIGHT, VBE_DISPI_INDEX_VIRT_WIDTH,
    VBE_DISPI_INDEX_XRES, VBE_DISPI_INDEX_X_OFFSET, VBE_DISPI_INDEX_YRES,
    VBE_DISPI_INDEX_Y_OFFSET, VBE_DISPI_LFB_ENABLED, VBE_DISPI_NOCLEARMEM,
};

/// Default VRAM size (BAR0).
pub const DEFAULT_VRAM_SIZE: usize = 16 * 1024 * 1024;

/// Bytes per pixel of the VBE framebuffer as presented to the display.
pub const VBE_BYTES_PER_PIXEL: u32 = 4;

/// VRAM shared between the guest-facing BAR and whatever presents it.
pub type SharedVram = Arc<RwLock<Vec<u8>>>;

/// Graphics-controller image: what the legacy path currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GfxImage {
    /// A full VGA (text/planar) mode is active; the VBE framebuffer is not being scanned out.
    pub vgamode: bool,
    pub width: u32,
    pub height: u32,
}

impl GfxImage {
    pub fn stride(&self) -> u32 {
        self.width * VBE_BYTES_PER_PIXEL
    }
}

#[derive(Debug)]
pub struct LegacyVga {
    vbe: VbeRegs,
    vbe_index: u16,
    ports: VgaPorts,
    gc: GfxImage,
    vram: SharedVram,
    vram_size: usize,
}

impl LegacyVga {
    /// Creates the legacy state with the VBE registers preset to `width` x `height` x 32bpp.
    ///
    /// The machine boots in VGA mode; the first VBE enable switches to the linear framebuffer.
    pub fn new(width: u32, height: u32, vram_size: usize) -> Self {
        let vbe = VbeRegs {
            xres: u16::try_from(width).unwrap_or(u16::MAX),
            yres: u16::try_from(height).unwrap_or(u16::MAX),
            bpp: 32,
            ..VbeRegs::default()
        };
        Self {
            vbe,
            vbe_index: 0,
            ports: VgaPorts::default(),
            gc: GfxImage {
                vgamode: true,
                width,
                height,
            },
            vram: Arc::new(RwLock::new(vec![0u8; vram_size])),
            vram_size,
        }
    }

    pub fn vbe(&self) -> &VbeRegs {
        &self.vbe
    }

    pub fn gc(&self) -> GfxImage {
        self.gc
    }

    pub fn ports(&self) -> &VgaPorts {
        &self.ports
    }

    pub fn vram(&self) -> &SharedVram {
        &self.vram
    }

    pub fn vram_size(&self) -> usize {
        self.vram_size
    }

    /// Resizes the graphics-controller image, clamped so the image never exceeds VRAM.
    pub fn gc_resize(&mut self, width: u32, height: u32) {
        let needed = u64::from(width) * u64::from(height) * u64::from(VBE_BYTES_PER_PIXEL);
        if needed > self.vram_size as u64 {
            tracing::warn!(width, height, "VBE mode does not fit in VRAM; keeping previous size");
            return;
        }
        self.gc.width = width;
        self.gc.height = height;
    }

    /// VBE resolution the guest programmed.
    pub fn vbe_size(&self) -> (u32, u32) {
        (u32::from(self.vbe.xres), u32::from(self.vbe.yres))
    }

    pub fn vbe_read(&self, index: u16) -> u16 {
        self.vbe.read(index, self.vram_size)
    }

    pub fn vbe_write(&mut self, index: u16, value: u16) -> VbeWriteEffect {
        let effect = self.vbe.write(index, value);
        if let VbeWriteEffect::EnableWritten { enabled } = effect {
            self.gc.vgamode = !enabled;
        }
        effect
    }

    /// Legacy I/O-port style VBE access (`0x1ce` index, `0x1cf` data).
    pub fn vbe_index(&self) -> u16 {
        self.vbe_index
    }

    pub fn set_vbe_index(&mut self, index: u16) {
        self.vbe_index = index;
    }

    pub fn io_read(&mut self, port: u16) -> u8 {
        self.ports.read(port)
    }

    pub fn io_write(&mut self, port: u16, value: u8) {
        self.ports.write(port, value);
    }

    /// Copies VRAM at `offset` into `data`. Bytes outside VRAM read as all-ones.
    pub fn vram_read(&self, offset: u64, data: &mut [u8]) {
        data.fill(0xff);
        let Ok(vram) = self.vram.read() else {
            return;
        };
        let Some(start) = usize::try_from(offset).ok().filter(|&s| s < vram.len()) else {
            return;
        };
        let end = start.saturating_add(data.len()).min(vram.len());
        data[..end - start].copy_from_slice(&vram[start..end]);
    }

    /// Writes `data` into VRAM at `offset`. Bytes outside VRAM are dropped.
    pub fn vram_write(&self, offset: u64, data: &[u8]) {
        let Ok(mut vram) = self.vram.write() else {
            return;
        };
        let Some(start) = usize::try_from(offset).ok().filter(|&s| s < vram.len()) else {
            return;
        };
        let end = start.saturating_add(data.len()).min(vram.len());
        vram[start..end].copy_from_slice(&data[..end - start]);
    }
}
