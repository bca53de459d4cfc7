//! PCI identity and the register BAR layout.

use vgpu_vga::{VBE_DISPI_INDEX_NB, VGA_IO_BASE, VGA_IO_LEN};

pub const PCI_VENDOR_ID_VIRTIO: u16 = 0x1af4;
pub const VIRTIO_DEVICE_TYPE_GPU: u16 = 16;
/// Modern (non-transitional) virtio device id.
pub const PCI_DEVICE_ID_VIRTIO_GPU: u16 = 0x1040 + VIRTIO_DEVICE_TYPE_GPU;
pub const PCI_REVISION_ID: u8 = 1;
pub const PCI_CLASS_DISPLAY: u8 = 0x03;
pub const PCI_SUBCLASS_DISPLAY_VGA: u8 = 0x00;
pub const PCI_SUBSYSTEM_VENDOR_ID: u16 = PCI_VENDOR_ID_VIRTIO;
pub const PCI_SUBSYSTEM_ID: u16 = VIRTIO_DEVICE_TYPE_GPU;

/// BAR0: VGA framebuffer.
pub const VRAM_BAR: u8 = 0;
/// BAR2: EDID, legacy registers and the virtio modern capabilities.
pub const REGS_BAR: u8 = 2;

pub const BAR2_EDID_OFFSET: u64 = 0x000;
/// Size of the EDID window in BAR2.
pub const EDID_WINDOW_SIZE: usize = 384;
pub const BAR2_VGA_IO_OFFSET: u64 = 0x400;
pub const BAR2_VBE_OFFSET: u64 = 0x500;
pub const BAR2_VBE_SIZE: u64 = VBE_DISPI_INDEX_NB as u64 * 2;
pub const BAR2_COMMON_CFG_OFFSET: u64 = 0x1000;
pub const BAR2_ISR_OFFSET: u64 = 0x1800;
pub const BAR2_DEVICE_CFG_OFFSET: u64 = 0x2000;
pub const BAR2_DEVICE_CFG_SIZE: u64 = 0x1000;
pub const BAR2_NOTIFY_OFFSET: u64 = 0x3000;

/// What a BAR2 offset decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bar2Region {
    /// Byte offset into the EDID blob.
    Edid(usize),
    /// Absolute VGA I/O port.
    VgaIo(u16),
    /// VBE register index.
    Vbe(u16),
    /// Byte offset into the device config space.
    DeviceConfig(u64),
    /// Common config, ISR and notify are handled by the virtio transport.
    Transport,
}

pub fn decode_bar2(offset: u64) -> Bar2Region {
    if offset < BAR2_EDID_OFFSET + EDID_WINDOW_SIZE as u64 {
        return Bar2Region::Edid((offset - BAR2_EDID_OFFSET) as usize);
    }
    if (BAR2_VGA_IO_OFFSET..BAR2_VGA_IO_OFFSET + u64::from(VGA_IO_LEN)).contains(&offset) {
        return Bar2Region::VgaIo(VGA_IO_BASE + (offset - BAR2_VGA_IO_OFFSET) as u16);
    }
    if (BAR2_VBE_OFFSET..BAR2_VBE_OFFSET + BAR2_VBE_SIZE).contains(&offset) {
        return Bar2Region::Vbe(((offset - BAR2_VBE_OFFSET) / 2) as u16);
    }
    if (BAR2_DEVICE_CFG_OFFSET..BAR2_DEVICE_CFG_OFFSET + BAR2_DEVICE_CFG_SIZE).contains(&offset) {
        return Bar2Region::DeviceConfig(offset - BAR2_DEVICE_CFG_OFFSET);
    }
    Bar2Region::Transport
}
