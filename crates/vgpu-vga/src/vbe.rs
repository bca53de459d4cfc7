/// Bochs VBE ("VBE_DISPI") interface ID reported by index 0.
pub const VBE_DISPI_ID5: u16 = 0xB0C5;

pub const VBE_DISPI_INDEX_ID: u16 = 0x0;
pub const VBE_DISPI_INDEX_XRES: u16 = 0x1;
pub const VBE_DISPI_INDEX_YRES: u16 = 0x2;
pub const VBE_DISPI_INDEX_BPP: u16 = 0x3;
pub const VBE_DISPI_INDEX_ENABLE: u16 = 0x4;
pub const VBE_DISPI_INDEX_BANK: u16 = 0x5;
pub const VBE_DISPI_INDEX_VIRT_WIDTH: u16 = 0x6;
pub const VBE_DISPI_INDEX_VIRT_HEIGHT: u16 = 0x7;
pub const VBE_DISPI_INDEX_X_OFFSET: u16 = 0x8;
pub const VBE_DISPI_INDEX_Y_OFFSET: u16 = 0x9;
pub const VBE_DISPI_INDEX_VIDEO_MEMORY_64K: u16 = 0xA;

/// Number of 16-bit VBE registers.
pub const VBE_DISPI_INDEX_NB: u16 = 0xB;

pub const VBE_DISPI_ENABLED: u16 = 0x01;
pub const VBE_DISPI_LFB_ENABLED: u16 = 0x40;
pub const VBE_DISPI_NOCLEARMEM: u16 = 0x80;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VbeRegs {
    pub xres: u16,
    pub yres: u16,
    pub bpp: u16,
    pub enable: u16,
    pub bank: u16,
    pub virt_width: u16,
    pub virt_height: u16,
    pub x_offset: u16,
    pub y_offset: u16,
}

/// What a VBE register write changed, as far as the display path is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbeWriteEffect {
    None,
    /// The guest wrote the ENABLE register. `enabled` is the new state of the enable bit.
    EnableWritten { enabled: bool },
}

impl VbeRegs {
    pub fn enabled(&self) -> bool {
        (self.enable & VBE_DISPI_ENABLED) != 0
    }

    pub fn lfb_enabled(&self) -> bool {
        (self.enable & VBE_DISPI_LFB_ENABLED) != 0
    }

    /// Reads register `index`. `vram_size` backs the video-memory register.
    pub fn read(&self, index: u16, vram_size: usize) -> u16 {
        match index {
            VBE_DISPI_INDEX_ID => VBE_DISPI_ID5,
            VBE_DISPI_INDEX_XRES => self.xres,
            VBE_DISPI_INDEX_YRES => self.yres,
            VBE_DISPI_INDEX_BPP => self.bpp,
            VBE_DISPI_INDEX_ENABLE => self.enable,
            VBE_DISPI_INDEX_BANK => self.bank,
            VBE_DISPI_INDEX_VIRT_WIDTH => self.virt_width,
            VBE_DISPI_INDEX_VIRT_HEIGHT => self.virt_height,
            VBE_DISPI_INDEX_X_OFFSET => self.x_offset,
            VBE_DISPI_INDEX_Y_OFFSET => self.y_offset,
            VBE_DISPI_INDEX_VIDEO_MEMORY_64K => {
                u16::try_from(vram_size / (64 * 1024)).unwrap_or(u16::MAX)
            }
            _ => 0,
        }
    }

    pub fn write(&mut self, index: u16, value: u16) -> VbeWriteEffect {
        match index {
            VBE_DISPI_INDEX_XRES => self.xres = value,
            VBE_DISPI_INDEX_YRES => self.yres = value,
            VBE_DISPI_INDEX_BPP => self.bpp = value,
            VBE_DISPI_INDEX_ENABLE => {
                self.enable = value;
                if self.enabled() && self.virt_width == 0 {
                    self.virt_width = self.xres;
                    self.virt_height = self.yres;
                }
                return VbeWriteEffect::EnableWritten {
                    enabled: self.enabled(),
                };
            }
            VBE_DISPI_INDEX_BANK => self.bank = value,
            VBE_DISPI_INDEX_VIRT_WIDTH => self.virt_width = value,
            VBE_DISPI_INDEX_VIRT_HEIGHT => self.virt_height = value,
            VBE_DISPI_INDEX_X_OFFSET => self.x_offset = value,
            VBE_DISPI_INDEX_Y_OFFSET => self.y_offset = value,
            // ID and video memory size are read-only.
            _ => {}
        }
        VbeWriteEffect::None
    }
}
