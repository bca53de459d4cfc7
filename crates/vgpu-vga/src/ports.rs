//! VGA I/O register file (`0x3c0..0x3e0`).
//!
//! Only register state is modelled: the legacy text/planar renderer lives outside this crate and
//! reads these registers when it takes over the display.

/// First VGA port in the decode window.
pub const VGA_IO_BASE: u16 = 0x3c0;
/// Number of ports in the decode window.
pub const VGA_IO_LEN: u16 = 0x20;

const MISC_OUTPUT_WRITE: u16 = 0x3c2;
const MISC_OUTPUT_READ: u16 = 0x3cc;
const ATTRIBUTE_INDEX_DATA: u16 = 0x3c0;
const ATTRIBUTE_DATA_READ: u16 = 0x3c1;
const SEQUENCER_INDEX: u16 = 0x3c4;
const SEQUENCER_DATA: u16 = 0x3c5;
const PEL_MASK: u16 = 0x3c6;
const DAC_READ_INDEX: u16 = 0x3c7;
const DAC_WRITE_INDEX: u16 = 0x3c8;
const DAC_DATA: u16 = 0x3c9;
const GRAPHICS_INDEX: u16 = 0x3ce;
const GRAPHICS_DATA: u16 = 0x3cf;
const CRTC_INDEX: u16 = 0x3d4;
const CRTC_DATA: u16 = 0x3d5;
const INPUT_STATUS_1: u16 = 0x3da;

/// Graphics controller misc register; bit 0 selects graphics (APA) mode.
const GR_MISC: usize = 0x06;

#[derive(Debug, Clone)]
pub struct VgaPorts {
    misc_output: u8,
    sequencer_index: u8,
    sequencer: [u8; 8],
    graphics_index: u8,
    graphics: [u8; 9],
    crtc_index: u8,
    crtc: [u8; 0x19],
    attribute_index: u8,
    attribute: [u8; 0x15],
    attribute_flip_flop_data: bool,
    pel_mask: u8,
    dac_read_index: u8,
    dac_read_subindex: u8,
    dac_write_index: u8,
    dac_write_subindex: u8,
    dac: [[u8; 3]; 256],
    retrace: bool,
}

impl Default for VgaPorts {
    fn default() -> Self {
        Self {
            misc_output: 0x67,
            sequencer_index: 0,
            sequencer: [0; 8],
            graphics_index: 0,
            graphics: [0; 9],
            crtc_index: 0,
            crtc: [0; 0x19],
            attribute_index: 0,
            attribute: [0; 0x15],
            attribute_flip_flop_data: false,
            pel_mask: 0xff,
            dac_read_index: 0,
            dac_read_subindex: 0,
            dac_write_index: 0,
            dac_write_subindex: 0,
            dac: [[0; 3]; 256],
            retrace: false,
        }
    }
}

impl VgaPorts {
    pub fn read(&mut self, port: u16) -> u8 {
        match port {
            MISC_OUTPUT_READ | MISC_OUTPUT_WRITE => self.misc_output,
            SEQUENCER_INDEX => self.sequencer_index,
            SEQUENCER_DATA => self
                .sequencer
                .get(self.sequencer_index as usize)
                .copied()
                .unwrap_or(0),
            GRAPHICS_INDEX => self.graphics_index,
            GRAPHICS_DATA => self
                .graphics
                .get(self.graphics_index as usize)
                .copied()
                .unwrap_or(0),
            CRTC_INDEX => self.crtc_index,
            CRTC_DATA => self.crtc.get(self.crtc_index as usize).copied().unwrap_or(0),
            ATTRIBUTE_INDEX_DATA => self.attribute_index,
            ATTRIBUTE_DATA_READ => self
                .attribute
                .get(self.attribute_index as usize)
                .copied()
                .unwrap_or(0),
            INPUT_STATUS_1 => {
                // Reading resets the attribute flip-flop. Retrace toggles on every read so polling
                // guests make progress.
                self.attribute_flip_flop_data = false;
                self.retrace = !self.retrace;
                if self.retrace {
                    0x09
                } else {
                    0x00
                }
            }
            PEL_MASK => self.pel_mask,
            DAC_READ_INDEX => self.dac_read_index,
            DAC_WRITE_INDEX => self.dac_write_index,
            DAC_DATA => {
                let v = self.dac[self.dac_read_index as usize][self.dac_read_subindex as usize];
                self.dac_read_subindex = (self.dac_read_subindex + 1) % 3;
                if self.dac_read_subindex == 0 {
                    self.dac_read_index = self.dac_read_index.wrapping_add(1);
                }
                v
            }
            _ => 0xff,
        }
    }

    pub fn write(&mut self, port: u16, val: u8) {
        match port {
            MISC_OUTPUT_WRITE => self.misc_output = val,
            SEQUENCER_INDEX => self.sequencer_index = val,
            SEQUENCER_DATA => {
                if let Some(reg) = self.sequencer.get_mut(self.sequencer_index as usize) {
                    *reg = val;
                }
            }
            GRAPHICS_INDEX => self.graphics_index = val,
            GRAPHICS_DATA => {
                if let Some(reg) = self.graphics.get_mut(self.graphics_index as usize) {
                    *reg = val;
                }
            }
            CRTC_INDEX => self.crtc_index = val,
            CRTC_DATA => {
                let idx = self.crtc_index as usize;
                // CR11 bit 7 write-protects CR0-CR7.
                if idx <= 0x07 && (self.crtc[0x11] & 0x80) != 0 {
                    return;
                }
                if let Some(reg) = self.crtc.get_mut(idx) {
                    *reg = val;
                }
            }
            ATTRIBUTE_INDEX_DATA => {
                if !self.attribute_flip_flop_data {
                    self.attribute_index = val & 0x1f;
                    self.attribute_flip_flop_data = true;
                } else {
                    if let Some(reg) = self.attribute.get_mut(self.attribute_index as usize) {
                        *reg = val;
                    }
                    self.attribute_flip_flop_data = false;
                }
            }
            PEL_MASK => self.pel_mask = val,
            DAC_READ_INDEX => {
                self.dac_read_index = val;
                self.dac_read_subindex = 0;
            }
            DAC_WRITE_INDEX => {
                self.dac_write_index = val;
                self.dac_write_subindex = 0;
            }
            DAC_DATA => {
                let (i, sub) = (self.dac_write_index as usize, self.dac_write_subindex as usize);
                self.dac[i][sub] = val & 0x3f;
                self.dac_write_subindex = (self.dac_write_subindex + 1) % 3;
                if self.dac_write_subindex == 0 {
                    self.dac_write_index = self.dac_write_index.wrapping_add(1);
                }
            }
            _ => {}
        }
    }

    /// True when the graphics controller selects a graphics (non-text) memory map.
    pub fn graphics_mode(&self) -> bool {
        (self.graphics[GR_MISC] & 0x01) != 0
    }

    pub fn dac_entry(&self, index: u8) -> [u8; 3] {
        self.dac[index as usize]
    }
}
