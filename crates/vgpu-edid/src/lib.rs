//! EDID 1.4 base block generation for virtual displays.
//!
//! Display backends hand this block to the guest through the virtio-gpu `GET_EDID` command and
//! the EDID window of the device's register BAR. Only the 128-byte base block is produced; no
//! extension blocks are advertised.

pub const EDID_BLOCK_SIZE: usize = 128;

/// Requested display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub width: u16,
    pub height: u16,
    pub refresh_hz: u16,
}

impl Timing {
    pub const fn new(width: u16, height: u16, refresh_hz: u16) -> Self {
        Self {
            width,
            height,
            refresh_hz,
        }
    }
}

/// A detailed timing descriptor (18 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DetailedTiming {
    pixel_clock_10khz: u16,
    h_active: u16,
    h_blank: u16,
    h_sync_offset: u16,
    h_sync_width: u16,
    v_active: u16,
    v_blank: u16,
    v_sync_offset: u16,
    v_sync_width: u16,
    h_image_mm: u16,
    v_image_mm: u16,
    flags: u8,
}

/// VESA DMT 1024x768@60 (65 MHz).
const LEGACY_DTD: DetailedTiming = DetailedTiming {
    pixel_clock_10khz: 6500,
    h_active: 1024,
    h_blank: 320,
    h_sync_offset: 24,
    h_sync_width: 136,
    v_active: 768,
    v_blank: 38,
    v_sync_offset: 3,
    v_sync_width: 6,
    h_image_mm: 340,
    v_image_mm: 270,
    flags: 0x18,
};

const LEGACY_TIMING: Timing = Timing::new(1024, 768, 60);

// Reduced-blanking parameters used for synthesized modes.
const RB_H_BLANK: u32 = 160;
const RB_H_FRONT_PORCH: u16 = 48;
const RB_H_SYNC: u16 = 32;
const RB_V_FRONT_PORCH: u16 = 3;
const RB_V_SYNC: u16 = 6;
const RB_MIN_V_BLANK_US: f64 = 460.0;
const RB_MIN_V_BLANK_LINES: u32 = 14;

const MAX_12BIT: u32 = 0xfff;

impl DetailedTiming {
    fn h_total(&self) -> u32 {
        u32::from(self.h_active) + u32::from(self.h_blank)
    }

    fn v_total(&self) -> u32 {
        u32::from(self.v_active) + u32::from(self.v_blank)
    }

    fn pixel_clock_hz(&self) -> u64 {
        u64::from(self.pixel_clock_10khz) * 10_000
    }

    fn refresh_hz(&self) -> f64 {
        self.pixel_clock_hz() as f64 / (self.h_total() as f64 * self.v_total() as f64)
    }

    fn h_freq_khz(&self) -> u64 {
        let h_total = u64::from(self.h_total());
        (self.pixel_clock_hz() + (h_total * 1000) / 2) / (h_total * 1000)
    }

    fn synthesize(mode: Timing) -> Option<Self> {
        let h_active = u32::from(mode.width);
        let v_active = u32::from(mode.height);
        let refresh = f64::from(mode.refresh_hz);
        if h_active == 0 || v_active == 0 || mode.refresh_hz == 0 {
            return None;
        }
        if h_active > MAX_12BIT || v_active > MAX_12BIT {
            return None;
        }

        let frame_us = 1_000_000.0 / refresh;
        if frame_us <= RB_MIN_V_BLANK_US {
            return None;
        }
        let line_us = (frame_us - RB_MIN_V_BLANK_US) / v_active as f64;
        let v_blank = ((RB_MIN_V_BLANK_US / line_us).ceil() as u32).max(RB_MIN_V_BLANK_LINES);
        if v_blank > MAX_12BIT {
            return None;
        }

        let h_total = h_active + RB_H_BLANK;
        let v_total = v_active + v_blank;
        let clock_10khz = (h_total as f64 * v_total as f64 * refresh / 10_000.0).round();
        if clock_10khz > f64::from(u16::MAX) {
            return None;
        }

        Some(Self {
            pixel_clock_10khz: clock_10khz as u16,
            h_active: h_active as u16,
            h_blank: RB_H_BLANK as u16,
            h_sync_offset: RB_H_FRONT_PORCH,
            h_sync_width: RB_H_SYNC,
            v_active: v_active as u16,
            v_blank: v_blank as u16,
            v_sync_offset: RB_V_FRONT_PORCH,
            v_sync_width: RB_V_SYNC,
            // Assume 96 DPI.
            h_image_mm: ((h_active * 254) / 960).min(MAX_12BIT) as u16,
            v_image_mm: ((v_active * 254) / 960).min(MAX_12BIT) as u16,
            flags: 0x18,
        })
    }

    fn encode(&self) -> [u8; 18] {
        let mut d = [0u8; 18];
        d[0..2].copy_from_slice(&self.pixel_clock_10khz.to_le_bytes());
        d[2] = self.h_active as u8;
        d[3] = self.h_blank as u8;
        d[4] = (((self.h_active >> 8) as u8 & 0x0f) << 4) | ((self.h_blank >> 8) as u8 & 0x0f);
        d[5] = self.v_active as u8;
        d[6] = self.v_blank as u8;
        d[7] = (((self.v_active >> 8) as u8 & 0x0f) << 4) | ((self.v_blank >> 8) as u8 & 0x0f);
        d[8] = self.h_sync_offset as u8;
        d[9] = self.h_sync_width as u8;
        d[10] = (((self.v_sync_offset as u8) & 0x0f) << 4) | ((self.v_sync_width as u8) & 0x0f);
        d[11] = ((((self.h_sync_offset >> 8) as u8) & 0x3) << 6)
            | ((((self.h_sync_width >> 8) as u8) & 0x3) << 4)
            | ((((self.v_sync_offset >> 4) as u8) & 0x3) << 2)
            | (((self.v_sync_width >> 4) as u8) & 0x3);
        d[12] = self.h_image_mm as u8;
        d[13] = self.v_image_mm as u8;
        d[14] =
            (((self.h_image_mm >> 8) as u8 & 0x0f) << 4) | ((self.v_image_mm >> 8) as u8 & 0x0f);
        d[17] = self.flags;
        d
    }
}

/// Picks the detailed timing for `preferred`, falling back to 1024x768@60 when the mode cannot
/// be represented consistently (DTD pixel clock, u8 range-limit fields).
fn preferred_dtd(preferred: Timing) -> DetailedTiming {
    if preferred == LEGACY_TIMING {
        return LEGACY_DTD;
    }
    match DetailedTiming::synthesize(preferred) {
        Some(dtd) if dtd.refresh_hz().round() <= 255.0 && dtd.h_freq_khz() <= 255 => dtd,
        _ => LEGACY_DTD,
    }
}

fn encode_standard_timing(mode: Timing) -> Option<[u8; 2]> {
    let w = u32::from(mode.width);
    let h = u32::from(mode.height);
    if w % 8 != 0 || !(60..=123).contains(&mode.refresh_hz) {
        return None;
    }
    let code = (w / 8).checked_sub(31).filter(|c| (1..=255).contains(c))?;
    let aspect = [(0u8, 10, 16), (1, 3, 4), (2, 4, 5), (3, 9, 16)]
        .into_iter()
        .find(|&(_, num, den)| w * num / den == h)
        .map(|(bits, _, _)| bits)?;
    Some([code as u8, (aspect << 6) | (mode.refresh_hz - 60) as u8])
}

fn text_descriptor(tag: u8, text: &str) -> [u8; 18] {
    let mut d = [0u8; 18];
    d[3] = tag;
    let payload = &mut d[5..18];
    payload.fill(0x20);
    let bytes = text.as_bytes();
    let len = bytes.len().min(12);
    payload[..len].copy_from_slice(&bytes[..len]);
    payload[len] = b'\n';
    d
}

/// Generates an EDID base block advertising `preferred` as the native mode.
pub fn generate_edid(preferred: Timing) -> [u8; EDID_BLOCK_SIZE] {
    let dtd = preferred_dtd(preferred);
    let mut edid = [0u8; EDID_BLOCK_SIZE];

    edid[0..8].copy_from_slice(&[0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00]);
    // Manufacturer "VGP" (compressed ASCII, big-endian) and product code.
    let letter = |c: u8| u16::from(c - b'@');
    let mfg = (letter(b'V') << 10) | (letter(b'G') << 5) | letter(b'P');
    edid[8..10].copy_from_slice(&mfg.to_be_bytes());
    edid[10..12].copy_from_slice(&0x0001u16.to_le_bytes());
    edid[16] = 1; // week
    edid[17] = 30; // 2020
    edid[18] = 1;
    edid[19] = 4;
    edid[20] = 0xa5; // digital, 8 bpc, DisplayPort
    edid[21] = (dtd.h_image_mm / 10).min(255) as u8;
    edid[22] = (dtd.v_image_mm / 10).min(255) as u8;
    edid[23] = 0x78; // gamma 2.2
    edid[24] = 0x06; // sRGB default, preferred timing is native
    // sRGB chromaticity.
    edid[25..35].copy_from_slice(&[0xee, 0x91, 0xa3, 0x54, 0x4c, 0x99, 0x26, 0x0f, 0x50, 0x54]);
    // Established timings: 640x480@60, 800x600@60, 1024x768@60.
    edid[35] = 0x21;
    edid[36] = 0x08;
    edid[37] = 0x00;

    let legacy = [
        Timing::new(1024, 768, 60),
        Timing::new(800, 600, 60),
        Timing::new(640, 480, 60),
    ];
    let mut std_timings: Vec<[u8; 2]> = Vec::with_capacity(8);
    if let Some(st) = encode_standard_timing(preferred) {
        std_timings.push(st);
    }
    for mode in legacy {
        if let Some(st) = encode_standard_timing(mode) {
            if !std_timings.contains(&st) {
                std_timings.push(st);
            }
        }
    }
    for i in 0..8 {
        let st = std_timings.get(i).copied().unwrap_or([0x01, 0x01]);
        edid[38 + i * 2..40 + i * 2].copy_from_slice(&st);
    }

    edid[54..72].copy_from_slice(&dtd.encode());
    edid[72..90].copy_from_slice(&text_descriptor(0xfc, "VGPU DISPLAY"));

    let refresh = dtd.refresh_hz().round() as u64;
    let h_khz = dtd.h_freq_khz();
    let mut range = [0u8; 18];
    range[3] = 0xfd;
    range[5] = refresh.min(50) as u8;
    range[6] = refresh.max(75) as u8;
    range[7] = h_khz.min(30) as u8;
    range[8] = h_khz.max(83) as u8;
    range[9] = dtd.pixel_clock_hz().div_ceil(10_000_000).clamp(17, 255) as u8;
    range[11] = 0x0a;
    range[12..18].fill(0x20);
    edid[90..108].copy_from_slice(&range);

    // Dummy descriptor.
    edid[108 + 3] = 0x10;

    edid[126] = 0;
    let sum = edid[..127].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    edid[127] = 0u8.wrapping_sub(sum);
    edid
}

/// Returns EDID block `block` for the default 1024x768 display, or `None` past the base block.
pub fn read_edid(block: u16) -> Option<[u8; EDID_BLOCK_SIZE]> {
    (block == 0).then(|| generate_edid(LEGACY_TIMING))
}
