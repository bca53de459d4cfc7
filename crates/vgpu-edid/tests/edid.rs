use pretty_assertions::assert_eq;
use vgpu_edid::{generate_edid, read_edid, Timing, EDID_BLOCK_SIZE};

const LEGACY_1024X768_DTD: [u8; 18] = [
    0x64, 0x19, 0x00, 0x40, 0x41, 0x00, 0x26, 0x30, 0x18, 0x88, 0x36, 0x00, 0x54, 0x0E, 0x11, 0x00,
    0x00, 0x18,
];

fn checksum_ok(edid: &[u8; EDID_BLOCK_SIZE]) -> bool {
    edid.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

struct Dtd {
    h_active: u16,
    v_active: u16,
    pixel_clock_hz: u64,
    h_total: u32,
    v_total: u32,
}

impl Dtd {
    fn parse(bytes: &[u8]) -> Dtd {
        let pixel_clock_10khz = u16::from_le_bytes([bytes[0], bytes[1]]);
        let h_active = bytes[2] as u16 | (((bytes[4] & 0xF0) as u16) << 4);
        let h_blank = bytes[3] as u16 | (((bytes[4] & 0x0F) as u16) << 8);
        let v_active = bytes[5] as u16 | (((bytes[7] & 0xF0) as u16) << 4);
        let v_blank = bytes[6] as u16 | (((bytes[7] & 0x0F) as u16) << 8);
        Dtd {
            h_active,
            v_active,
            pixel_clock_hz: pixel_clock_10khz as u64 * 10_000,
            h_total: h_active as u32 + h_blank as u32,
            v_total: v_active as u32 + v_blank as u32,
        }
    }

    fn refresh_hz(&self) -> f64 {
        self.pixel_clock_hz as f64 / (self.h_total as f64 * self.v_total as f64)
    }
}

#[test]
fn base_block_has_valid_header_and_checksum() {
    let edid = read_edid(0).expect("missing base EDID");
    assert_eq!(&edid[0..8], &[0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    assert!(checksum_ok(&edid));
    assert_eq!(edid[126], 0, "no extension blocks");
}

#[test]
fn base_block_uses_dmt_1024x768_timing() {
    let edid = read_edid(0).expect("missing base EDID");
    assert_eq!(&edid[54..72], &LEGACY_1024X768_DTD);
}

#[test]
fn extension_blocks_do_not_exist() {
    assert!(read_edid(1).is_none());
}

#[test]
fn synthesized_preferred_mode_keeps_refresh() {
    for (w, h) in [(1920u16, 1080u16), (1366, 768), (4095, 2160)] {
        let edid = generate_edid(Timing::new(w, h, 60));
        assert!(checksum_ok(&edid));
        let dtd = Dtd::parse(&edid[54..72]);
        assert_eq!((dtd.h_active, dtd.v_active), (w, h));
        let refresh = dtd.refresh_hz();
        assert!((refresh - 60.0).abs() < 1.0, "{w}x{h}: refresh={refresh}");
    }
}

#[test]
fn unrepresentable_modes_fall_back_to_1024x768() {
    for mode in [
        Timing::new(4095, 4095, 60),
        Timing::new(640, 480, 300),
        Timing::new(0, 480, 60),
    ] {
        let edid = generate_edid(mode);
        assert_eq!(&edid[54..72], &LEGACY_1024X768_DTD, "{mode:?}");
        assert!(checksum_ok(&edid));
    }
}

#[test]
fn preferred_mode_leads_the_standard_timings_when_encodable() {
    let edid = generate_edid(Timing::new(1920, 1080, 60));
    // (1920 / 8) - 31, aspect 16:9, 60 Hz.
    assert_eq!(&edid[38..40], &[209, 0xC0]);
    // 1024x768@60 follows.
    assert_eq!(&edid[40..42], &[0x61, 0x40]);

    let edid = generate_edid(Timing::new(1366, 768, 60));
    assert_eq!(&edid[38..40], &[0x61, 0x40]);
}

#[test]
fn monitor_name_and_range_limits_are_present() {
    let edid = generate_edid(Timing::new(1280, 800, 60));
    assert_eq!(&edid[72..77], &[0, 0, 0, 0xFC, 0]);
    assert_eq!(&edid[77..90], b"VGPU DISPLAY\n");
    assert_eq!(&edid[90..95], &[0, 0, 0, 0xFD, 0]);
    assert!(edid[95] <= 60 && edid[96] >= 60);
}
