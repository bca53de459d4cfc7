use vgpu_edid::{generate_edid, Timing, EDID_BLOCK_SIZE};

use crate::scanout::{Cursor, Surface};

/// Geometry of the single output, as reported by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayInfo {
    pub xoff: u32,
    pub yoff: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for DisplayInfo {
    fn default() -> Self {
        Self {
            xoff: 0,
            yoff: 0,
            width: 1024,
            height: 768,
        }
    }
}

/// Boundary between the device model and whatever presents pixels on the host.
///
/// Every call is made from the device's worker thread, one at a time. Implementations that keep a
/// dma-buf descriptor past the call must duplicate it.
pub trait DisplayBackend: Send {
    /// Replaces the front surface. `None` clears it.
    fn surface_set(&mut self, surface: Option<&Surface>);

    /// The front surface's contents changed.
    fn surface_update(&mut self, surface: &Surface);

    fn cursor_define(&mut self, cursor: &Cursor);

    fn cursor_move(&mut self, x: u32, y: u32);

    /// Fills `edid` with the display's EDID. Bytes past the block are left untouched.
    fn get_edid(&self, edid: &mut [u8]);

    fn get_display_info(&self) -> DisplayInfo;
}

/// Headless display: accepts every surface and reports a fixed 1024x768 output.
#[derive(Debug, Default)]
pub struct NullDisplayBackend {
    info: DisplayInfo,
}

impl NullDisplayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_display_info(info: DisplayInfo) -> Self {
        Self { info }
    }
}

impl DisplayBackend for NullDisplayBackend {
    fn surface_set(&mut self, _surface: Option<&Surface>) {}

    fn surface_update(&mut self, _surface: &Surface) {}

    fn cursor_define(&mut self, _cursor: &Cursor) {}

    fn cursor_move(&mut self, _x: u32, _y: u32) {}

    fn get_edid(&self, edid: &mut [u8]) {
        let timing = Timing::new(
            u16::try_from(self.info.width).unwrap_or(u16::MAX),
            u16::try_from(self.info.height).unwrap_or(u16::MAX),
            60,
        );
        let block = generate_edid(timing);
        let len = edid.len().min(EDID_BLOCK_SIZE);
        edid[..len].copy_from_slice(&block[..len]);
    }

    fn get_display_info(&self) -> DisplayInfo {
        self.info
    }
}
