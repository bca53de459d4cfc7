use thiserror::Error;

/// Size of `struct virtio_gpu_config`.
pub const CONFIG_SPACE_SIZE: usize = 16;

const EVENTS_CLEAR_OFFSET: u64 = 4;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWriteError {
    #[error("write of {len} bytes at config offset {offset:#x} targets a read-only field")]
    ReadOnly { offset: u64, len: usize },
}

/// Device-specific configuration space (`struct virtio_gpu_config`).
///
/// Layout: `events_read` (4) + `events_clear` (4) + `num_scanouts` (4) + `num_capsets` (4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtioGpuConfigSpace {
    pub events_read: u32,
    pub events_clear: u32,
    pub num_scanouts: u32,
    pub num_capsets: u32,
}

impl Default for VirtioGpuConfigSpace {
    fn default() -> Self {
        Self {
            events_read: 0,
            events_clear: 0,
            num_scanouts: 1,
            num_capsets: 0,
        }
    }
}

impl VirtioGpuConfigSpace {
    pub fn to_bytes(&self) -> [u8; CONFIG_SPACE_SIZE] {
        let mut cfg = [0u8; CONFIG_SPACE_SIZE];
        cfg[0..4].copy_from_slice(&self.events_read.to_le_bytes());
        cfg[4..8].copy_from_slice(&self.events_clear.to_le_bytes());
        cfg[8..12].copy_from_slice(&self.num_scanouts.to_le_bytes());
        cfg[12..16].copy_from_slice(&self.num_capsets.to_le_bytes());
        cfg
    }

    /// Reads `data.len()` bytes at `offset`. Bytes past the end of the structure read as zero.
    pub fn read(&self, offset: u64, data: &mut [u8]) {
        let cfg = self.to_bytes();
        let start: usize = match offset.try_into() {
            Ok(v) => v,
            Err(_) => {
                data.fill(0);
                return;
            }
        };
        if start >= cfg.len() {
            data.fill(0);
            return;
        }
        let end = start
            .checked_add(data.len())
            .unwrap_or(cfg.len())
            .min(cfg.len());
        data[..end - start].copy_from_slice(&cfg[start..end]);
        data[end - start..].fill(0);
    }

    /// Handles a guest write. Only a 32-bit write of `events_clear` is accepted; it acknowledges
    /// the written event bits, clearing them from both `events_read` and `events_clear`.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), ConfigWriteError> {
        if offset != EVENTS_CLEAR_OFFSET || data.len() != 4 {
            return Err(ConfigWriteError::ReadOnly {
                offset,
                len: data.len(),
            });
        }
        let value = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        self.events_clear = value;
        self.events_read &= !value;
        self.events_clear &= !value;
        Ok(())
    }
}
