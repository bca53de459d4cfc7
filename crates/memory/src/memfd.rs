use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;

use crate::phys::{check_range, GuestMemory, GuestMemoryError, GuestMemoryResult, MemfdRegion};

/// Guest RAM backed by a host memory file (normally a `memfd`), with guest physical address 0 at
/// file offset `base_offset`.
///
/// All accesses go through positional file I/O, so the memory can be shared across threads
/// (`&self` writes via [`MemfdGuestMemory::write_at`]) while device models resolve addresses to
/// `(fd, offset)` pairs for zero-copy buffer sharing.
#[derive(Debug)]
pub struct MemfdGuestMemory {
    file: File,
    base_offset: u64,
    size: u64,
}

impl MemfdGuestMemory {
    /// Wraps `file`, growing it to hold `size` bytes of guest RAM.
    pub fn from_file(file: File, size: u64) -> io::Result<Self> {
        Self::with_base_offset(file, 0, size)
    }

    pub fn with_base_offset(file: File, base_offset: u64, size: u64) -> io::Result<Self> {
        let needed = base_offset
            .checked_add(size)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "guest RAM too large"))?;
        if file.metadata()?.len() < needed {
            file.set_len(needed)?;
        }
        Ok(Self {
            file,
            base_offset,
            size,
        })
    }

    /// Shared-reference write, for callers that hand the memory to a device thread.
    pub fn write_at(&self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, src.len())?;
        self.file
            .write_all_at(src, self.base_offset + paddr)
            .map_err(|err| GuestMemoryError::Io {
                paddr,
                kind: err.kind(),
            })
    }
}

impl GuestMemory for MemfdGuestMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, dst.len())?;
        self.file
            .read_exact_at(dst, self.base_offset + paddr)
            .map_err(|err| GuestMemoryError::Io {
                paddr,
                kind: err.kind(),
            })
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        self.write_at(paddr, src)
    }

    fn memfd_region(&self, paddr: u64) -> Option<MemfdRegion> {
        if paddr >= self.size {
            return None;
        }
        Some(MemfdRegion {
            fd: self.file.as_raw_fd(),
            offset: self.base_offset + paddr,
        })
    }
}
