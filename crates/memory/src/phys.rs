use thiserror::Error;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },
    /// The host file backing guest RAM failed an I/O operation.
    #[error("guest memory backing I/O failed at paddr=0x{paddr:x}: {kind}")]
    Io { paddr: u64, kind: std::io::ErrorKind },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Host file region backing a guest physical address.
///
/// `fd` stays owned by the memory backend; it is only borrowed for the duration of a host call
/// (e.g. building a udmabuf from several regions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemfdRegion {
    pub fd: std::os::fd::RawFd,
    /// Offset of the guest physical address inside the file.
    pub offset: u64,
}

/// Guest *physical* memory as seen by device models.
pub trait GuestMemory {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory.
    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    /// Returns true if `[paddr, paddr + len)` is backed by guest RAM.
    fn is_mapped(&self, paddr: u64, len: usize) -> bool {
        check_range(self.size(), paddr, len).is_ok()
    }

    /// Resolves `paddr` to the host memory file (memfd) backing it, if guest RAM is file backed.
    ///
    /// Zero-copy buffer sharing needs this; backends without a file return `None`.
    fn memfd_region(&self, _paddr: u64) -> Option<MemfdRegion> {
        None
    }

    fn read_u32_le(&self, paddr: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, paddr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32_le(&mut self, paddr: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, paddr: u64, value: u64) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

pub(crate) fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let len_u64 = len as u64;
    let end = paddr
        .checked_add(len_u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

/// Guest memory stored in a single heap allocation. Not file backed.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    fn span(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        check_range(self.size(), paddr, len)?;
        let start = usize::try_from(paddr).map_err(|_| GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size(),
        })?;
        Ok((start, start + len))
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.span(paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.span(paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }
}
