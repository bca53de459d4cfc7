//! Zero-copy buffer objects built from guest memory.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use memory::GuestMemory;
use virtio_gpu_proto::MemEntry;

/// Errors creating a buffer object.
#[derive(Debug, thiserror::Error)]
pub enum DmaBufError {
    #[error("blob has no backing entries")]
    Empty,
    #[error("guest address 0x{addr:x} is not backed by a host memory file")]
    NoMemfd { addr: u64 },
    #[error("udmabuf creation failed: {0}")]
    Ioctl(#[source] std::io::Error),
}

/// One `(memfd, offset, size)` entry of a udmabuf list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdmabufItem {
    pub memfd: RawFd,
    pub offset: u64,
    pub size: u64,
}

/// Host facility that turns memory-file regions into a single shareable buffer.
pub trait DmaBufAllocator: Send {
    fn create_list(&self, items: &[UdmabufItem]) -> Result<OwnedFd, DmaBufError>;
}

#[derive(Debug)]
struct DmaBufInner {
    fd: Mutex<Option<OwnedFd>>,
    raw: RawFd,
    ref_count: AtomicU32,
}

/// Reference-counted buffer object.
///
/// Reference counting is explicit: [`DmaBuf::retain`] and [`DmaBuf::release`] model owners outside
/// the process (the display backend) that only see the raw descriptor. The release that brings the
/// count to zero closes the descriptor; later releases are ignored.
#[derive(Debug, Clone)]
pub struct DmaBuf {
    inner: Arc<DmaBufInner>,
}

impl DmaBuf {
    /// Takes ownership of `fd` with a reference count of one.
    pub fn new(fd: OwnedFd) -> Self {
        let raw = fd.as_raw_fd();
        Self {
            inner: Arc::new(DmaBufInner {
                fd: Mutex::new(Some(fd)),
                raw,
                ref_count: AtomicU32::new(1),
            }),
        }
    }

    pub fn retain(&self) {
        self.inner.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn release(&self) {
        let prev = self
            .inner
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
        match prev {
            Ok(1) => {
                let fd = self
                    .inner
                    .fd
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                tracing::debug!(fd = self.inner.raw, "closing dma-buf");
                drop(fd);
            }
            Ok(_) => {}
            Err(_) => tracing::warn!(fd = self.inner.raw, "dma-buf released with no references"),
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.inner.ref_count.load(Ordering::Acquire)
    }

    /// Descriptor to hand to the display backend, or `None` once closed.
    pub fn raw_fd(&self) -> Option<RawFd> {
        let fd = self
            .inner
            .fd
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn is_closed(&self) -> bool {
        self.raw_fd().is_none()
    }
}

/// Builds a buffer object spanning every entry of `entries`, in order.
///
/// Each entry must resolve to a host memory file; the first one that does not aborts the whole
/// creation.
pub fn create_dmabuf<M>(
    allocator: &dyn DmaBufAllocator,
    mem: &M,
    entries: &[MemEntry],
) -> Result<DmaBuf, DmaBufError>
where
    M: GuestMemory + ?Sized,
{
    if entries.is_empty() {
        return Err(DmaBufError::Empty);
    }
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let region = mem
            .memfd_region(entry.addr)
            .filter(|_| mem.is_mapped(entry.addr, entry.length as usize))
            .ok_or(DmaBufError::NoMemfd { addr: entry.addr })?;
        items.push(UdmabufItem {
            memfd: region.fd,
            offset: region.offset,
            size: u64::from(entry.length),
        });
    }
    allocator.create_list(&items).map(DmaBuf::new)
}
