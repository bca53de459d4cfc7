//! Resource store: guest-named surfaces and blobs, keyed by resource id.

use std::collections::HashMap;

use memory::GuestMemory;
use virtio_gpu_proto::MemEntry;

use crate::dmabuf::DmaBuf;
use crate::scanout::{PixelFormat, PixelImage};

/// One guest scatter-gather segment backing a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackingSegment {
    pub addr: u64,
    pub len: u32,
    /// The whole segment lies in guest RAM.
    pub mapped: bool,
}

impl BackingSegment {
    pub fn resolve<M: GuestMemory + ?Sized>(mem: &M, entry: &MemEntry) -> Self {
        let mapped = mem.is_mapped(entry.addr, entry.length as usize);
        if !mapped {
            tracing::warn!(
                addr = entry.addr,
                len = entry.length,
                "backing entry outside guest RAM"
            );
        }
        Self {
            addr: entry.addr,
            len: entry.length,
            mapped,
        }
    }
}

/// Scanout geometry the guest gave a buffer object with `SET_SCANOUT_BLOB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLayout {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub fourcc: u32,
}

#[derive(Debug, Clone)]
pub enum ResourceStorage {
    Pixels(PixelImage),
    DmaBuf(DmaBuf),
}

#[derive(Debug)]
pub struct Resource {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub storage: ResourceStorage,
    pub backing: Vec<BackingSegment>,
    pub layout: Option<BlobLayout>,
}

impl Resource {
    pub fn new_2d(id: u32, image: PixelImage) -> Self {
        Self {
            id,
            width: image.width(),
            height: image.height(),
            format: image.format(),
            storage: ResourceStorage::Pixels(image),
            backing: Vec::new(),
            layout: None,
        }
    }

    /// True if the resource scans out from a zero-copy buffer.
    pub fn is_blob(&self) -> bool {
        matches!(self.storage, ResourceStorage::DmaBuf(_))
    }

    pub fn pixels(&self) -> Option<&PixelImage> {
        match &self.storage {
            ResourceStorage::Pixels(image) => Some(image),
            ResourceStorage::DmaBuf(_) => None,
        }
    }

    pub fn dmabuf(&self) -> Option<&DmaBuf> {
        match &self.storage {
            ResourceStorage::DmaBuf(buf) => Some(buf),
            ResourceStorage::Pixels(_) => None,
        }
    }

    pub fn attach_backing(&mut self, backing: Vec<BackingSegment>) {
        self.backing = backing;
    }

    pub fn detach_backing(&mut self) {
        self.backing.clear();
    }

    /// Drops the backing and the device's reference to the buffer object.
    fn release(self) {
        if let ResourceStorage::DmaBuf(buf) = &self.storage {
            buf.release();
        }
        tracing::debug!(resource_id = self.id, "resource released");
    }
}

/// Copies `dst.len()` bytes starting `src_offset` bytes into the concatenated backing.
///
/// Unmapped and empty segments contribute nothing, so bytes past the usable backing are left as
/// they were. Returns the number of bytes copied.
pub fn gather_from_backing<M: GuestMemory + ?Sized>(
    mem: &M,
    backing: &[BackingSegment],
    src_offset: u64,
    dst: &mut [u8],
) -> usize {
    let mut seg_start = 0u64;
    let mut copied = 0usize;
    for seg in backing {
        if copied == dst.len() {
            break;
        }
        if !seg.mapped || seg.len == 0 {
            continue;
        }
        let seg_len = u64::from(seg.len);
        let seg_end = seg_start + seg_len;
        let want = src_offset + copied as u64;
        if want < seg_end {
            let in_seg = want - seg_start;
            let n = (seg_len - in_seg).min((dst.len() - copied) as u64) as usize;
            if let Err(err) = mem.read_into(seg.addr + in_seg, &mut dst[copied..copied + n]) {
                tracing::error!(%err, addr = seg.addr, "failed to read resource backing");
                break;
            }
            copied += n;
        }
        seg_start = seg_end;
    }
    copied
}

#[derive(Debug, Default)]
pub struct ResourceStore {
    resources: HashMap<u32, Resource>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&Resource> {
        self.resources.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Resource> {
        self.resources.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.resources.contains_key(&id)
    }

    /// Registers `resource`, handing it back if its id is taken.
    pub fn insert(&mut self, resource: Resource) -> Result<(), Resource> {
        if self.resources.contains_key(&resource.id) {
            return Err(resource);
        }
        self.resources.insert(resource.id, resource);
        Ok(())
    }

    /// Removes and releases resource `id`. Returns false if it did not exist.
    pub fn remove(&mut self, id: u32) -> bool {
        match self.resources.remove(&id) {
            Some(resource) => {
                resource.release();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.resources.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Releases every resource.
    pub fn clear(&mut self) {
        for (_, resource) in self.resources.drain() {
            resource.release();
        }
    }
}
