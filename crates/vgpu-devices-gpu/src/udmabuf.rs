//! Host blob support: probing and the Linux `/dev/udmabuf` allocator.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::config::VirtioGpuDeviceConfig;
use crate::dmabuf::DmaBufAllocator;

#[derive(Debug, thiserror::Error)]
pub enum BlobProbeError {
    #[error("dma-buf sharing disabled by configuration")]
    Disabled,
    #[error("cannot read udmabuf list limit from {path}: {source}")]
    ListLimitUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed udmabuf list limit {value:?}")]
    ListLimitParse { value: String },
    #[error("udmabuf list limit {found} is below the required {min}")]
    ListLimitTooSmall { found: u32, min: u32 },
    #[error("cannot open {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("udmabuf is not available on this host")]
    UnsupportedHost,
}

/// Reads the kernel's udmabuf list limit and checks it against the configured minimum.
pub fn check_list_limit(config: &VirtioGpuDeviceConfig) -> Result<u32, BlobProbeError> {
    let path = &config.udmabuf_list_limit_path;
    let raw = fs::read_to_string(path).map_err(|source| BlobProbeError::ListLimitUnreadable {
        path: path.clone(),
        source,
    })?;
    let found: u32 = raw
        .trim()
        .parse()
        .map_err(|_| BlobProbeError::ListLimitParse { value: raw.clone() })?;
    if found < config.min_udmabuf_list_limit {
        return Err(BlobProbeError::ListLimitTooSmall {
            found,
            min: config.min_udmabuf_list_limit,
        });
    }
    Ok(found)
}

/// Decides whether blob resources can be offered, returning the allocator to use if so.
pub fn probe_blob_support(
    config: &VirtioGpuDeviceConfig,
) -> Result<Box<dyn DmaBufAllocator>, BlobProbeError> {
    if !config.allow_dmabuf {
        return Err(BlobProbeError::Disabled);
    }
    check_list_limit(config)?;
    open_allocator(config)
}

#[cfg(target_os = "linux")]
fn open_allocator(
    config: &VirtioGpuDeviceConfig,
) -> Result<Box<dyn DmaBufAllocator>, BlobProbeError> {
    let dev = linux::Udmabuf::open(&config.udmabuf_device).map_err(|source| {
        BlobProbeError::DeviceOpen {
            path: config.udmabuf_device.clone(),
            source,
        }
    })?;
    Ok(Box::new(dev))
}

#[cfg(not(target_os = "linux"))]
fn open_allocator(
    _config: &VirtioGpuDeviceConfig,
) -> Result<Box<dyn DmaBufAllocator>, BlobProbeError> {
    Err(BlobProbeError::UnsupportedHost)
}

#[cfg(target_os = "linux")]
pub use linux::Udmabuf;

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
mod linux {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::path::Path;

    use crate::dmabuf::{DmaBufAllocator, DmaBufError, UdmabufItem};

    const UDMABUF_FLAGS_CLOEXEC: u32 = 0x01;

    // _IOW('u', 0x43, struct udmabuf_create_list)
    const UDMABUF_CREATE_LIST: u64 = 0x4008_7543;

    // struct udmabuf_create_list { u32 flags; u32 count; struct udmabuf_create_item list[]; }
    const LIST_HEADER_SIZE: usize = 8;
    // struct udmabuf_create_item { u32 memfd; u32 __pad; u64 offset; u64 size; }
    const ITEM_SIZE: usize = 24;

    /// `/dev/udmabuf` handle.
    #[derive(Debug)]
    pub struct Udmabuf {
        dev: File,
    }

    impl Udmabuf {
        pub fn open(path: &Path) -> io::Result<Self> {
            let dev = OpenOptions::new().read(true).write(true).open(path)?;
            Ok(Self { dev })
        }
    }

    fn encode_create_list(items: &[UdmabufItem]) -> Result<Vec<u8>, DmaBufError> {
        let count = u32::try_from(items.len()).map_err(|_| {
            DmaBufError::Ioctl(io::Error::new(io::ErrorKind::InvalidInput, "too many entries"))
        })?;
        let mut buf = Vec::with_capacity(LIST_HEADER_SIZE + items.len() * ITEM_SIZE);
        buf.extend_from_slice(&UDMABUF_FLAGS_CLOEXEC.to_ne_bytes());
        buf.extend_from_slice(&count.to_ne_bytes());
        for item in items {
            let memfd = u32::try_from(item.memfd).map_err(|_| {
                DmaBufError::Ioctl(io::Error::new(io::ErrorKind::InvalidInput, "negative memfd"))
            })?;
            buf.extend_from_slice(&memfd.to_ne_bytes());
            buf.extend_from_slice(&0u32.to_ne_bytes());
            buf.extend_from_slice(&item.offset.to_ne_bytes());
            buf.extend_from_slice(&item.size.to_ne_bytes());
        }
        Ok(buf)
    }

    impl DmaBufAllocator for Udmabuf {
        fn create_list(&self, items: &[UdmabufItem]) -> Result<OwnedFd, DmaBufError> {
            let buf = encode_create_list(items)?;
            // SAFETY: `buf` holds a complete `udmabuf_create_list` with `count` trailing items and
            // outlives the call. The kernel only reads from it.
            let ret = unsafe {
                libc::ioctl(self.dev.as_raw_fd(), UDMABUF_CREATE_LIST as _, buf.as_ptr())
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                tracing::error!(%err, entries = items.len(), "UDMABUF_CREATE_LIST failed");
                return Err(DmaBufError::Ioctl(err));
            }
            // SAFETY: on success the ioctl returns a new descriptor that nothing else owns.
            Ok(unsafe { OwnedFd::from_raw_fd(ret) })
        }
    }

}
