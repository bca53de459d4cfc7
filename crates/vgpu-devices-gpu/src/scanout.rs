//! Pixel formats, host images and the surface/cursor descriptions handed to display backends.

use std::os::fd::RawFd;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use virtio_gpu_proto::protocol::{
    VIRTIO_GPU_FORMAT_A8B8G8R8_UNORM, VIRTIO_GPU_FORMAT_A8R8G8B8_UNORM,
    VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM, VIRTIO_GPU_FORMAT_B8G8R8X8_UNORM,
    VIRTIO_GPU_FORMAT_R8G8B8A8_UNORM, VIRTIO_GPU_FORMAT_R8G8B8X8_UNORM,
    VIRTIO_GPU_FORMAT_X8B8G8R8_UNORM, VIRTIO_GPU_FORMAT_X8R8G8B8_UNORM,
};

// Host allocation cap for a single image. 256MiB covers 8192x8192 at 32bpp.
const MAX_IMAGE_BYTES: usize = 256 * 1024 * 1024;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b"XR24");
pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b"AR24");
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b"XB24");
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b"AB24");

/// 2D resource formats accepted by `RESOURCE_CREATE_2D`.
///
/// Names follow the virtio-gpu convention (byte order in memory). All of them are 32bpp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    B8G8R8A8,
    B8G8R8X8,
    A8R8G8B8,
    X8R8G8B8,
    R8G8B8A8,
    X8B8G8R8,
    A8B8G8R8,
    R8G8B8X8,
}

impl PixelFormat {
    pub fn from_virtio(value: u32) -> Option<Self> {
        Some(match value {
            VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM => Self::B8G8R8A8,
            VIRTIO_GPU_FORMAT_B8G8R8X8_UNORM => Self::B8G8R8X8,
            VIRTIO_GPU_FORMAT_A8R8G8B8_UNORM => Self::A8R8G8B8,
            VIRTIO_GPU_FORMAT_X8R8G8B8_UNORM => Self::X8R8G8B8,
            VIRTIO_GPU_FORMAT_R8G8B8A8_UNORM => Self::R8G8B8A8,
            VIRTIO_GPU_FORMAT_X8B8G8R8_UNORM => Self::X8B8G8R8,
            VIRTIO_GPU_FORMAT_A8B8G8R8_UNORM => Self::A8B8G8R8,
            VIRTIO_GPU_FORMAT_R8G8B8X8_UNORM => Self::R8G8B8X8,
            _ => return None,
        })
    }

    pub fn to_virtio(self) -> u32 {
        match self {
            Self::B8G8R8A8 => VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM,
            Self::B8G8R8X8 => VIRTIO_GPU_FORMAT_B8G8R8X8_UNORM,
            Self::A8R8G8B8 => VIRTIO_GPU_FORMAT_A8R8G8B8_UNORM,
            Self::X8R8G8B8 => VIRTIO_GPU_FORMAT_X8R8G8B8_UNORM,
            Self::R8G8B8A8 => VIRTIO_GPU_FORMAT_R8G8B8A8_UNORM,
            Self::X8B8G8R8 => VIRTIO_GPU_FORMAT_X8B8G8R8_UNORM,
            Self::A8B8G8R8 => VIRTIO_GPU_FORMAT_A8B8G8R8_UNORM,
            Self::R8G8B8X8 => VIRTIO_GPU_FORMAT_R8G8B8X8_UNORM,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        4
    }
}

/// DRM fourcc for a `SET_SCANOUT_BLOB` format.
///
/// Only the four formats a dmabuf scanout can carry are mapped; anything else is logged and
/// presented as ARGB8888.
pub fn scanout_blob_fourcc(format: u32) -> u32 {
    match format {
        VIRTIO_GPU_FORMAT_B8G8R8X8_UNORM => DRM_FORMAT_XRGB8888,
        VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM => DRM_FORMAT_ARGB8888,
        VIRTIO_GPU_FORMAT_R8G8B8X8_UNORM => DRM_FORMAT_XBGR8888,
        VIRTIO_GPU_FORMAT_R8G8B8A8_UNORM => DRM_FORMAT_ABGR8888,
        other => {
            tracing::error!(format = other, "unsupported scanout blob format, using ARGB8888");
            DRM_FORMAT_ARGB8888
        }
    }
}

/// Why a host image could not be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAllocError {
    pub width: u32,
    pub height: u32,
}

/// Host-side pixel storage for a resource.
///
/// Cloning shares the pixels; the display backend and the resource store see the same buffer.
#[derive(Debug, Clone)]
pub struct PixelImage {
    data: Arc<RwLock<Vec<u8>>>,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

impl PixelImage {
    /// Allocates a zeroed `width` x `height` image with a tightly packed stride.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, ImageAllocError> {
        let err = ImageAllocError { width, height };
        let stride = width.checked_mul(format.bytes_per_pixel()).ok_or(err)?;
        let len = usize::try_from(u64::from(stride) * u64::from(height)).map_err(|_| err)?;
        if len > MAX_IMAGE_BYTES {
            return Err(err);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| err)?;
        data.resize(len, 0);
        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            width,
            height,
            stride,
            format,
        })
    }

    /// Wraps an existing buffer (e.g. VRAM) without copying it.
    pub fn from_shared(
        data: Arc<RwLock<Vec<u8>>>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            data,
            width,
            height,
            stride,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the pixel bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.read().clone()
    }

    /// True if both handles point at the same pixel buffer.
    pub fn ptr_eq(&self, other: &PixelImage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// What a surface scans out from.
#[derive(Debug, Clone)]
pub enum SurfaceData {
    Pixels(PixelImage),
    /// A zero-copy buffer. The fd stays owned by the device; backends must dup it to keep it.
    DmaBuf { fd: RawFd, fourcc: u32 },
}

/// Surface description passed to [`crate::backend::DisplayBackend`].
#[derive(Debug, Clone)]
pub struct Surface {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub data: SurfaceData,
}

impl Surface {
    pub fn pixels(&self) -> Option<&PixelImage> {
        match &self.data {
            SurfaceData::Pixels(image) => Some(image),
            SurfaceData::DmaBuf { .. } => None,
        }
    }

    pub fn dmabuf_fd(&self) -> Option<RawFd> {
        match self.data {
            SurfaceData::DmaBuf { fd, .. } => Some(fd),
            SurfaceData::Pixels(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub x: u32,
    pub y: u32,
    pub hot_x: u32,
    pub hot_y: u32,
    pub width: u32,
    pub height: u32,
    pub image: PixelImage,
}
