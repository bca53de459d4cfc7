//! virtio-gpu device model (2D + zero-copy blobs).
//!
//! The crate terminates the virtio-gpu control and cursor queues on top of a transport supplied by
//! the machine model:
//! - [`dispatch::GpuCore`] decodes commands, owns the resource store and talks to the
//!   [`backend::DisplayBackend`],
//! - [`bh::DisplayWorker`] runs all of that on a single display-owning thread,
//! - [`vga_bridge::VgaBridge`] keeps the legacy VBE framebuffer on screen until the guest driver
//!   binds its first scanout, and
//! - [`VirtioGpu`] ties them together and exposes the config space and register BARs.
//!
//! Blob resources are backed by Linux udmabufs built from the memory file behind guest RAM; on
//! other hosts (or when probing fails) the blob commands answer `ERR_UNSPEC`.
#![deny(unsafe_code)]

pub mod backend;
pub mod bh;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod dmabuf;
pub mod error;
pub mod pci;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod scanout;
pub mod state;
pub mod udmabuf;
pub mod vga_bridge;

pub use backend::{DisplayBackend, DisplayInfo, NullDisplayBackend};
pub use bh::{BhError, BhHandle, DisplayWorker};
pub use config::VirtioGpuDeviceConfig;
pub use device::{Bar2Access, VirtioGpu, VirtioGpuHost};
pub use dispatch::{GpuCore, GpuResponse, SMALL_BLOB_MAX_SIZE};
pub use dmabuf::{create_dmabuf, DmaBuf, DmaBufAllocator, DmaBufError, UdmabufItem};
pub use error::{CommandError, DeviceError};
pub use pci::{decode_bar2, Bar2Region};
pub use queue::{InterruptSink, QueueError, QueueRequest, VirtQueue, CONTROL_QUEUE, CURSOR_QUEUE};
pub use registry::{DeviceRegistration, DeviceRegistry, RegistryError};
pub use resource::{BackingSegment, Resource, ResourceStorage, ResourceStore};
pub use scanout::{Cursor, PixelFormat, PixelImage, Surface, SurfaceData};
pub use udmabuf::{probe_blob_support, BlobProbeError};
pub use vga_bridge::{LegacyVgaRenderer, LoggingVgaRenderer, VgaBridge};
