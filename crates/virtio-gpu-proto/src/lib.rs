//! virtio-gpu wire protocol (2D + guest blob subset).
//!
//! The [`protocol`] module holds the bit-exact constants, the control header and the response
//! encoders. [`commands`] turns raw request bytes into typed [`GpuCommand`] / [`CursorCommand`]
//! values. [`config`] describes the device-specific configuration space.
#![forbid(unsafe_code)]

pub mod commands;
pub mod config;
pub mod protocol;

pub use commands::{
    CursorCommand, CursorPos, GetEdid, GpuCommand, MemEntry, ResourceAttachBacking,
    ResourceCreate2d, ResourceCreateBlob, ResourceDetachBacking, ResourceFlush, ResourceUnref,
    SetScanout, SetScanoutBlob, TransferToHost2d, UpdateCursor,
};
pub use config::{ConfigWriteError, VirtioGpuConfigSpace, CONFIG_SPACE_SIZE};
pub use protocol::{CtrlHdr, CtrlHdrFlags, DisplayMode, ProtocolError, Rect};
