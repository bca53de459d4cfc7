//! Typed decoding of control-queue and cursor-queue requests.
//!
//! Every request is decoded into a tagged union so the device can dispatch with an exhaustive
//! `match`. Decoding only checks structural validity (lengths, entry tables); semantic checks such
//! as resource lookups are left to the device.

use crate::protocol::{
    ensure_len, parse_rect, read_u32_le, read_u64_le, CtrlHdr, ProtocolError, Rect, Result,
    VIRTIO_GPU_CMD_GET_DISPLAY_INFO, VIRTIO_GPU_CMD_GET_EDID, VIRTIO_GPU_CMD_MOVE_CURSOR,
    VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING, VIRTIO_GPU_CMD_RESOURCE_CREATE_2D,
    VIRTIO_GPU_CMD_RESOURCE_CREATE_BLOB, VIRTIO_GPU_CMD_RESOURCE_DETACH_BACKING,
    VIRTIO_GPU_CMD_RESOURCE_FLUSH, VIRTIO_GPU_CMD_RESOURCE_UNREF, VIRTIO_GPU_CMD_SET_SCANOUT,
    VIRTIO_GPU_CMD_SET_SCANOUT_BLOB, VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D,
    VIRTIO_GPU_CMD_UPDATE_CURSOR,
};

const BODY: usize = CtrlHdr::WIREFORMAT_SIZE;

/// `struct virtio_gpu_mem_entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemEntry {
    pub addr: u64,
    pub length: u32,
}

impl MemEntry {
    pub const WIREFORMAT_SIZE: usize = 16;
}

/// Parses `nr_entries` memory entries starting at `off`.
///
/// The whole table is length-checked before anything is allocated so a hostile `nr_entries`
/// cannot force a large allocation.
pub fn parse_mem_entries(buf: &[u8], off: usize, nr_entries: u32) -> Result<Vec<MemEntry>> {
    let table_len = (nr_entries as usize)
        .checked_mul(MemEntry::WIREFORMAT_SIZE)
        .and_then(|len| len.checked_add(off))
        .ok_or(ProtocolError::InvalidParameter("memory entry table overflow"))?;
    ensure_len(buf, table_len)?;

    let mut entries = Vec::with_capacity(nr_entries as usize);
    for idx in 0..nr_entries as usize {
        let entry_off = off + idx * MemEntry::WIREFORMAT_SIZE;
        entries.push(MemEntry {
            addr: read_u64_le(buf, entry_off)?,
            length: read_u32_le(buf, entry_off + 8)?,
        });
    }
    Ok(entries)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetEdid {
    pub scanout: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCreate2d {
    pub resource_id: u32,
    pub format: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUnref {
    pub resource_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetScanout {
    pub rect: Rect,
    pub scanout_id: u32,
    pub resource_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceFlush {
    pub rect: Rect,
    pub resource_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferToHost2d {
    pub rect: Rect,
    pub offset: u64,
    pub resource_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAttachBacking {
    pub resource_id: u32,
    pub entries: Vec<MemEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDetachBacking {
    pub resource_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCreateBlob {
    pub resource_id: u32,
    pub blob_mem: u32,
    pub blob_flags: u32,
    pub blob_id: u64,
    pub size: u64,
    pub entries: Vec<MemEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetScanoutBlob {
    pub rect: Rect,
    pub scanout_id: u32,
    pub resource_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub strides: [u32; 4],
    pub offsets: [u32; 4],
}

/// A decoded control-queue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuCommand {
    GetDisplayInfo,
    GetEdid(GetEdid),
    ResourceCreate2d(ResourceCreate2d),
    ResourceUnref(ResourceUnref),
    SetScanout(SetScanout),
    ResourceFlush(ResourceFlush),
    TransferToHost2d(TransferToHost2d),
    ResourceAttachBacking(ResourceAttachBacking),
    ResourceDetachBacking(ResourceDetachBacking),
    ResourceCreateBlob(ResourceCreateBlob),
    SetScanoutBlob(SetScanoutBlob),
    /// Any command type this device does not implement (capsets, 3D, UUIDs, ...).
    Unsupported(u32),
}

impl GpuCommand {
    /// Decodes the request body following `hdr`. `req` is the full request, header included.
    pub fn decode(hdr: &CtrlHdr, req: &[u8]) -> Result<Self> {
        let cmd = match hdr.type_ {
            VIRTIO_GPU_CMD_GET_DISPLAY_INFO => GpuCommand::GetDisplayInfo,
            VIRTIO_GPU_CMD_GET_EDID => {
                ensure_len(req, BODY + 8)?;
                GpuCommand::GetEdid(GetEdid {
                    scanout: read_u32_le(req, BODY)?,
                })
            }
            VIRTIO_GPU_CMD_RESOURCE_CREATE_2D => {
                ensure_len(req, BODY + 16)?;
                GpuCommand::ResourceCreate2d(ResourceCreate2d {
                    resource_id: read_u32_le(req, BODY)?,
                    format: read_u32_le(req, BODY + 4)?,
                    width: read_u32_le(req, BODY + 8)?,
                    height: read_u32_le(req, BODY + 12)?,
                })
            }
            VIRTIO_GPU_CMD_RESOURCE_UNREF => {
                ensure_len(req, BODY + 8)?;
                GpuCommand::ResourceUnref(ResourceUnref {
                    resource_id: read_u32_le(req, BODY)?,
                })
            }
            VIRTIO_GPU_CMD_SET_SCANOUT => {
                ensure_len(req, BODY + 24)?;
                GpuCommand::SetScanout(SetScanout {
                    rect: parse_rect(req, BODY)?,
                    scanout_id: read_u32_le(req, BODY + 16)?,
                    resource_id: read_u32_le(req, BODY + 20)?,
                })
            }
            VIRTIO_GPU_CMD_RESOURCE_FLUSH => {
                ensure_len(req, BODY + 24)?;
                GpuCommand::ResourceFlush(ResourceFlush {
                    rect: parse_rect(req, BODY)?,
                    resource_id: read_u32_le(req, BODY + 16)?,
                })
            }
            VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D => {
                ensure_len(req, BODY + 32)?;
                GpuCommand::TransferToHost2d(TransferToHost2d {
                    rect: parse_rect(req, BODY)?,
                    offset: read_u64_le(req, BODY + 16)?,
                    resource_id: read_u32_le(req, BODY + 24)?,
                })
            }
            VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING => {
                ensure_len(req, BODY + 8)?;
                let resource_id = read_u32_le(req, BODY)?;
                let nr_entries = read_u32_le(req, BODY + 4)?;
                GpuCommand::ResourceAttachBacking(ResourceAttachBacking {
                    resource_id,
                    entries: parse_mem_entries(req, BODY + 8, nr_entries)?,
                })
            }
            VIRTIO_GPU_CMD_RESOURCE_DETACH_BACKING => {
                ensure_len(req, BODY + 8)?;
                GpuCommand::ResourceDetachBacking(ResourceDetachBacking {
                    resource_id: read_u32_le(req, BODY)?,
                })
            }
            VIRTIO_GPU_CMD_RESOURCE_CREATE_BLOB => {
                // resource_id + blob_mem + blob_flags + nr_entries + blob_id + size
                ensure_len(req, BODY + 32)?;
                let nr_entries = read_u32_le(req, BODY + 12)?;
                GpuCommand::ResourceCreateBlob(ResourceCreateBlob {
                    resource_id: read_u32_le(req, BODY)?,
                    blob_mem: read_u32_le(req, BODY + 4)?,
                    blob_flags: read_u32_le(req, BODY + 8)?,
                    blob_id: read_u64_le(req, BODY + 16)?,
                    size: read_u64_le(req, BODY + 24)?,
                    entries: parse_mem_entries(req, BODY + 32, nr_entries)?,
                })
            }
            VIRTIO_GPU_CMD_SET_SCANOUT_BLOB => {
                // rect + scanout_id + resource_id + width + height + format + padding
                // + strides[4] + offsets[4]
                ensure_len(req, BODY + 72)?;
                let mut strides = [0u32; 4];
                let mut offsets = [0u32; 4];
                for i in 0..4 {
                    strides[i] = read_u32_le(req, BODY + 40 + i * 4)?;
                    offsets[i] = read_u32_le(req, BODY + 56 + i * 4)?;
                }
                GpuCommand::SetScanoutBlob(SetScanoutBlob {
                    rect: parse_rect(req, BODY)?,
                    scanout_id: read_u32_le(req, BODY + 16)?,
                    resource_id: read_u32_le(req, BODY + 20)?,
                    width: read_u32_le(req, BODY + 24)?,
                    height: read_u32_le(req, BODY + 28)?,
                    format: read_u32_le(req, BODY + 32)?,
                    strides,
                    offsets,
                })
            }
            other => GpuCommand::Unsupported(other),
        };
        Ok(cmd)
    }
}

/// `struct virtio_gpu_cursor_pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPos {
    pub scanout_id: u32,
    pub x: u32,
    pub y: u32,
}

/// `struct virtio_gpu_update_cursor` (shared by UPDATE_CURSOR and MOVE_CURSOR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCursor {
    pub pos: CursorPos,
    pub resource_id: u32,
    pub hot_x: u32,
    pub hot_y: u32,
}

impl UpdateCursor {
    pub const WIREFORMAT_SIZE: usize = CtrlHdr::WIREFORMAT_SIZE + 32;
}

/// A decoded cursor-queue request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorCommand {
    Update(UpdateCursor),
    Move(UpdateCursor),
    Unsupported(u32),
}

impl CursorCommand {
    pub fn decode(hdr: &CtrlHdr, req: &[u8]) -> Result<Self> {
        let parse = |req: &[u8]| -> Result<UpdateCursor> {
            ensure_len(req, UpdateCursor::WIREFORMAT_SIZE)?;
            Ok(UpdateCursor {
                pos: CursorPos {
                    scanout_id: read_u32_le(req, BODY)?,
                    x: read_u32_le(req, BODY + 4)?,
                    y: read_u32_le(req, BODY + 8)?,
                },
                resource_id: read_u32_le(req, BODY + 16)?,
                hot_x: read_u32_le(req, BODY + 20)?,
                hot_y: read_u32_le(req, BODY + 24)?,
            })
        };
        Ok(match hdr.type_ {
            VIRTIO_GPU_CMD_UPDATE_CURSOR => CursorCommand::Update(parse(req)?),
            VIRTIO_GPU_CMD_MOVE_CURSOR => CursorCommand::Move(parse(req)?),
            other => CursorCommand::Unsupported(other),
        })
    }
}
