//! Wire-level constants and helpers for the virtio-gpu control and cursor queues.
//!
//! All structures are little-endian and packed exactly as laid out in the virtio 1.x
//! specification (`virtio_gpu.h`). Only the 2D and blob subset of the protocol is described here.

use bitflags::bitflags;
use thiserror::Error;

// 2D commands.
pub const VIRTIO_GPU_CMD_GET_DISPLAY_INFO: u32 = 0x0100;
pub const VIRTIO_GPU_CMD_RESOURCE_CREATE_2D: u32 = 0x0101;
pub const VIRTIO_GPU_CMD_RESOURCE_UNREF: u32 = 0x0102;
pub const VIRTIO_GPU_CMD_SET_SCANOUT: u32 = 0x0103;
pub const VIRTIO_GPU_CMD_RESOURCE_FLUSH: u32 = 0x0104;
pub const VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D: u32 = 0x0105;
pub const VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING: u32 = 0x0106;
pub const VIRTIO_GPU_CMD_RESOURCE_DETACH_BACKING: u32 = 0x0107;
pub const VIRTIO_GPU_CMD_GET_CAPSET_INFO: u32 = 0x0108;
pub const VIRTIO_GPU_CMD_GET_CAPSET: u32 = 0x0109;
pub const VIRTIO_GPU_CMD_GET_EDID: u32 = 0x010a;
pub const VIRTIO_GPU_CMD_RESOURCE_ASSIGN_UUID: u32 = 0x010b;
pub const VIRTIO_GPU_CMD_RESOURCE_CREATE_BLOB: u32 = 0x010c;
pub const VIRTIO_GPU_CMD_SET_SCANOUT_BLOB: u32 = 0x010d;

// Cursor commands.
pub const VIRTIO_GPU_CMD_UPDATE_CURSOR: u32 = 0x0300;
pub const VIRTIO_GPU_CMD_MOVE_CURSOR: u32 = 0x0301;

// Success responses.
pub const VIRTIO_GPU_RESP_OK_NODATA: u32 = 0x1100;
pub const VIRTIO_GPU_RESP_OK_DISPLAY_INFO: u32 = 0x1101;
pub const VIRTIO_GPU_RESP_OK_CAPSET_INFO: u32 = 0x1102;
pub const VIRTIO_GPU_RESP_OK_CAPSET: u32 = 0x1103;
pub const VIRTIO_GPU_RESP_OK_EDID: u32 = 0x1104;
pub const VIRTIO_GPU_RESP_OK_RESOURCE_UUID: u32 = 0x1105;
pub const VIRTIO_GPU_RESP_OK_MAP_INFO: u32 = 0x1106;

// Error responses.
pub const VIRTIO_GPU_RESP_ERR_UNSPEC: u32 = 0x1200;
pub const VIRTIO_GPU_RESP_ERR_OUT_OF_MEMORY: u32 = 0x1201;
pub const VIRTIO_GPU_RESP_ERR_INVALID_SCANOUT_ID: u32 = 0x1202;
pub const VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID: u32 = 0x1203;
pub const VIRTIO_GPU_RESP_ERR_INVALID_CONTEXT_ID: u32 = 0x1204;
pub const VIRTIO_GPU_RESP_ERR_INVALID_PARAMETER: u32 = 0x1205;

// Pixel formats (`enum virtio_gpu_formats`).
pub const VIRTIO_GPU_FORMAT_B8G8R8A8_UNORM: u32 = 1;
pub const VIRTIO_GPU_FORMAT_B8G8R8X8_UNORM: u32 = 2;
pub const VIRTIO_GPU_FORMAT_A8R8G8B8_UNORM: u32 = 3;
pub const VIRTIO_GPU_FORMAT_X8R8G8B8_UNORM: u32 = 4;
pub const VIRTIO_GPU_FORMAT_R8G8B8A8_UNORM: u32 = 67;
pub const VIRTIO_GPU_FORMAT_X8B8G8R8_UNORM: u32 = 68;
pub const VIRTIO_GPU_FORMAT_A8B8G8R8_UNORM: u32 = 121;
pub const VIRTIO_GPU_FORMAT_R8G8B8X8_UNORM: u32 = 134;

// Feature bits.
pub const VIRTIO_GPU_F_VIRGL: u32 = 0;
pub const VIRTIO_GPU_F_EDID: u32 = 1;
pub const VIRTIO_GPU_F_RESOURCE_UUID: u32 = 2;
pub const VIRTIO_GPU_F_RESOURCE_BLOB: u32 = 3;
pub const VIRTIO_GPU_F_CONTEXT_INIT: u32 = 4;
pub const VIRTIO_F_VERSION_1: u32 = 32;

// Blob resources.
pub const VIRTIO_GPU_BLOB_MEM_GUEST: u32 = 0x0001;
pub const VIRTIO_GPU_BLOB_MEM_HOST3D: u32 = 0x0002;
pub const VIRTIO_GPU_BLOB_MEM_HOST3D_GUEST: u32 = 0x0003;

pub const VIRTIO_GPU_BLOB_FLAG_USE_MAPPABLE: u32 = 0x0001;
pub const VIRTIO_GPU_BLOB_FLAG_USE_SHAREABLE: u32 = 0x0002;
pub const VIRTIO_GPU_BLOB_FLAG_USE_CROSS_DEVICE: u32 = 0x0004;

/// `virtio_gpu_config.events_read` bit signalling a display configuration change.
pub const VIRTIO_GPU_EVENT_DISPLAY: u32 = 1 << 0;

pub const VIRTIO_GPU_MAX_SCANOUTS: usize = 16;

/// Size of the EDID payload carried by `virtio_gpu_resp_edid`.
pub const VIRTIO_GPU_EDID_PAYLOAD_SIZE: usize = 1024;

bitflags! {
    /// `virtio_gpu_ctrl_hdr.flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CtrlHdrFlags: u32 {
        const FENCE = 1 << 0;
        const INFO_RING_IDX = 1 << 1;
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("buffer too short: want {want} bytes, got {got}")]
    BufferTooShort { want: usize, got: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("unknown command type {0:#x}")]
    UnknownCommand(u32),
}

pub type Result<T> = core::result::Result<T, ProtocolError>;

pub fn read_u32_le(buf: &[u8], off: usize) -> Result<u32> {
    let end = off.checked_add(4).ok_or(ProtocolError::InvalidParameter("offset overflow"))?;
    let bytes = buf.get(off..end).ok_or(ProtocolError::BufferTooShort {
        want: end,
        got: buf.len(),
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u64_le(buf: &[u8], off: usize) -> Result<u64> {
    let end = off.checked_add(8).ok_or(ProtocolError::InvalidParameter("offset overflow"))?;
    let bytes = buf.get(off..end).ok_or(ProtocolError::BufferTooShort {
        want: end,
        got: buf.len(),
    })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

pub fn ensure_len(buf: &[u8], want: usize) -> Result<()> {
    if buf.len() < want {
        return Err(ProtocolError::BufferTooShort {
            want,
            got: buf.len(),
        });
    }
    Ok(())
}

/// `struct virtio_gpu_ctrl_hdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtrlHdr {
    pub type_: u32,
    pub flags: u32,
    pub fence_id: u64,
    pub ctx_id: u32,
    pub ring_idx: u8,
}

impl CtrlHdr {
    pub const WIREFORMAT_SIZE: usize = 24;

    pub fn new(type_: u32) -> Self {
        Self {
            type_,
            ..Self::default()
        }
    }

    pub fn flags(&self) -> CtrlHdrFlags {
        CtrlHdrFlags::from_bits_truncate(self.flags)
    }

    pub fn is_fenced(&self) -> bool {
        self.flags().contains(CtrlHdrFlags::FENCE)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.type_.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.fence_id.to_le_bytes());
        out.extend_from_slice(&self.ctx_id.to_le_bytes());
        out.push(self.ring_idx);
        out.extend_from_slice(&[0u8; 3]);
    }
}

pub fn parse_ctrl_hdr(buf: &[u8]) -> Result<CtrlHdr> {
    ensure_len(buf, CtrlHdr::WIREFORMAT_SIZE)?;
    Ok(CtrlHdr {
        type_: read_u32_le(buf, 0)?,
        flags: read_u32_le(buf, 4)?,
        fence_id: read_u64_le(buf, 8)?,
        ctx_id: read_u32_le(buf, 16)?,
        ring_idx: buf[20],
    })
}

/// Builds the response header for `req`.
///
/// Fenced requests get their fence id (and ring index, if the guest asked for per-ring fencing)
/// echoed back; unfenced requests answer with zeroed fence fields.
pub fn resp_hdr_from_req(req: &CtrlHdr, type_: u32) -> CtrlHdr {
    let req_flags = req.flags();
    let mut hdr = CtrlHdr {
        type_,
        ctx_id: req.ctx_id,
        ..CtrlHdr::default()
    };
    if req_flags.contains(CtrlHdrFlags::FENCE) {
        let mut flags = CtrlHdrFlags::FENCE;
        hdr.fence_id = req.fence_id;
        if req_flags.contains(CtrlHdrFlags::INFO_RING_IDX) {
            flags |= CtrlHdrFlags::INFO_RING_IDX;
            hdr.ring_idx = req.ring_idx;
        }
        hdr.flags = flags.bits();
    }
    hdr
}

pub fn encode_resp_hdr_from_req(req: &CtrlHdr, type_: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(CtrlHdr::WIREFORMAT_SIZE);
    resp_hdr_from_req(req, type_).encode(&mut out);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const WIREFORMAT_SIZE: usize = 16;

    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Returns true if the rect lies entirely within a `width` x `height` surface.
    ///
    /// Overflowing edges are treated as out of bounds.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = match self.x.checked_add(self.width) {
            Some(v) => v,
            None => return false,
        };
        let bottom = match self.y.checked_add(self.height) {
            Some(v) => v,
            None => return false,
        };
        self.x <= width && self.y <= height && right <= width && bottom <= height
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_le_bytes());
        out.extend_from_slice(&self.y.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
    }
}

pub fn parse_rect(buf: &[u8], off: usize) -> Result<Rect> {
    Ok(Rect {
        x: read_u32_le(buf, off)?,
        y: read_u32_le(buf, off + 4)?,
        width: read_u32_le(buf, off + 8)?,
        height: read_u32_le(buf, off + 12)?,
    })
}

/// One entry of `virtio_gpu_resp_display_info.pmodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayMode {
    pub rect: Rect,
    pub enabled: bool,
    pub flags: u32,
}

/// Encodes `virtio_gpu_resp_display_info`: the header followed by exactly
/// [`VIRTIO_GPU_MAX_SCANOUTS`] mode entries. Missing entries are zeroed (disabled).
pub fn encode_resp_display_info(req: &CtrlHdr, modes: &[DisplayMode]) -> Vec<u8> {
    let mut out = encode_resp_hdr_from_req(req, VIRTIO_GPU_RESP_OK_DISPLAY_INFO);
    for idx in 0..VIRTIO_GPU_MAX_SCANOUTS {
        let mode = modes.get(idx).copied().unwrap_or_default();
        mode.rect.encode(&mut out);
        out.extend_from_slice(&(mode.enabled as u32).to_le_bytes());
        out.extend_from_slice(&mode.flags.to_le_bytes());
    }
    out
}

/// Encodes `virtio_gpu_resp_edid`. `edid` is truncated to the 1024-byte payload.
pub fn encode_resp_edid(req: &CtrlHdr, edid: &[u8]) -> Vec<u8> {
    let len = edid.len().min(VIRTIO_GPU_EDID_PAYLOAD_SIZE);
    let mut out = encode_resp_hdr_from_req(req, VIRTIO_GPU_RESP_OK_EDID);
    out.extend_from_slice(&(len as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    let payload_start = out.len();
    out.resize(payload_start + VIRTIO_GPU_EDID_PAYLOAD_SIZE, 0);
    out[payload_start..payload_start + len].copy_from_slice(&edid[..len]);
    out
}

pub const RESP_DISPLAY_INFO_SIZE: usize =
    CtrlHdr::WIREFORMAT_SIZE + VIRTIO_GPU_MAX_SCANOUTS * (Rect::WIREFORMAT_SIZE + 8);
pub const RESP_EDID_SIZE: usize = CtrlHdr::WIREFORMAT_SIZE + 8 + VIRTIO_GPU_EDID_PAYLOAD_SIZE;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hdr_bytes(type_: u32, flags: u32, fence_id: u64, ctx_id: u32, ring_idx: u8) -> Vec<u8> {
        let mut out = Vec::new();
        CtrlHdr {
            type_,
            flags,
            fence_id,
            ctx_id,
            ring_idx,
        }
        .encode(&mut out);
        out
    }

    #[test]
    fn ctrl_hdr_is_24_bytes_and_parses_back() {
        let bytes = hdr_bytes(VIRTIO_GPU_CMD_RESOURCE_FLUSH, 1, 0xdead_beef_0000_0001, 7, 3);
        assert_eq!(bytes.len(), CtrlHdr::WIREFORMAT_SIZE);
        let hdr = parse_ctrl_hdr(&bytes).unwrap();
        assert_eq!(hdr.type_, VIRTIO_GPU_CMD_RESOURCE_FLUSH);
        assert_eq!(hdr.fence_id, 0xdead_beef_0000_0001);
        assert_eq!(hdr.ctx_id, 7);
        assert_eq!(hdr.ring_idx, 3);
        assert!(hdr.is_fenced());
    }

    #[test]
    fn short_header_is_rejected() {
        let err = parse_ctrl_hdr(&[0u8; 23]).unwrap_err();
        assert_eq!(err, ProtocolError::BufferTooShort { want: 24, got: 23 });
    }

    #[test]
    fn fenced_request_echoes_fence_in_response() {
        let req = parse_ctrl_hdr(&hdr_bytes(VIRTIO_GPU_CMD_RESOURCE_UNREF, 1, 99, 0, 0)).unwrap();
        let resp = encode_resp_hdr_from_req(&req, VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID);
        let parsed = parse_ctrl_hdr(&resp).unwrap();
        assert_eq!(parsed.type_, VIRTIO_GPU_RESP_ERR_INVALID_RESOURCE_ID);
        assert_eq!(parsed.flags, CtrlHdrFlags::FENCE.bits());
        assert_eq!(parsed.fence_id, 99);
    }

    #[test]
    fn unfenced_request_does_not_leak_fence_id() {
        let req = parse_ctrl_hdr(&hdr_bytes(VIRTIO_GPU_CMD_RESOURCE_UNREF, 0, 99, 0, 5)).unwrap();
        let resp = encode_resp_hdr_from_req(&req, VIRTIO_GPU_RESP_OK_NODATA);
        let parsed = parse_ctrl_hdr(&resp).unwrap();
        assert_eq!(parsed.flags, 0);
        assert_eq!(parsed.fence_id, 0);
        assert_eq!(parsed.ring_idx, 0);
    }

    #[test]
    fn ring_idx_is_echoed_only_with_info_ring_idx() {
        let flags = (CtrlHdrFlags::FENCE | CtrlHdrFlags::INFO_RING_IDX).bits();
        let req =
            parse_ctrl_hdr(&hdr_bytes(VIRTIO_GPU_CMD_RESOURCE_FLUSH, flags, 5, 2, 4)).unwrap();
        let resp = encode_resp_hdr_from_req(&req, VIRTIO_GPU_RESP_OK_NODATA);
        let parsed = parse_ctrl_hdr(&resp).unwrap();
        assert_eq!(parsed.flags, flags);
        assert_eq!(parsed.ring_idx, 4);
        assert_eq!(parsed.ctx_id, 2);
    }

    #[test]
    fn display_info_always_carries_sixteen_modes() {
        let req = CtrlHdr::new(VIRTIO_GPU_CMD_GET_DISPLAY_INFO);
        let out = encode_resp_display_info(
            &req,
            &[DisplayMode {
                rect: Rect::new(0, 0, 1280, 720),
                enabled: true,
                flags: 0,
            }],
        );
        assert_eq!(out.len(), RESP_DISPLAY_INFO_SIZE);
        assert_eq!(read_u32_le(&out, 24 + 8).unwrap(), 1280);
        assert_eq!(read_u32_le(&out, 24 + 12).unwrap(), 720);
        assert_eq!(read_u32_le(&out, 24 + 16).unwrap(), 1);
        // Second mode is disabled.
        assert_eq!(read_u32_le(&out, 24 + 24 + 16).unwrap(), 0);
    }

    #[test]
    fn edid_response_is_padded_to_payload_size() {
        let req = CtrlHdr::new(VIRTIO_GPU_CMD_GET_EDID);
        let edid = [0xabu8; 128];
        let out = encode_resp_edid(&req, &edid);
        assert_eq!(out.len(), RESP_EDID_SIZE);
        assert_eq!(read_u32_le(&out, 0).unwrap(), VIRTIO_GPU_RESP_OK_EDID);
        assert_eq!(read_u32_le(&out, 24).unwrap(), 128);
        assert_eq!(&out[32..32 + 128], &edid[..]);
        assert!(out[32 + 128..].iter().all(|&b| b == 0));
    }

    #[test]
    fn rect_bounds_reject_overflowing_edges() {
        assert!(Rect::new(0, 0, 64, 64).fits_within(64, 64));
        assert!(Rect::new(16, 16, 48, 48).fits_within(64, 64));
        assert!(!Rect::new(16, 16, 49, 48).fits_within(64, 64));
        assert!(!Rect::new(u32::MAX, 0, 2, 1).fits_within(64, 64));
        assert!(!Rect::new(0, 65, 0, 0).fits_within(64, 64));
    }
}
