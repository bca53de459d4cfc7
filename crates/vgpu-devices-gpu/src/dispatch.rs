//! Command dispatcher and the worker-side device state.
//!
//! [`GpuCore`] lives on the display worker. It owns the resource store, the display backend and
//! both virtqueues, so command handling and every backend call happen on that one thread.

use std::sync::Arc;

use memory::GuestMemory;
use virtio_gpu_proto::commands::{
    CursorCommand, GetEdid, GpuCommand, ResourceAttachBacking, ResourceCreate2d,
    ResourceCreateBlob, ResourceFlush, SetScanout, SetScanoutBlob, TransferToHost2d, UpdateCursor,
};
use virtio_gpu_proto::protocol::{
    encode_resp_display_info, encode_resp_edid, encode_resp_hdr_from_req, parse_ctrl_hdr,
    VIRTIO_GPU_BLOB_FLAG_USE_SHAREABLE, VIRTIO_GPU_BLOB_MEM_GUEST,
    VIRTIO_GPU_CMD_RESOURCE_CREATE_BLOB, VIRTIO_GPU_CMD_SET_SCANOUT_BLOB,
    VIRTIO_GPU_RESP_ERR_UNSPEC, VIRTIO_GPU_RESP_OK_NODATA,
};
use virtio_gpu_proto::{CtrlHdr, DisplayMode, Rect};
use vgpu_edid::EDID_BLOCK_SIZE;

use crate::backend::DisplayBackend;
use crate::dmabuf::{create_dmabuf, DmaBufAllocator};
use crate::error::CommandError;
use crate::pci::EDID_WINDOW_SIZE;
use crate::queue::VirtQueue;
use crate::resource::{
    gather_from_backing, BackingSegment, BlobLayout, Resource, ResourceStorage, ResourceStore,
};
use crate::scanout::{scanout_blob_fourcc, Cursor, PixelFormat, PixelImage, Surface, SurfaceData};
use crate::state::{lock_shared, SharedHandle};

/// Blobs up to this size are copied into a host image instead of shared zero-copy.
pub const SMALL_BLOB_MAX_SIZE: u64 = 16 * 1024;

/// Geometry of the host image backing a small blob (a cursor).
pub const SMALL_BLOB_WIDTH: u32 = 64;
pub const SMALL_BLOB_HEIGHT: u32 = 64;

/// Successful command outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuResponse {
    NoData,
    DisplayInfo(Vec<DisplayMode>),
    Edid(Vec<u8>),
}

type CommandResult = Result<GpuResponse, CommandError>;

pub struct GpuCore {
    resources: ResourceStore,
    backend: Box<dyn DisplayBackend>,
    memory: Arc<dyn GuestMemory + Send + Sync>,
    allocator: Option<Box<dyn DmaBufAllocator>>,
    shared: SharedHandle,
    scanout_resource: Option<u32>,
    num_scanouts: u32,
    control_queue: Box<dyn VirtQueue>,
    cursor_queue: Box<dyn VirtQueue>,
}

impl GpuCore {
    pub fn new(
        backend: Box<dyn DisplayBackend>,
        memory: Arc<dyn GuestMemory + Send + Sync>,
        allocator: Option<Box<dyn DmaBufAllocator>>,
        shared: SharedHandle,
        control_queue: Box<dyn VirtQueue>,
        cursor_queue: Box<dyn VirtQueue>,
    ) -> Self {
        let num_scanouts = lock_shared(&shared).config.num_scanouts;
        Self {
            resources: ResourceStore::new(),
            backend,
            memory,
            allocator,
            shared,
            scanout_resource: None,
            num_scanouts,
            control_queue,
            cursor_queue,
        }
    }

    pub fn blob_supported(&self) -> bool {
        self.allocator.is_some()
    }

    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Resource currently bound to the scanout.
    pub fn scanout_resource(&self) -> Option<u32> {
        self.scanout_resource
    }

    /// Executes one control command and returns the encoded response.
    pub fn process_control_command(&mut self, req: &[u8]) -> Vec<u8> {
        let hdr = match parse_ctrl_hdr(req) {
            Ok(hdr) => hdr,
            Err(err) => {
                tracing::warn!(%err, "control request too short for a header");
                return encode_resp_hdr_from_req(&CtrlHdr::default(), VIRTIO_GPU_RESP_ERR_UNSPEC);
            }
        };

        match self.dispatch(&hdr, req) {
            Ok(GpuResponse::NoData) => encode_resp_hdr_from_req(&hdr, VIRTIO_GPU_RESP_OK_NODATA),
            Ok(GpuResponse::DisplayInfo(modes)) => encode_resp_display_info(&hdr, &modes),
            Ok(GpuResponse::Edid(edid)) => encode_resp_edid(&hdr, &edid),
            Err(err) => {
                match &err {
                    CommandError::DmaBuf(_) | CommandError::OutOfMemory(_) => {
                        tracing::error!(cmd = hdr.type_, %err, "command failed");
                    }
                    CommandError::Unsupported(_) | CommandError::BlobUnsupported => {
                        tracing::debug!(cmd = hdr.type_, %err, "command rejected");
                    }
                    _ => tracing::warn!(cmd = hdr.type_, %err, "command failed"),
                }
                encode_resp_hdr_from_req(&hdr, err.response_type())
            }
        }
    }

    fn dispatch(&mut self, hdr: &CtrlHdr, req: &[u8]) -> CommandResult {
        if !self.blob_supported()
            && matches!(
                hdr.type_,
                VIRTIO_GPU_CMD_RESOURCE_CREATE_BLOB | VIRTIO_GPU_CMD_SET_SCANOUT_BLOB
            )
        {
            return Err(CommandError::BlobUnsupported);
        }

        match GpuCommand::decode(hdr, req)? {
            GpuCommand::GetDisplayInfo => Ok(self.get_display_info()),
            GpuCommand::GetEdid(cmd) => Ok(self.get_edid(cmd)),
            GpuCommand::ResourceCreate2d(cmd) => self.resource_create_2d(cmd),
            GpuCommand::ResourceUnref(cmd) => self.resource_unref(cmd.resource_id),
            GpuCommand::SetScanout(cmd) => self.set_scanout(cmd),
            GpuCommand::ResourceFlush(cmd) => self.resource_flush(cmd),
            GpuCommand::TransferToHost2d(cmd) => self.transfer_to_host_2d(cmd),
            GpuCommand::ResourceAttachBacking(cmd) => self.resource_attach_backing(cmd),
            GpuCommand::ResourceDetachBacking(cmd) => {
                if let Some(res) = self.resources.get_mut(cmd.resource_id) {
                    res.detach_backing();
                }
                Ok(GpuResponse::NoData)
            }
            GpuCommand::ResourceCreateBlob(cmd) => self.resource_create_blob(cmd),
            GpuCommand::SetScanoutBlob(cmd) => self.set_scanout_blob(cmd),
            GpuCommand::Unsupported(type_) => Err(CommandError::Unsupported(type_)),
        }
    }

    fn get_display_info(&self) -> GpuResponse {
        let info = self.backend.get_display_info();
        GpuResponse::DisplayInfo(vec![DisplayMode {
            rect: Rect::new(info.xoff, info.yoff, info.width, info.height),
            enabled: true,
            flags: 0,
        }])
    }

    fn get_edid(&self, cmd: GetEdid) -> GpuResponse {
        tracing::trace!(scanout = cmd.scanout, "GET_EDID");
        let mut edid = vec![0u8; EDID_WINDOW_SIZE];
        self.backend.get_edid(&mut edid);
        edid.truncate(EDID_BLOCK_SIZE);
        GpuResponse::Edid(edid)
    }

    fn resource_create_2d(&mut self, cmd: ResourceCreate2d) -> CommandResult {
        if cmd.resource_id == 0 {
            return Err(CommandError::InvalidResourceId(0));
        }
        if self.resources.contains(cmd.resource_id) {
            tracing::debug!(resource_id = cmd.resource_id, "resource id already in use");
            return Err(CommandError::InvalidResourceId(cmd.resource_id));
        }
        let format = PixelFormat::from_virtio(cmd.format)
            .ok_or(CommandError::InvalidParameter("unsupported resource format"))?;
        if cmd.width == 0 || cmd.height == 0 {
            return Err(CommandError::InvalidParameter("empty resource"));
        }
        let image = PixelImage::new(cmd.width, cmd.height, format)
            .map_err(|_| CommandError::OutOfMemory("resource image"))?;
        self.resources
            .insert(Resource::new_2d(cmd.resource_id, image))
            .map_err(|res| CommandError::InvalidResourceId(res.id))?;
        Ok(GpuResponse::NoData)
    }

    fn resource_unref(&mut self, resource_id: u32) -> CommandResult {
        if !self.resources.remove(resource_id) {
            return Err(CommandError::InvalidResourceId(resource_id));
        }
        if self.scanout_resource == Some(resource_id) {
            self.scanout_resource = None;
        }
        Ok(GpuResponse::NoData)
    }

    fn resource_attach_backing(&mut self, cmd: ResourceAttachBacking) -> CommandResult {
        let mem = &*self.memory;
        let res = self
            .resources
            .get_mut(cmd.resource_id)
            .ok_or(CommandError::InvalidResourceId(cmd.resource_id))?;
        let backing = cmd
            .entries
            .iter()
            .map(|entry| BackingSegment::resolve(mem, entry))
            .collect();
        res.attach_backing(backing);
        Ok(GpuResponse::NoData)
    }

    fn clear_scanout(&mut self) {
        self.backend.surface_set(None);
        self.scanout_resource = None;
    }

    fn disable_vga(&self) {
        lock_shared(&self.shared).vga_enabled = false;
    }

    fn set_scanout(&mut self, cmd: SetScanout) -> CommandResult {
        if cmd.scanout_id >= self.num_scanouts {
            return Err(CommandError::InvalidScanoutId(cmd.scanout_id));
        }
        let Some(res) = self.resources.get(cmd.resource_id) else {
            if cmd.resource_id != 0 {
                tracing::debug!(resource_id = cmd.resource_id, "scanout of unknown resource");
            }
            self.clear_scanout();
            return Ok(GpuResponse::NoData);
        };
        // The driver owns the display once it names a real resource, even with a bad rect.
        self.disable_vga();
        if !cmd.rect.fits_within(res.width, res.height) {
            tracing::warn!(
                resource_id = cmd.resource_id,
                rect = ?cmd.rect,
                "scanout rect out of bounds"
            );
            return Err(CommandError::InvalidParameter("scanout rect out of bounds"));
        }
        let image = res
            .pixels()
            .ok_or(CommandError::InvalidParameter("resource has no host image"))?
            .clone();
        let surface = Surface {
            x: 0,
            y: 0,
            width: res.width,
            height: res.height,
            stride: image.stride(),
            data: SurfaceData::Pixels(image),
        };
        self.backend.surface_set(Some(&surface));
        self.scanout_resource = Some(cmd.resource_id);
        Ok(GpuResponse::NoData)
    }

    fn transfer_to_host_2d(&mut self, cmd: TransferToHost2d) -> CommandResult {
        let res = self
            .resources
            .get(cmd.resource_id)
            .ok_or(CommandError::InvalidResourceId(cmd.resource_id))?;
        if res.is_blob() {
            return Ok(GpuResponse::NoData);
        }
        let rect = cmd.rect;
        if !rect.fits_within(res.width, res.height) {
            tracing::warn!(resource_id = cmd.resource_id, ?rect, "transfer rect out of bounds");
            return Err(CommandError::InvalidParameter("transfer rect out of bounds"));
        }
        let image = res
            .pixels()
            .ok_or(CommandError::InvalidParameter("resource has no host image"))?;

        let bpp = u64::from(image.format().bytes_per_pixel());
        let stride = u64::from(image.stride());
        let row_bytes = (u64::from(rect.width) * bpp) as usize;
        let mut pixels = image.write();
        for h in 0..u64::from(rect.height) {
            let src_offset = cmd.offset.saturating_add(stride * h);
            let dst_offset = ((u64::from(rect.y) + h) * stride + u64::from(rect.x) * bpp) as usize;
            gather_from_backing(
                &*self.memory,
                &res.backing,
                src_offset,
                &mut pixels[dst_offset..dst_offset + row_bytes],
            );
        }
        Ok(GpuResponse::NoData)
    }

    fn resource_flush(&mut self, cmd: ResourceFlush) -> CommandResult {
        let res = self
            .resources
            .get(cmd.resource_id)
            .ok_or(CommandError::InvalidResourceId(cmd.resource_id))?;
        match &res.storage {
            ResourceStorage::DmaBuf(buf) => {
                let fd = buf
                    .raw_fd()
                    .ok_or(CommandError::InvalidResourceId(cmd.resource_id))?;
                let layout = res.layout.unwrap_or(BlobLayout {
                    width: res.width,
                    height: res.height,
                    stride: res.width * res.format.bytes_per_pixel(),
                    fourcc: scanout_blob_fourcc(res.format.to_virtio()),
                });
                let surface = Surface {
                    x: cmd.rect.x,
                    y: cmd.rect.y,
                    width: layout.width,
                    height: layout.height,
                    stride: layout.stride,
                    data: SurfaceData::DmaBuf {
                        fd,
                        fourcc: layout.fourcc,
                    },
                };
                buf.retain();
                self.backend.surface_update(&surface);
                buf.release();
            }
            ResourceStorage::Pixels(image) => {
                let surface = Surface {
                    x: cmd.rect.x,
                    y: cmd.rect.y,
                    width: res.width,
                    height: res.height,
                    stride: image.stride(),
                    data: SurfaceData::Pixels(image.clone()),
                };
                self.backend.surface_update(&surface);
            }
        }
        Ok(GpuResponse::NoData)
    }

    fn resource_create_blob(&mut self, cmd: ResourceCreateBlob) -> CommandResult {
        if cmd.resource_id == 0 {
            return Err(CommandError::InvalidResourceId(0));
        }
        if cmd.blob_mem != VIRTIO_GPU_BLOB_MEM_GUEST
            || cmd.blob_flags != VIRTIO_GPU_BLOB_FLAG_USE_SHAREABLE
        {
            tracing::warn!(
                blob_mem = cmd.blob_mem,
                blob_flags = cmd.blob_flags,
                "unsupported blob memory type"
            );
            return Err(CommandError::InvalidParameter("blob memory type"));
        }
        if self.resources.contains(cmd.resource_id) {
            tracing::debug!(resource_id = cmd.resource_id, "resource id already in use");
            return Err(CommandError::InvalidResourceId(cmd.resource_id));
        }

        let mem = &*self.memory;
        let backing: Vec<BackingSegment> = cmd
            .entries
            .iter()
            .map(|entry| BackingSegment::resolve(mem, entry))
            .collect();

        let resource = if cmd.size > SMALL_BLOB_MAX_SIZE {
            let allocator = self
                .allocator
                .as_deref()
                .ok_or(CommandError::BlobUnsupported)?;
            let buf = create_dmabuf(allocator, mem, &cmd.entries)?;
            Resource {
                id: cmd.resource_id,
                width: 0,
                height: 0,
                format: PixelFormat::B8G8R8A8,
                storage: ResourceStorage::DmaBuf(buf),
                backing,
                layout: None,
            }
        } else {
            let image = PixelImage::new(SMALL_BLOB_WIDTH, SMALL_BLOB_HEIGHT, PixelFormat::B8G8R8A8)
                .map_err(|_| CommandError::OutOfMemory("blob image"))?;
            gather_from_backing(mem, &backing, 0, &mut image.write());
            let mut resource = Resource::new_2d(cmd.resource_id, image);
            resource.backing = backing;
            resource
        };
        self.resources
            .insert(resource)
            .map_err(|res| CommandError::InvalidResourceId(res.id))?;
        Ok(GpuResponse::NoData)
    }

    fn set_scanout_blob(&mut self, cmd: SetScanoutBlob) -> CommandResult {
        self.disable_vga();
        if cmd.scanout_id >= self.num_scanouts {
            return Err(CommandError::InvalidScanoutId(cmd.scanout_id));
        }
        if cmd.resource_id == 0 {
            self.clear_scanout();
            return Ok(GpuResponse::NoData);
        }
        let res = self
            .resources
            .get_mut(cmd.resource_id)
            .ok_or(CommandError::InvalidResourceId(cmd.resource_id))?;
        let Some(buf) = res.dmabuf().cloned() else {
            return self.set_scanout(SetScanout {
                rect: cmd.rect,
                scanout_id: cmd.scanout_id,
                resource_id: cmd.resource_id,
            });
        };
        let fd = buf
            .raw_fd()
            .ok_or(CommandError::InvalidResourceId(cmd.resource_id))?;
        let layout = BlobLayout {
            width: cmd.width,
            height: cmd.height,
            stride: cmd.strides[0],
            fourcc: scanout_blob_fourcc(cmd.format),
        };
        res.layout = Some(layout);

        let surface = Surface {
            x: cmd.rect.x,
            y: cmd.rect.y,
            width: layout.width,
            height: layout.height,
            stride: layout.stride,
            data: SurfaceData::DmaBuf {
                fd,
                fourcc: layout.fourcc,
            },
        };
        buf.retain();
        self.backend.surface_set(Some(&surface));
        buf.release();
        self.scanout_resource = Some(cmd.resource_id);
        Ok(GpuResponse::NoData)
    }

    /// Executes one cursor command. Cursor commands carry no response payload.
    pub fn process_cursor_command(&mut self, req: &[u8]) {
        let hdr = match parse_ctrl_hdr(req) {
            Ok(hdr) => hdr,
            Err(err) => {
                tracing::warn!(%err, "cursor request too short for a header");
                return;
            }
        };
        match CursorCommand::decode(&hdr, req) {
            Ok(CursorCommand::Update(cmd)) => self.update_cursor(cmd),
            Ok(CursorCommand::Move(cmd)) => self.backend.cursor_move(cmd.pos.x, cmd.pos.y),
            Ok(CursorCommand::Unsupported(type_)) => {
                tracing::debug!(cmd = type_, "unsupported cursor command");
            }
            Err(err) => tracing::warn!(%err, "malformed cursor command"),
        }
    }

    fn update_cursor(&mut self, cmd: UpdateCursor) {
        if cmd.resource_id == 0 {
            return;
        }
        let Some(res) = self.resources.get(cmd.resource_id) else {
            tracing::debug!(resource_id = cmd.resource_id, "cursor from unknown resource");
            return;
        };
        let Some(image) = res.pixels() else {
            return;
        };
        let cursor = Cursor {
            x: cmd.pos.x,
            y: cmd.pos.y,
            hot_x: cmd.hot_x,
            hot_y: cmd.hot_y,
            width: res.width,
            height: res.height,
            image: image.clone(),
        };
        self.backend.cursor_define(&cursor);
    }

    /// Answers every available control chain in order, then signals the guest once.
    pub fn drain_control_queue(&mut self) {
        loop {
            let chain = match self.control_queue.pop_chain() {
                Ok(Some(chain)) => chain,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(%err, "control queue");
                    break;
                }
            };
            let mut resp = self.process_control_command(&chain.request);
            if resp.len() > chain.response_capacity {
                tracing::warn!(
                    len = resp.len(),
                    capacity = chain.response_capacity,
                    "response truncated"
                );
                resp.truncate(chain.response_capacity);
            }
            self.control_queue.add_used(chain.head, &resp);
        }
        self.control_queue.notify_used();
    }

    pub fn drain_cursor_queue(&mut self) {
        loop {
            let chain = match self.cursor_queue.pop_chain() {
                Ok(Some(chain)) => chain,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(%err, "cursor queue");
                    break;
                }
            };
            self.process_cursor_command(&chain.request);
            self.cursor_queue.add_used(chain.head, &[]);
        }
        self.cursor_queue.notify_used();
    }

    /// Redraws the legacy framebuffer. Does nothing once an accelerated scanout took over.
    pub fn redraw_vga(&mut self) {
        let (surface, resized) = {
            let mut shared = lock_shared(&self.shared);
            if !shared.vga_enabled {
                return;
            }
            let gc = shared.vga.gc();
            let resized = shared.displayed != (gc.width, gc.height);
            shared.displayed = (gc.width, gc.height);
            (shared.vga_surface(), resized)
        };
        if resized {
            self.backend.surface_set(Some(&surface));
        }
        self.backend.surface_update(&surface);
    }

    pub fn release_all(&mut self) {
        self.resources.clear();
        self.scanout_resource = None;
    }

    /// Device reset: drops every resource and hands the display back to the legacy path.
    pub fn reset(&mut self) {
        self.release_all();
        let surface = {
            let mut shared = lock_shared(&self.shared);
            shared.vga_enabled = true;
            shared.displayed = (0, 0);
            shared.vga_surface()
        };
        self.backend.surface_set(Some(&surface));
    }
}
