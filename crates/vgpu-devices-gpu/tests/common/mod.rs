#![allow(dead_code)]

use std::collections::VecDeque;
use std::os::fd::{OwnedFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use memory::MemfdGuestMemory;
use vgpu_devices_gpu::{
    Cursor, DeviceRegistry, DisplayBackend, DisplayInfo, DmaBufAllocator, DmaBufError,
    InterruptSink, LegacyVgaRenderer, QueueError, QueueRequest, Surface, SurfaceData,
    UdmabufItem, VirtQueue, VirtioGpu, VirtioGpuDeviceConfig, VirtioGpuHost, CONTROL_QUEUE,
    CURSOR_QUEUE,
};
use vgpu_edid::{generate_edid, Timing};
use virtio_gpu_proto::{CtrlHdr, CtrlHdrFlags};

pub const GUEST_RAM_SIZE: u64 = 0x40_0000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ---------------------------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceSnapshot {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub pixels: Option<Vec<u8>>,
    pub dmabuf: Option<(RawFd, u32)>,
}

impl SurfaceSnapshot {
    fn capture(surface: &Surface) -> Self {
        let (pixels, dmabuf) = match &surface.data {
            SurfaceData::Pixels(image) => {
                // VGA surfaces share all of VRAM; keep only the visible part.
                let visible = (surface.stride as usize) * (surface.height as usize);
                let pixels = image.read();
                (Some(pixels[..visible.min(pixels.len())].to_vec()), None)
            }
            SurfaceData::DmaBuf { fd, fourcc } => (None, Some((*fd, *fourcc))),
        };
        Self {
            x: surface.x,
            y: surface.y,
            width: surface.width,
            height: surface.height,
            stride: surface.stride,
            pixels,
            dmabuf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    SurfaceSet(Option<SurfaceSnapshot>),
    SurfaceUpdate(SurfaceSnapshot),
    CursorDefine {
        x: u32,
        y: u32,
        hot_x: u32,
        hot_y: u32,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
    CursorMove(u32, u32),
}

/// Display backend that records every call.
#[derive(Clone)]
pub struct RecordingDisplay {
    events: Arc<Mutex<Vec<DisplayEvent>>>,
    info: DisplayInfo,
}

impl RecordingDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            events: Arc::default(),
            info: DisplayInfo {
                xoff: 0,
                yoff: 0,
                width,
                height,
            },
        }
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn last_surface_set(&self) -> Option<Option<SurfaceSnapshot>> {
        self.events().into_iter().rev().find_map(|e| match e {
            DisplayEvent::SurfaceSet(s) => Some(s),
            _ => None,
        })
    }

    pub fn last_surface_update(&self) -> Option<SurfaceSnapshot> {
        self.events().into_iter().rev().find_map(|e| match e {
            DisplayEvent::SurfaceUpdate(s) => Some(s),
            _ => None,
        })
    }
}

impl DisplayBackend for RecordingDisplay {
    fn surface_set(&mut self, surface: Option<&Surface>) {
        self.events
            .lock()
            .unwrap()
            .push(DisplayEvent::SurfaceSet(surface.map(SurfaceSnapshot::capture)));
    }

    fn surface_update(&mut self, surface: &Surface) {
        self.events
            .lock()
            .unwrap()
            .push(DisplayEvent::SurfaceUpdate(SurfaceSnapshot::capture(surface)));
    }

    fn cursor_define(&mut self, cursor: &Cursor) {
        self.events.lock().unwrap().push(DisplayEvent::CursorDefine {
            x: cursor.x,
            y: cursor.y,
            hot_x: cursor.hot_x,
            hot_y: cursor.hot_y,
            width: cursor.width,
            height: cursor.height,
            pixels: cursor.image.read().to_vec(),
        });
    }

    fn cursor_move(&mut self, x: u32, y: u32) {
        self.events.lock().unwrap().push(DisplayEvent::CursorMove(x, y));
    }

    fn get_edid(&self, edid: &mut [u8]) {
        let block = generate_edid(Timing::new(self.info.width as u16, self.info.height as u16, 60));
        let len = edid.len().min(block.len());
        edid[..len].copy_from_slice(&block[..len]);
    }

    fn get_display_info(&self) -> DisplayInfo {
        self.info
    }
}

// ---------------------------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Result<QueueRequest, QueueError>>,
    used: Vec<(u16, Vec<u8>)>,
    notifications: u32,
    next_head: u16,
}

/// In-memory virtqueue. The device side is handed to the device, the [`QueueHandle`] stays with
/// the test.
pub struct TestQueue {
    state: Arc<Mutex<QueueState>>,
}

#[derive(Clone)]
pub struct QueueHandle {
    state: Arc<Mutex<QueueState>>,
}

pub fn test_queue() -> (TestQueue, QueueHandle) {
    let state = Arc::new(Mutex::new(QueueState::default()));
    (
        TestQueue {
            state: Arc::clone(&state),
        },
        QueueHandle { state },
    )
}

impl QueueHandle {
    /// Makes a chain available and returns its head index.
    pub fn push(&self, request: Vec<u8>, response_capacity: usize) -> u16 {
        let mut state = self.state.lock().unwrap();
        let head = state.next_head;
        state.next_head = state.next_head.wrapping_add(1);
        state.pending.push_back(Ok(QueueRequest {
            head,
            request,
            response_capacity,
        }));
        head
    }

    pub fn push_error(&self, err: QueueError) {
        self.state.lock().unwrap().pending.push_back(Err(err));
    }

    pub fn used(&self) -> Vec<(u16, Vec<u8>)> {
        self.state.lock().unwrap().used.clone()
    }

    pub fn take_used(&self) -> Vec<(u16, Vec<u8>)> {
        std::mem::take(&mut self.state.lock().unwrap().used)
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn notifications(&self) -> u32 {
        self.state.lock().unwrap().notifications
    }
}

impl VirtQueue for TestQueue {
    fn pop_chain(&mut self) -> Result<Option<QueueRequest>, QueueError> {
        self.state.lock().unwrap().pending.pop_front().transpose()
    }

    fn add_used(&mut self, head: u16, response: &[u8]) {
        self.state.lock().unwrap().used.push((head, response.to_vec()));
    }

    fn notify_used(&mut self) {
        self.state.lock().unwrap().notifications += 1;
    }
}

#[derive(Default)]
pub struct CountingInterrupts {
    pub config_changes: AtomicU32,
}

impl InterruptSink for CountingInterrupts {
    fn raise_config_change(&self) {
        self.config_changes.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------------------------
// Zero-copy buffers
// ---------------------------------------------------------------------------------------------

/// Allocator handing out temp-file descriptors in place of udmabufs.
#[derive(Clone, Default)]
pub struct FakeAllocator {
    pub calls: Arc<Mutex<Vec<Vec<UdmabufItem>>>>,
    pub fail: bool,
}

impl DmaBufAllocator for FakeAllocator {
    fn create_list(&self, items: &[UdmabufItem]) -> Result<OwnedFd, DmaBufError> {
        self.calls.lock().unwrap().push(items.to_vec());
        if self.fail {
            return Err(DmaBufError::Ioctl(std::io::Error::from_raw_os_error(libc::EINVAL)));
        }
        let file = tempfile::tempfile().map_err(DmaBufError::Ioctl)?;
        Ok(OwnedFd::from(file))
    }
}

// ---------------------------------------------------------------------------------------------
// Device harness
// ---------------------------------------------------------------------------------------------

pub struct TestDevice {
    pub gpu: VirtioGpu,
    pub display: RecordingDisplay,
    pub control: QueueHandle,
    pub cursor: QueueHandle,
    pub mem: Arc<MemfdGuestMemory>,
    pub interrupts: Arc<CountingInterrupts>,
    pub allocator: FakeAllocator,
    pub registry: DeviceRegistry,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Blob {
    Disabled,
    Enabled,
    Failing,
}

pub fn test_config(blob: Blob) -> VirtioGpuDeviceConfig {
    VirtioGpuDeviceConfig {
        allow_dmabuf: blob != Blob::Disabled,
        vram_size: 4 * 1024 * 1024,
        vga_poll_interval: Duration::from_millis(2),
        ..VirtioGpuDeviceConfig::default()
    }
}

pub fn new_device(blob: Blob) -> TestDevice {
    new_device_with_renderer(blob, None)
}

pub fn new_device_with_renderer(
    blob: Blob,
    renderer: Option<Arc<dyn LegacyVgaRenderer>>,
) -> TestDevice {
    init_tracing();
    let registry = DeviceRegistry::new();
    let display = RecordingDisplay::new(1024, 768);
    let (control_q, control) = test_queue();
    let (cursor_q, cursor) = test_queue();
    let mem = Arc::new(
        MemfdGuestMemory::from_file(tempfile::tempfile().unwrap(), GUEST_RAM_SIZE).unwrap(),
    );
    let interrupts = Arc::new(CountingInterrupts::default());
    let allocator = FakeAllocator {
        fail: blob == Blob::Failing,
        ..FakeAllocator::default()
    };

    let mut host = VirtioGpuHost::new(
        Box::new(display.clone()),
        mem.clone(),
        Box::new(control_q),
        Box::new(cursor_q),
        interrupts.clone(),
    );
    if blob != Blob::Disabled {
        host = host.with_dmabuf_allocator(Box::new(allocator.clone()));
    }
    if let Some(renderer) = renderer {
        host = host.with_vga_renderer(renderer);
    }
    let gpu = VirtioGpu::new(test_config(blob), host, &registry).unwrap();
    gpu.sync().unwrap();

    TestDevice {
        gpu,
        display,
        control,
        cursor,
        mem,
        interrupts,
        allocator,
        registry,
    }
}

impl TestDevice {
    /// Submits one control request and returns its response.
    pub fn control(&self, request: Vec<u8>) -> Vec<u8> {
        self.control.take_used();
        let head = self.control.push(request, 4096);
        self.gpu.notify_queue(CONTROL_QUEUE);
        self.gpu.sync().unwrap();
        let used = self.control.take_used();
        assert_eq!(used.len(), 1, "exactly one response per request");
        assert_eq!(used[0].0, head);
        used[0].1.clone()
    }

    pub fn cursor(&self, request: Vec<u8>) {
        self.cursor.push(request, 0);
        self.gpu.notify_queue(CURSOR_QUEUE);
        self.gpu.sync().unwrap();
    }

    pub fn write_guest(&self, addr: u64, data: &[u8]) {
        self.mem.write_at(addr, data).unwrap();
    }
}

/// Polls `cond` until it holds or a generous timeout expires.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

// ---------------------------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------------------------

pub fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn hdr(type_: u32) -> Vec<u8> {
    let mut out = Vec::new();
    CtrlHdr::new(type_).encode(&mut out);
    out
}

pub fn fenced_hdr(type_: u32, fence_id: u64) -> Vec<u8> {
    let mut out = Vec::new();
    CtrlHdr {
        type_,
        flags: CtrlHdrFlags::FENCE.bits(),
        fence_id,
        ..CtrlHdr::default()
    }
    .encode(&mut out);
    out
}

pub fn push_rect(out: &mut Vec<u8>, x: u32, y: u32, w: u32, h: u32) {
    for v in [x, y, w, h] {
        push_u32(out, v);
    }
}

pub fn resp_type(resp: &[u8]) -> u32 {
    u32::from_le_bytes(resp[0..4].try_into().unwrap())
}

pub fn resp_fence(resp: &[u8]) -> (u32, u64) {
    (
        u32::from_le_bytes(resp[4..8].try_into().unwrap()),
        u64::from_le_bytes(resp[8..16].try_into().unwrap()),
    )
}

pub mod req {
    use super::*;
    use virtio_gpu_proto::protocol::*;

    pub fn get_display_info() -> Vec<u8> {
        hdr(VIRTIO_GPU_CMD_GET_DISPLAY_INFO)
    }

    pub fn get_edid(scanout: u32) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_GET_EDID);
        push_u32(&mut out, scanout);
        push_u32(&mut out, 0);
        out
    }

    pub fn create_2d(id: u32, format: u32, width: u32, height: u32) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_RESOURCE_CREATE_2D);
        for v in [id, format, width, height] {
            push_u32(&mut out, v);
        }
        out
    }

    pub fn unref(id: u32) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_RESOURCE_UNREF);
        push_u32(&mut out, id);
        push_u32(&mut out, 0);
        out
    }

    pub fn attach_backing(id: u32, entries: &[(u64, u32)]) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_RESOURCE_ATTACH_BACKING);
        push_u32(&mut out, id);
        push_u32(&mut out, entries.len() as u32);
        for &(addr, len) in entries {
            push_u64(&mut out, addr);
            push_u32(&mut out, len);
            push_u32(&mut out, 0);
        }
        out
    }

    pub fn detach_backing(id: u32) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_RESOURCE_DETACH_BACKING);
        push_u32(&mut out, id);
        push_u32(&mut out, 0);
        out
    }

    pub fn set_scanout(scanout_id: u32, id: u32, rect: (u32, u32, u32, u32)) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_SET_SCANOUT);
        push_rect(&mut out, rect.0, rect.1, rect.2, rect.3);
        push_u32(&mut out, scanout_id);
        push_u32(&mut out, id);
        out
    }

    pub fn flush(id: u32, rect: (u32, u32, u32, u32)) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_RESOURCE_FLUSH);
        push_rect(&mut out, rect.0, rect.1, rect.2, rect.3);
        push_u32(&mut out, id);
        push_u32(&mut out, 0);
        out
    }

    pub fn transfer_to_host_2d(id: u32, rect: (u32, u32, u32, u32), offset: u64) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_TRANSFER_TO_HOST_2D);
        push_rect(&mut out, rect.0, rect.1, rect.2, rect.3);
        push_u64(&mut out, offset);
        push_u32(&mut out, id);
        push_u32(&mut out, 0);
        out
    }

    pub fn create_blob(
        id: u32,
        blob_mem: u32,
        blob_flags: u32,
        size: u64,
        entries: &[(u64, u32)],
    ) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_RESOURCE_CREATE_BLOB);
        push_u32(&mut out, id);
        push_u32(&mut out, blob_mem);
        push_u32(&mut out, blob_flags);
        push_u32(&mut out, entries.len() as u32);
        push_u64(&mut out, 0);
        push_u64(&mut out, size);
        for &(addr, len) in entries {
            push_u64(&mut out, addr);
            push_u32(&mut out, len);
            push_u32(&mut out, 0);
        }
        out
    }

    pub fn guest_blob(id: u32, size: u64, entries: &[(u64, u32)]) -> Vec<u8> {
        create_blob(
            id,
            VIRTIO_GPU_BLOB_MEM_GUEST,
            VIRTIO_GPU_BLOB_FLAG_USE_SHAREABLE,
            size,
            entries,
        )
    }

    pub fn set_scanout_blob(
        id: u32,
        rect: (u32, u32, u32, u32),
        width: u32,
        height: u32,
        format: u32,
        stride: u32,
    ) -> Vec<u8> {
        let mut out = hdr(VIRTIO_GPU_CMD_SET_SCANOUT_BLOB);
        push_rect(&mut out, rect.0, rect.1, rect.2, rect.3);
        push_u32(&mut out, 0);
        push_u32(&mut out, id);
        push_u32(&mut out, width);
        push_u32(&mut out, height);
        push_u32(&mut out, format);
        push_u32(&mut out, 0);
        for s in [stride, 0, 0, 0] {
            push_u32(&mut out, s);
        }
        for _ in 0..4 {
            push_u32(&mut out, 0);
        }
        out
    }

    pub fn cursor(type_: u32, id: u32, x: u32, y: u32, hot_x: u32, hot_y: u32) -> Vec<u8> {
        let mut out = hdr(type_);
        push_u32(&mut out, 0);
        push_u32(&mut out, x);
        push_u32(&mut out, y);
        push_u32(&mut out, 0);
        push_u32(&mut out, id);
        push_u32(&mut out, hot_x);
        push_u32(&mut out, hot_y);
        push_u32(&mut out, 0);
        out
    }
}
