//! virtio-gpu display device for a virtual machine monitor.
//!
//! The workspace is split along the device's layers:
//! - [`proto`]: wire formats of the control and cursor queues and the config space,
//! - [`memory`]: guest RAM access, including file-backed RAM for zero-copy sharing,
//! - [`edid`]: EDID generation for the virtual monitor,
//! - [`vga`]: the legacy VGA/VBE register file and framebuffer,
//! - [`gpu`]: the device model itself.

pub use memory;
pub use vgpu_devices_gpu as gpu;
pub use vgpu_edid as edid;
pub use vgpu_vga as vga;
pub use virtio_gpu_proto as proto;
