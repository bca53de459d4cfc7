//! Legacy VGA bridge: keeps the VBE framebuffer on screen until the guest driver takes over.
//!
//! A polling thread watches the graphics-controller image. It never calls the display backend
//! itself; redraws are posted to the display worker as bottom halves.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use vgpu_vga::LegacyVga;

use crate::bh::BhHandle;
use crate::dispatch::GpuCore;
use crate::state::{lock_shared, SharedHandle};

/// Presents full VGA (text/planar) modes, which the bridge does not render itself.
pub trait LegacyVgaRenderer: Send + Sync {
    /// Called once per hand-off with the shared state locked. Must return promptly.
    fn render(&self, vga: &LegacyVga);
}

/// Renderer that only records the hand-off.
#[derive(Debug, Default)]
pub struct LoggingVgaRenderer;

impl LegacyVgaRenderer for LoggingVgaRenderer {
    fn render(&self, vga: &LegacyVga) {
        let gc = vga.gc();
        tracing::info!(
            width = gc.width,
            height = gc.height,
            graphics = vga.ports().graphics_mode(),
            "VGA mode active, handing off to the VGA renderer"
        );
    }
}

#[derive(Clone)]
pub struct VgaBridge {
    shared: SharedHandle,
    bh: BhHandle<GpuCore>,
    renderer: Arc<dyn LegacyVgaRenderer>,
    interval: Duration,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl VgaBridge {
    pub fn new(
        shared: SharedHandle,
        bh: BhHandle<GpuCore>,
        renderer: Arc<dyn LegacyVgaRenderer>,
        interval: Duration,
    ) -> Self {
        Self {
            shared,
            bh,
            renderer,
            interval,
            thread: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the polling thread unless the legacy path is disabled or a poller is already running.
    pub fn arm(&self) {
        {
            let mut shared = lock_shared(&self.shared);
            if !shared.vga_enabled || shared.vga_thread_running {
                return;
            }
            shared.vga_thread_running = true;
        }

        let bridge = self.clone();
        let spawned = thread::Builder::new()
            .name("vgpu-vga".to_owned())
            .spawn(move || bridge.run());
        match spawned {
            Ok(handle) => {
                let mut slot = self.thread.lock().unwrap_or_else(|p| p.into_inner());
                // The previous poller already cleared `vga_thread_running`, so it is exiting.
                if let Some(previous) = slot.replace(handle) {
                    let _ = previous.join();
                }
            }
            Err(err) => {
                tracing::error!(%err, "failed to spawn VGA poller");
                lock_shared(&self.shared).vga_thread_running = false;
            }
        }
    }

    fn run(&self) {
        loop {
            {
                let mut shared = lock_shared(&self.shared);
                if !shared.vga_enabled {
                    shared.vga_thread_running = false;
                    return;
                }
                let gc = shared.vga.gc();
                if gc.vgamode {
                    shared.vga_thread_running = false;
                    self.renderer.render(&shared.vga);
                    return;
                }
                let (xres, yres) = shared.vga.vbe_size();
                if (gc.width, gc.height) != (xres, yres) {
                    shared.vga.gc_resize(xres, yres);
                }
            }

            if self.bh.submit(GpuCore::redraw_vga).is_err() {
                lock_shared(&self.shared).vga_thread_running = false;
                return;
            }
            thread::sleep(self.interval);
        }
    }

    /// Waits for the current poller, if any, to exit.
    ///
    /// The poller exits on its own once the legacy path is disabled or the worker is gone.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        lock_shared(&self.shared).vga_thread_running
    }
}
