// =============================================================================
// LOCAL SHADERTOY - full-screen fragment shader demo on raw Vulkan
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, input)                               │
// │    └── ShadertoyRenderer                                        │
// │          └── Vulkan Device + Swapchain                          │
// │                └── FrameRing (N frames in flight)               │
// │                      └── ResourceStates (image barriers)        │
// └─────────────────────────────────────────────────────────────────┘
//
// Usage: local-shadertoy [config.toml]
//
// =============================================================================

mod backend;
mod config;
mod hot_reload;
mod params;
mod renderer;
mod stats;
mod texture;

use anyhow::Result;
use config::{Config, KeyBindings};
use glam::{IVec2, UVec2};
use renderer::{FrameOutcome, ShadertoyRenderer};
use stats::FrameStats;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Parse before logging exists, report after
    let config_result = Config::load_from_path(&config_path);
    let log_level = match &config_result {
        Ok(Some(config)) => config.debug.log_level.clone(),
        _ => "info".to_string(),
    };
    init_logging(&log_level);

    let config = match config_result {
        Ok(Some(config)) => {
            log::info!("Loaded configuration from {}", config_path);
            log::debug!("Config: {:?}", config);
            config
        }
        Ok(None) => {
            log::info!("Config file not found at {}, using defaults", config_path);
            Config::default()
        }
        Err(e) => {
            log::warn!("Failed to load {}: {:#}. Using defaults.", config_path, e);
            Config::default()
        }
    };

    log::info!("Starting Local Shadertoy");
    log::info!(
        "Window: {}x{} ({}), vsync {}, {} frames in flight",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" },
        if config.graphics.vsync { "on" } else { "off" },
        config.graphics.frames_in_flight
    );

    // Kept alive for the whole run; dropping it stops the server
    let _profiler_server = start_profiler(&config);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Initialization failures end the event loop; surface them here
    match app.fatal_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging; RUST_LOG takes precedence over the configured level
fn init_logging(level: &str) {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or(level)).init();
}

/// Enable CPU scopes and serve them to puffin_viewer if configured
fn start_profiler(config: &Config) -> Option<puffin_http::Server> {
    if !config.debug.profiler {
        return None;
    }

    puffin::set_scopes_on(true);
    match puffin_http::Server::new(&config.debug.profiler_addr) {
        Ok(server) => {
            log::info!("Profiler listening on {}", config.debug.profiler_addr);
            Some(server)
        }
        Err(e) => {
            log::warn!("Failed to start profiler server: {:#}", e);
            None
        }
    }
}

/// Minimized windows report a zero size on most platforms
fn is_drawable(width: u32, height: u32, minimized: Option<bool>) -> bool {
    width > 0 && height > 0 && minimized != Some(true)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Window + renderer. The renderer is declared first so it is dropped
/// before the window its surface belongs to.
struct App {
    renderer: Option<ShadertoyRenderer>,
    window: Option<Arc<Window>>,

    config: Config,
    keys: KeyBindings,
    is_fullscreen: bool,

    /// Cursor position in physical pixels
    mouse_pos: IVec2,

    stats: FrameStats,
    fatal_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let keys = config.key_bindings();
        let is_fullscreen = config.window.fullscreen;
        Self {
            renderer: None,
            window: None,
            config,
            keys,
            is_fullscreen,
            mouse_pos: IVec2::ZERO,
            stats: FrameStats::new(Instant::now()),
            fatal_error: None,
        }
    }

    fn redraw(&mut self) {
        puffin::GlobalProfiler::lock().new_frame();

        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return;
        };

        let size = window.inner_size();
        match renderer.draw_frame(UVec2::new(size.width, size.height), self.mouse_pos) {
            Ok(FrameOutcome::Presented) => self.update_fps(),
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => log::error!("Render error: {:#}", e),
        }
    }

    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        if let Some(report) = self.stats.frame_presented(Instant::now()) {
            let gpu = self
                .renderer
                .as_ref()
                .and_then(|renderer| renderer.gpu_timings())
                .map(|gpu| {
                    format!(
                        " | GPU {:.2}ms (texture {:.2}ms, image {:.2}ms)",
                        gpu.frame_ms, gpu.texture_ms, gpu.image_ms
                    )
                })
                .unwrap_or_default();

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms){}",
                    self.config.window.title, report.fps, report.frame_time_ms, gpu
                ));
            }
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.fatal_error = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        match ShadertoyRenderer::new(&self.config, &window) {
            Ok(renderer) => {
                let extent = renderer.swapchain_extent();
                log::info!("Rendering at {}x{}", extent.width, extent.height);
                self.renderer = Some(renderer);
            }
            Err(e) => {
                log::error!("Failed to initialize renderer: {:#}", e);
                self.fatal_error = Some(e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.request_recreate();
                }
                // Restored from minimized: resume the render loop
                if let Some(ref window) = self.window {
                    window.request_redraw();
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.mouse_pos = IVec2::new(position.x as i32, position.y as i32);
            }

            WindowEvent::RedrawRequested => self.redraw(),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;

                if !event.state.is_pressed() || event.repeat {
                    return;
                }
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };

                if key == self.keys.quit {
                    log::info!("{:?} pressed, exiting...", key);
                    event_loop.exit();
                } else if key == self.keys.fullscreen {
                    self.toggle_fullscreen();
                } else if key == self.keys.reload {
                    log::info!("Reloading shaders");
                    if let Some(ref mut renderer) = self.renderer {
                        renderer.request_reload();
                    }
                }
            }

            _ => {}
        }
    }

    /// Redraw continuously, sleep until the next event while minimized
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        puffin::profile_function!();

        let Some(ref window) = self.window else {
            return;
        };

        let size = window.inner_size();
        if is_drawable(size.width, size.height, window.is_minimized()) {
            event_loop.set_control_flow(ControlFlow::Poll);
            window.request_redraw();
        } else {
            event_loop.set_control_flow(ControlFlow::Wait);
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Waits for the GPU and releases every Vulkan object
        self.renderer = None;
        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimized_window_is_not_drawn() {
        assert!(is_drawable(1280, 720, Some(false)));
        assert!(is_drawable(1280, 720, None));
        assert!(!is_drawable(0, 0, None));
        assert!(!is_drawable(1280, 0, Some(false)));
        assert!(!is_drawable(1280, 720, Some(true)));
    }
}
