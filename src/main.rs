// =============================================================================
// VK-FRAME - Render pass, pipeline and frame sync over Vulkan
// =============================================================================
//
// A spinning textured cube driven by a small render layer.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, input, FPS)                             │
// │    └── Graphics (scene: camera, cube, uniforms, texture)        │
// │          └── Renderer (swapchain, framebuffers, frame sync)     │
// │                └── Pipeline / RenderPass / DescriptorPool       │
// │                      └── VulkanDevice (instance, queue, memory) │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Update camera from input, spin the cube
// 2. Acquire swapchain image, wait for its fence
// 3. Record the draw buffer inside the render pass
// 4. Submit, present
//
// =============================================================================

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

use vk_frame::camera::Camera;
use vk_frame::config::Config;
use vk_frame::graphics::Graphics;

/// Camera speed in units per second
const MOVE_SPEED: f32 = 3.0;
/// Camera turn rate in degrees per second
const TURN_SPEED: f32 = 90.0;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting vk-frame");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging, optionally piped to the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING (dropped before the window it presents to)
    // ─────────────────────────────────────────────────────────────────────────
    graphics: Option<Graphics>,
    window: Option<Arc<Window>>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW STATE
    // ─────────────────────────────────────────────────────────────────────────
    is_fullscreen: bool,
    is_minimized: bool,
    held_keys: HashSet<KeyCode>,

    // ─────────────────────────────────────────────────────────────────────────
    // TIMING
    // ─────────────────────────────────────────────────────────────────────────
    last_frame_time: Instant,
    fps: FpsCounter,
}

/// Frames counted over roughly one-second windows
struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self { frames: 0, since: now }
    }

    /// Count a frame; yields the rate once a second has passed
    fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.duration_since(self.since).as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }
        let rate = self.frames as f32 / elapsed;
        self.frames = 0;
        self.since = now;
        Some(rate)
    }
}

fn window_title(base: &str, fps: f32, frame_time: f32, fullscreen: bool) -> String {
    let mut title = format!("{base} | {fps:.0} fps | {:.2} ms", frame_time * 1000.0);
    if fullscreen {
        title.push_str(" | fullscreen");
    }
    title
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();

        Self {
            config,
            graphics: None,
            window: None,
            is_fullscreen,
            is_minimized: false,
            held_keys: HashSet::new(),
            last_frame_time: now,
            fps: FpsCounter::new(now),
        }
    }

    fn init_graphics(&mut self, window: &Window) -> Result<()> {
        use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let size = window.inner_size();

        self.graphics = Some(Graphics::new(
            &self.config,
            display,
            handle,
            size.width,
            size.height,
        )?);
        Ok(())
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    fn render_frame(&mut self) -> Result<()> {
        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        if self.is_minimized {
            return Ok(());
        }

        let Some(graphics) = self.graphics.as_mut() else {
            return Ok(());
        };

        apply_camera_input(graphics.camera_mut(), &self.held_keys, dt);
        graphics.draw(dt)?;

        self.update_fps(now, dt);
        Ok(())
    }

    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        self.is_fullscreen = !self.is_fullscreen;
        window.set_fullscreen(self.is_fullscreen.then_some(Fullscreen::Borderless(None)));
        log::info!("Fullscreen: {}", self.is_fullscreen);
    }

    fn update_fps(&mut self, now: Instant, frame_time: f32) {
        if !self.config.debug.show_fps {
            return;
        }
        let (Some(rate), Some(window)) = (self.fps.tick(now), self.window.as_ref()) else {
            return;
        };
        window.set_title(&window_title(
            &self.config.window.title,
            rate,
            frame_time,
            self.is_fullscreen,
        ));
    }
}

/// Move and turn the camera for every held key, scaled by `dt`
fn apply_camera_input(camera: &mut Camera, held: &HashSet<KeyCode>, dt: f32) {
    let step = MOVE_SPEED * dt;
    let turn = TURN_SPEED * dt;

    for key in held {
        match key {
            KeyCode::KeyW => camera.move_local_z(-step),
            KeyCode::KeyS => camera.move_local_z(step),
            KeyCode::KeyA => camera.move_local_x(-step),
            KeyCode::KeyD => camera.move_local_x(step),
            KeyCode::KeyQ => camera.move_local_y(step),
            KeyCode::KeyE => camera.move_local_y(-step),
            KeyCode::ArrowLeft => camera.rotate_yaw(turn),
            KeyCode::ArrowRight => camera.rotate_yaw(-turn),
            KeyCode::ArrowUp => camera.rotate_pitch(turn),
            KeyCode::ArrowDown => camera.rotate_pitch(-turn),
            _ => {}
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
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_graphics(&window) {
            log::error!("Failed to initialize graphics: {:?}", e);
            event_loop.exit();
            return;
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
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref graphics) = self.graphics {
                    let _ = graphics.wait_idle();
                }
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    if let Some(ref mut graphics) = self.graphics {
                        graphics.resize(size.width, size.height);
                    }
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // REDRAW REQUESTED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            }

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };

                if !event.state.is_pressed() {
                    self.held_keys.remove(&key);
                    return;
                }

                match key {
                    KeyCode::Escape => {
                        log::info!("ESC pressed, exiting...");
                        event_loop.exit();
                    }
                    KeyCode::F11 if !event.repeat => self.toggle_fullscreen(),
                    _ => {
                        self.held_keys.insert(key);
                    }
                }
            }

            WindowEvent::Focused(false) => self.held_keys.clear(),

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up...");
        // Graphics owns the surface, so it goes before the window
        self.graphics = None;
        self.window = None;
        log::info!("Cleanup complete");
    }
}
