use std::any::Any;
use std::env;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use log::{info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::monitor::MonitorHandle;
use winit::window::{CursorGrabMode, Fullscreen, Window, WindowId};

use curse_engine::config::{FALLBACK_WINDOW_SIZE, WINDOW_TITLE};
use curse_engine::{
    App, EngineError, Extent, InputState, KeyCode, NamedKey, SceneConfig, VideoMode, WgpuBackend,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let mut scene = match &options.scene {
        Some(path) => SceneConfig::load(path)?,
        None => SceneConfig::default(),
    };
    if options.debug_shadow_map {
        scene.settings.debug_shadow_map = true;
    }
    if options.windowed {
        scene.settings.fullscreen = false;
    }

    if options.summary_only {
        print!("{}", scene.summary());
        return Ok(());
    }

    match run_interactive(&scene) {
        Err(err) if matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::WindowCreation(_))
        ) =>
        {
            eprintln!(
                "{err}. Falling back to --summary-only mode (set DISPLAY or WAYLAND_DISPLAY to enable rendering)."
            );
            print!("{}", scene.summary());
            Ok(())
        }
        other => other,
    }
}

fn run_interactive(scene: &SceneConfig) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| EngineError::WindowCreation(panic_message(panic)))?
        .map_err(|err| EngineError::WindowCreation(err.to_string()))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = Runner {
        scene,
        running: None,
        input: InputState::new(),
        last_frame: Instant::now(),
        error: None,
    };
    event_loop
        .run_app(&mut runner)
        .context("event loop terminated abnormally")?;

    match runner.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

/// GPU state that only exists once the window does.
struct Running {
    backend: WgpuBackend,
    app: App<WgpuBackend>,
}

struct Runner<'a> {
    scene: &'a SceneConfig,
    running: Option<Running>,
    input: InputState,
    last_frame: Instant,
    error: Option<anyhow::Error>,
}

impl Runner<'_> {
    fn start(&self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next());
        let video_mode = monitor.as_ref().map(video_mode_of).unwrap_or_default();
        info!(
            "video mode {}x{} @ {:.1} Hz",
            video_mode.width,
            video_mode.height,
            video_mode.refresh_rate_hz()
        );

        let attributes = Window::default_attributes().with_title(WINDOW_TITLE);
        let attributes = if self.scene.settings.fullscreen {
            attributes.with_fullscreen(Some(Fullscreen::Borderless(monitor)))
        } else {
            let (width, height) = FALLBACK_WINDOW_SIZE;
            attributes.with_inner_size(LogicalSize::new(width as f64, height as f64))
        };
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .map_err(|err| EngineError::WindowCreation(err.to_string()))?,
        );
        grab_cursor(&window);

        let mut backend = block_on(WgpuBackend::new(Arc::clone(&window)))?;
        let app = App::new(&mut backend, self.scene, video_mode)?;
        Ok(Running { backend, app })
    }
}

impl ApplicationHandler for Runner<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(running) => {
                running.backend.window().request_redraw();
                self.running = Some(running);
                self.last_frame = Instant::now();
            }
            Err(err) => {
                self.error = Some(err);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if window_id != running.backend.window_id() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                running
                    .app
                    .resize(&mut running.backend, Extent::new(size.width, size.height));
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        ..
                    },
                ..
            } => {
                let Some(key) = map_keycode(code) else {
                    return;
                };
                match state {
                    ElementState::Pressed => self.input.set_key_down(key),
                    ElementState::Released => self.input.set_key_up(key),
                }
                if self.input.close_requested() {
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - self.last_frame).as_secs_f32();
                self.last_frame = now;

                if let Err(err) = running.app.frame(&mut running.backend, &self.input, dt) {
                    self.error = Some(err);
                    event_loop.exit();
                    return;
                }
                self.input.end_frame();
                running.backend.window().request_redraw();
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta } = event {
            self.input
                .add_mouse_delta(Vec2::new(delta.0 as f32, delta.1 as f32));
        }
    }
}

fn video_mode_of(monitor: &MonitorHandle) -> VideoMode {
    let size = monitor.size();
    let mut mode = VideoMode::new(size.width, size.height);
    if let Some(rate) = monitor.refresh_rate_millihertz() {
        mode.refresh_rate_millihertz = rate;
    }
    if let Some(native) = monitor.video_modes().find(|native| native.size() == size) {
        let channel_bits = (native.bit_depth().min(24) / 3) as u8;
        mode.red_bits = channel_bits;
        mode.green_bits = channel_bits;
        mode.blue_bits = channel_bits;
    }
    mode
}

fn grab_cursor(window: &Window) {
    let grabbed = window
        .set_cursor_grab(CursorGrabMode::Locked)
        .or_else(|_| window.set_cursor_grab(CursorGrabMode::Confined));
    if let Err(err) = grabbed {
        warn!("could not grab the cursor: {err}");
    }
    window.set_cursor_visible(false);
}

fn map_keycode(code: winit::keyboard::KeyCode) -> Option<KeyCode> {
    use winit::keyboard::KeyCode as Key;
    Some(match code {
        Key::Space => KeyCode::Named(NamedKey::Space),
        Key::Enter => KeyCode::Named(NamedKey::Enter),
        Key::Tab => KeyCode::Named(NamedKey::Tab),
        Key::ArrowLeft => KeyCode::Named(NamedKey::Left),
        Key::ArrowRight => KeyCode::Named(NamedKey::Right),
        Key::ArrowUp => KeyCode::Named(NamedKey::Up),
        Key::ArrowDown => KeyCode::Named(NamedKey::Down),
        Key::Escape => KeyCode::Named(NamedKey::Escape),
        Key::ShiftLeft => KeyCode::Named(NamedKey::LeftShift),
        Key::ShiftRight => KeyCode::Named(NamedKey::RightShift),
        Key::ControlLeft => KeyCode::Named(NamedKey::LeftCtrl),
        Key::ControlRight => KeyCode::Named(NamedKey::RightCtrl),
        Key::Digit0 => KeyCode::Digit(0),
        Key::Digit1 => KeyCode::Digit(1),
        Key::Digit2 => KeyCode::Digit(2),
        Key::Digit3 => KeyCode::Digit(3),
        Key::Digit4 => KeyCode::Digit(4),
        Key::Digit5 => KeyCode::Digit(5),
        Key::Digit6 => KeyCode::Digit(6),
        Key::Digit7 => KeyCode::Digit(7),
        Key::Digit8 => KeyCode::Digit(8),
        Key::Digit9 => KeyCode::Digit(9),
        Key::KeyA => KeyCode::Character('A'),
        Key::KeyB => KeyCode::Character('B'),
        Key::KeyC => KeyCode::Character('C'),
        Key::KeyD => KeyCode::Character('D'),
        Key::KeyE => KeyCode::Character('E'),
        Key::KeyF => KeyCode::Character('F'),
        Key::KeyG => KeyCode::Character('G'),
        Key::KeyH => KeyCode::Character('H'),
        Key::KeyI => KeyCode::Character('I'),
        Key::KeyJ => KeyCode::Character('J'),
        Key::KeyK => KeyCode::Character('K'),
        Key::KeyL => KeyCode::Character('L'),
        Key::KeyM => KeyCode::Character('M'),
        Key::KeyN => KeyCode::Character('N'),
        Key::KeyO => KeyCode::Character('O'),
        Key::KeyP => KeyCode::Character('P'),
        Key::KeyQ => KeyCode::Character('Q'),
        Key::KeyR => KeyCode::Character('R'),
        Key::KeyS => KeyCode::Character('S'),
        Key::KeyT => KeyCode::Character('T'),
        Key::KeyU => KeyCode::Character('U'),
        Key::KeyV => KeyCode::Character('V'),
        Key::KeyW => KeyCode::Character('W'),
        Key::KeyX => KeyCode::Character('X'),
        Key::KeyY => KeyCode::Character('Y'),
        Key::KeyZ => KeyCode::Character('Z'),
        Key::F1 => KeyCode::Function(1),
        Key::F2 => KeyCode::Function(2),
        Key::F3 => KeyCode::Function(3),
        Key::F4 => KeyCode::Function(4),
        Key::F5 => KeyCode::Function(5),
        Key::F6 => KeyCode::Function(6),
        Key::F7 => KeyCode::Function(7),
        Key::F8 => KeyCode::Function(8),
        Key::F9 => KeyCode::Function(9),
        Key::F10 => KeyCode::Function(10),
        Key::F11 => KeyCode::Function(11),
        Key::F12 => KeyCode::Function(12),
        _ => return None,
    })
}

const USAGE: &str =
    "Usage: curse-engine [scene.xml] [--summary-only] [--debug-shadow-map] [--windowed]";

#[derive(Debug, Default)]
struct CliOptions {
    scene: Option<PathBuf>,
    summary_only: bool,
    debug_shadow_map: bool,
    windowed: bool,
}

impl CliOptions {
    fn parse(args: impl Iterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        for arg in args {
            match arg.as_str() {
                "--summary-only" => options.summary_only = true,
                "--debug-shadow-map" => options.debug_shadow_map = true,
                "--windowed" => options.windowed = true,
                other if other.starts_with("--") => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
                path => {
                    if options.scene.is_some() {
                        return Err(anyhow!("Only one scene file may be given. {USAGE}"));
                    }
                    options.scene = Some(PathBuf::from(path));
                }
            }
        }
        Ok(options)
    }
}
