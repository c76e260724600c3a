/*!
famicore binary: load a cartridge and run it.

    famicore [--no-jit] <cartridge.nes>

Exit code 0 on clean quit, nonzero on load failure or fatal emulation
error. `RUST_LOG` controls verbosity. With the `display` feature the
frame buffer is presented in a window (winit + pixels) and the keyboard
drives the controller; without it the machine runs headless at paced
speed until interrupted or faulted.
*/

use std::process::ExitCode;
use std::sync::Arc;

use log::error;

use famicore::{Cartridge, Events, Machine};

struct Options {
    rom: String,
    jit: bool,
}

fn parse_args() -> Option<Options> {
    let mut rom = None;
    let mut jit = true;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--no-jit" => jit = false,
            _ if rom.is_none() => rom = Some(arg),
            _ => return None,
        }
    }
    rom.map(|rom| Options { rom, jit })
}

fn main() -> ExitCode {
    env_logger::init();

    let Some(options) = parse_args() else {
        eprintln!("usage: famicore [--no-jit] <cartridge.nes>");
        return ExitCode::from(2);
    };

    let cartridge = match Cartridge::from_ines_file(&options.rom) {
        Ok(cartridge) => cartridge,
        Err(e) => {
            error!("cannot load {}: {e}", options.rom);
            return ExitCode::from(1);
        }
    };

    let events = Events::new();
    let machine = Machine::new(cartridge, Arc::clone(&events), options.jit);

    run(machine, events)
}

#[cfg(not(feature = "display"))]
fn run(mut machine: Machine, _events: Arc<Events>) -> ExitCode {
    match machine.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::from(1),
    }
}

#[cfg(feature = "display")]
fn run(machine: Machine, events: Arc<Events>) -> ExitCode {
    display::run(machine, events)
}

#[cfg(feature = "display")]
mod display {
    //! Windowed frontend: frame presentation and keyboard input.
    //!
    //! The emulation runs on its own thread; this thread owns the event
    //! loop. Shared state is exactly the controller button mask, the
    //! pause/quit flags and the front frame buffer.

    use std::process::ExitCode;
    use std::sync::{Arc, Mutex};

    use log::error;
    use pixels::{Pixels, SurfaceTexture};
    use winit::application::ApplicationHandler;
    use winit::event::{ElementState, KeyEvent, WindowEvent};
    use winit::event_loop::{ActiveEventLoop, EventLoop};
    use winit::keyboard::{KeyCode, PhysicalKey};
    use winit::window::{Window, WindowId};

    use famicore::controller::{Button, ButtonState};
    use famicore::ppu::{HEIGHT, WIDTH};
    use famicore::{Events, Machine};

    pub fn run(mut machine: Machine, events: Arc<Events>) -> ExitCode {
        let front = Arc::new(Mutex::new(vec![0u8; WIDTH * HEIGHT * 4]));
        machine.set_frame_sink(Arc::clone(&front));
        let buttons = machine.buttons();

        let emu_events = Arc::clone(&events);
        let emulation = std::thread::spawn(move || {
            let result = machine.run();
            emu_events.quit();
            result
        });

        let mut app = App {
            window: None,
            pixels: None,
            front,
            buttons,
            events: Arc::clone(&events),
        };

        let status = match EventLoop::new() {
            Ok(event_loop) => {
                if let Err(e) = event_loop.run_app(&mut app) {
                    error!("event loop failed: {e}");
                    ExitCode::from(1)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => {
                error!("cannot create event loop: {e}");
                ExitCode::from(1)
            }
        };

        events.quit();
        match emulation.join() {
            Ok(Ok(())) => status,
            _ => ExitCode::from(1),
        }
    }

    struct App {
        window: Option<Arc<Window>>,
        pixels: Option<Pixels<'static>>,
        front: Arc<Mutex<Vec<u8>>>,
        buttons: Arc<ButtonState>,
        events: Arc<Events>,
    }

    impl App {
        fn handle_key(&mut self, event_loop: &ActiveEventLoop, event: KeyEvent) {
            let PhysicalKey::Code(code) = event.physical_key else {
                return;
            };
            let pressed = event.state == ElementState::Pressed;

            let button = match code {
                KeyCode::KeyZ => Some(Button::A),
                KeyCode::KeyX => Some(Button::B),
                KeyCode::KeyA => Some(Button::Select),
                KeyCode::KeyS => Some(Button::Start),
                KeyCode::ArrowUp => Some(Button::Up),
                KeyCode::ArrowDown => Some(Button::Down),
                KeyCode::ArrowLeft => Some(Button::Left),
                KeyCode::ArrowRight => Some(Button::Right),
                _ => None,
            };
            if let Some(button) = button {
                self.buttons.set(button, pressed);
                return;
            }

            if pressed && !event.repeat {
                match code {
                    KeyCode::Escape => {
                        self.events.quit();
                        event_loop.exit();
                    }
                    KeyCode::KeyP => self.events.toggle_paused(),
                    _ => {}
                }
            }
        }
    }

    impl ApplicationHandler for App {
        fn resumed(&mut self, event_loop: &ActiveEventLoop) {
            let attributes = Window::default_attributes().with_title("famicore");
            let window = match event_loop.create_window(attributes) {
                Ok(window) => Arc::new(window),
                Err(e) => {
                    error!("cannot create window: {e}");
                    self.events.quit();
                    event_loop.exit();
                    return;
                }
            };

            let size = window.inner_size();
            let surface = SurfaceTexture::new(size.width, size.height, Arc::clone(&window));
            match Pixels::new(WIDTH as u32, HEIGHT as u32, surface) {
                Ok(pixels) => {
                    self.pixels = Some(pixels);
                    self.window = Some(window);
                }
                Err(e) => {
                    error!("cannot create surface: {e}");
                    self.events.quit();
                    event_loop.exit();
                }
            }
        }

        fn window_event(
            &mut self,
            event_loop: &ActiveEventLoop,
            _window_id: WindowId,
            event: WindowEvent,
        ) {
            match event {
                WindowEvent::CloseRequested => {
                    self.events.quit();
                    event_loop.exit();
                }
                WindowEvent::Resized(size) => {
                    if let Some(pixels) = &mut self.pixels {
                        let _ = pixels.resize_surface(size.width, size.height);
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => self.handle_key(event_loop, event),
                WindowEvent::RedrawRequested => {
                    if let (Some(pixels), Ok(front)) = (&mut self.pixels, self.front.lock()) {
                        pixels.frame_mut().copy_from_slice(&front);
                        drop(front);
                        if let Err(e) = pixels.render() {
                            error!("render failed: {e}");
                            self.events.quit();
                            event_loop.exit();
                        }
                    }
                }
                _ => {}
            }
        }

        fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
            if self.events.is_quit() {
                event_loop.exit();
                return;
            }
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        }
    }
}
