use anyhow::Result;
use mineclone_gfx::{DeviceContext, RendererConfig};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

const WINDOW_TITLE: &str = "MineClone";
const INITIAL_WINDOW_WIDTH: u32 = 1280;
const INITIAL_WINDOW_HEIGHT: u32 = 720;

fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = RendererConfig::from_env();
    log::info!(
        "Starting {} (validation: {}, shader optimization: {:?}).",
        config.application_name,
        config.enable_validation,
        config.shader_optimization
    );

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(LogicalSize::new(INITIAL_WINDOW_WIDTH, INITIAL_WINDOW_HEIGHT))
        .with_resizable(true)
        .build(&event_loop)?;

    let mut context = DeviceContext::new(config);
    unsafe { context.initialize(&window)? };

    event_loop.run(move |event, target| match event {
        Event::WindowEvent {
            event: WindowEvent::CloseRequested,
            ..
        }
        | Event::WindowEvent {
            event:
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key: Key::Named(NamedKey::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                },
            ..
        } => {
            unsafe { context.destroy() };
            target.exit();
        }
        Event::WindowEvent {
            event: WindowEvent::Resized(size),
            ..
        } => {
            context.request_recreate(size.width, size.height);
        }
        Event::WindowEvent {
            event: WindowEvent::RedrawRequested,
            ..
        } if !target.exiting() => unsafe {
            if let Err(e) = context.render() {
                log::error!("Rendering failed: {:#}", e);
                context.destroy();
                target.exit();
            }
        },
        Event::AboutToWait => {
            window.request_redraw();
        }
        _ => {}
    })?;
    Ok(())
}
