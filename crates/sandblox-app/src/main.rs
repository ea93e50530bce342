// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use sandblox_core::init_tracing;
use sandblox_platform::window_render_size;
use sandblox_render::{RenderSize, Renderer};
use sandblox_render_vk::VkRenderer;
use tracing::{error, info};

use sandblox_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::{load_cfg, AppCfg, Args};

struct App {
    cfg: AppCfg,
    // Before `window`: the renderer's surface must go first.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,

    occluded: bool,
    paused: bool,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        App {
            render_size: cfg.window.size(),
            cfg,
            renderer: None,
            window: None,
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
            occluded: false,
            paused: false,
        }
    }

    fn init_window(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = event_loop.create_window(attrs).context("create_window")?;
        self.render_size = window_render_size(&window);

        let mut renderer = <VkRenderer>::new(&window, &window, self.render_size)?;
        renderer.set_clear_color(self.cfg.render.clear_color)?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn update_paused(&mut self, why: &str) {
        let now_paused = self.occluded || self.render_size.is_empty();
        if self.paused != now_paused {
            info!("{why} -> paused={now_paused}");
        }
        self.paused = now_paused;
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init_window(event_loop) {
                error!("startup failed: {e:#}");
                self.shutdown(event_loop);
                return;
            }
            info!(
                "window {}x{} ready",
                self.render_size.width, self.render_size.height
            );
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        self.update_paused("resumed");
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                self.update_paused(&format!("Resized {}x{}", new_size.width, new_size.height));

                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(self.render_size) {
                        error!("resize failed: {e:#}");
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                self.occluded = occluded;
                self.update_paused(&format!("Occluded({occluded})"));
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Some(renderer) = &mut self.renderer {
                    match renderer.render() {
                        Ok(()) => self.frames = self.frames.saturating_add(1),
                        Err(e) => error!("render error: {e:#}"),
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        // Present blocks on the queue, so this paces itself.
        event_loop.set_control_flow(ControlFlow::Wait);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);
    info!(
        "config: {} ({}x{})",
        args.config.display(),
        cfg.window.width,
        cfg.window.height
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;
    Ok(())
}
