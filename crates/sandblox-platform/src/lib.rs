// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use sandblox_render::RenderSize;
use winit::{dpi::PhysicalSize, window::Window};

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// Current inner size of `window` in physical pixels.
pub fn window_render_size(window: &Window) -> RenderSize {
    render_size(window.inner_size())
}
