// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use sandblox_render::{RenderSize, Renderer};
use tracing::{debug, info};

use crate::commands::{DrawCommands, NoDraws};
use crate::context::VulkanContext;
use crate::error::SwapchainError;
use crate::gpu::Gpu;
use crate::swapchain::{FrameStatus, VulkanSwapchain};

/// Window-backed renderer: a [`VulkanSwapchain`] over a [`VulkanContext`].
///
/// Rendering pauses while the window (or the surface) has no area and
/// resumes on the next non-empty resize.
pub struct VkRenderer<G: Gpu = VulkanContext> {
    swapchain: VulkanSwapchain<G>,
    paused: bool,
}

impl VkRenderer {
    pub fn with_draws(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        draws: impl DrawCommands + 'static,
    ) -> Result<Self> {
        let context = VulkanContext::new(window, display).context("creating Vulkan context")?;
        let swapchain =
            VulkanSwapchain::new(context, size, draws).context("building initial swapchain")?;
        if let Some(extent) = swapchain.extent() {
            info!(
                "Vulkan swapchain ready ({}x{}, {} images)",
                extent.width,
                extent.height,
                swapchain.image_count()
            );
        }
        Ok(Self::from_swapchain(swapchain))
    }
}

impl<G: Gpu> VkRenderer<G> {
    pub fn from_swapchain(swapchain: VulkanSwapchain<G>) -> Self {
        Self {
            swapchain,
            paused: false,
        }
    }

    pub fn swapchain(&self) -> &VulkanSwapchain<G> {
        &self.swapchain
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_paused(&mut self, paused: bool, why: &str) {
        if self.paused != paused {
            info!("vk: {why} -> paused={paused}");
        }
        self.paused = paused;
    }

    /// A zero-area surface is not an error for a window: pause instead.
    fn absorb_zero_extent(&mut self, result: crate::Result<()>) -> Result<()> {
        match result {
            Err(SwapchainError::ZeroExtent { width, height }) => {
                self.set_paused(true, &format!("surface is {width}x{height}"));
                Ok(())
            }
            other => other.map_err(Into::into),
        }
    }

    pub fn resize_to(&mut self, size: RenderSize) -> Result<()> {
        let why = format!("resize to {}x{}", size.width, size.height);
        if size.is_empty() {
            self.set_paused(true, &why);
            return Ok(());
        }
        self.set_paused(false, &why);
        let rebuilt = self.swapchain.resize(size);
        self.absorb_zero_extent(rebuilt)
    }

    /// Draws one frame unless paused. A swapchain left unusable by an
    /// earlier failure is rebuilt first.
    pub fn render_frame(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        if !self.swapchain.is_usable() {
            let rebuilt = self.swapchain.rebuild_swapchain();
            self.absorb_zero_extent(rebuilt)?;
            if self.paused {
                return Ok(());
            }
        }
        match self.swapchain.render() {
            Ok(FrameStatus::Skipped) => {
                debug!("frame skipped; swapchain rebuilt");
                Ok(())
            }
            Ok(FrameStatus::Presented { .. }) => Ok(()),
            Err(e) => self.absorb_zero_extent(Err(e)),
        }
    }

    pub fn apply_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.swapchain
            .set_clear_color(rgba)
            .context("re-recording command buffers")
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<Self> {
        Self::with_draws(window, display, size, NoDraws)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.resize_to(size)
    }

    fn render(&mut self) -> Result<()> {
        self.render_frame()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.apply_clear_color(rgba)
    }
}
