// SPDX-License-Identifier: CEPL-1.0
//! Swapchain lifecycle: initial build, rebuild on staleness or resize, and the
//! acquire -> submit -> present frame loop.

use ash::vk;
use sandblox_render::RenderSize;
use tracing::{debug, info, warn};

use crate::chain::{Chain, SwapchainConfig};
use crate::commands::{CommandBuffers, DrawCommands, DEFAULT_CLEAR_COLOR};
use crate::error::{Result, SwapchainError, VkResultExt};
use crate::gpu::Gpu;
use crate::select::choose_depth_format;
use crate::support::SurfaceSupport;
use crate::sync::FrameSync;

/// Outcome of one [`VulkanSwapchain::render`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame reached the presentation engine. `rebuilt` is set when the
    /// chain was reported stale (out of date at present, or suboptimal for the
    /// first time in this generation) and was rebuilt afterwards.
    Presented { image_index: u32, rebuilt: bool },
    /// Acquire reported the chain out of date; it was rebuilt and nothing was drawn.
    Skipped,
}

pub struct VulkanSwapchain<G: Gpu> {
    chain: Option<Chain>,
    commands: CommandBuffers,
    sync: FrameSync,
    window_size: RenderSize,
    clear_color: [f32; 4],
    generation: u64,
    // Generation built in response to a suboptimal report, if any.
    suboptimal_rebuilt_at: Option<u64>,
    draws: Box<dyn DrawCommands>,
    // Last: everything above is released through it.
    gpu: G,
}

impl<G: Gpu> VulkanSwapchain<G> {
    pub fn new(
        gpu: G,
        window_size: RenderSize,
        draws: impl DrawCommands + 'static,
    ) -> Result<Self> {
        let sync = unsafe { FrameSync::new(&gpu) }?;
        let mut swapchain = Self {
            chain: None,
            commands: CommandBuffers::default(),
            sync,
            window_size,
            clear_color: DEFAULT_CLEAR_COLOR,
            generation: 0,
            suboptimal_rebuilt_at: None,
            draws: Box::new(draws),
            gpu,
        };
        swapchain.rebuild_swapchain()?;
        Ok(swapchain)
    }

    /// Tears down the current chain (if any) and builds a fresh one from
    /// newly queried surface support. Waits for the device to go idle first.
    ///
    /// On failure the swapchain holds no chain and [`Self::render`] returns
    /// [`SwapchainError::Unusable`] until a later rebuild succeeds.
    pub fn rebuild_swapchain(&mut self) -> Result<()> {
        unsafe { self.gpu.device_wait_idle() }.context("vkDeviceWaitIdle")?;

        if let Some(mut old) = self.chain.take() {
            unsafe { old.destroy(&self.gpu) };
        }
        if !self.sync.is_created() {
            self.sync = unsafe { FrameSync::new(&self.gpu) }?;
        }

        let support = unsafe { SurfaceSupport::query(&self.gpu) }?;
        let depth_format = unsafe { choose_depth_format(&self.gpu) };
        let config = SwapchainConfig::negotiate(&support, depth_format, self.window_size)?;
        let mut chain = unsafe { Chain::build(&self.gpu, config) }?;

        if let Err(e) = unsafe { self.record_commands(&chain) } {
            unsafe { chain.destroy(&self.gpu) };
            return Err(e);
        }

        self.chain = Some(chain);
        self.generation += 1;
        info!(
            "swapchain generation {} built for window {}x{}",
            self.generation, self.window_size.width, self.window_size.height
        );
        Ok(())
    }

    unsafe fn record_commands(&mut self, chain: &Chain) -> Result<()> {
        unsafe {
            self.commands.ensure_count(&self.gpu, chain.image_count())?;
            self.commands
                .record_all(&self.gpu, chain, self.clear_color, self.draws.as_mut())
        }
    }

    /// Only consulted when the surface lets the application pick the extent.
    pub fn resize(&mut self, size: RenderSize) -> Result<()> {
        debug!("resize to {}x{}", size.width, size.height);
        self.window_size = size;
        self.rebuild_swapchain()
    }

    pub fn render(&mut self) -> Result<FrameStatus> {
        let chain = self.chain.as_ref().ok_or(SwapchainError::Unusable)?;
        let swapchain = chain.swapchain;
        let FrameSync {
            image_available,
            render_finished,
        } = self.sync;

        let acquired = unsafe { self.gpu.acquire_next_image(swapchain, image_available) };
        let (image_index, acquired_suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date on acquire; rebuilding");
                self.rebuild_swapchain()?;
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => return Err(e).context("vkAcquireNextImageKHR"),
        };

        // From here on image_available is pending: any failure has to drop it.
        let Some(cmd) = self.commands.get(image_index) else {
            let count = self.commands.len();
            return Err(self.abandon_frame(SwapchainError::ImageIndexOutOfRange {
                index: image_index,
                count,
            }));
        };
        if let Err(e) = unsafe { self.submit_frame(cmd) } {
            return Err(self.abandon_frame(e));
        }

        let presented = unsafe { self.gpu.present(swapchain, image_index, render_finished) };
        let rebuild = match presented {
            Ok(present_suboptimal) => {
                (acquired_suboptimal || present_suboptimal) && self.take_suboptimal_rebuild()
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("swapchain out of date on present; rebuilding");
                true
            }
            Err(e) => {
                let err = SwapchainError::Vulkan {
                    call: "vkQueuePresentKHR",
                    result: e,
                };
                return Err(self.abandon_frame(err));
            }
        };
        if rebuild {
            self.rebuild_swapchain()?;
        }

        Ok(FrameStatus::Presented {
            image_index,
            rebuilt: rebuild,
        })
    }

    unsafe fn submit_frame(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let FrameSync {
            image_available,
            render_finished,
        } = self.sync;
        unsafe {
            // The previous present must have consumed render_finished before we signal it again.
            self.gpu
                .present_queue_wait_idle()
                .context("vkQueueWaitIdle(present)")?;
            self.gpu
                .submit(
                    cmd,
                    image_available,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    render_finished,
                )
                .context("vkQueueSubmit")?;
            self.gpu
                .graphics_queue_wait_idle()
                .context("vkQueueWaitIdle(graphics)")
        }
    }

    /// A suboptimal chain is rebuilt once; if the rebuilt chain is still
    /// suboptimal it is kept until something else forces a rebuild.
    fn take_suboptimal_rebuild(&mut self) -> bool {
        if self.suboptimal_rebuilt_at == Some(self.generation) {
            debug!("swapchain generation {} still suboptimal; keeping it", self.generation);
            return false;
        }
        warn!("swapchain reported suboptimal; rebuilding");
        self.suboptimal_rebuilt_at = Some(self.generation + 1);
        true
    }

    /// Failure between acquire and present: the semaphores may hold a pending
    /// signal, so they are replaced and the chain is dropped. The next
    /// [`Self::rebuild_swapchain`] restores both.
    fn abandon_frame(&mut self, err: SwapchainError) -> SwapchainError {
        warn!("frame abandoned after acquire: {err}; dropping the swapchain");
        unsafe {
            if let Err(e) = self.gpu.device_wait_idle() {
                warn!("vkDeviceWaitIdle failed while abandoning a frame: {e}");
            }
            if let Some(mut chain) = self.chain.take() {
                chain.destroy(&self.gpu);
            }
            self.sync.destroy(&self.gpu);
            match FrameSync::new(&self.gpu) {
                Ok(sync) => self.sync = sync,
                Err(e) => warn!("frame semaphores not recreated: {e}"),
            }
        }
        err
    }

    /// Re-records every command buffer with the new clear color.
    ///
    /// If recording fails part way the chain is dropped, leaving the
    /// swapchain unusable until the next rebuild.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) -> Result<()> {
        self.clear_color = rgba;
        let Some(mut chain) = self.chain.take() else {
            return Ok(());
        };
        if let Err(e) = unsafe { self.gpu.device_wait_idle() }.context("vkDeviceWaitIdle") {
            self.chain = Some(chain);
            return Err(e);
        }
        if let Err(e) = unsafe { self.record_commands(&chain) } {
            warn!("re-recording for the new clear color failed: {e}; dropping the swapchain");
            unsafe { chain.destroy(&self.gpu) };
            return Err(e);
        }
        self.chain = Some(chain);
        Ok(())
    }

    pub fn is_usable(&self) -> bool {
        self.chain.is_some()
    }

    pub fn config(&self) -> Option<&SwapchainConfig> {
        self.chain.as_ref().map(|c| &c.config)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.chain.as_ref().map(Chain::extent)
    }

    pub fn image_count(&self) -> usize {
        self.chain.as_ref().map_or(0, Chain::image_count)
    }

    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.chain.as_ref().map(|c| c.render_pass)
    }

    /// Number of successful builds so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn window_size(&self) -> RenderSize {
        self.window_size
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }
}

impl<G: Gpu> Drop for VulkanSwapchain<G> {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.gpu.device_wait_idle() {
                warn!("vkDeviceWaitIdle failed during swapchain teardown: {e}");
            }
            if let Some(mut chain) = self.chain.take() {
                chain.destroy(&self.gpu);
            }
            self.commands.free(&self.gpu);
            self.sync.destroy(&self.gpu);
        }
        debug!("swapchain destroyed");
    }
}
