// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::chain::Chain;
use crate::error::{Result, SwapchainError, VkResultExt};
use crate::gpu::Gpu;

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.2, 0.2, 0.2, 1.0];

/// What a draw hook is recording into: the render pass is already begun on
/// `framebuffer` when [`DrawCommands::record`] runs.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub image_index: u32,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// Issues draw calls inside the render pass bracket.
///
/// Called once per presentable image after every (re)build, so anything
/// bound here must stay valid until the next rebuild.
pub trait DrawCommands {
    fn record(&mut self, cmd: vk::CommandBuffer, target: &FrameTarget) -> anyhow::Result<()>;
}

/// Clear-only frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDraws;

impl DrawCommands for NoDraws {
    fn record(&mut self, _cmd: vk::CommandBuffer, _target: &FrameTarget) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> DrawCommands for F
where
    F: FnMut(vk::CommandBuffer, &FrameTarget) -> anyhow::Result<()>,
{
    fn record(&mut self, cmd: vk::CommandBuffer, target: &FrameTarget) -> anyhow::Result<()> {
        self(cmd, target)
    }
}

pub fn clear_values(color: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

/// One primary command buffer per framebuffer.
#[derive(Debug, Default)]
pub struct CommandBuffers {
    buffers: Vec<vk::CommandBuffer>,
}

impl CommandBuffers {
    /// Frees and reallocates when the image count changed. Returns whether it did.
    pub unsafe fn ensure_count<G: Gpu + ?Sized>(&mut self, gpu: &G, count: usize) -> Result<bool> {
        if self.buffers.len() == count {
            return Ok(false);
        }
        unsafe { self.free(gpu) };
        self.buffers = unsafe { gpu.allocate_command_buffers(count as u32) }
            .context("vkAllocateCommandBuffers")?;
        debug!("allocated {count} command buffers");
        Ok(true)
    }

    /// Re-records every buffer against the current chain.
    pub unsafe fn record_all<G: Gpu + ?Sized, D: DrawCommands + ?Sized>(
        &self,
        gpu: &G,
        chain: &Chain,
        clear_color: [f32; 4],
        draws: &mut D,
    ) -> Result<()> {
        let clear = clear_values(clear_color);
        for (i, (&cmd, &framebuffer)) in self.buffers.iter().zip(&chain.framebuffers).enumerate() {
            let target = FrameTarget {
                image_index: i as u32,
                render_pass: chain.render_pass,
                framebuffer,
                extent: chain.extent(),
            };
            unsafe {
                gpu.begin_commands(cmd).context("vkBeginCommandBuffer")?;
                gpu.begin_render_pass(cmd, target.render_pass, framebuffer, target.extent, &clear);
            }
            draws
                .record(cmd, &target)
                .map_err(|source| SwapchainError::Draw {
                    image_index: target.image_index,
                    source,
                })?;
            unsafe {
                gpu.end_render_pass(cmd);
                gpu.end_commands(cmd).context("vkEndCommandBuffer")?;
            }
        }
        Ok(())
    }

    pub unsafe fn free<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        if !self.buffers.is_empty() {
            unsafe { gpu.free_command_buffers(&self.buffers) };
            self.buffers.clear();
        }
    }

    pub fn get(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
