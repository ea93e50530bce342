// SPDX-License-Identifier: CEPL-1.0
//! Vulkan swapchain lifecycle and frame presentation.
//!
//! [`VulkanSwapchain`] owns the presentable image chain together with the
//! render pass, depth attachment, framebuffers, command buffers and the two
//! frame semaphores built on it. It rebuilds the whole graph when the surface
//! goes out of date. [`VkRenderer`] wires it to a window through
//! [`VulkanContext`].
#![deny(unsafe_op_in_unsafe_fn)]

mod ash_gpu;
mod chain;
mod commands;
mod context;
mod error;
mod gpu;
mod renderer;
mod select;
mod support;
mod swapchain;
mod sync;

#[cfg(test)]
mod mock;

pub use chain::{Chain, DepthAttachment, SwapchainConfig};
pub use commands::{DrawCommands, FrameTarget, NoDraws, DEFAULT_CLEAR_COLOR};
pub use context::{pick_queue_families, QueueFamilies, VulkanContext};
pub use error::{Result, SwapchainError, VkResultExt};
pub use gpu::{Gpu, SwapchainDesc};
pub use renderer::VkRenderer;
pub use select::{
    choose_depth_format, choose_extent, choose_image_count, choose_present_mode,
    choose_surface_format, find_supported_format, DEFAULT_SURFACE_FORMAT,
    DEPTH_FORMAT_CANDIDATES,
};
pub use support::SurfaceSupport;
pub use swapchain::{FrameStatus, VulkanSwapchain};
pub use sync::FrameSync;
