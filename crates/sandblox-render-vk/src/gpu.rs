// SPDX-License-Identifier: CEPL-1.0
//! The device seam the swapchain is written against.
//!
//! [`crate::VulkanContext`] implements it on top of `ash`; tests drive the
//! same build/teardown/present code through a mock that only hands out
//! handles and records calls.
//!
//! Every method is `unsafe`: handles passed in must have been created by the
//! same `Gpu` and must not be in use by the GPU when destroyed.

use ash::{prelude::VkResult, vk};

/// Creation parameters for one swapchain generation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub trait Gpu {
    // -- surface / physical device queries -----------------------------------
    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    unsafe fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;

    // -- swapchain ----------------------------------------------------------
    unsafe fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    /// The images the driver actually allocated; may exceed the requested count.
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    // -- images -------------------------------------------------------------
    unsafe fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView>;
    unsafe fn destroy_image_view(&self, view: vk::ImageView);

    /// Optimal-tiling depth image bound to freshly allocated device-local memory.
    unsafe fn create_depth_image(
        &self,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)>;
    unsafe fn destroy_depth_image(&self, image: vk::Image, memory: vk::DeviceMemory);
    /// One-shot `UNDEFINED -> DEPTH_STENCIL_ATTACHMENT_OPTIMAL`; returns once the GPU is done.
    unsafe fn transition_to_depth_attachment(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> VkResult<()>;

    // -- render pass / framebuffers ----------------------------------------
    /// Single graphics subpass: color at attachment 0, depth at attachment 1.
    unsafe fn create_render_pass(
        &self,
        color: vk::AttachmentDescription,
        depth: vk::AttachmentDescription,
        dependency: vk::SubpassDependency,
    ) -> VkResult<vk::RenderPass>;
    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    unsafe fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // -- command buffers ----------------------------------------------------
    /// Primary buffers from the shared graphics command pool.
    unsafe fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);
    /// Reset, then begin with `SIMULTANEOUS_USE`.
    unsafe fn begin_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    unsafe fn begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    unsafe fn end_render_pass(&self, cmd: vk::CommandBuffer);
    unsafe fn end_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    // -- synchronization / queues ------------------------------------------
    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Blocks without timeout. `Ok((index, suboptimal))`.
    unsafe fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Submits to the graphics queue without a fence.
    unsafe fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
    ) -> VkResult<()>;
    /// `Ok(suboptimal)`.
    unsafe fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;
    unsafe fn graphics_queue_wait_idle(&self) -> VkResult<()>;
    unsafe fn present_queue_wait_idle(&self) -> VkResult<()>;
    unsafe fn device_wait_idle(&self) -> VkResult<()>;
}
