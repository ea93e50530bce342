// SPDX-License-Identifier: CEPL-1.0
//! One generation of the presentable image chain and everything sized to it.
//!
//! Creation order: swapchain -> images -> color views -> render pass ->
//! depth attachment -> framebuffers. Teardown is the mirror:
//! framebuffers -> render pass (+ depth) -> color views -> swapchain.

use ash::vk;
use sandblox_render::RenderSize;
use tracing::{debug, info};

use crate::error::{Result, SwapchainError, VkResultExt};
use crate::gpu::{Gpu, SwapchainDesc};
use crate::select::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    present_mode_name,
};
use crate::support::SurfaceSupport;

/// Everything negotiated for one chain generation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwapchainConfig {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    /// What we ask for; the driver may hand back more.
    pub image_count: u32,
    pub depth_format: vk::Format,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfig {
    pub fn negotiate(
        support: &SurfaceSupport,
        depth_format: vk::Format,
        window: RenderSize,
    ) -> Result<Self> {
        if support.formats.is_empty() {
            return Err(SwapchainError::NoSurfaceFormats);
        }
        if support.present_modes.is_empty() {
            return Err(SwapchainError::NoPresentModes);
        }

        let surface_format = choose_surface_format(&support.formats);
        if surface_format.format == vk::Format::UNDEFINED {
            return Err(SwapchainError::UndefinedSurfaceFormat);
        }
        if depth_format == vk::Format::UNDEFINED {
            return Err(SwapchainError::NoDepthFormat);
        }

        let caps = &support.capabilities;
        let extent = choose_extent(caps, window);
        if extent.width == 0 || extent.height == 0 {
            return Err(SwapchainError::ZeroExtent {
                width: extent.width,
                height: extent.height,
            });
        }

        Ok(Self {
            surface_format,
            present_mode: choose_present_mode(&support.present_modes),
            extent,
            image_count: choose_image_count(caps),
            depth_format,
            pre_transform: caps.current_transform,
        })
    }

    fn desc(&self) -> SwapchainDesc {
        SwapchainDesc {
            surface_format: self.surface_format,
            present_mode: self.present_mode,
            extent: self.extent,
            min_image_count: self.image_count,
            pre_transform: self.pre_transform,
        }
    }
}

/// Color attachment 0: cleared on load, stored, handed to the presentation engine.
pub fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Depth attachment 1: cleared on load, contents discarded after the pass.
pub fn depth_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    }
}

/// External work must finish before our color-attachment-output stage starts.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// Depth image, its memory and its view; shared by every framebuffer of a chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthAttachment {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

impl DepthAttachment {
    /// Fills `self` step by step so a failure part way leaves only handles
    /// that [`DepthAttachment::destroy`] knows how to release.
    unsafe fn create<G: Gpu + ?Sized>(
        &mut self,
        gpu: &G,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<()> {
        self.format = format;
        let (image, memory) =
            unsafe { gpu.create_depth_image(extent, format) }.context("vkCreateImage(depth)")?;
        self.image = image;
        self.memory = memory;

        self.view = unsafe { gpu.create_image_view(image, format, vk::ImageAspectFlags::DEPTH) }
            .context("vkCreateImageView(depth)")?;

        unsafe { gpu.transition_to_depth_attachment(image, format) }
            .context("transition depth image")?;
        Ok(())
    }

    unsafe fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        unsafe {
            if self.view != vk::ImageView::null() {
                gpu.destroy_image_view(self.view);
            }
            if self.image != vk::Image::null() {
                gpu.destroy_depth_image(self.image, self.memory);
            }
        }
        *self = Self::default();
    }
}

#[derive(Debug, Default)]
pub struct Chain {
    pub config: SwapchainConfig,
    pub swapchain: vk::SwapchainKHR,
    /// Owned by the presentation engine; never destroyed here.
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: vk::RenderPass,
    pub depth: DepthAttachment,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl Chain {
    /// All or nothing: on error every object created so far is destroyed
    /// before the error is returned.
    pub unsafe fn build<G: Gpu + ?Sized>(gpu: &G, config: SwapchainConfig) -> Result<Self> {
        let mut chain = Chain {
            config,
            ..Default::default()
        };
        match unsafe { chain.create_objects(gpu) } {
            Ok(()) => {
                info!(
                    "swapchain ready: {}x{}, {:?}/{:?}, {}, {} images ({} asked), depth {:?}",
                    config.extent.width,
                    config.extent.height,
                    config.surface_format.format,
                    config.surface_format.color_space,
                    present_mode_name(config.present_mode),
                    chain.images.len(),
                    config.image_count,
                    config.depth_format
                );
                Ok(chain)
            }
            Err(e) => {
                unsafe { chain.destroy(gpu) };
                Err(e)
            }
        }
    }

    unsafe fn create_objects<G: Gpu + ?Sized>(&mut self, gpu: &G) -> Result<()> {
        let cfg = self.config;

        self.swapchain =
            unsafe { gpu.create_swapchain(&cfg.desc()) }.context("vkCreateSwapchainKHR")?;
        self.images =
            unsafe { gpu.swapchain_images(self.swapchain) }.context("vkGetSwapchainImagesKHR")?;
        if self.images.len() as u32 != cfg.image_count {
            debug!(
                "driver returned {} swapchain images for a request of {}",
                self.images.len(),
                cfg.image_count
            );
        }

        self.image_views.reserve(self.images.len());
        for &image in &self.images {
            let view = unsafe {
                gpu.create_image_view(
                    image,
                    cfg.surface_format.format,
                    vk::ImageAspectFlags::COLOR,
                )
            }
            .context("vkCreateImageView(color)")?;
            self.image_views.push(view);
        }

        self.render_pass = unsafe {
            gpu.create_render_pass(
                color_attachment(cfg.surface_format.format),
                depth_attachment(cfg.depth_format),
                external_dependency(),
            )
        }
        .context("vkCreateRenderPass")?;

        unsafe { self.depth.create(gpu, cfg.extent, cfg.depth_format) }?;

        self.framebuffers.reserve(self.image_views.len());
        for &view in &self.image_views {
            let attachments = [view, self.depth.view];
            let framebuffer =
                unsafe { gpu.create_framebuffer(self.render_pass, &attachments, cfg.extent) }
                    .context("vkCreateFramebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Safe to call on a partially built or already destroyed chain.
    pub unsafe fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        unsafe {
            for fb in self.framebuffers.drain(..) {
                gpu.destroy_framebuffer(fb);
            }
            if self.render_pass != vk::RenderPass::null() {
                gpu.destroy_render_pass(self.render_pass);
                self.render_pass = vk::RenderPass::null();
            }
            self.depth.destroy(gpu);
            for view in self.image_views.drain(..) {
                gpu.destroy_image_view(view);
            }
            self.images.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                gpu.destroy_swapchain(self.swapchain);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.config.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, Kind, MockGpu};
    use crate::select::choose_depth_format;

    fn negotiate(gpu: &MockGpu, window: RenderSize) -> Result<SwapchainConfig> {
        let support = unsafe { SurfaceSupport::query(gpu) }?;
        let depth = unsafe { choose_depth_format(gpu) };
        SwapchainConfig::negotiate(&support, depth, window)
    }

    fn build(gpu: &MockGpu) -> Result<Chain> {
        let cfg = negotiate(gpu, RenderSize::new(800, 600))?;
        unsafe { Chain::build(gpu, cfg) }
    }

    #[test]
    fn requested_count_is_min_plus_one_when_unbounded() {
        let gpu = MockGpu::new();
        {
            let mut s = gpu.state_mut();
            s.capabilities.min_image_count = 2;
            s.capabilities.max_image_count = 0;
        }
        let cfg = negotiate(&gpu, RenderSize::new(800, 600)).unwrap();
        assert_eq!(cfg.image_count, 3);
    }

    #[test]
    fn requested_count_is_clamped_to_max() {
        let gpu = MockGpu::new();
        {
            let mut s = gpu.state_mut();
            s.capabilities.min_image_count = 2;
            s.capabilities.max_image_count = 2;
        }
        let mut chain = build(&gpu).unwrap();
        assert_eq!(chain.config.image_count, 2);
        assert_eq!(gpu.state().last_min_image_count, Some(2));
        unsafe { chain.destroy(&gpu) };
    }

    #[test]
    fn view_and_framebuffer_counts_track_driver_images() {
        let gpu = MockGpu::new();
        gpu.state_mut().driver_image_count = Some(5);
        let mut chain = build(&gpu).unwrap();

        assert_eq!(chain.config.image_count, 3);
        assert_eq!(chain.images.len(), 5);
        assert_eq!(chain.image_views.len(), 5);
        assert_eq!(chain.framebuffers.len(), 5);
        assert_eq!(gpu.state().live(Kind::ImageView), 6); // 5 color + depth
        assert_eq!(gpu.state().live(Kind::Framebuffer), 5);
        assert_eq!(gpu.state().live(Kind::RenderPass), 1);
        assert_eq!(gpu.state().live(Kind::DepthImage), 1);

        unsafe { chain.destroy(&gpu) };
        assert!(gpu.state().nothing_live());
    }

    #[test]
    fn every_framebuffer_shares_the_depth_view() {
        let gpu = MockGpu::new();
        let mut chain = build(&gpu).unwrap();
        let attachments = gpu.state().framebuffer_attachments.clone();
        assert_eq!(attachments.len(), chain.framebuffers.len());
        for (i, atts) in attachments.iter().enumerate() {
            assert_eq!(atts, &vec![chain.image_views[i], chain.depth.view]);
        }
        unsafe { chain.destroy(&gpu) };
    }

    #[test]
    fn depth_is_transitioned_once_per_build() {
        let gpu = MockGpu::new();
        let mut chain = build(&gpu).unwrap();
        let transitions = gpu
            .state()
            .calls_matching(|c| matches!(c, Call::TransitionDepth));
        assert_eq!(transitions.len(), 1);
        unsafe { chain.destroy(&gpu) };
    }

    #[test]
    fn teardown_runs_in_reverse_dependency_order() {
        let gpu = MockGpu::new();
        let mut chain = build(&gpu).unwrap();
        gpu.state_mut().calls.clear();
        unsafe { chain.destroy(&gpu) };

        let calls = gpu.state().calls.clone();
        let last_fb = calls
            .iter()
            .rposition(|c| *c == Call::Destroy(Kind::Framebuffer))
            .unwrap();
        let rp = calls
            .iter()
            .position(|c| *c == Call::Destroy(Kind::RenderPass))
            .unwrap();
        let first_color_view = calls
            .iter()
            .rposition(|c| *c == Call::Destroy(Kind::DepthImage))
            .unwrap()
            + 1;
        let sc = calls
            .iter()
            .position(|c| *c == Call::Destroy(Kind::Swapchain))
            .unwrap();

        assert!(last_fb < rp);
        assert!(rp < first_color_view);
        assert!(calls[first_color_view..sc]
            .iter()
            .all(|c| *c == Call::Destroy(Kind::ImageView)));
        assert_eq!(sc, calls.len() - 1);
        assert!(gpu.state().nothing_live());
    }

    #[test]
    fn destroy_is_idempotent() {
        let gpu = MockGpu::new();
        let mut chain = build(&gpu).unwrap();
        unsafe {
            chain.destroy(&gpu);
            chain.destroy(&gpu);
        }
        assert!(gpu.state().nothing_live());
        assert_eq!(chain.swapchain, vk::SwapchainKHR::null());
    }

    #[test]
    fn failed_build_releases_partial_objects() {
        for step in [
            "swapchain_images",
            "create_render_pass",
            "create_depth_image",
            "transition_depth",
            "create_framebuffer",
        ] {
            let gpu = MockGpu::new();
            gpu.fail_next(step, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            let err = build(&gpu).unwrap_err();
            assert_eq!(
                err.vk_result(),
                Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
                "{step}"
            );
            assert!(gpu.state().nothing_live(), "leak after failing {step}");
        }
    }

    #[test]
    fn empty_capability_sets_are_configuration_errors() {
        let gpu = MockGpu::new();
        gpu.state_mut().formats.clear();
        assert!(matches!(
            negotiate(&gpu, RenderSize::new(800, 600)),
            Err(SwapchainError::NoSurfaceFormats)
        ));

        let gpu = MockGpu::new();
        gpu.state_mut().present_modes.clear();
        assert!(matches!(
            negotiate(&gpu, RenderSize::new(800, 600)),
            Err(SwapchainError::NoPresentModes)
        ));
    }

    #[test]
    fn missing_depth_format_is_a_configuration_error() {
        let gpu = MockGpu::new();
        gpu.state_mut().depth_formats.clear();
        assert!(matches!(
            negotiate(&gpu, RenderSize::new(800, 600)),
            Err(SwapchainError::NoDepthFormat)
        ));
    }

    #[test]
    fn zero_area_surface_is_rejected() {
        let gpu = MockGpu::new();
        gpu.state_mut().capabilities.current_extent = vk::Extent2D {
            width: 0,
            height: 0,
        };
        assert!(matches!(
            negotiate(&gpu, RenderSize::new(800, 600)),
            Err(SwapchainError::ZeroExtent { .. })
        ));
    }

    #[test]
    fn render_pass_attachments_match_presentation_needs() {
        let color = color_attachment(vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);

        let depth = depth_attachment(vk::Format::D32_SFLOAT);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        let dep = external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert_eq!(
            dep.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
    }
}
