// SPDX-License-Identifier: CEPL-1.0
//! In-memory [`Gpu`] for tests: hands out unique handles, tracks which
//! objects are alive, and records every call in order.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use ash::{
    prelude::VkResult,
    vk::{self, Handle},
};

use crate::gpu::{Gpu, SwapchainDesc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Swapchain,
    ImageView,
    DepthImage,
    RenderPass,
    Framebuffer,
    CommandBuffer,
    Semaphore,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    QuerySurface(&'static str),
    Create(Kind),
    Destroy(Kind),
    TransitionDepth,
    BeginCommands(vk::CommandBuffer),
    BeginRenderPass {
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        clear_color: [f32; 4],
    },
    EndRenderPass(vk::CommandBuffer),
    EndCommands(vk::CommandBuffer),
    Acquire,
    Submit {
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
    },
    Present {
        image_index: u32,
        wait: vk::Semaphore,
    },
    GraphicsIdle,
    PresentIdle,
    DeviceIdle,
}

pub struct MockState {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Formats reported as optimal-tiling depth attachments.
    pub depth_formats: Vec<vk::Format>,
    /// Overrides how many images the "driver" allocates per swapchain.
    pub driver_image_count: Option<u32>,
    /// Scripted acquire results; round-robin success once drained.
    pub acquire_results: VecDeque<VkResult<(u32, bool)>>,
    /// Scripted present results; `Ok(false)` once drained.
    pub present_results: VecDeque<VkResult<bool>>,
    pub calls: Vec<Call>,
    pub last_min_image_count: Option<u32>,
    pub last_extent: Option<vk::Extent2D>,
    pub framebuffer_attachments: Vec<Vec<vk::ImageView>>,
    /// Method name -> (successful calls still allowed, failure).
    failures: HashMap<&'static str, (u32, vk::Result)>,
    live: HashMap<Kind, HashSet<u64>>,
    next_handle: u64,
    image_count: u32,
    next_acquire: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: 800,
                    height: 600,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            depth_formats: vec![vk::Format::D32_SFLOAT],
            driver_image_count: None,
            acquire_results: VecDeque::new(),
            present_results: VecDeque::new(),
            calls: Vec::new(),
            last_min_image_count: None,
            last_extent: None,
            framebuffer_attachments: Vec::new(),
            failures: HashMap::new(),
            live: HashMap::new(),
            next_handle: 1,
            image_count: 0,
            next_acquire: 0,
        }
    }
}

impl MockState {
    pub fn calls_matching(&self, pred: impl Fn(&Call) -> bool) -> Vec<Call> {
        self.calls.iter().filter(|c| pred(c)).cloned().collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.live.get(&kind).map_or(0, HashSet::len)
    }

    pub fn nothing_live(&self) -> bool {
        self.live.values().all(HashSet::is_empty)
    }

    fn check(&mut self, name: &'static str) -> VkResult<()> {
        match self.failures.get_mut(name) {
            Some((0, result)) => {
                let result = *result;
                self.failures.remove(name);
                Err(result)
            }
            Some((skip, _)) => {
                *skip -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn mint(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn create<H: Handle>(&mut self, kind: Kind) -> H {
        let raw = self.mint();
        self.live.entry(kind).or_default().insert(raw);
        self.calls.push(Call::Create(kind));
        H::from_raw(raw)
    }

    fn destroy<H: Handle>(&mut self, kind: Kind, handle: H) {
        let raw = handle.as_raw();
        let removed = self.live.get_mut(&kind).is_some_and(|set| set.remove(&raw));
        assert!(removed, "{kind:?} {raw:#x} destroyed twice or never created");
        self.calls.push(Call::Destroy(kind));
    }
}

#[derive(Clone, Default)]
pub struct MockGpu {
    state: Rc<RefCell<MockState>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    /// The next call to the named `Gpu` method fails with `result`.
    pub fn fail_next(&self, name: &'static str, result: vk::Result) {
        self.fail_after(name, 0, result);
    }

    /// Lets `skip` calls of the named method succeed, then fails one.
    pub fn fail_after(&self, name: &'static str, skip: u32, result: vk::Result) {
        self.state_mut().failures.insert(name, (skip, result));
    }
}

impl Gpu for MockGpu {
    unsafe fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let mut s = self.state_mut();
        s.calls.push(Call::QuerySurface("capabilities"));
        s.check("surface_capabilities")?;
        Ok(s.capabilities)
    }

    unsafe fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let mut s = self.state_mut();
        s.calls.push(Call::QuerySurface("formats"));
        s.check("surface_formats")?;
        Ok(s.formats.clone())
    }

    unsafe fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        let mut s = self.state_mut();
        s.calls.push(Call::QuerySurface("present_modes"));
        s.check("surface_present_modes")?;
        Ok(s.present_modes.clone())
    }

    unsafe fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let s = self.state();
        let optimal_tiling_features = if s.depth_formats.contains(&format) {
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::FormatFeatureFlags::empty()
        };
        vk::FormatProperties {
            optimal_tiling_features,
            ..Default::default()
        }
    }

    unsafe fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.state_mut();
        s.check("create_swapchain")?;
        s.last_min_image_count = Some(desc.min_image_count);
        s.last_extent = Some(desc.extent);
        s.image_count = s.driver_image_count.unwrap_or(desc.min_image_count);
        s.next_acquire = 0;
        Ok(s.create(Kind::Swapchain))
    }

    unsafe fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let mut s = self.state_mut();
        s.check("swapchain_images")?;
        let count = s.image_count;
        Ok((0..count).map(|_| vk::Image::from_raw(s.mint())).collect())
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state_mut().destroy(Kind::Swapchain, swapchain);
    }

    unsafe fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut s = self.state_mut();
        s.check("create_image_view")?;
        Ok(s.create(Kind::ImageView))
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        self.state_mut().destroy(Kind::ImageView, view);
    }

    unsafe fn create_depth_image(
        &self,
        _extent: vk::Extent2D,
        _format: vk::Format,
    ) -> VkResult<(vk::Image, vk::DeviceMemory)> {
        let mut s = self.state_mut();
        s.check("create_depth_image")?;
        let image = s.create(Kind::DepthImage);
        let memory = vk::DeviceMemory::from_raw(s.mint());
        Ok((image, memory))
    }

    unsafe fn destroy_depth_image(&self, image: vk::Image, _memory: vk::DeviceMemory) {
        self.state_mut().destroy(Kind::DepthImage, image);
    }

    unsafe fn transition_to_depth_attachment(
        &self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("transition_depth")?;
        s.calls.push(Call::TransitionDepth);
        Ok(())
    }

    unsafe fn create_render_pass(
        &self,
        _color: vk::AttachmentDescription,
        _depth: vk::AttachmentDescription,
        _dependency: vk::SubpassDependency,
    ) -> VkResult<vk::RenderPass> {
        let mut s = self.state_mut();
        s.check("create_render_pass")?;
        Ok(s.create(Kind::RenderPass))
    }

    unsafe fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state_mut().destroy(Kind::RenderPass, render_pass);
    }

    unsafe fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.state_mut();
        s.check("create_framebuffer")?;
        s.framebuffer_attachments.push(attachments.to_vec());
        Ok(s.create(Kind::Framebuffer))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state_mut().destroy(Kind::Framebuffer, framebuffer);
    }

    unsafe fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.state_mut();
        s.check("allocate_command_buffers")?;
        Ok((0..count).map(|_| s.create(Kind::CommandBuffer)).collect())
    }

    unsafe fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        let mut s = self.state_mut();
        for &cmd in buffers {
            s.destroy(Kind::CommandBuffer, cmd);
        }
    }

    unsafe fn begin_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("begin_commands")?;
        s.calls.push(Call::BeginCommands(cmd));
        Ok(())
    }

    unsafe fn begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let clear_color = clear_values
            .first()
            .map(|v| unsafe { v.color.float32 })
            .unwrap_or_default();
        self.state_mut().calls.push(Call::BeginRenderPass {
            cmd,
            framebuffer,
            clear_color,
        });
    }

    unsafe fn end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state_mut().calls.push(Call::EndRenderPass(cmd));
    }

    unsafe fn end_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("end_commands")?;
        s.calls.push(Call::EndCommands(cmd));
        Ok(())
    }

    unsafe fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.state_mut();
        s.check("create_semaphore")?;
        Ok(s.create(Kind::Semaphore))
    }

    unsafe fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state_mut().destroy(Kind::Semaphore, semaphore);
    }

    unsafe fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state_mut();
        s.calls.push(Call::Acquire);
        if let Some(scripted) = s.acquire_results.pop_front() {
            return scripted;
        }
        let index = s.next_acquire % s.image_count.max(1);
        s.next_acquire = s.next_acquire.wrapping_add(1);
        Ok((index, false))
    }

    unsafe fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        _wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
    ) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("submit")?;
        s.calls.push(Call::Submit { cmd, wait, signal });
        Ok(())
    }

    unsafe fn present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state_mut();
        s.calls.push(Call::Present { image_index, wait });
        s.present_results.pop_front().unwrap_or(Ok(false))
    }

    unsafe fn graphics_queue_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("graphics_queue_wait_idle")?;
        s.calls.push(Call::GraphicsIdle);
        Ok(())
    }

    unsafe fn present_queue_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("present_queue_wait_idle")?;
        s.calls.push(Call::PresentIdle);
        Ok(())
    }

    unsafe fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state_mut();
        s.check("device_wait_idle")?;
        s.calls.push(Call::DeviceIdle);
        Ok(())
    }
}
