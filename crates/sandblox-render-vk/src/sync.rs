// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{Result, VkResultExt};
use crate::gpu::Gpu;

/// The two binary semaphores ordering a frame: acquire -> submit -> present.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSync {
    pub unsafe fn new<G: Gpu + ?Sized>(gpu: &G) -> Result<Self> {
        let image_available =
            unsafe { gpu.create_semaphore() }.context("vkCreateSemaphore(image_available)")?;
        let render_finished = match unsafe { gpu.create_semaphore() } {
            Ok(s) => s,
            Err(result) => {
                unsafe { gpu.destroy_semaphore(image_available) };
                return Err(result).context("vkCreateSemaphore(render_finished)");
            }
        };
        Ok(Self {
            image_available,
            render_finished,
        })
    }

    /// False after [`Self::destroy`] or for a default value.
    pub fn is_created(&self) -> bool {
        self.image_available != vk::Semaphore::null()
            && self.render_finished != vk::Semaphore::null()
    }

    pub unsafe fn destroy<G: Gpu + ?Sized>(&mut self, gpu: &G) {
        unsafe {
            if self.render_finished != vk::Semaphore::null() {
                gpu.destroy_semaphore(self.render_finished);
            }
            if self.image_available != vk::Semaphore::null() {
                gpu.destroy_semaphore(self.image_available);
            }
        }
        *self = Self::default();
    }
}
