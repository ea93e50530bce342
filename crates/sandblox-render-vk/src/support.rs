// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{Result, VkResultExt};
use crate::gpu::Gpu;

/// What the device/surface pair reported at the start of one (re)build.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Capabilities, then formats, then present modes.
    ///
    /// An empty format list stops the query early (present modes are left
    /// empty too); the builder rejects either empty list.
    pub unsafe fn query<G: Gpu + ?Sized>(gpu: &G) -> Result<Self> {
        let capabilities = unsafe { gpu.surface_capabilities() }
            .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let formats =
            unsafe { gpu.surface_formats() }.context("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        if formats.is_empty() {
            debug!("surface reports no formats");
            return Ok(Self {
                capabilities,
                ..Default::default()
            });
        }

        let present_modes = unsafe { gpu.surface_present_modes() }
            .context("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        debug!(
            "surface support: {} formats, {} present modes, images {}..={}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub fn is_usable(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}
