// SPDX-License-Identifier: CEPL-1.0
use ash::{prelude::VkResult, vk};
use thiserror::Error;

pub type Result<T, E = SwapchainError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SwapchainError {
    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("surface reports no supported present modes")]
    NoPresentModes,

    #[error("no usable surface format could be selected")]
    UndefinedSurfaceFormat,

    #[error("no candidate depth format supports optimal-tiling depth attachments")]
    NoDepthFormat,

    #[error("surface extent is {width}x{height}; nothing to present into")]
    ZeroExtent { width: u32, height: u32 },

    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("draw recording failed for image {image_index}")]
    Draw {
        image_index: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("driver acquired image {index} but only {count} command buffers are recorded")]
    ImageIndexOutOfRange { index: u32, count: usize },

    #[error("swapchain has no usable image chain after a failed rebuild")]
    Unusable,
}

impl SwapchainError {
    /// Raw Vulkan result behind this error, if it came from a driver call.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            SwapchainError::Vulkan { result, .. } => Some(*result),
            _ => None,
        }
    }
}

/// Attaches the failing Vulkan entry point to a raw result.
pub trait VkResultExt<T> {
    fn context(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn context(self, call: &'static str) -> Result<T> {
        self.map_err(|result| SwapchainError::Vulkan { call, result })
    }
}
