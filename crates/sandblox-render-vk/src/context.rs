// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, device, queues and the shared graphics command pool.

use std::collections::BTreeSet;
use std::ffi::{c_char, c_void, CStr};

use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};

const APP_NAME: &CStr = c"Sandblox";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, for queue creation and concurrent sharing.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }
}

/// Prefers one family that can both draw and present; otherwise the first
/// graphics family paired with the first presenting family.
pub fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut can_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let draws = family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let presents = can_present(i);
        if draws && presents {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if draws && graphics.is_none() {
            graphics = Some(i);
        }
        if presents && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || unsafe { (*data).p_message.is_null() } {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr((*data).p_message) }.to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vulkan {types:?}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vulkan {types:?}] {msg}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => debug!("[vulkan {types:?}] {msg}"),
        _ => trace!("[vulkan {types:?}] {msg}"),
    }
    vk::FALSE
}

impl DebugMessenger {
    unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .context("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, messenger })
    }

    unsafe fn destroy(&self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None)
        };
    }
}

/// Owns every device-level object the swapchain is built on.
///
/// Dropped after the swapchain that uses it; see [`crate::VkRenderer`].
pub struct VulkanContext {
    _entry: Entry,
    pub(crate) instance: Instance,
    debug: Option<DebugMessenger>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) families: QueueFamilies,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) swapchain_loader: swapchain::Device,
    pub(crate) command_pool: vk::CommandPool,
}

unsafe fn has_layer(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(name))
}

unsafe fn has_instance_extension(entry: &Entry, name: &CStr) -> bool {
    unsafe { entry.enumerate_instance_extension_properties(None) }
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(name))
}

/// Returns the instance and whether debug-utils was enabled on it.
unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<(Instance, bool)> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: 0,
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let mut layers: Vec<*const c_char> = Vec::new();
    let mut debug = false;
    if cfg!(debug_assertions) {
        if unsafe { has_layer(entry, VALIDATION_LAYER) } {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            info!(
                "{} not installed; running without validation",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
        if unsafe { has_instance_extension(entry, debug_utils::NAME) } {
            extensions.push(debug_utils::NAME.as_ptr());
            debug = true;
        }
    }

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    let instance =
        unsafe { entry.create_instance(&create_info, None) }.context("vkCreateInstance")?;
    Ok((instance, debug))
}

unsafe fn supports_swapchain(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    unsafe { instance.enumerate_device_extension_properties(phys) }
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str() == Ok(swapchain::NAME))
}

/// First suitable discrete GPU, else the first suitable device of any kind.
unsafe fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("vkEnumeratePhysicalDevices")?;

    let mut fallback = None;
    for phys in devices {
        if !unsafe { supports_swapchain(instance, phys) } {
            continue;
        }
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        let Some(queues) = pick_queue_families(&families, |i| unsafe {
            surface_loader
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        }) else {
            continue;
        };

        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            info!("using GPU {name} (discrete), queues {queues:?}");
            return Ok((phys, queues));
        }
        if fallback.is_none() {
            fallback = Some((phys, queues, name));
        }
    }

    let (phys, queues, name) =
        fallback.ok_or_else(|| anyhow!("no GPU can draw and present to this surface"))?;
    info!("using GPU {name}, queues {queues:?}");
    Ok((phys, queues))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.context("vkCreateDevice")
}

impl VulkanContext {
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = unsafe { Entry::load() }.context("loading the Vulkan library")?;
        let (instance, debug_enabled) = unsafe { create_instance(&entry, dh) }?;

        let debug = if debug_enabled {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("validation messages unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let destroy_instance = |debug: &Option<DebugMessenger>| unsafe {
            if let Some(d) = debug {
                d.destroy();
            }
            instance.destroy_instance(None);
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                destroy_instance(&debug);
                return Err(e).context("ash_window::create_surface");
            }
        };

        let device_parts = unsafe {
            pick_physical_device(&instance, &surface_loader, surface).and_then(|(phys, families)| {
                create_device(&instance, phys, families).map(|device| (phys, families, device))
            })
        };
        let (phys, families, device) = match device_parts {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                destroy_instance(&debug);
                return Err(e);
            }
        };

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    surface_loader.destroy_surface(surface, None);
                }
                destroy_instance(&debug);
                return Err(e).context("vkCreateCommandPool");
            }
        };

        debug!(
            "Vulkan context ready (graphics family {}, present family {})",
            families.graphics, families.present
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            device,
            families,
            graphics_queue,
            present_queue,
            swapchain_loader,
            command_pool,
        })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.families
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
