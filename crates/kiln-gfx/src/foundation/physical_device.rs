use ash::vk;

use crate::error::{RenderError, RenderResult};
use crate::foundation::instance::KilnInstance;
use crate::swapchain::surface::KilnSurface;

pub struct KilnPhysicalDevice {
    pub(crate) handle: vk::PhysicalDevice,
    pub(crate) properties: vk::PhysicalDeviceProperties,

    graphics_family: u32,
    /// 独立的 transfer queue family（如果硬件提供）。
    /// staging 层不依赖它，上层可以自行决定是否启用
    transfer_family: Option<u32>,
}

// new & init
impl KilnPhysicalDevice {
    /// 优先选择 discrete GPU；graphics family 必须同时支持 present
    pub fn pick(instance: &KilnInstance, surface: &KilnSurface) -> RenderResult<Self> {
        let pdevices = unsafe { instance.handle.enumerate_physical_devices()? };

        let mut candidates = pdevices
            .into_iter()
            .filter_map(|pdevice| Self::evaluate(instance, surface, pdevice))
            .collect::<Vec<_>>();
        // discrete 优先
        candidates.sort_by_key(|c| match c.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            _ => 2,
        });

        let picked = candidates.into_iter().next().ok_or_else(|| {
            log::error!("no suitable physical device found");
            RenderError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        })?;

        let name = picked.device_name();
        log::info!(
            "picked physical device: {name}, graphics family {}, dedicated transfer family {:?}",
            picked.graphics_family,
            picked.transfer_family
        );
        Ok(picked)
    }

    fn evaluate(instance: &KilnInstance, surface: &KilnSurface, pdevice: vk::PhysicalDevice) -> Option<Self> {
        let properties = unsafe { instance.handle.get_physical_device_properties(pdevice) };
        let queue_families = unsafe { instance.handle.get_physical_device_queue_family_properties(pdevice) };

        let mut graphics_family = None;
        let mut transfer_family = None;
        for (idx, family) in queue_families.iter().enumerate() {
            let idx = idx as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && graphics_family.is_none()
                && surface.support_present(pdevice, idx)
            {
                graphics_family = Some(idx);
            }
            // 仅 transfer、不含 graphics/compute 的 family 才算专用 transfer
            if family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !family.queue_flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            {
                transfer_family = Some(idx);
            }
        }

        Some(Self {
            handle: pdevice,
            properties,
            graphics_family: graphics_family?,
            transfer_family,
        })
    }
}

// getters
impl KilnPhysicalDevice {
    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    #[inline]
    pub fn transfer_family(&self) -> Option<u32> {
        self.transfer_family
    }

    pub fn device_name(&self) -> String {
        self.properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unknown>".to_string())
    }
}
