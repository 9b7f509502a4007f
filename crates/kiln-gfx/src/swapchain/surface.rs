use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::error::RenderResult;
use crate::foundation::instance::KilnInstance;

pub struct KilnSurface {
    pub(crate) handle: vk::SurfaceKHR,
    pub(crate) surface_fn: ash::khr::surface::Instance,
}

// new & init
impl KilnSurface {
    pub fn new(
        instance: &KilnInstance,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RenderResult<Self> {
        let handle = unsafe {
            ash_window::create_surface(&instance.entry, &instance.handle, display_handle, window_handle, None)?
        };
        let surface_fn = ash::khr::surface::Instance::new(&instance.entry, &instance.handle);
        Ok(Self { handle, surface_fn })
    }
}

// getter
impl KilnSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

// tools
impl KilnSurface {
    pub fn support_present(&self, pdevice: vk::PhysicalDevice, queue_family_index: u32) -> bool {
        unsafe {
            self.surface_fn
                .get_physical_device_surface_support(pdevice, queue_family_index, self.handle)
                .unwrap_or(false)
        }
    }

    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> RenderResult<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe { self.surface_fn.get_physical_device_surface_capabilities(pdevice, self.handle)? };
        Ok(caps)
    }

    pub fn formats(&self, pdevice: vk::PhysicalDevice) -> RenderResult<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe { self.surface_fn.get_physical_device_surface_formats(pdevice, self.handle)? };
        Ok(formats)
    }

    pub fn present_modes(&self, pdevice: vk::PhysicalDevice) -> RenderResult<Vec<vk::PresentModeKHR>> {
        let modes =
            unsafe { self.surface_fn.get_physical_device_surface_present_modes(pdevice, self.handle)? };
        Ok(modes)
    }
}

// destroy
impl KilnSurface {
    pub fn destroy(self) {
        log::info!("destroying surface");
        unsafe {
            self.surface_fn.destroy_surface(self.handle, None);
        }
    }
}
