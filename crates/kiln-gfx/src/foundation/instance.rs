use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::error::{RenderError, RenderResult};
use crate::foundation::debug_messenger::KilnDebugMessenger;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct KilnInstance {
    pub(crate) entry: ash::Entry,
    pub(crate) handle: ash::Instance,
}

// new & init
impl KilnInstance {
    const ENGINE_NAME: &'static CStr = c"Kiln";

    /// - `display_handle` 用于查询平台所需的 surface extensions
    /// - `enable_validation` 打开 KHRONOS validation layer 以及 debug utils
    pub fn new(
        app_name: &CStr,
        display_handle: raw_window_handle::RawDisplayHandle,
        enable_validation: bool,
    ) -> RenderResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            log::error!("failed to load vulkan entry: {e}");
            RenderError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        })?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .engine_name(Self::ENGINE_NAME)
            .api_version(vk::API_VERSION_1_3);

        let mut exts = ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        if enable_validation {
            exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        let ext_names =
            exts.iter().map(|e| unsafe { CStr::from_ptr(*e) }.to_string_lossy()).join(", ");
        log::info!("instance extensions: {ext_names}");

        let layers = if enable_validation { vec![VALIDATION_LAYER.as_ptr()] } else { vec![] };

        let mut debug_ci = KilnDebugMessenger::messenger_ci();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&exts)
            .enabled_layer_names(&layers);
        if enable_validation {
            // instance 创建 / 销毁期间的校验输出也要收集到
            create_info = create_info.push_next(&mut debug_ci);
        }

        let handle = unsafe { entry.create_instance(&create_info, None)? };
        Ok(Self { entry, handle })
    }
}

// getters
impl KilnInstance {
    #[inline]
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.handle
    }
}

// destroy
impl KilnInstance {
    pub fn destroy(self) {
        log::info!("destroying instance");
        unsafe {
            self.handle.destroy_instance(None);
        }
    }
}
