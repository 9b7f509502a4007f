use std::ffi::CString;

use ash::vk;

use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::instance::KilnInstance;
use crate::foundation::physical_device::KilnPhysicalDevice;
use crate::foundation::queue::KilnQueue;

/// logical device 以及从属于它的 queue、扩展函数表
///
/// 整个 gfx 层的其他对象都持有 `Rc<KilnDevice>`，
/// 销毁顺序由持有者保证：device 必须最后销毁
pub struct KilnDevice {
    pub(crate) handle: ash::Device,
    pub(crate) pdevice: KilnPhysicalDevice,

    graphics_queue: KilnQueue,
    transfer_queue: Option<KilnQueue>,

    /// swapchain 扩展的 device 级函数表
    pub(crate) swapchain_fn: ash::khr::swapchain::Device,
    /// validation 关闭时为 None，set_debug_name 变为 no-op
    debug_utils_fn: Option<ash::ext::debug_utils::Device>,
}

// new & init
impl KilnDevice {
    pub fn new(
        instance: &KilnInstance,
        pdevice: KilnPhysicalDevice,
        enable_validation: bool,
    ) -> RenderResult<Self> {
        let queue_priorities = [1.0_f32];
        let mut queue_cis = vec![vk::DeviceQueueCreateInfo::default()
            .queue_family_index(pdevice.graphics_family())
            .queue_priorities(&queue_priorities)];
        if let Some(transfer_family) = pdevice.transfer_family() {
            queue_cis.push(
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(transfer_family)
                    .queue_priorities(&queue_priorities),
            );
        }

        let ext_names = [ash::khr::swapchain::NAME.as_ptr()];

        // 1.3 core 的 sync2 与 dynamic rendering，无需额外扩展
        let mut features_13 = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_cis)
            .enabled_extension_names(&ext_names)
            .enabled_features(&features)
            .push_next(&mut features_13);

        let handle = unsafe { instance.handle.create_device(pdevice.handle, &device_ci, None)? };

        let graphics_queue = KilnQueue {
            handle: unsafe { handle.get_device_queue(pdevice.graphics_family(), 0) },
            family_index: pdevice.graphics_family(),
        };
        let transfer_queue = pdevice.transfer_family().map(|family| KilnQueue {
            handle: unsafe { handle.get_device_queue(family, 0) },
            family_index: family,
        });

        let swapchain_fn = ash::khr::swapchain::Device::new(&instance.handle, &handle);
        let debug_utils_fn =
            enable_validation.then(|| ash::ext::debug_utils::Device::new(&instance.handle, &handle));

        Ok(Self {
            handle,
            pdevice,
            graphics_queue,
            transfer_queue,
            swapchain_fn,
            debug_utils_fn,
        })
    }
}

// getters
impl KilnDevice {
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.handle
    }

    #[inline]
    pub fn pdevice(&self) -> &KilnPhysicalDevice {
        &self.pdevice
    }

    #[inline]
    pub fn graphics_queue(&self) -> &KilnQueue {
        &self.graphics_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> Option<&KilnQueue> {
        self.transfer_queue.as_ref()
    }
}

// tools
impl KilnDevice {
    /// 给 vk 对象设置 debug name，validation 关闭时什么都不做
    pub fn set_debug_name<T: DebugType>(&self, obj: &T, name: &str) {
        let Some(debug_utils_fn) = &self.debug_utils_fn else {
            return;
        };

        let name = format!("{}::{}", T::debug_type_name(), name);
        let name = CString::new(name).unwrap_or_default();
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(obj.vk_handle())
            .object_name(&name);
        unsafe {
            // 失败只影响调试体验，不影响渲染
            let _ = debug_utils_fn.set_debug_utils_object_name(&name_info);
        }
    }

    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.handle.device_wait_idle()? };
        Ok(())
    }
}

// destroy
impl KilnDevice {
    pub fn destroy(self) {
        log::info!("destroying device");
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}
