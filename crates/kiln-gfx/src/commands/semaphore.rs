use std::rc::Rc;

use ash::vk;

use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

/// binary semaphore，用于 acquire/submit/present 之间的 GPU 侧同步
pub struct KilnSemaphore {
    handle: vk::Semaphore,
    device: Rc<KilnDevice>,
}

impl DebugType for KilnSemaphore {
    fn debug_type_name() -> &'static str {
        "KilnSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// new & init
impl KilnSemaphore {
    pub fn new(device: Rc<KilnDevice>, debug_name: &str) -> RenderResult<Self> {
        let semaphore_ci = vk::SemaphoreCreateInfo::default();
        let handle = unsafe { device.handle.create_semaphore(&semaphore_ci, None)? };

        let semaphore = Self { handle, device };
        semaphore.device.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }
}

// getter
impl KilnSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

// destroy
impl KilnSemaphore {
    pub fn destroy(mut self) {
        unsafe {
            self.device.handle.destroy_semaphore(self.handle, None);
        }
        self.handle = vk::Semaphore::null();
    }
}

impl Drop for KilnSemaphore {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::Semaphore::null(), "semaphore not destroyed");
    }
}
