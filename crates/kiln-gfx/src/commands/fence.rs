use std::rc::Rc;

use ash::vk;

use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

pub struct KilnFence {
    handle: vk::Fence,
    device: Rc<KilnDevice>,
}

impl DebugType for KilnFence {
    fn debug_type_name() -> &'static str {
        "KilnFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// new & init
impl KilnFence {
    pub fn new(device: Rc<KilnDevice>, signaled: bool, debug_name: &str) -> RenderResult<Self> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence_ci = vk::FenceCreateInfo::default().flags(flags);
        let handle = unsafe { device.handle.create_fence(&fence_ci, None)? };

        let fence = Self { handle, device };
        fence.device.set_debug_name(&fence, debug_name);
        Ok(fence)
    }
}

// getter
impl KilnFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }
}

// tools
impl KilnFence {
    /// 阻塞等待 fence，不做超时处理
    pub fn wait(&self) -> RenderResult<()> {
        unsafe {
            self.device.handle.wait_for_fences(std::slice::from_ref(&self.handle), true, u64::MAX)?;
        }
        Ok(())
    }

    pub fn reset(&self) -> RenderResult<()> {
        unsafe {
            self.device.handle.reset_fences(std::slice::from_ref(&self.handle))?;
        }
        Ok(())
    }
}

// destroy
impl KilnFence {
    pub fn destroy(mut self) {
        unsafe {
            self.device.handle.destroy_fence(self.handle, None);
        }
        self.handle = vk::Fence::null();
    }
}

impl Drop for KilnFence {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::Fence::null(), "fence not destroyed");
    }
}
