use std::rc::Rc;

use ash::vk;

use crate::commands::command_buffer::KilnCommandBuffer;
use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

/// 每个 frame slot 一个 pool，整池 reset，不做单 buffer 复用
pub struct KilnCommandPool {
    handle: vk::CommandPool,
    queue_family_index: u32,
    device: Rc<KilnDevice>,
}

impl DebugType for KilnCommandPool {
    fn debug_type_name() -> &'static str {
        "KilnCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// new & init
impl KilnCommandPool {
    pub fn new(device: Rc<KilnDevice>, queue_family_index: u32, debug_name: &str) -> RenderResult<Self> {
        let pool_ci = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(queue_family_index);
        let handle = unsafe { device.handle.create_command_pool(&pool_ci, None)? };

        let pool = Self {
            handle,
            queue_family_index,
            device,
        };
        pool.device.set_debug_name(&pool, debug_name);
        Ok(pool)
    }
}

// getter
impl KilnCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

// tools
impl KilnCommandPool {
    pub fn alloc_command_buffer(&self, debug_name: &str) -> RenderResult<KilnCommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handle = unsafe { self.device.handle.allocate_command_buffers(&alloc_info)?[0] };

        let cmd = KilnCommandBuffer::new(self.device.clone(), handle);
        self.device.set_debug_name(&cmd, debug_name);
        Ok(cmd)
    }

    /// 归还本池分配出的所有 command buffer
    ///
    /// 调用前必须确保这些 buffer 已不在 GPU 上执行
    pub fn reset(&self) -> RenderResult<()> {
        unsafe {
            self.device.handle.reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())?;
        }
        Ok(())
    }
}

// destroy
impl KilnCommandPool {
    pub fn destroy(mut self) {
        unsafe {
            self.device.handle.destroy_command_pool(self.handle, None);
        }
        self.handle = vk::CommandPool::null();
    }
}

impl Drop for KilnCommandPool {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::CommandPool::null(), "command pool not destroyed");
    }
}
