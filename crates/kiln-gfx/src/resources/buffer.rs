use std::rc::Rc;

use ash::vk;

use crate::allocator::{KilnAllocator, KilnBufferAllocation, KilnMemoryHint};
use crate::error::{RenderError, RenderResult};
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

#[derive(Clone)]
pub struct KilnBufferDesc {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub hint: KilnMemoryHint,
}

impl KilnBufferDesc {
    pub fn vertex(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            hint: KilnMemoryHint::DeviceLocal,
        }
    }

    pub fn index(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            hint: KilnMemoryHint::DeviceLocal,
        }
    }

    pub fn uniform(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::UNIFORM_BUFFER,
            hint: KilnMemoryHint::Upload,
        }
    }

    pub fn staging(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            hint: KilnMemoryHint::Upload,
        }
    }

    pub fn readback(size: u64) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            hint: KilnMemoryHint::Readback,
        }
    }
}

/// buffer 封装，显存来自 [`KilnAllocator`]
///
/// 必须显式 destroy；直接 drop 在 debug 下会 panic
pub struct KilnBuffer {
    allocation: Option<KilnBufferAllocation>,
    /// map 之后缓存指针，重复 map 不会二次调用 VMA
    mapped_ptr: Option<*mut u8>,

    desc: KilnBufferDesc,
    allocator: Rc<KilnAllocator>,
}

impl DebugType for KilnBuffer {
    fn debug_type_name() -> &'static str {
        "KilnBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle()
    }
}

// new & init
impl KilnBuffer {
    pub fn new(
        device: &KilnDevice,
        allocator: Rc<KilnAllocator>,
        desc: KilnBufferDesc,
        debug_name: &str,
    ) -> RenderResult<Self> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let allocation = allocator.create_buffer(&buffer_ci, desc.hint)?;

        let buffer = Self {
            allocation: Some(allocation),
            mapped_ptr: None,
            desc,
            allocator,
        };
        device.set_debug_name(&buffer, debug_name);
        Ok(buffer)
    }

    /// staging 场景，带最小对齐
    pub fn new_with_alignment(
        device: &KilnDevice,
        allocator: Rc<KilnAllocator>,
        desc: KilnBufferDesc,
        min_alignment: u64,
        debug_name: &str,
    ) -> RenderResult<Self> {
        let buffer_ci = vk::BufferCreateInfo::default().size(desc.size).usage(desc.usage);
        let allocation = allocator.create_buffer_with_alignment(&buffer_ci, desc.hint, min_alignment)?;

        let buffer = Self {
            allocation: Some(allocation),
            mapped_ptr: None,
            desc,
            allocator,
        };
        device.set_debug_name(&buffer, debug_name);
        Ok(buffer)
    }
}

// getter
impl KilnBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.allocation.as_ref().map_or(vk::Buffer::null(), KilnBufferAllocation::handle)
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    #[inline]
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.desc.usage
    }
}

// map & write
impl KilnBuffer {
    /// 非 host-visible 的 buffer 返回 [`RenderError::InvalidAccess`]
    pub fn map(&mut self) -> RenderResult<*mut u8> {
        if let Some(ptr) = self.mapped_ptr {
            return Ok(ptr);
        }
        let allocation = self.allocation.as_mut().ok_or(RenderError::InvalidAccess)?;
        let ptr = self.allocator.map(allocation)?;
        self.mapped_ptr = Some(ptr);
        Ok(ptr)
    }

    pub fn unmap(&mut self) {
        if self.mapped_ptr.take().is_some() {
            if let Some(allocation) = self.allocation.as_mut() {
                self.allocator.unmap(allocation);
            }
        }
    }

    /// map + memcpy + flush 一条龙，用于 uniform 之类的小数据
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> RenderResult<()> {
        debug_assert!(offset + data.len() as u64 <= self.desc.size);

        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        if let Some(allocation) = self.allocation.as_ref() {
            self.allocator.flush(allocation, offset, data.len() as u64)?;
        }
        Ok(())
    }
}

// destroy
impl KilnBuffer {
    pub fn destroy(mut self) {
        self.unmap();
        if let Some(allocation) = self.allocation.take() {
            self.allocator.destroy_buffer(allocation);
        }
    }
}

impl Drop for KilnBuffer {
    fn drop(&mut self) {
        debug_assert!(self.allocation.is_none(), "buffer not destroyed");
    }
}
