use std::cell::Cell;

use ash::vk;
use vk_mem::Alloc;

use crate::error::{RenderError, RenderResult};
use crate::foundation::device::KilnDevice;
use crate::foundation::instance::KilnInstance;

/// 内存位置的意图，映射到 VMA 的 usage + flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KilnMemoryHint {
    /// device local，不可 map
    DeviceLocal,
    /// host 写、device 读，顺序写入
    Upload,
    /// device 写、host 读
    Readback,
}

impl KilnMemoryHint {
    fn allocation_ci(self) -> vk_mem::AllocationCreateInfo {
        let (usage, flags) = match self {
            Self::DeviceLocal => (vk_mem::MemoryUsage::AutoPreferDevice, vk_mem::AllocationCreateFlags::empty()),
            Self::Upload => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ),
            Self::Readback => (
                vk_mem::MemoryUsage::AutoPreferHost,
                vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ),
        };
        vk_mem::AllocationCreateInfo {
            usage,
            flags,
            ..Default::default()
        }
    }

    #[inline]
    fn host_visible(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

/// buffer 以及它的显存归属
///
/// 只能通过 [`KilnAllocator`] 创建和销毁，调用方不要自行 destroy handle
pub struct KilnBufferAllocation {
    pub(crate) handle: vk::Buffer,
    pub(crate) allocation: vk_mem::Allocation,
    size: u64,
    host_visible: bool,
}

impl KilnBufferAllocation {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn host_visible(&self) -> bool {
        self.host_visible
    }
}

pub struct KilnImageAllocation {
    pub(crate) handle: vk::Image,
    pub(crate) allocation: vk_mem::Allocation,
}

impl KilnImageAllocation {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }
}

/// VMA 的薄封装，是显存的唯一出入口
///
/// 自带存活台账：每次分配计数 +1，销毁 -1，
/// 关闭前由上层调用 [`Self::assert_no_leaks`] 把泄漏暴露出来
pub struct KilnAllocator {
    inner: vk_mem::Allocator,

    live_buffers: Cell<usize>,
    live_images: Cell<usize>,
}

// new & init
impl KilnAllocator {
    pub fn new(instance: &KilnInstance, device: &KilnDevice) -> RenderResult<Self> {
        let mut allocator_ci =
            vk_mem::AllocatorCreateInfo::new(&instance.handle, &device.handle, device.pdevice.handle);
        allocator_ci.vulkan_api_version = vk::API_VERSION_1_3;

        let inner = unsafe { vk_mem::Allocator::new(allocator_ci)? };
        Ok(Self {
            inner,
            live_buffers: Cell::new(0),
            live_images: Cell::new(0),
        })
    }
}

// buffer
impl KilnAllocator {
    pub fn create_buffer(
        &self,
        buffer_ci: &vk::BufferCreateInfo,
        hint: KilnMemoryHint,
    ) -> RenderResult<KilnBufferAllocation> {
        let (handle, allocation) = unsafe { self.inner.create_buffer(buffer_ci, &hint.allocation_ci())? };
        self.live_buffers.set(self.live_buffers.get() + 1);
        Ok(KilnBufferAllocation {
            handle,
            allocation,
            size: buffer_ci.size,
            host_visible: hint.host_visible(),
        })
    }

    /// staging 等场景需要显式对齐
    pub fn create_buffer_with_alignment(
        &self,
        buffer_ci: &vk::BufferCreateInfo,
        hint: KilnMemoryHint,
        min_alignment: u64,
    ) -> RenderResult<KilnBufferAllocation> {
        let (handle, allocation) = unsafe {
            self.inner.create_buffer_with_alignment(buffer_ci, &hint.allocation_ci(), min_alignment)?
        };
        self.live_buffers.set(self.live_buffers.get() + 1);
        Ok(KilnBufferAllocation {
            handle,
            allocation,
            size: buffer_ci.size,
            host_visible: hint.host_visible(),
        })
    }

    pub fn destroy_buffer(&self, mut buffer: KilnBufferAllocation) {
        unsafe {
            self.inner.destroy_buffer(buffer.handle, &mut buffer.allocation);
        }
        self.live_buffers.set(self.live_buffers.get() - 1);
    }

    /// map 只对 host-visible 的分配有效
    pub fn map(&self, buffer: &mut KilnBufferAllocation) -> RenderResult<*mut u8> {
        if !buffer.host_visible {
            return Err(RenderError::InvalidAccess);
        }
        let ptr = unsafe { self.inner.map_memory(&mut buffer.allocation)? };
        Ok(ptr)
    }

    pub fn unmap(&self, buffer: &mut KilnBufferAllocation) {
        unsafe {
            self.inner.unmap_memory(&mut buffer.allocation);
        }
    }

    /// 非 coherent 内存写入后需要 flush；VMA 对 coherent 内存会自动跳过
    pub fn flush(&self, buffer: &KilnBufferAllocation, offset: u64, size: u64) -> RenderResult<()> {
        self.inner.flush_allocation(&buffer.allocation, offset, size)?;
        Ok(())
    }
}

// image
impl KilnAllocator {
    pub fn create_image(&self, image_ci: &vk::ImageCreateInfo) -> RenderResult<KilnImageAllocation> {
        let alloc_ci = KilnMemoryHint::DeviceLocal.allocation_ci();
        let (handle, allocation) = unsafe { self.inner.create_image(image_ci, &alloc_ci)? };
        self.live_images.set(self.live_images.get() + 1);
        Ok(KilnImageAllocation { handle, allocation })
    }

    pub fn destroy_image(&self, mut image: KilnImageAllocation) {
        unsafe {
            self.inner.destroy_image(image.handle, &mut image.allocation);
        }
        self.live_images.set(self.live_images.get() - 1);
    }
}

// tools
impl KilnAllocator {
    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.get()
    }

    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.live_images.get()
    }

    /// 关闭流程的最后一步调用；泄漏在 debug 下直接 panic
    pub fn assert_no_leaks(&self) {
        let buffers = self.live_buffers.get();
        let images = self.live_images.get();
        if buffers != 0 || images != 0 {
            log::error!("allocator leak: {buffers} buffers, {images} images still alive");
        }
        debug_assert!(buffers == 0 && images == 0, "allocator leak: {buffers} buffers, {images} images");
    }

    pub fn destroy(self) {
        self.assert_no_leaks();
        log::info!("destroying allocator");
        // vk_mem::Allocator 在 drop 中销毁
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_hint_host_visibility() {
        assert!(!KilnMemoryHint::DeviceLocal.host_visible());
        assert!(KilnMemoryHint::Upload.host_visible());
        assert!(KilnMemoryHint::Readback.host_visible());
    }

    #[test]
    fn upload_hint_is_sequential_write() {
        let ci = KilnMemoryHint::Upload.allocation_ci();
        assert!(ci.flags.contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE));
    }
}
