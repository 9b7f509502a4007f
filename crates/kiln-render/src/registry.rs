//! 资源注册表：句柄分配、状态跟踪与延迟销毁

use std::collections::VecDeque;
use std::rc::Rc;

use kiln_gfx::allocator::KilnAllocator;
use kiln_gfx::commands::barrier::ResourceState;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::foundation::device::KilnDevice;
use kiln_gfx::resources::buffer::{KilnBuffer, KilnBufferDesc};
use kiln_gfx::resources::image::{KilnImage, KilnImageDesc};
use kiln_gfx::resources::sampler::{KilnSampler, KilnSamplerDesc};
use slotmap::SlotMap;

use crate::frame::FIF_COUNT;
use crate::handles::{BufferHandle, ImageHandle, SamplerHandle};

/// 延迟回收队列：元素在退休满 `lag` 帧后才真正销毁
///
/// 退休的那一帧可能仍有 in-flight 的 command buffer 引用该资源，
/// 等 GPU 把这一帧消化完（`lag` = frames-in-flight 数）才能释放
pub(crate) struct RetireQueue<T> {
    pending: VecDeque<(u64, T)>,
}

impl<T> RetireQueue<T> {
    pub(crate) fn new() -> Self {
        Self { pending: VecDeque::new() }
    }

    pub(crate) fn push(&mut self, retired_at: u64, item: T) {
        debug_assert!(self.pending.back().map_or(true, |(f, _)| *f <= retired_at));
        self.pending.push_back((retired_at, item));
    }

    /// 取出所有可以安全销毁的元素；队列按帧号递增，遇到未就绪的即可停止
    pub(crate) fn drain_ready(&mut self, current_frame: u64, lag: u64) -> Vec<T> {
        let mut ready = vec![];
        while let Some((retired_at, _)) = self.pending.front() {
            if retired_at + lag > current_frame {
                break;
            }
            ready.push(self.pending.pop_front().unwrap().1);
        }
        ready
    }

    pub(crate) fn drain_all(&mut self) -> Vec<T> {
        self.pending.drain(..).map(|(_, item)| item).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

struct BufferEntry {
    buffer: KilnBuffer,
    state: ResourceState,
}

struct ImageEntry {
    image: KilnImage,
    state: ResourceState,
}

/// 所有 GPU 资源的唯一注册表
///
/// - 对外只暴露 [`BufferHandle`] 等弱句柄，销毁后的句柄解引用报 `StaleHandle`
/// - 销毁是延迟的：句柄立即失效，底层对象等 in-flight 帧消化完再释放
pub struct ResourceRegistry {
    buffers: SlotMap<BufferHandle, BufferEntry>,
    images: SlotMap<ImageHandle, ImageEntry>,
    samplers: SlotMap<SamplerHandle, KilnSampler>,

    retired_buffers: RetireQueue<KilnBuffer>,
    retired_images: RetireQueue<KilnImage>,
    retired_samplers: RetireQueue<KilnSampler>,

    device: Rc<KilnDevice>,
    allocator: Rc<KilnAllocator>,
    destroyed: bool,
}

// new & init
impl ResourceRegistry {
    pub fn new(device: Rc<KilnDevice>, allocator: Rc<KilnAllocator>) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            retired_buffers: RetireQueue::new(),
            retired_images: RetireQueue::new(),
            retired_samplers: RetireQueue::new(),
            device,
            allocator,
            destroyed: false,
        }
    }
}

// create
impl ResourceRegistry {
    pub fn create_buffer(&mut self, desc: KilnBufferDesc, debug_name: &str) -> RenderResult<BufferHandle> {
        let buffer = KilnBuffer::new(&self.device, self.allocator.clone(), desc, debug_name)?;
        Ok(self.buffers.insert(BufferEntry {
            buffer,
            state: ResourceState::Undefined,
        }))
    }

    pub fn create_image(&mut self, desc: KilnImageDesc, debug_name: &str) -> RenderResult<ImageHandle> {
        let image = KilnImage::new(self.device.clone(), self.allocator.clone(), desc, debug_name)?;
        Ok(self.images.insert(ImageEntry {
            image,
            state: ResourceState::Undefined,
        }))
    }

    pub fn create_sampler(&mut self, desc: KilnSamplerDesc, debug_name: &str) -> RenderResult<SamplerHandle> {
        let sampler = KilnSampler::new(self.device.clone(), desc, debug_name)?;
        Ok(self.samplers.insert(sampler))
    }
}

// resolve
impl ResourceRegistry {
    pub fn buffer(&self, handle: BufferHandle) -> RenderResult<&KilnBuffer> {
        self.buffers
            .get(handle)
            .map(|entry| &entry.buffer)
            .ok_or(RenderError::StaleHandle { kind: "buffer" })
    }

    pub fn buffer_mut(&mut self, handle: BufferHandle) -> RenderResult<&mut KilnBuffer> {
        self.buffers
            .get_mut(handle)
            .map(|entry| &mut entry.buffer)
            .ok_or(RenderError::StaleHandle { kind: "buffer" })
    }

    pub fn image(&self, handle: ImageHandle) -> RenderResult<&KilnImage> {
        self.images
            .get(handle)
            .map(|entry| &entry.image)
            .ok_or(RenderError::StaleHandle { kind: "image" })
    }

    pub fn sampler(&self, handle: SamplerHandle) -> RenderResult<&KilnSampler> {
        self.samplers.get(handle).ok_or(RenderError::StaleHandle { kind: "sampler" })
    }

    #[inline]
    pub fn contains_buffer(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(handle)
    }

    #[inline]
    pub fn contains_image(&self, handle: ImageHandle) -> bool {
        self.images.contains_key(handle)
    }
}

// state tracking
impl ResourceRegistry {
    pub fn buffer_state(&self, handle: BufferHandle) -> RenderResult<ResourceState> {
        self.buffers
            .get(handle)
            .map(|entry| entry.state)
            .ok_or(RenderError::StaleHandle { kind: "buffer" })
    }

    pub fn set_buffer_state(&mut self, handle: BufferHandle, state: ResourceState) -> RenderResult<()> {
        let entry = self.buffers.get_mut(handle).ok_or(RenderError::StaleHandle { kind: "buffer" })?;
        entry.state = state;
        Ok(())
    }

    pub fn image_state(&self, handle: ImageHandle) -> RenderResult<ResourceState> {
        self.images
            .get(handle)
            .map(|entry| entry.state)
            .ok_or(RenderError::StaleHandle { kind: "image" })
    }

    pub fn set_image_state(&mut self, handle: ImageHandle, state: ResourceState) -> RenderResult<()> {
        let entry = self.images.get_mut(handle).ok_or(RenderError::StaleHandle { kind: "image" })?;
        entry.state = state;
        Ok(())
    }
}

// retire & sweep
impl ResourceRegistry {
    /// 句柄立即失效；底层对象进入退休队列
    pub fn retire_buffer(&mut self, handle: BufferHandle, current_frame: u64) -> RenderResult<()> {
        let entry = self.buffers.remove(handle).ok_or(RenderError::StaleHandle { kind: "buffer" })?;
        self.retired_buffers.push(current_frame, entry.buffer);
        Ok(())
    }

    pub fn retire_image(&mut self, handle: ImageHandle, current_frame: u64) -> RenderResult<()> {
        let entry = self.images.remove(handle).ok_or(RenderError::StaleHandle { kind: "image" })?;
        self.retired_images.push(current_frame, entry.image);
        Ok(())
    }

    pub fn retire_sampler(&mut self, handle: SamplerHandle, current_frame: u64) -> RenderResult<()> {
        let sampler = self.samplers.remove(handle).ok_or(RenderError::StaleHandle { kind: "sampler" })?;
        self.retired_samplers.push(current_frame, sampler);
        Ok(())
    }

    /// 确认 GPU 不再引用时的销毁路径，比如 shutdown 前或资源从未被提交过
    pub fn destroy_buffer_immediate(&mut self, handle: BufferHandle) -> RenderResult<()> {
        let entry = self.buffers.remove(handle).ok_or(RenderError::StaleHandle { kind: "buffer" })?;
        entry.buffer.destroy();
        Ok(())
    }

    pub fn destroy_image_immediate(&mut self, handle: ImageHandle) -> RenderResult<()> {
        let entry = self.images.remove(handle).ok_or(RenderError::StaleHandle { kind: "image" })?;
        entry.image.destroy();
        Ok(())
    }

    /// 每帧开头调用，释放已经退休满 [`FIF_COUNT`] 帧的资源
    pub fn sweep(&mut self, current_frame: u64) {
        for buffer in self.retired_buffers.drain_ready(current_frame, FIF_COUNT as u64) {
            buffer.destroy();
        }
        for image in self.retired_images.drain_ready(current_frame, FIF_COUNT as u64) {
            image.destroy();
        }
        for sampler in self.retired_samplers.drain_ready(current_frame, FIF_COUNT as u64) {
            sampler.destroy();
        }
    }
}

// destroy
impl ResourceRegistry {
    #[inline]
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn pending_destroy_count(&self) -> usize {
        self.retired_buffers.len() + self.retired_images.len() + self.retired_samplers.len()
    }

    /// 调用前必须 `device_wait_idle`
    ///
    /// 仍然存活的资源说明调用方忘了释放，记一条警告后代为销毁
    pub fn destroy(mut self) {
        let leaked = self.buffers.len() + self.images.len() + self.samplers.len();
        if leaked != 0 {
            log::warn!(
                "registry shutdown with {} live resources ({} buffers, {} images, {} samplers)",
                leaked,
                self.buffers.len(),
                self.images.len(),
                self.samplers.len()
            );
        }

        for (_, entry) in self.buffers.drain() {
            entry.buffer.destroy();
        }
        for (_, entry) in self.images.drain() {
            entry.image.destroy();
        }
        for (_, sampler) in self.samplers.drain() {
            sampler.destroy();
        }
        for buffer in self.retired_buffers.drain_all() {
            buffer.destroy();
        }
        for image in self.retired_images.drain_all() {
            image.destroy();
        }
        for sampler in self.retired_samplers.drain_all() {
            sampler.destroy();
        }
        self.destroyed = true;
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "registry not destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retire_queue_waits_full_lag() {
        let mut queue = RetireQueue::new();
        queue.push(10, "a");

        // 第 10 帧退休，lag=3，要到第 13 帧才能释放
        assert!(queue.drain_ready(10, 3).is_empty());
        assert!(queue.drain_ready(12, 3).is_empty());
        assert_eq!(queue.drain_ready(13, 3), vec!["a"]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn retire_queue_releases_in_order() {
        let mut queue = RetireQueue::new();
        queue.push(1, 100);
        queue.push(2, 200);
        queue.push(5, 300);

        assert_eq!(queue.drain_ready(4, 3), vec![100]);
        assert_eq!(queue.drain_ready(8, 3), vec![200, 300]);
    }

    #[test]
    fn retire_queue_drain_all() {
        let mut queue = RetireQueue::new();
        queue.push(1, 'x');
        queue.push(2, 'y');
        assert_eq!(queue.drain_all(), vec!['x', 'y']);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn stale_handle_resolve_fails_after_removal() {
        // resolve 路径和 ResourceRegistry::buffer 一样：slotmap get + StaleHandle
        let mut pool: SlotMap<BufferHandle, u32> = SlotMap::with_key();
        let handle = pool.insert(7);
        assert!(pool.get(handle).is_some());

        pool.remove(handle);
        let resolved = pool.get(handle).ok_or(RenderError::StaleHandle { kind: "buffer" });
        assert!(matches!(resolved, Err(RenderError::StaleHandle { kind: "buffer" })));
    }

    #[test]
    fn stale_handle_survives_slot_reuse() {
        // 同一个 slot 被新资源复用后，旧句柄的 generation 仍然失配
        let mut pool: SlotMap<BufferHandle, u32> = SlotMap::with_key();
        let old = pool.insert(1);
        pool.remove(old);

        let replacement = pool.insert(2);
        assert!(pool.get(old).is_none());
        assert_eq!(pool.get(replacement), Some(&2));
    }
}
