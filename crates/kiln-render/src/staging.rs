//! 上传暂存区：按帧批量收集 copy，一次 flush 录制
//!
//! 每个 frame slot 一块可增长的 staging arena（上限 = 预算）。
//! `stage_*` 只把数据写进 arena 并登记 pending copy；
//! [`StagingManager::flush`] 把整帧的 barrier 和 copy 一次性录进 command buffer

use std::rc::Rc;

use ash::vk;
use kiln_gfx::allocator::KilnAllocator;
use kiln_gfx::commands::barrier::{self, ResourceState};
use kiln_gfx::commands::command_buffer::KilnCommandBuffer;
use kiln_gfx::commands::command_pool::KilnCommandPool;
use kiln_gfx::commands::fence::KilnFence;
use kiln_gfx::commands::submit_info::KilnSubmitInfo;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::foundation::device::KilnDevice;
use kiln_gfx::resources::buffer::{KilnBuffer, KilnBufferDesc};

use crate::frame::FIF_COUNT;
use crate::handles::{BufferHandle, ImageHandle};
use crate::registry::ResourceRegistry;

/// copy 命令要求的最小对齐
const STAGING_ALIGN: u64 = 16;
/// arena 的初始容量，不够时翻倍增长直到预算上限
const INITIAL_ARENA_SIZE: u64 = 1 << 20;

/// 上传的完成凭证
///
/// 上传跟随所在帧提交；该帧的 fence 被等待过之后数据保证在 device 侧就绪
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    frame_id: u64,
}

impl UploadTicket {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// `retired_frames` 来自调度器的 retired_frame_count：帧号小于它的帧
    /// 已经等过 fence。只看帧号推进不行，帧号先于 fence 等待被推进
    #[inline]
    pub fn is_complete(&self, retired_frames: u64) -> bool {
        retired_frames > self.frame_id
    }
}

/// 线性分配游标，只有 offset 推进，没有单独释放
#[derive(Debug)]
pub(crate) struct StagingCursor {
    capacity: u64,
    offset: u64,
}

impl StagingCursor {
    pub(crate) fn new(capacity: u64) -> Self {
        Self { capacity, offset: 0 }
    }

    /// 返回分配到的 offset；容量不足返回 None。
    /// 刚好用完容量是合法的
    pub(crate) fn alloc(&mut self, size: u64, align: u64) -> Option<u64> {
        let aligned = self.offset.next_multiple_of(align);
        let end = aligned.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        self.offset = end;
        Some(aligned)
    }

    pub(crate) fn reset(&mut self) {
        self.offset = 0;
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }
}

enum CopyTarget {
    Buffer { dst: BufferHandle, dst_offset: u64 },
    Image { dst: ImageHandle },
}

struct PendingCopy {
    /// 登记时 arena 可能随后增长，这里记下当时的 buffer handle
    src_buffer: vk::Buffer,
    src_offset: u64,
    size: u64,
    target: CopyTarget,
}

struct StagingSlot {
    arena: KilnBuffer,
    cursor: StagingCursor,
    /// 增长时换下来的旧 arena，本 slot 下一轮 begin 时销毁
    retired_arenas: Vec<KilnBuffer>,
    pending: Vec<PendingCopy>,
}

/// 按 frame slot 轮转的上传管理器
///
/// 不接触任何 queue：copy 只录进调用方给的 command buffer，
/// 由哪个 queue 提交是调度器的事
pub struct StagingManager {
    slots: Vec<StagingSlot>,
    current_slot: usize,
    current_frame: u64,
    budget: u64,

    device: Rc<KilnDevice>,
    allocator: Rc<KilnAllocator>,
}

// new & init
impl StagingManager {
    /// `budget` 是单次上传请求的上限，也是单个 arena 的容量上限
    pub fn new(device: Rc<KilnDevice>, allocator: Rc<KilnAllocator>, budget: u64) -> RenderResult<Self> {
        let initial = INITIAL_ARENA_SIZE.min(budget);
        let slots = (0..FIF_COUNT)
            .map(|slot| {
                let arena = KilnBuffer::new_with_alignment(
                    &device,
                    allocator.clone(),
                    KilnBufferDesc::staging(initial),
                    STAGING_ALIGN,
                    &format!("staging-{slot}"),
                )?;
                Ok(StagingSlot {
                    arena,
                    cursor: StagingCursor::new(initial),
                    retired_arenas: vec![],
                    pending: vec![],
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self {
            slots,
            current_slot: 0,
            current_frame: 0,
            budget,
            device,
            allocator,
        })
    }
}

// update
impl StagingManager {
    /// 切到指定 slot 并回收它的空间；调用方保证该 slot 的上一次提交已执行完
    pub fn begin_frame(&mut self, slot: usize, frame_id: u64) {
        self.current_slot = slot;
        self.current_frame = frame_id;

        let slot = &mut self.slots[slot];
        if !slot.pending.is_empty() {
            // 整帧被丢弃时，没 flush 的上传随帧一起作废
            log::debug!("dropping {} unflushed staged uploads", slot.pending.len());
            slot.pending.clear();
        }
        slot.cursor.reset();
        for arena in slot.retired_arenas.drain(..) {
            arena.destroy();
        }
    }

    /// 把 `data` 写入暂存区并登记到 `dst` 的 copy，真正的录制发生在 flush
    pub fn stage_buffer_upload(
        &mut self,
        registry: &ResourceRegistry,
        dst: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> RenderResult<UploadTicket> {
        // 提前解引用，stale 的句柄在登记时就报出来
        registry.buffer(dst)?;

        let src_offset = self.stage_bytes(data)?;
        let slot = &mut self.slots[self.current_slot];
        slot.pending.push(PendingCopy {
            src_buffer: slot.arena.handle(),
            src_offset,
            size: data.len() as u64,
            target: CopyTarget::Buffer { dst, dst_offset },
        });
        Ok(UploadTicket { frame_id: self.current_frame })
    }

    /// 整张 2D image 的 mip 0 上传
    pub fn stage_image_upload(
        &mut self,
        registry: &ResourceRegistry,
        dst: ImageHandle,
        data: &[u8],
    ) -> RenderResult<UploadTicket> {
        registry.image(dst)?;

        let src_offset = self.stage_bytes(data)?;
        let slot = &mut self.slots[self.current_slot];
        slot.pending.push(PendingCopy {
            src_buffer: slot.arena.handle(),
            src_offset,
            size: data.len() as u64,
            target: CopyTarget::Image { dst },
        });
        Ok(UploadTicket { frame_id: self.current_frame })
    }

    /// 写入 arena，必要时增长；单次请求超预算直接拒绝
    fn stage_bytes(&mut self, data: &[u8]) -> RenderResult<u64> {
        let size = data.len() as u64;
        if size > self.budget {
            return Err(RenderError::OutOfStagingMemory {
                requested: size,
                budget: self.budget,
            });
        }

        let slot = &mut self.slots[self.current_slot];
        let src_offset = match slot.cursor.alloc(size, STAGING_ALIGN) {
            Some(offset) => offset,
            None => {
                // 翻倍增长；旧 arena 里已登记的 copy 还引用它，退休到下一轮再销毁
                let new_capacity = (slot.cursor.capacity() * 2).max(size).min(self.budget);
                let new_arena = KilnBuffer::new_with_alignment(
                    &self.device,
                    self.allocator.clone(),
                    KilnBufferDesc::staging(new_capacity),
                    STAGING_ALIGN,
                    &format!("staging-{}-grown", self.current_slot),
                )?;
                log::debug!("staging arena grown to {new_capacity} bytes");

                let old_arena = std::mem::replace(&mut slot.arena, new_arena);
                slot.retired_arenas.push(old_arena);
                slot.cursor = StagingCursor::new(new_capacity);
                slot.cursor.alloc(size, STAGING_ALIGN).ok_or(RenderError::OutOfStagingMemory {
                    requested: size,
                    budget: self.budget,
                })?
            }
        };
        slot.arena.write_bytes(src_offset, data)?;
        Ok(src_offset)
    }

    /// 把本帧积累的上传录进 `cmd`：一组 pre-barrier + 全部 copy
    ///
    /// 目标资源停留在 TransferDst，下一次被 draw 引用时由 recorder 转出去
    pub fn flush(&mut self, cmd: &KilnCommandBuffer, registry: &mut ResourceRegistry) -> RenderResult<()> {
        let slot = &mut self.slots[self.current_slot];
        if slot.pending.is_empty() {
            return Ok(());
        }

        // 同一个资源多次上传只需要一个 barrier，状态随写随查
        let mut buffer_barriers = vec![];
        let mut image_barriers = vec![];
        for copy in &slot.pending {
            match &copy.target {
                CopyTarget::Buffer { dst, .. } => {
                    let from = registry.buffer_state(*dst)?;
                    if ResourceState::needs_barrier(from, ResourceState::TransferDst) {
                        buffer_barriers.push(barrier::buffer_barrier(
                            registry.buffer(*dst)?.handle(),
                            0,
                            vk::WHOLE_SIZE,
                            from,
                            ResourceState::TransferDst,
                        ));
                        registry.set_buffer_state(*dst, ResourceState::TransferDst)?;
                    }
                }
                CopyTarget::Image { dst } => {
                    let from = registry.image_state(*dst)?;
                    if ResourceState::needs_barrier(from, ResourceState::TransferDst) {
                        let image = registry.image(*dst)?;
                        image_barriers.push(barrier::image_barrier(
                            image.handle(),
                            image.aspect(),
                            from,
                            ResourceState::TransferDst,
                        ));
                        registry.set_image_state(*dst, ResourceState::TransferDst)?;
                    }
                }
            }
        }
        cmd.pipeline_barrier(&image_barriers, &buffer_barriers);

        for copy in slot.pending.drain(..) {
            match copy.target {
                CopyTarget::Buffer { dst, dst_offset } => {
                    cmd.copy_buffer(
                        copy.src_buffer,
                        registry.buffer(dst)?.handle(),
                        &[vk::BufferCopy {
                            src_offset: copy.src_offset,
                            dst_offset,
                            size: copy.size,
                        }],
                    );
                }
                CopyTarget::Image { dst } => {
                    let image = registry.image(dst)?;
                    cmd.copy_buffer_to_image(
                        copy.src_buffer,
                        image.handle(),
                        &[vk::BufferImageCopy::default()
                            .buffer_offset(copy.src_offset)
                            .image_subresource(
                                vk::ImageSubresourceLayers::default()
                                    .aspect_mask(image.aspect())
                                    .layer_count(1),
                            )
                            .image_extent(vk::Extent3D {
                                width: image.extent().width,
                                height: image.extent().height,
                                depth: 1,
                            })],
                    );
                }
            }
        }
        Ok(())
    }
}

// destroy
impl StagingManager {
    pub fn destroy(self) {
        for slot in self.slots {
            slot.arena.destroy();
            for arena in slot.retired_arenas {
                arena.destroy();
            }
        }
    }
}

/// 同步回读一个 buffer 的全部内容，用于截帧和上传校验
///
/// 单独建 pool / fence 走一次 one-time submit，等 GPU 完成后从
/// host-visible 暂存区里读出来。会阻塞到 copy 完成，不要在帧循环里调用
pub fn read_back_buffer(
    device: &Rc<KilnDevice>,
    allocator: &Rc<KilnAllocator>,
    registry: &mut ResourceRegistry,
    src: BufferHandle,
) -> RenderResult<Vec<u8>> {
    let size = registry.buffer(src)?.size();

    let pool = KilnCommandPool::new(
        device.clone(),
        device.graphics_queue().family_index(),
        "readback",
    )?;
    let fence = match KilnFence::new(device.clone(), false, "readback") {
        Ok(fence) => fence,
        Err(e) => {
            pool.destroy();
            return Err(e);
        }
    };
    let mut readback = match KilnBuffer::new(
        device,
        allocator.clone(),
        KilnBufferDesc::readback(size),
        "readback",
    ) {
        Ok(buffer) => buffer,
        Err(e) => {
            fence.destroy();
            pool.destroy();
            return Err(e);
        }
    };

    let result = record_readback(device, registry, &pool, &fence, &mut readback, src, size);

    readback.destroy();
    fence.destroy();
    pool.destroy();
    result
}

fn record_readback(
    device: &Rc<KilnDevice>,
    registry: &mut ResourceRegistry,
    pool: &KilnCommandPool,
    fence: &KilnFence,
    readback: &mut KilnBuffer,
    src: BufferHandle,
    size: u64,
) -> RenderResult<Vec<u8>> {
    let cmd = pool.alloc_command_buffer("readback")?;
    cmd.begin()?;

    let from = registry.buffer_state(src)?;
    let src_buffer = registry.buffer(src)?;
    if ResourceState::needs_barrier(from, ResourceState::TransferSrc) {
        cmd.pipeline_barrier(
            &[],
            &[barrier::buffer_barrier(
                src_buffer.handle(),
                0,
                vk::WHOLE_SIZE,
                from,
                ResourceState::TransferSrc,
            )],
        );
    }
    cmd.copy_buffer(
        src_buffer.handle(),
        readback.handle(),
        &[vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        }],
    );
    cmd.end()?;
    registry.set_buffer_state(src, ResourceState::TransferSrc)?;

    KilnSubmitInfo::new()
        .command_buffer(&cmd)
        .submit(device, device.graphics_queue(), Some(fence))?;
    fence.wait()?;

    let ptr = readback.map()?;
    let mut bytes = vec![0u8; size as usize];
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, bytes.as_mut_ptr(), size as usize);
    }
    readback.unmap();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_exact_budget_succeeds() {
        let mut cursor = StagingCursor::new(64);
        assert_eq!(cursor.alloc(64, 16), Some(0));
        // 容量已经用完
        assert_eq!(cursor.alloc(1, 1), None);
    }

    #[test]
    fn cursor_one_byte_over_fails() {
        let mut cursor = StagingCursor::new(64);
        assert_eq!(cursor.alloc(65, 16), None);
        // 失败的分配不消耗空间
        assert_eq!(cursor.alloc(64, 16), Some(0));
    }

    #[test]
    fn cursor_aligns_offsets() {
        let mut cursor = StagingCursor::new(256);
        assert_eq!(cursor.alloc(10, 16), Some(0));
        assert_eq!(cursor.alloc(10, 16), Some(16));
        assert_eq!(cursor.alloc(10, 16), Some(32));
    }

    #[test]
    fn cursor_alignment_can_push_over_capacity() {
        let mut cursor = StagingCursor::new(20);
        assert_eq!(cursor.alloc(10, 16), Some(0));
        // 对齐到 16 后只剩 4 字节
        assert_eq!(cursor.alloc(5, 16), None);
        assert_eq!(cursor.alloc(4, 16), Some(16));
    }

    #[test]
    fn cursor_reset_reclaims_everything() {
        let mut cursor = StagingCursor::new(32);
        assert_eq!(cursor.alloc(32, 16), Some(0));
        cursor.reset();
        assert_eq!(cursor.alloc(32, 16), Some(0));
    }

    #[test]
    fn ticket_completes_only_after_frame_retires() {
        let ticket = UploadTicket { frame_id: 7 };
        assert!(!ticket.is_complete(0));
        assert!(!ticket.is_complete(7));
        assert!(ticket.is_complete(8));
    }

    #[test]
    fn first_frame_ticket_waits_for_fence_backed_retirement() {
        // 第 0 帧的上传在一个 fence 都没等过时绝不能报完成，
        // 哪怕帧号已经越过了整组 frames-in-flight
        let ticket = UploadTicket { frame_id: 0 };
        assert!(!ticket.is_complete(0));
        assert!(ticket.is_complete(1));
    }
}
