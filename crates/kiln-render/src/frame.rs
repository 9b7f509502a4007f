//! 帧调度：frames-in-flight、per-slot 同步原语与阶段状态机

use std::rc::Rc;

use ash::vk;
use kiln_gfx::commands::command_buffer::KilnCommandBuffer;
use kiln_gfx::commands::command_pool::KilnCommandPool;
use kiln_gfx::commands::fence::KilnFence;
use kiln_gfx::commands::semaphore::KilnSemaphore;
use kiln_gfx::commands::submit_info::KilnSubmitInfo;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::foundation::device::KilnDevice;
use kiln_gfx::swapchain::surface::KilnSurface;
use kiln_gfx::swapchain::swapchain::KilnSwapchain;

use crate::registry::ResourceRegistry;
use crate::staging::StagingManager;

/// CPU 最多领先 GPU 的帧数
pub const FIF_COUNT: usize = 3;

/// frame slot 的可读标签，打 log 和 debug name 用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLabel {
    A,
    B,
    C,
}

impl FrameLabel {
    pub fn from_slot(slot: usize) -> Self {
        match slot % FIF_COUNT {
            0 => Self::A,
            1 => Self::B,
            _ => Self::C,
        }
    }
}

/// 帧阶段状态机
///
/// 正常循环：Idle → Retiring → Recording → Submitted → Idle。
/// acquire / present 报 out-of-date 时进入 Rebuilding，
/// 重建 swapchain 后回到 Idle。其余帧内错误整帧丢弃，回到 Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    /// 等待 slot 的 fence、回收退休资源
    Retiring,
    Recording,
    Submitted,
    Rebuilding,
}

impl FramePhase {
    pub fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Retiring)
                | (Self::Retiring, Self::Recording)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Idle)
                | (Self::Retiring, Self::Rebuilding)
                | (Self::Submitted, Self::Rebuilding)
                | (Self::Idle, Self::Rebuilding)
                | (Self::Rebuilding, Self::Idle)
        )
    }

    /// 帧内错误后的落点：out-of-date 进入重建流程，其余错误丢弃本帧回到 Idle，
    /// 调用方按 [`RenderError::is_frame_recoverable`] 决定要不要继续跑
    pub fn after_frame_error(e: &RenderError) -> Self {
        match e {
            RenderError::SwapchainOutOfDate => Self::Rebuilding,
            _ => Self::Idle,
        }
    }
}

/// begin 第 `frame_id` 帧等完 slot fence 之后，已确认退休的帧数量
fn retired_frames_after_wait(frame_id: u64) -> u64 {
    (frame_id + 1).saturating_sub(FIF_COUNT as u64)
}

struct FrameSlot {
    /// 该 slot 上一次提交的完成信号；创建时即 signaled，首帧不用等
    fence: KilnFence,
    /// fence 是否对应一次真正在途的提交；
    /// 提交失败被丢弃的帧不会把 fence 留在永不 signal 的状态
    submitted: bool,
    present_complete: KilnSemaphore,
    command_pool: KilnCommandPool,
}

/// 一帧的录制上下文，begin_frame 产出、end_frame 收回
pub struct FrameContext {
    pub frame_id: u64,
    pub slot: usize,
    pub image_index: u32,
    pub cmd: KilnCommandBuffer,
}

/// frames-in-flight 调度器
///
/// 同步原语的布局：
/// - fence、present_complete 按 frame slot 各一个
/// - render_complete 按 swapchain image 各一个（present 等的是它）
pub struct FrameScheduler {
    frame_id: u64,
    phase: FramePhase,
    /// 帧号小于该值的帧 GPU 侧已全部完成，upload ticket 以它为准
    retired_frames: u64,

    slots: Vec<FrameSlot>,
    render_complete: Vec<KilnSemaphore>,

    device: Rc<KilnDevice>,
}

// new & init
impl FrameScheduler {
    pub fn new(device: Rc<KilnDevice>, swapchain_image_count: usize) -> RenderResult<Self> {
        let slots = (0..FIF_COUNT)
            .map(|slot| {
                let label = FrameLabel::from_slot(slot);
                Ok(FrameSlot {
                    fence: KilnFence::new(device.clone(), true, &format!("frame-{label:?}"))?,
                    submitted: false,
                    present_complete: KilnSemaphore::new(
                        device.clone(),
                        &format!("present-complete-{label:?}"),
                    )?,
                    command_pool: KilnCommandPool::new(
                        device.clone(),
                        device.graphics_queue().family_index(),
                        &format!("frame-pool-{label:?}"),
                    )?,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let render_complete = Self::create_render_complete(&device, swapchain_image_count)?;

        Ok(Self {
            frame_id: 0,
            phase: FramePhase::Idle,
            retired_frames: 0,
            slots,
            render_complete,
            device,
        })
    }

    fn create_render_complete(
        device: &Rc<KilnDevice>,
        image_count: usize,
    ) -> RenderResult<Vec<KilnSemaphore>> {
        (0..image_count)
            .map(|idx| KilnSemaphore::new(device.clone(), &format!("render-complete-{idx}")))
            .collect()
    }
}

// getter
impl FrameScheduler {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        (self.frame_id % FIF_COUNT as u64) as usize
    }

    /// 帧号小于该值的帧，GPU 工作已由 fence 确认完成
    #[inline]
    pub fn retired_frame_count(&self) -> u64 {
        self.retired_frames
    }
}

// update
impl FrameScheduler {
    /// 开始一帧：等待 slot 空闲、回收资源、acquire swapchain image
    ///
    /// 返回 `SwapchainOutOfDate` 时进入 Rebuilding，
    /// 调用方处理完 [`Self::rebuild`] 后重新 begin；
    /// 其余错误丢弃本帧并回到 Idle
    pub fn begin_frame(
        &mut self,
        swapchain: &KilnSwapchain,
        registry: &mut ResourceRegistry,
        staging: &mut StagingManager,
    ) -> RenderResult<FrameContext> {
        debug_assert!(self.phase.can_transition(FramePhase::Retiring), "begin_frame in {:?}", self.phase);
        self.phase = FramePhase::Retiring;

        match self.wait_and_acquire(swapchain, registry, staging) {
            Ok(ctx) => {
                self.phase = FramePhase::Recording;
                Ok(ctx)
            }
            Err(e) => {
                self.phase = FramePhase::after_frame_error(&e);
                Err(e)
            }
        }
    }

    fn wait_and_acquire(
        &mut self,
        swapchain: &KilnSwapchain,
        registry: &mut ResourceRegistry,
        staging: &mut StagingManager,
    ) -> RenderResult<FrameContext> {
        let slot_index = self.current_slot();
        let slot = &mut self.slots[slot_index];

        // fence 的 reset 推迟到 submit 之前；没提交过的 slot 不等
        if slot.submitted {
            slot.fence.wait()?;
            slot.submitted = false;
        }
        // 上一个占用该 slot 的帧要么刚等完 fence，要么根本没提交过
        self.retired_frames = self.retired_frames.max(retired_frames_after_wait(self.frame_id));

        slot.command_pool.reset()?;
        registry.sweep(self.frame_id);
        staging.begin_frame(slot_index, self.frame_id);

        let image_index = swapchain.acquire_next_image(&slot.present_complete)?;

        let label = FrameLabel::from_slot(slot_index);
        let cmd = slot.command_pool.alloc_command_buffer(&format!("frame-{label:?}-{}", self.frame_id))?;
        cmd.begin()?;

        Ok(FrameContext {
            frame_id: self.frame_id,
            slot: slot_index,
            image_index,
            cmd,
        })
    }

    /// 结束一帧：提交并 present
    ///
    /// present 报 out-of-date 时返回 `SwapchainOutOfDate` 并进入 Rebuilding，
    /// 这一帧已经提交成功，fence 照常工作。提交阶段出错时整帧丢弃，
    /// 帧号照常推进，下一帧用下一个 slot
    pub fn end_frame(&mut self, swapchain: &KilnSwapchain, ctx: FrameContext) -> RenderResult<()> {
        debug_assert!(self.phase.can_transition(FramePhase::Submitted), "end_frame in {:?}", self.phase);
        debug_assert!(ctx.frame_id == self.frame_id, "frame context from another frame");

        let submit_result = self.submit(&ctx);
        self.frame_id += 1;
        if let Err(e) = submit_result {
            self.phase = FramePhase::after_frame_error(&e);
            return Err(e);
        }
        self.phase = FramePhase::Submitted;

        let render_complete = &self.render_complete[ctx.image_index as usize];
        match swapchain.present(self.device.graphics_queue().handle(), ctx.image_index, render_complete) {
            Ok(()) => {
                self.phase = FramePhase::Idle;
                Ok(())
            }
            Err(e) => {
                self.phase = FramePhase::after_frame_error(&e);
                Err(e)
            }
        }
    }

    fn submit(&mut self, ctx: &FrameContext) -> RenderResult<()> {
        ctx.cmd.end()?;

        let slot = &mut self.slots[ctx.slot];
        let render_complete = &self.render_complete[ctx.image_index as usize];

        slot.fence.reset()?;
        KilnSubmitInfo::new()
            .wait(&slot.present_complete, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .signal(render_complete, vk::PipelineStageFlags2::ALL_COMMANDS)
            .command_buffer(&ctx.cmd)
            .submit(&self.device, self.device.graphics_queue(), Some(&slot.fence))?;
        slot.submitted = true;
        Ok(())
    }

    /// 窗口 resize 或 out-of-date 后的重建
    pub fn rebuild(
        &mut self,
        swapchain: &mut KilnSwapchain,
        surface: &KilnSurface,
        extent: vk::Extent2D,
    ) -> RenderResult<()> {
        debug_assert!(
            matches!(self.phase, FramePhase::Rebuilding | FramePhase::Idle),
            "rebuild in {:?}",
            self.phase
        );

        self.device.wait_idle()?;
        // wait_idle 之后所有已提交的帧都退休了
        self.retired_frames = self.frame_id;
        swapchain.rebuild(surface, extent)?;

        // image 数量可能变化，render_complete 整组重建
        if self.render_complete.len() != swapchain.image_count() {
            for semaphore in self.render_complete.drain(..) {
                semaphore.destroy();
            }
            self.render_complete = Self::create_render_complete(&self.device, swapchain.image_count())?;
        }

        self.phase = FramePhase::Idle;
        Ok(())
    }
}

// destroy
impl FrameScheduler {
    /// 调用前必须 `device_wait_idle`
    pub fn destroy(self) {
        for slot in self.slots {
            slot.fence.destroy();
            slot.present_complete.destroy();
            slot.command_pool.destroy();
        }
        for semaphore in self.render_complete {
            semaphore.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_frame_cycle() {
        assert!(FramePhase::Idle.can_transition(FramePhase::Retiring));
        assert!(FramePhase::Retiring.can_transition(FramePhase::Recording));
        assert!(FramePhase::Recording.can_transition(FramePhase::Submitted));
        assert!(FramePhase::Submitted.can_transition(FramePhase::Idle));
    }

    #[test]
    fn rebuild_entered_from_acquire_and_present() {
        assert!(FramePhase::Retiring.can_transition(FramePhase::Rebuilding));
        assert!(FramePhase::Submitted.can_transition(FramePhase::Rebuilding));
        assert!(FramePhase::Rebuilding.can_transition(FramePhase::Idle));
    }

    #[test]
    fn no_double_begin_or_end() {
        assert!(!FramePhase::Recording.can_transition(FramePhase::Retiring));
        assert!(!FramePhase::Idle.can_transition(FramePhase::Submitted));
        assert!(!FramePhase::Rebuilding.can_transition(FramePhase::Recording));
    }

    #[test]
    fn slots_rotate_through_labels() {
        assert_eq!(FrameLabel::from_slot(0), FrameLabel::A);
        assert_eq!(FrameLabel::from_slot(1), FrameLabel::B);
        assert_eq!(FrameLabel::from_slot(2), FrameLabel::C);
        assert_eq!(FrameLabel::from_slot(3), FrameLabel::A);
    }

    #[test]
    fn dropped_frame_lands_on_idle_and_can_restart() {
        // 提交阶段的致命错误把整帧丢掉，下一帧可以正常 begin
        let phase = FramePhase::after_frame_error(&RenderError::Vulkan(
            vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        ));
        assert_eq!(phase, FramePhase::Idle);
        assert!(phase.can_transition(FramePhase::Retiring));

        assert_eq!(
            FramePhase::after_frame_error(&RenderError::DeviceLost),
            FramePhase::Idle
        );
        assert_eq!(
            FramePhase::after_frame_error(&RenderError::SwapchainOutOfDate),
            FramePhase::Rebuilding
        );
    }

    #[test]
    fn retirement_lags_frames_in_flight() {
        // begin 第 N 帧等完 fence，只能证明 N - FIF_COUNT 及更早的帧完成了
        assert_eq!(retired_frames_after_wait(0), 0);
        assert_eq!(retired_frames_after_wait(FIF_COUNT as u64 - 1), 0);
        assert_eq!(retired_frames_after_wait(FIF_COUNT as u64), 1);
        assert_eq!(retired_frames_after_wait(10), 11 - FIF_COUNT as u64);
    }
}
