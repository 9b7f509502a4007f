use ash::vk;

use crate::commands::command_buffer::KilnCommandBuffer;
use crate::commands::fence::KilnFence;
use crate::commands::semaphore::KilnSemaphore;
use crate::error::RenderResult;
use crate::foundation::device::KilnDevice;
use crate::foundation::queue::KilnQueue;

/// sync2 提交参数的积累式 builder
///
/// 先收集 wait / signal / command buffer，最后一次性 submit
#[derive(Default)]
pub struct KilnSubmitInfo {
    wait_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    signal_infos: Vec<vk::SemaphoreSubmitInfo<'static>>,
    command_buffer_infos: Vec<vk::CommandBufferSubmitInfo<'static>>,
}

impl KilnSubmitInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait(mut self, semaphore: &KilnSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.wait_infos
            .push(vk::SemaphoreSubmitInfo::default().semaphore(semaphore.handle()).stage_mask(stage));
        self
    }

    pub fn signal(mut self, semaphore: &KilnSemaphore, stage: vk::PipelineStageFlags2) -> Self {
        self.signal_infos
            .push(vk::SemaphoreSubmitInfo::default().semaphore(semaphore.handle()).stage_mask(stage));
        self
    }

    pub fn command_buffer(mut self, cmd: &KilnCommandBuffer) -> Self {
        self.command_buffer_infos
            .push(vk::CommandBufferSubmitInfo::default().command_buffer(cmd.handle()));
        self
    }

    /// fence 在所有 command buffer 执行完后被 signal
    pub fn submit(&self, device: &KilnDevice, queue: &KilnQueue, fence: Option<&KilnFence>) -> RenderResult<()> {
        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&self.wait_infos)
            .signal_semaphore_infos(&self.signal_infos)
            .command_buffer_infos(&self.command_buffer_infos);

        let fence = fence.map_or(vk::Fence::null(), KilnFence::handle);
        unsafe {
            device.handle().queue_submit2(queue.handle(), std::slice::from_ref(&submit_info), fence)?;
        }
        Ok(())
    }
}
