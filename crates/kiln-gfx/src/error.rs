use ash::vk;

use crate::commands::barrier::ResourceState;

/// Kiln 统一的错误类型
///
/// 可恢复与不可恢复的界限：
/// - `OutOfStagingMemory` / `OutOfDeviceMemory` 由调用方分块重试
/// - `SwapchainOutOfDate` 由 FrameScheduler 的 Rebuilding 流程处理
/// - `DeviceLost` 一路上抛，不做任何恢复
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("out of device memory")]
    OutOfDeviceMemory,

    #[error("staging request of {requested} bytes exceeds budget of {budget} bytes")]
    OutOfStagingMemory { requested: u64, budget: u64 },

    /// handle 的 generation 已经不匹配，资源已被销毁
    #[error("stale {kind} handle")]
    StaleHandle { kind: &'static str },

    /// 对非 host-visible 的 allocation 进行 map
    #[error("mapping a non host-visible allocation")]
    InvalidAccess,

    /// 录制 draw 时资源不处于声明的状态（仅 debug 校验）
    #[error("resource is in state {actual:?}, draw requires {expected:?}")]
    InvalidResourceState {
        expected: ResourceState,
        actual: ResourceState,
    },

    /// draw item 引用的资源数量超过 pipeline layout 的声明
    #[error("pipeline layout declares {declared} bindings, draw provides {provided}")]
    BindingMismatch { declared: usize, provided: usize },

    /// 只能在 begin_frame / end_frame 之间执行的操作在帧外被调用
    #[error("no frame in progress")]
    NoActiveFrame,

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("device lost")]
    DeviceLost,

    /// shader / pipeline cache 等磁盘读写失败
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl From<vk::Result> for RenderError {
    fn from(value: vk::Result) -> Self {
        match value {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => Self::OutOfDeviceMemory,
            other => Self::Vulkan(other),
        }
    }
}

impl RenderError {
    /// 该错误是否允许当前帧丢弃后继续运行
    #[inline]
    pub fn is_frame_recoverable(&self) -> bool {
        !matches!(self, Self::DeviceLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_result_mapping() {
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_OUT_OF_DATE_KHR),
            RenderError::SwapchainOutOfDate
        ));
        assert!(matches!(RenderError::from(vk::Result::ERROR_DEVICE_LOST), RenderError::DeviceLost));
        assert!(matches!(
            RenderError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            RenderError::OutOfDeviceMemory
        ));
        assert!(matches!(RenderError::from(vk::Result::TIMEOUT), RenderError::Vulkan(_)));
    }

    #[test]
    fn device_lost_is_not_frame_recoverable() {
        assert!(!RenderError::DeviceLost.is_frame_recoverable());
        assert!(RenderError::SwapchainOutOfDate.is_frame_recoverable());
        // API 误用只丢当前调用，不终止运行
        assert!(RenderError::NoActiveFrame.is_frame_recoverable());
    }
}
