use ash::vk;

/// 资源在某一时刻的访问状态，同时决定 image 的 layout
///
/// 状态机只关心"上一次访问"和"下一次访问"：
/// 两次访问之间是否需要 barrier 由 [`ResourceState::needs_barrier`] 判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// 初始状态，内容无效
    Undefined,
    TransferSrc,
    TransferDst,
    /// vertex / index buffer 读取
    VertexInput,
    UniformRead,
    /// sampled image 或 storage buffer 的 shader 读取
    ShaderRead,
    ColorAttachment,
    DepthAttachment,
    Present,
}

impl ResourceState {
    /// sync2 的 stage + access
    pub fn stage_access(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            Self::Undefined => (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
            Self::TransferSrc => (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ),
            Self::TransferDst => (vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE),
            Self::VertexInput => (
                vk::PipelineStageFlags2::VERTEX_INPUT,
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ | vk::AccessFlags2::INDEX_READ,
            ),
            Self::UniformRead => (
                vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::UNIFORM_READ,
            ),
            Self::ShaderRead => (vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_READ),
            Self::ColorAttachment => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            Self::DepthAttachment => (
                vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            Self::Present => (vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE),
        }
    }

    /// image 处于该状态时的 layout；buffer 状态没有 layout 概念
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            // buffer-only 状态出现在 image 上属于调用方 bug，按 GENERAL 兜底
            Self::VertexInput | Self::UniformRead => vk::ImageLayout::GENERAL,
            Self::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Self::TransferDst | Self::ColorAttachment | Self::DepthAttachment)
    }

    /// read-after-read 可以省略 barrier；涉及写入或 layout 变化都不能省
    pub fn needs_barrier(from: Self, to: Self) -> bool {
        if from.is_write() || to.is_write() {
            return true;
        }
        from.image_layout() != to.image_layout()
    }
}

/// 构造整个 subresource range 的 image barrier
pub fn image_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    from: ResourceState,
    to: ResourceState,
) -> vk::ImageMemoryBarrier2<'static> {
    let (src_stage, src_access) = from.stage_access();
    let (dst_stage, dst_access) = to.stage_access();
    vk::ImageMemoryBarrier2::default()
        .image(image)
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
        .old_layout(from.image_layout())
        .new_layout(to.image_layout())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .level_count(vk::REMAINING_MIP_LEVELS)
                .layer_count(vk::REMAINING_ARRAY_LAYERS),
        )
}

pub fn buffer_barrier(
    buffer: vk::Buffer,
    offset: u64,
    size: u64,
    from: ResourceState,
    to: ResourceState,
) -> vk::BufferMemoryBarrier2<'static> {
    let (src_stage, src_access) = from.stage_access();
    let (dst_stage, dst_access) = to.stage_access();
    vk::BufferMemoryBarrier2::default()
        .buffer(buffer)
        .offset(offset)
        .size(size)
        .src_stage_mask(src_stage)
        .src_access_mask(src_access)
        .dst_stage_mask(dst_stage)
        .dst_access_mask(dst_access)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_read_skips_barrier() {
        assert!(!ResourceState::needs_barrier(ResourceState::ShaderRead, ResourceState::ShaderRead));
        assert!(!ResourceState::needs_barrier(ResourceState::VertexInput, ResourceState::UniformRead));
    }

    #[test]
    fn write_always_needs_barrier() {
        assert!(ResourceState::needs_barrier(ResourceState::TransferDst, ResourceState::TransferDst));
        assert!(ResourceState::needs_barrier(ResourceState::ShaderRead, ResourceState::ColorAttachment));
        assert!(ResourceState::needs_barrier(ResourceState::ColorAttachment, ResourceState::ShaderRead));
    }

    #[test]
    fn layout_transition_needs_barrier() {
        // 都是读，但 layout 不同
        assert!(ResourceState::needs_barrier(ResourceState::TransferSrc, ResourceState::ShaderRead));
    }

    #[test]
    fn undefined_to_transfer_dst() {
        let barrier = image_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            ResourceState::Undefined,
            ResourceState::TransferDst,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
    }
}
