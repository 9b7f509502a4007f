use std::rc::Rc;

use ash::vk;

use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

/// primary command buffer
///
/// 生命周期由所属的 [`KilnCommandPool`] 管理：池整体 reset 时一并回收，
/// 因此自身没有 destroy
///
/// [`KilnCommandPool`]: crate::commands::command_pool::KilnCommandPool
pub struct KilnCommandBuffer {
    handle: vk::CommandBuffer,
    device: Rc<KilnDevice>,
}

impl DebugType for KilnCommandBuffer {
    fn debug_type_name() -> &'static str {
        "KilnCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl KilnCommandBuffer {
    pub(crate) fn new(device: Rc<KilnDevice>, handle: vk::CommandBuffer) -> Self {
        Self { handle, device }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }
}

// begin & end
impl KilnCommandBuffer {
    /// 所有 command buffer 都按 one-time-submit 录制，下一帧由池回收
    pub fn begin(&self) -> RenderResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.handle.begin_command_buffer(self.handle, &begin_info)?;
        }
        Ok(())
    }

    pub fn end(&self) -> RenderResult<()> {
        unsafe {
            self.device.handle.end_command_buffer(self.handle)?;
        }
        Ok(())
    }
}

// barrier
impl KilnCommandBuffer {
    pub fn pipeline_barrier(
        &self,
        image_barriers: &[vk::ImageMemoryBarrier2],
        buffer_barriers: &[vk::BufferMemoryBarrier2],
    ) {
        if image_barriers.is_empty() && buffer_barriers.is_empty() {
            return;
        }
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(image_barriers)
            .buffer_memory_barriers(buffer_barriers);
        unsafe {
            self.device.handle.cmd_pipeline_barrier2(self.handle, &dependency_info);
        }
    }
}

// transfer
impl KilnCommandBuffer {
    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device.handle.cmd_copy_buffer(self.handle, src, dst, regions);
        }
    }

    /// image 必须已处于 TRANSFER_DST_OPTIMAL
    pub fn copy_buffer_to_image(&self, src: vk::Buffer, dst: vk::Image, regions: &[vk::BufferImageCopy]) {
        unsafe {
            self.device.handle.cmd_copy_buffer_to_image(
                self.handle,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            );
        }
    }
}

// dynamic rendering
impl KilnCommandBuffer {
    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device.handle.cmd_begin_rendering(self.handle, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle.cmd_end_rendering(self.handle);
        }
    }
}

// bind & draw
impl KilnCommandBuffer {
    pub fn bind_graphics_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe {
            self.device.handle.cmd_bind_pipeline(self.handle, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle.cmd_bind_descriptor_sets(
                self.handle,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    pub fn bind_vertex_buffer(&self, binding: u32, buffer: vk::Buffer, offset: u64) {
        unsafe {
            self.device.handle.cmd_bind_vertex_buffers(self.handle, binding, &[buffer], &[offset]);
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        unsafe {
            self.device.handle.cmd_bind_index_buffer(self.handle, buffer, offset, index_type);
        }
    }

    pub fn set_viewport_scissor(&self, extent: vk::Extent2D) {
        let viewport = vk::Viewport::default()
            .width(extent.width as f32)
            .height(extent.height as f32)
            .max_depth(1.0);
        let scissor = vk::Rect2D::default().extent(extent);
        unsafe {
            self.device.handle.cmd_set_viewport(self.handle, 0, std::slice::from_ref(&viewport));
            self.device.handle.cmd_set_scissor(self.handle, 0, std::slice::from_ref(&scissor));
        }
    }

    pub fn push_constants(&self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, data: &[u8]) {
        unsafe {
            self.device.handle.cmd_push_constants(self.handle, layout, stages, 0, data);
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device.handle.cmd_draw(self.handle, vertex_count, instance_count, 0, 0);
        }
    }

    pub fn draw_indexed(&self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.device.handle.cmd_draw_indexed(
                self.handle,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                0,
            );
        }
    }
}
