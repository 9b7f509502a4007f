//! draw 录制：资源状态校验、自动 barrier 与 descriptor 绑定

use ash::vk;
use kiln_gfx::commands::barrier::{self, ResourceState};
use kiln_gfx::commands::command_buffer::KilnCommandBuffer;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::swapchain::swapchain::KilnSwapchain;

use crate::binder::{BoundResource, DescriptorBinder};
use crate::handles::{BufferHandle, ImageHandle};
use crate::pipeline::{PipelineCache, PipelineKey};
use crate::registry::ResourceRegistry;

/// 一次 draw 的完整声明
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub pipeline: PipelineKey,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub index_type: vk::IndexType,
    /// 有 index buffer 时是 index 数，否则是 vertex 数
    pub element_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub instance_count: u32,
    pub bindings: Vec<BoundResource>,
    /// 长度不能超过 pipeline 声明的 push_constant_size
    pub push_constants: Vec<u8>,
}

impl DrawItem {
    pub fn new(pipeline: PipelineKey, vertex_buffer: BufferHandle, element_count: u32) -> Self {
        Self {
            pipeline,
            vertex_buffer,
            index_buffer: None,
            index_type: vk::IndexType::UINT32,
            element_count,
            first_index: 0,
            vertex_offset: 0,
            instance_count: 1,
            bindings: vec![],
            push_constants: vec![],
        }
    }
}

/// 一个 render pass 的目标描述
pub struct PassTarget {
    pub color_image: vk::Image,
    pub color_view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub depth: Option<ImageHandle>,
    /// pass 结束后把 color 转到 PRESENT_SRC
    pub present_after: bool,
}

impl PassTarget {
    pub fn swapchain(
        swapchain: &KilnSwapchain,
        image_index: u32,
        clear_color: [f32; 4],
        depth: Option<ImageHandle>,
    ) -> Self {
        Self {
            color_image: swapchain.image(image_index),
            color_view: swapchain.image_view(image_index),
            extent: swapchain.extent(),
            clear_color,
            depth,
            present_after: true,
        }
    }
}

/// binding 被 shader 读取时要求的资源状态
fn required_binding_state(resource: &BoundResource) -> ResourceState {
    match resource {
        BoundResource::UniformBuffer { .. } => ResourceState::UniformRead,
        BoundResource::Texture { .. } | BoundResource::StorageBuffer { .. } => ResourceState::ShaderRead,
    }
}

/// 一帧的录制入口，借住 registry / binder / pipeline cache
///
/// 用法：先 [`Self::prepare_draws`] 让资源转到目标状态（barrier 不能出现在
/// rendering 作用域里），再在 [`Self::pass`] 的闭包中逐个 [`Self::draw`]
pub struct CommandRecorder<'a> {
    pub cmd: &'a KilnCommandBuffer,
    registry: &'a mut ResourceRegistry,
    binder: &'a mut DescriptorBinder,
    pipelines: &'a mut PipelineCache,
    in_pass: bool,
}

// new & init
impl<'a> CommandRecorder<'a> {
    pub fn new(
        cmd: &'a KilnCommandBuffer,
        registry: &'a mut ResourceRegistry,
        binder: &'a mut DescriptorBinder,
        pipelines: &'a mut PipelineCache,
    ) -> Self {
        Self {
            cmd,
            registry,
            binder,
            pipelines,
            in_pass: false,
        }
    }
}

// barrier
impl CommandRecorder<'_> {
    /// 把 items 引用到的所有资源转到 draw 要求的状态
    pub fn prepare_draws(&mut self, items: &[DrawItem]) -> RenderResult<()> {
        debug_assert!(!self.in_pass, "barriers are not allowed inside a pass");

        for item in items {
            self.transition_buffer(item.vertex_buffer, ResourceState::VertexInput)?;
            if let Some(index_buffer) = item.index_buffer {
                self.transition_buffer(index_buffer, ResourceState::VertexInput)?;
            }
            for binding in &item.bindings {
                match binding {
                    BoundResource::UniformBuffer { buffer, .. } => {
                        self.transition_buffer(*buffer, ResourceState::UniformRead)?;
                    }
                    BoundResource::StorageBuffer { buffer } => {
                        self.transition_buffer(*buffer, ResourceState::ShaderRead)?;
                    }
                    BoundResource::Texture { image, .. } => {
                        self.transition_image(*image, ResourceState::ShaderRead)?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn transition_buffer(&mut self, handle: BufferHandle, to: ResourceState) -> RenderResult<()> {
        let from = self.registry.buffer_state(handle)?;
        if ResourceState::needs_barrier(from, to) {
            let buffer = self.registry.buffer(handle)?;
            self.cmd.pipeline_barrier(
                &[],
                &[barrier::buffer_barrier(buffer.handle(), 0, vk::WHOLE_SIZE, from, to)],
            );
        }
        self.registry.set_buffer_state(handle, to)
    }

    pub fn transition_image(&mut self, handle: ImageHandle, to: ResourceState) -> RenderResult<()> {
        let from = self.registry.image_state(handle)?;
        if ResourceState::needs_barrier(from, to) {
            let image = self.registry.image(handle)?;
            self.cmd
                .pipeline_barrier(&[barrier::image_barrier(image.handle(), image.aspect(), from, to)], &[]);
        }
        self.registry.set_image_state(handle, to)
    }
}

// pass
impl CommandRecorder<'_> {
    /// 闭包内录制 draw；无论闭包结果如何，rendering 作用域都会正确关闭
    pub fn pass<F>(&mut self, target: &PassTarget, f: F) -> RenderResult<()>
    where
        F: FnOnce(&mut Self) -> RenderResult<()>,
    {
        self.begin_pass(target)?;
        let result = f(self);
        self.end_pass(target);
        result
    }

    fn begin_pass(&mut self, target: &PassTarget) -> RenderResult<()> {
        debug_assert!(!self.in_pass, "nested pass");

        // swapchain image 的内容整帧重画，旧内容直接丢弃
        self.cmd.pipeline_barrier(
            &[barrier::image_barrier(
                target.color_image,
                vk::ImageAspectFlags::COLOR,
                ResourceState::Undefined,
                ResourceState::ColorAttachment,
            )],
            &[],
        );
        if let Some(depth) = target.depth {
            self.transition_image(depth, ResourceState::DepthAttachment)?;
        }

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(target.color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: target.clear_color },
            });
        let color_attachments = [color_attachment];

        let depth_attachment = target
            .depth
            .map(|depth| -> RenderResult<_> {
                let image = self.registry.image(depth)?;
                Ok(vk::RenderingAttachmentInfo::default()
                    .image_view(image.view())
                    .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .clear_value(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                    }))
            })
            .transpose()?;

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D::default().extent(target.extent))
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth_attachment) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth_attachment);
        }

        self.cmd.begin_rendering(&rendering_info);
        self.cmd.set_viewport_scissor(target.extent);
        self.in_pass = true;
        Ok(())
    }

    fn end_pass(&mut self, target: &PassTarget) {
        self.cmd.end_rendering();
        if target.present_after {
            self.cmd.pipeline_barrier(
                &[barrier::image_barrier(
                    target.color_image,
                    vk::ImageAspectFlags::COLOR,
                    ResourceState::ColorAttachment,
                    ResourceState::Present,
                )],
                &[],
            );
        }
        self.in_pass = false;
    }
}

// draw
impl CommandRecorder<'_> {
    /// 录制一个 draw
    ///
    /// stale 句柄在 debug 下上抛，release 下跳过该 draw 并记 error，
    /// 帧继续执行
    pub fn draw(&mut self, item: &DrawItem) -> RenderResult<()> {
        debug_assert!(self.in_pass, "draw outside of a pass");

        match self.try_draw(item) {
            Err(e @ RenderError::StaleHandle { .. }) if !cfg!(debug_assertions) => {
                log::error!("skipping draw: {e}");
                Ok(())
            }
            other => other,
        }
    }

    fn try_draw(&mut self, item: &DrawItem) -> RenderResult<()> {
        self.expect_buffer_state(item.vertex_buffer, ResourceState::VertexInput)?;
        if let Some(index_buffer) = item.index_buffer {
            self.expect_buffer_state(index_buffer, ResourceState::VertexInput)?;
        }
        for binding in &item.bindings {
            match binding {
                BoundResource::UniformBuffer { buffer, .. } | BoundResource::StorageBuffer { buffer } => {
                    self.expect_buffer_state(*buffer, required_binding_state(binding))?;
                }
                BoundResource::Texture { image, .. } => {
                    self.expect_image_state(*image, required_binding_state(binding))?;
                }
            }
        }

        debug_assert!(
            item.push_constants.len() as u32 <= item.pipeline.push_constant_size,
            "push constant payload larger than the pipeline declares"
        );

        let compiled = self.pipelines.get_or_create(self.binder, &item.pipeline)?;
        self.cmd.bind_graphics_pipeline(compiled.pipeline);

        if !item.bindings.is_empty() {
            let set = self.binder.bind(self.registry, &item.pipeline.signature, &item.bindings)?;
            self.cmd.bind_descriptor_sets(compiled.layout, 0, &[set]);
        }
        if !item.push_constants.is_empty() {
            self.cmd.push_constants(
                compiled.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                &item.push_constants,
            );
        }

        self.cmd.bind_vertex_buffer(0, self.registry.buffer(item.vertex_buffer)?.handle(), 0);
        match item.index_buffer {
            Some(index_buffer) => {
                self.cmd.bind_index_buffer(
                    self.registry.buffer(index_buffer)?.handle(),
                    0,
                    item.index_type,
                );
                self.cmd.draw_indexed(
                    item.element_count,
                    item.instance_count,
                    item.first_index,
                    item.vertex_offset,
                );
            }
            None => self.cmd.draw(item.element_count, item.instance_count),
        }
        Ok(())
    }

    /// pass 内不能再插 barrier，状态不对只能报错；校验仅在 debug 下开启
    fn expect_buffer_state(&self, handle: BufferHandle, expected: ResourceState) -> RenderResult<()> {
        let actual = self.registry.buffer_state(handle)?;
        if cfg!(debug_assertions) && actual != expected {
            return Err(RenderError::InvalidResourceState { expected, actual });
        }
        Ok(())
    }

    fn expect_image_state(&self, handle: ImageHandle, expected: ResourceState) -> RenderResult<()> {
        let actual = self.registry.image_state(handle)?;
        if cfg!(debug_assertions) && actual != expected {
            return Err(RenderError::InvalidResourceState { expected, actual });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::SamplerHandle;

    #[test]
    fn binding_state_requirements() {
        let uniform = BoundResource::UniformBuffer {
            buffer: BufferHandle::default(),
            offset: 0,
            range: 64,
        };
        let texture = BoundResource::Texture {
            image: ImageHandle::default(),
            sampler: SamplerHandle::default(),
        };
        let storage = BoundResource::StorageBuffer { buffer: BufferHandle::default() };

        assert_eq!(required_binding_state(&uniform), ResourceState::UniformRead);
        assert_eq!(required_binding_state(&texture), ResourceState::ShaderRead);
        assert_eq!(required_binding_state(&storage), ResourceState::ShaderRead);
    }
}
