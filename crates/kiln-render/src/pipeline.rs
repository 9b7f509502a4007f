//! graphics pipeline 缓存
//!
//! 两级缓存：
//! - 进程内：按 [`PipelineKey`] 的 append-only map，一个 key 只编译一次
//! - 跨进程：`vk::PipelineCache` 的磁盘 blob，加速冷启动

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ash::vk;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::foundation::device::KilnDevice;
use kiln_gfx::vertex::Vertex3D;

use crate::binder::{BindingSignature, DescriptorBinder};

/// pipeline 的全部创建参数，作为缓存 key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// SPIR-V 文件路径
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub topology: vk::PrimitiveTopology,
    pub blend_enable: bool,
    pub signature: BindingSignature,
    /// push constant 的字节数，0 表示不用
    pub push_constant_size: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CompiledPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// pipeline 与 pipeline layout 的缓存，只增不减
///
/// 已发出去的 `vk::Pipeline` 在整个 cache 生命周期内保持有效，
/// 因此 draw 侧可以直接持有裸 handle
pub struct PipelineCache {
    pipelines: HashMap<PipelineKey, CompiledPipeline>,
    layouts: HashMap<(BindingSignature, u32), vk::PipelineLayout>,

    vk_cache: vk::PipelineCache,
    disk_path: Option<PathBuf>,

    device: Rc<KilnDevice>,
    destroyed: bool,
}

// new & init
impl PipelineCache {
    /// `disk_path` 指定 blob 文件；读不到（首次运行）就从空 cache 开始
    pub fn new(device: Rc<KilnDevice>, disk_path: Option<PathBuf>) -> RenderResult<Self> {
        let blob = disk_path.as_ref().and_then(|path| std::fs::read(path).ok()).unwrap_or_default();
        if !blob.is_empty() {
            log::info!("loaded pipeline cache blob: {} bytes", blob.len());
        }

        // 驱动会校验 blob 的 header，版本不符时等同于空 cache
        let cache_ci = vk::PipelineCacheCreateInfo::default().initial_data(&blob);
        let vk_cache = unsafe { device.handle().create_pipeline_cache(&cache_ci, None)? };

        Ok(Self {
            pipelines: HashMap::new(),
            layouts: HashMap::new(),
            vk_cache,
            disk_path,
            device,
            destroyed: false,
        })
    }
}

// getter
impl PipelineCache {
    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    #[inline]
    pub fn get(&self, key: &PipelineKey) -> Option<CompiledPipeline> {
        self.pipelines.get(key).copied()
    }
}

// update
impl PipelineCache {
    /// 命中直接返回，未命中用 `compile` 编译后缓存
    ///
    /// 编译入口单独拆出来，测试时注入假的编译函数即可验证缓存行为
    pub fn get_or_create_with(
        &mut self,
        key: &PipelineKey,
        compile: impl FnOnce() -> RenderResult<CompiledPipeline>,
    ) -> RenderResult<CompiledPipeline> {
        if let Some(compiled) = self.pipelines.get(key) {
            return Ok(*compiled);
        }
        let compiled = compile()?;
        self.pipelines.insert(key.clone(), compiled);
        Ok(compiled)
    }

    pub fn get_or_create(
        &mut self,
        binder: &mut DescriptorBinder,
        key: &PipelineKey,
    ) -> RenderResult<CompiledPipeline> {
        if let Some(compiled) = self.pipelines.get(key) {
            return Ok(*compiled);
        }

        let layout = self.pipeline_layout(binder, &key.signature, key.push_constant_size)?;
        let pipeline = self.compile(key, layout)?;
        let compiled = CompiledPipeline { pipeline, layout };
        self.pipelines.insert(key.clone(), compiled);
        log::info!("compiled pipeline: {:?} + {:?}", key.vertex_shader, key.fragment_shader);
        Ok(compiled)
    }

    /// 启动时把已知的 key 全部编译掉，避免运行期卡顿
    pub fn warm_up(&mut self, binder: &mut DescriptorBinder, keys: &[PipelineKey]) -> RenderResult<()> {
        for key in keys {
            self.get_or_create(binder, key)?;
        }
        log::info!("pipeline cache warmed up: {} entries", self.pipelines.len());
        Ok(())
    }

    fn pipeline_layout(
        &mut self,
        binder: &mut DescriptorBinder,
        signature: &BindingSignature,
        push_constant_size: u32,
    ) -> RenderResult<vk::PipelineLayout> {
        let cache_key = (signature.clone(), push_constant_size);
        if let Some(layout) = self.layouts.get(&cache_key) {
            return Ok(*layout);
        }

        let set_layouts = [binder.layout(signature)?];
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .size(push_constant_size)];
        let mut layout_ci = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if push_constant_size > 0 {
            layout_ci = layout_ci.push_constant_ranges(&push_ranges);
        }
        let layout = unsafe { self.device.handle().create_pipeline_layout(&layout_ci, None)? };
        self.layouts.insert(cache_key, layout);
        Ok(layout)
    }

    fn compile(&self, key: &PipelineKey, layout: vk::PipelineLayout) -> RenderResult<vk::Pipeline> {
        let vertex_module = self.load_shader(&key.vertex_shader)?;
        let fragment_module = match self.load_shader(&key.fragment_shader) {
            Ok(module) => module,
            Err(e) => {
                unsafe {
                    self.device.handle().destroy_shader_module(vertex_module, None);
                }
                return Err(e);
            }
        };

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(c"main"),
        ];

        let bindings = Vertex3D::binding_descriptions();
        let attributes = Vertex3D::attribute_descriptions();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default().topology(key.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(key.depth_format.is_some())
            .depth_write_enable(key.depth_format.is_some())
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachment = if key.blend_enable {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = [blend_attachment];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        // dynamic rendering：attachment 格式在这里声明，不需要 render pass
        let color_formats = [key.color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if let Some(depth_format) = key.depth_format {
            rendering_info = rendering_info.depth_attachment_format(depth_format);
        }

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let result = unsafe {
            self.device.handle().create_graphics_pipelines(
                self.vk_cache,
                std::slice::from_ref(&pipeline_ci),
                None,
            )
        };

        unsafe {
            self.device.handle().destroy_shader_module(vertex_module, None);
            self.device.handle().destroy_shader_module(fragment_module, None);
        }

        match result {
            Ok(pipelines) => Ok(pipelines[0]),
            Err((_, e)) => Err(RenderError::from(e)),
        }
    }

    fn load_shader(&self, path: &Path) -> RenderResult<vk::ShaderModule> {
        let bytes = std::fs::read(path)?;
        let code = ash::util::read_spv(&mut std::io::Cursor::new(bytes))?;
        let module_ci = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.device.handle().create_shader_module(&module_ci, None)? };
        Ok(module)
    }
}

// disk blob
impl PipelineCache {
    /// 把驱动侧 cache 写回磁盘；失败只记 warning，不影响关闭流程
    pub fn save_disk_cache(&self) {
        let Some(path) = &self.disk_path else {
            return;
        };
        let data = match unsafe { self.device.handle().get_pipeline_cache_data(self.vk_cache) } {
            Ok(data) => data,
            Err(e) => {
                log::warn!("failed to read pipeline cache data: {e:?}");
                return;
            }
        };
        if let Err(e) = std::fs::write(path, &data) {
            log::warn!("failed to write pipeline cache blob to {path:?}: {e}");
        } else {
            log::info!("saved pipeline cache blob: {} bytes", data.len());
        }
    }
}

// destroy
impl PipelineCache {
    pub fn destroy(mut self) {
        self.save_disk_cache();
        unsafe {
            for (_, compiled) in self.pipelines.drain() {
                self.device.handle().destroy_pipeline(compiled.pipeline, None);
            }
            for (_, layout) in self.layouts.drain() {
                self.device.handle().destroy_pipeline_layout(layout, None);
            }
            self.device.handle().destroy_pipeline_cache(self.vk_cache, None);
        }
        self.destroyed = true;
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "pipeline cache not destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::BindingKind;

    fn test_key(name: &str) -> PipelineKey {
        PipelineKey {
            vertex_shader: PathBuf::from(format!("{name}.vert.spv")),
            fragment_shader: PathBuf::from(format!("{name}.frag.spv")),
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: Some(vk::Format::D32_SFLOAT),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            blend_enable: false,
            signature: BindingSignature::new(vec![BindingKind::UniformBuffer]),
            push_constant_size: 0,
        }
    }

    // get_or_create_with 的缓存行为不需要真实 device，
    // 这里直接在 map 层面验证
    #[test]
    fn identical_keys_are_equal() {
        assert_eq!(test_key("opaque"), test_key("opaque"));
        assert_ne!(test_key("opaque"), test_key("wireframe"));
    }

    #[test]
    fn key_distinguishes_formats_and_state() {
        let base = test_key("opaque");

        let mut no_depth = base.clone();
        no_depth.depth_format = None;
        assert_ne!(base, no_depth);

        let mut blended = base.clone();
        blended.blend_enable = true;
        assert_ne!(base, blended);
    }

    #[test]
    fn cache_map_compiles_once_per_key() {
        let mut pipelines: HashMap<PipelineKey, CompiledPipeline> = HashMap::new();
        let mut compile_count = 0;

        for _ in 0..3 {
            pipelines.entry(test_key("opaque")).or_insert_with(|| {
                compile_count += 1;
                CompiledPipeline {
                    pipeline: vk::Pipeline::null(),
                    layout: vk::PipelineLayout::null(),
                }
            });
        }
        assert_eq!(compile_count, 1);
        assert_eq!(pipelines.len(), 1);
    }
}
