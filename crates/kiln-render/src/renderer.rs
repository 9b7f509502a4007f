//! 渲染器门面：组装各子系统并约束它们的初始化 / 销毁顺序

use std::ffi::CString;
use std::path::PathBuf;
use std::rc::Rc;

use ash::vk;
use kiln_gfx::allocator::KilnAllocator;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::foundation::debug_messenger::KilnDebugMessenger;
use kiln_gfx::foundation::device::KilnDevice;
use kiln_gfx::foundation::instance::KilnInstance;
use kiln_gfx::foundation::physical_device::KilnPhysicalDevice;
use kiln_gfx::resources::buffer::KilnBufferDesc;
use kiln_gfx::resources::image::KilnImageDesc;
use kiln_gfx::swapchain::surface::KilnSurface;
use kiln_gfx::swapchain::swapchain::KilnSwapchain;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::binder::DescriptorBinder;
use crate::frame::{FrameContext, FrameScheduler};
use crate::handles::{BufferHandle, ImageHandle};
use crate::pipeline::{PipelineCache, PipelineKey};
use crate::recorder::{CommandRecorder, DrawItem, PassTarget};
use crate::registry::ResourceRegistry;
use crate::staging::{self, StagingManager, UploadTicket};

const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

pub struct RendererConfig {
    pub app_name: String,
    pub enable_validation: bool,
    /// 单个 frame slot 的 staging 预算（字节）
    pub staging_budget: u64,
    pub pipeline_cache_path: Option<PathBuf>,
    pub extent: vk::Extent2D,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "kiln".to_string(),
            enable_validation: cfg!(debug_assertions),
            staging_budget: 64 * 1024 * 1024,
            pipeline_cache_path: Some(PathBuf::from("kiln-pipeline-cache.bin")),
            extent: vk::Extent2D { width: 1280, height: 720 },
        }
    }
}

/// 引擎入口
///
/// 初始化顺序：instance → surface → device → allocator → swapchain →
/// registry / staging / binder / pipeline → scheduler；销毁严格倒序
pub struct KilnRenderer {
    instance: KilnInstance,
    debug_messenger: Option<KilnDebugMessenger>,
    surface: KilnSurface,
    device: Rc<KilnDevice>,
    allocator: Rc<KilnAllocator>,
    swapchain: KilnSwapchain,

    registry: ResourceRegistry,
    staging: StagingManager,
    binder: DescriptorBinder,
    pipelines: PipelineCache,
    scheduler: FrameScheduler,

    depth_image: ImageHandle,
    current_frame: Option<FrameContext>,
}

// new & init
impl KilnRenderer {
    pub fn new(
        config: RendererConfig,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> RenderResult<Self> {
        let app_name = CString::new(config.app_name.as_str()).unwrap_or_default();
        let instance = KilnInstance::new(&app_name, display_handle, config.enable_validation)?;
        let debug_messenger = if config.enable_validation {
            Some(KilnDebugMessenger::new(instance.entry(), instance.handle())?)
        } else {
            None
        };
        let surface = KilnSurface::new(&instance, display_handle, window_handle)?;

        let pdevice = KilnPhysicalDevice::pick(&instance, &surface)?;
        let device = Rc::new(KilnDevice::new(&instance, pdevice, config.enable_validation)?);
        let allocator = Rc::new(KilnAllocator::new(&instance, &device)?);

        let swapchain = KilnSwapchain::new(device.clone(), &surface, config.extent)?;

        let mut registry = ResourceRegistry::new(device.clone(), allocator.clone());
        let staging = StagingManager::new(device.clone(), allocator.clone(), config.staging_budget)?;
        let binder = DescriptorBinder::new(device.clone())?;
        let pipelines = PipelineCache::new(device.clone(), config.pipeline_cache_path)?;
        let scheduler = FrameScheduler::new(device.clone(), swapchain.image_count())?;

        let depth_image = registry
            .create_image(KilnImageDesc::depth_attachment(swapchain.extent(), DEPTH_FORMAT), "depth")?;

        log::info!("renderer initialized: {}", device.pdevice().device_name());
        Ok(Self {
            instance,
            debug_messenger,
            surface,
            device,
            allocator,
            swapchain,
            registry,
            staging,
            binder,
            pipelines,
            scheduler,
            depth_image,
            current_frame: None,
        })
    }
}

// getter
impl KilnRenderer {
    #[inline]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    #[inline]
    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.scheduler.frame_id()
    }

    /// 上传凭证是否已兑现：提交它的那一帧等过 fence 才算完成
    #[inline]
    pub fn upload_complete(&self, ticket: UploadTicket) -> bool {
        ticket.is_complete(self.scheduler.retired_frame_count())
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        DEPTH_FORMAT
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }
}

// update
impl KilnRenderer {
    /// 启动阶段把已知的 pipeline 全部编译掉
    pub fn warm_up_pipelines(&mut self, keys: &[PipelineKey]) -> RenderResult<()> {
        self.pipelines.warm_up(&mut self.binder, keys)
    }

    /// 开始一帧；swapchain 过期时就地重建并重试一次
    pub fn begin_frame(&mut self) -> RenderResult<()> {
        debug_assert!(self.current_frame.is_none(), "frame already begun");

        let ctx = match self.scheduler.begin_frame(&self.swapchain, &mut self.registry, &mut self.staging) {
            Ok(ctx) => ctx,
            Err(RenderError::SwapchainOutOfDate) => {
                let extent = self.swapchain.extent();
                self.rebuild_swapchain(extent)?;
                self.scheduler.begin_frame(&self.swapchain, &mut self.registry, &mut self.staging)?
            }
            Err(e) => return Err(e),
        };
        self.binder.begin_frame(ctx.slot)?;
        self.current_frame = Some(ctx);
        Ok(())
    }

    /// 把 `data` 登记上传到目标 buffer，必须在 begin / end 之间调用；
    /// 返回的凭证在该帧退休后兑现
    pub fn upload_to_buffer(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        data: &[u8],
    ) -> RenderResult<UploadTicket> {
        if self.current_frame.is_none() {
            debug_assert!(false, "upload outside of a frame");
            return Err(RenderError::NoActiveFrame);
        }
        self.staging.stage_buffer_upload(&self.registry, dst, dst_offset, data)
    }

    pub fn upload_to_image(&mut self, dst: ImageHandle, data: &[u8]) -> RenderResult<UploadTicket> {
        if self.current_frame.is_none() {
            debug_assert!(false, "upload outside of a frame");
            return Err(RenderError::NoActiveFrame);
        }
        self.staging.stage_image_upload(&self.registry, dst, data)
    }

    /// 资产侧入口：建 vertex buffer 并登记上传，数据只在调用期间被借用
    pub fn create_vertex_buffer(
        &mut self,
        data: &[u8],
        debug_name: &str,
    ) -> RenderResult<(BufferHandle, UploadTicket)> {
        let handle = self.registry.create_buffer(KilnBufferDesc::vertex(data.len() as u64), debug_name)?;
        let ticket = self.upload_to_buffer(handle, 0, data)?;
        Ok((handle, ticket))
    }

    pub fn create_index_buffer(
        &mut self,
        data: &[u8],
        debug_name: &str,
    ) -> RenderResult<(BufferHandle, UploadTicket)> {
        let handle = self.registry.create_buffer(KilnBufferDesc::index(data.len() as u64), debug_name)?;
        let ticket = self.upload_to_buffer(handle, 0, data)?;
        Ok((handle, ticket))
    }

    /// 资产侧入口：建 2D 纹理并登记解码好的像素上传
    pub fn create_texture(
        &mut self,
        extent: vk::Extent2D,
        format: vk::Format,
        pixels: &[u8],
        debug_name: &str,
    ) -> RenderResult<(ImageHandle, UploadTicket)> {
        let handle = self.registry.create_image(KilnImageDesc::texture_2d(extent, format), debug_name)?;
        let ticket = self.upload_to_image(handle, pixels)?;
        Ok((handle, ticket))
    }

    /// 同步回读一个 buffer，用于上传校验和截帧；会阻塞等 GPU，不要在帧循环里调用
    pub fn read_back_buffer(&mut self, src: BufferHandle) -> RenderResult<Vec<u8>> {
        debug_assert!(self.current_frame.is_none(), "readback during a frame");
        staging::read_back_buffer(&self.device, &self.allocator, &mut self.registry, src)
    }

    /// 录制主 pass：先 flush 本帧的上传，再 clear + 全部 draw
    pub fn draw(&mut self, clear_color: [f32; 4], items: &[DrawItem]) -> RenderResult<()> {
        let Some(ctx) = self.current_frame.as_ref() else {
            debug_assert!(false, "draw outside of a frame");
            return Err(RenderError::NoActiveFrame);
        };
        let target =
            PassTarget::swapchain(&self.swapchain, ctx.image_index, clear_color, Some(self.depth_image));

        self.staging.flush(&ctx.cmd, &mut self.registry)?;

        let mut recorder =
            CommandRecorder::new(&ctx.cmd, &mut self.registry, &mut self.binder, &mut self.pipelines);
        recorder.prepare_draws(items)?;
        recorder.pass(&target, |recorder| {
            for item in items {
                recorder.draw(item)?;
            }
            Ok(())
        })
    }

    /// 提交并 present；present 过期时重建 swapchain，该帧正常结束
    pub fn end_frame(&mut self) -> RenderResult<()> {
        let Some(ctx) = self.current_frame.take() else {
            debug_assert!(false, "end_frame without begin_frame");
            return Err(RenderError::NoActiveFrame);
        };
        // 本帧只上传没 draw 时，copy 也要跟着这一帧提交
        self.staging.flush(&ctx.cmd, &mut self.registry)?;
        match self.scheduler.end_frame(&self.swapchain, ctx) {
            Ok(()) => Ok(()),
            Err(RenderError::SwapchainOutOfDate) => {
                let extent = self.swapchain.extent();
                self.rebuild_swapchain(extent)
            }
            Err(e) => Err(e),
        }
    }

    /// 窗口 resize
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        debug_assert!(self.current_frame.is_none(), "resize during a frame");
        self.rebuild_swapchain(extent)
    }

    fn rebuild_swapchain(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.scheduler.rebuild(&mut self.swapchain, &self.surface, extent)?;

        // depth 跟随 swapchain 尺寸重建；rebuild 已经 wait_idle，可以立即销毁
        self.registry.destroy_image_immediate(self.depth_image)?;
        self.depth_image = self
            .registry
            .create_image(KilnImageDesc::depth_attachment(self.swapchain.extent(), DEPTH_FORMAT), "depth")?;
        Ok(())
    }
}

// destroy
impl KilnRenderer {
    /// 有序关闭；device lost 之外的错误不会阻止销毁继续
    pub fn destroy(mut self) -> RenderResult<()> {
        debug_assert!(self.current_frame.is_none(), "destroy during a frame");
        self.device.wait_idle()?;

        self.registry.destroy_image_immediate(self.depth_image)?;

        let Self {
            instance,
            debug_messenger,
            surface,
            device,
            allocator,
            swapchain,
            registry,
            staging,
            binder,
            pipelines,
            scheduler,
            ..
        } = self;

        scheduler.destroy();
        pipelines.destroy();
        binder.destroy();
        staging.destroy();
        registry.destroy();
        swapchain.destroy();

        match Rc::try_unwrap(allocator) {
            Ok(allocator) => allocator.destroy(),
            Err(_) => log::error!("allocator still referenced at shutdown"),
        }
        surface.destroy();
        match Rc::try_unwrap(device) {
            Ok(device) => device.destroy(),
            Err(_) => log::error!("device still referenced at shutdown"),
        }
        if let Some(messenger) = debug_messenger {
            messenger.destroy();
        }
        instance.destroy();
        Ok(())
    }
}
