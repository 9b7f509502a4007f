use std::rc::Rc;

use ash::vk;

use crate::allocator::{KilnAllocator, KilnImageAllocation};
use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

#[derive(Clone)]
pub struct KilnImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
}

impl KilnImageDesc {
    pub fn texture_2d(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            mip_levels: 1,
        }
    }

    pub fn color_attachment(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            mip_levels: 1,
        }
    }

    pub fn depth_attachment(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            mip_levels: 1,
        }
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        if self.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

/// 2D image + 默认 view
///
/// swapchain image 属于 swapchain，不走这里
pub struct KilnImage {
    allocation: Option<KilnImageAllocation>,
    view: vk::ImageView,

    desc: KilnImageDesc,
    allocator: Rc<KilnAllocator>,
    device: Rc<KilnDevice>,
}

impl DebugType for KilnImage {
    fn debug_type_name() -> &'static str {
        "KilnImage"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle()
    }
}

// new & init
impl KilnImage {
    pub fn new(
        device: Rc<KilnDevice>,
        allocator: Rc<KilnAllocator>,
        desc: KilnImageDesc,
        debug_name: &str,
    ) -> RenderResult<Self> {
        let image_ci = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let allocation = allocator.create_image(&image_ci)?;

        let view_ci = vk::ImageViewCreateInfo::default()
            .image(allocation.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect())
                    .level_count(desc.mip_levels)
                    .layer_count(1),
            );
        let view = unsafe { device.handle().create_image_view(&view_ci, None)? };

        let image = Self {
            allocation: Some(allocation),
            view,
            desc,
            allocator,
            device,
        };
        image.device.set_debug_name(&image, debug_name);
        Ok(image)
    }
}

// getter
impl KilnImage {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.allocation.as_ref().map_or(vk::Image::null(), KilnImageAllocation::handle)
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.desc.aspect()
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

// destroy
impl KilnImage {
    pub fn destroy(mut self) {
        unsafe {
            self.device.handle().destroy_image_view(self.view, None);
        }
        self.view = vk::ImageView::null();
        if let Some(allocation) = self.allocation.take() {
            self.allocator.destroy_image(allocation);
        }
    }
}

impl Drop for KilnImage {
    fn drop(&mut self) {
        debug_assert!(self.allocation.is_none(), "image not destroyed");
    }
}
