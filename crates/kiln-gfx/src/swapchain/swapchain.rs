use std::rc::Rc;

use ash::vk;

use crate::commands::semaphore::KilnSemaphore;
use crate::error::{RenderError, RenderResult};
use crate::foundation::device::KilnDevice;
use crate::swapchain::surface::KilnSurface;

/// swapchain 以及它的 image / view
///
/// 窗口 resize 后由上层走 [`Self::rebuild`]，
/// 其间产生的 `SwapchainOutOfDate` 错误不是致命的
pub struct KilnSwapchain {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,

    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,

    device: Rc<KilnDevice>,
}

// new & init
impl KilnSwapchain {
    pub fn new(device: Rc<KilnDevice>, surface: &KilnSurface, extent: vk::Extent2D) -> RenderResult<Self> {
        let format = Self::pick_format(surface, &device)?;
        let present_mode = Self::pick_present_mode(surface, &device)?;
        log::info!("swapchain format: {:?}, present mode: {:?}", format.format, present_mode);

        let mut swapchain = Self {
            handle: vk::SwapchainKHR::null(),
            images: vec![],
            image_views: vec![],
            format,
            present_mode,
            extent,
            device,
        };
        swapchain.create_handle(surface, extent, vk::SwapchainKHR::null())?;
        Ok(swapchain)
    }

    fn pick_format(surface: &KilnSurface, device: &KilnDevice) -> RenderResult<vk::SurfaceFormatKHR> {
        let formats = surface.formats(device.pdevice().handle())?;
        Self::choose_format(&formats)
    }

    /// 优先 SRGB 的 BGRA，找不到就用第一个；驱动一个 format 都不报视为初始化失败
    fn choose_format(formats: &[vk::SurfaceFormatKHR]) -> RenderResult<vk::SurfaceFormatKHR> {
        formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or(RenderError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
    }

    fn pick_present_mode(surface: &KilnSurface, device: &KilnDevice) -> RenderResult<vk::PresentModeKHR> {
        let modes = surface.present_modes(device.pdevice().handle())?;
        Ok(Self::choose_present_mode(&modes))
    }

    /// MAILBOX 优先；FIFO 是规范保证存在的兜底
    fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
        if modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    fn create_handle(
        &mut self,
        surface: &KilnSurface,
        extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<()> {
        let caps = surface.capabilities(self.device.pdevice().handle())?;

        // 比最小值多要一张，减少 acquire 阻塞
        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: extent.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: extent.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let swapchain_ci = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let handle = unsafe { self.device.swapchain_fn.create_swapchain(&swapchain_ci, None)? };
        let images = unsafe { self.device.swapchain_fn.get_swapchain_images(handle)? };
        let image_views = images
            .iter()
            .map(|&image| {
                let view_ci = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(self.format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );
                let view = unsafe { self.device.handle().create_image_view(&view_ci, None)? };
                Ok(view)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        self.handle = handle;
        self.images = images;
        self.image_views = image_views;
        self.extent = extent;
        Ok(())
    }
}

// getter
impl KilnSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    #[inline]
    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

// acquire & present
impl KilnSwapchain {
    /// 返回 image index；OUT_OF_DATE 映射为 [`RenderError::SwapchainOutOfDate`]，
    /// SUBOPTIMAL 时这一帧照常渲染
    pub fn acquire_next_image(&self, signal: &KilnSemaphore) -> RenderResult<u32> {
        let result = unsafe {
            self.device.swapchain_fn.acquire_next_image(
                self.handle,
                u64::MAX,
                signal.handle(),
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, _suboptimal)) => Ok(index),
            Err(e) => Err(RenderError::from(e)),
        }
    }

    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: &KilnSemaphore,
    ) -> RenderResult<()> {
        let wait_semaphores = [wait.handle()];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.device.swapchain_fn.queue_present(queue, &present_info) };
        match result {
            Ok(_suboptimal) => Ok(()),
            Err(e) => Err(RenderError::from(e)),
        }
    }
}

// rebuild
impl KilnSwapchain {
    /// resize 之后重建；调用方需保证旧 swapchain 的 image 已不被 GPU 使用
    pub fn rebuild(&mut self, surface: &KilnSurface, extent: vk::Extent2D) -> RenderResult<()> {
        let old_handle = self.handle;
        let old_views = std::mem::take(&mut self.image_views);

        self.create_handle(surface, extent, old_handle)?;

        unsafe {
            for view in old_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.device.swapchain_fn.destroy_swapchain(old_handle, None);
        }
        log::info!("swapchain rebuilt: {}x{}", self.extent.width, self.extent.height);
        Ok(())
    }
}

// destroy
impl KilnSwapchain {
    pub fn destroy(mut self) {
        log::info!("destroying swapchain");
        unsafe {
            for view in std::mem::take(&mut self.image_views) {
                self.device.handle().destroy_image_view(view, None);
            }
            self.device.swapchain_fn.destroy_swapchain(self.handle, None);
        }
        self.handle = vk::SwapchainKHR::null();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn srgb_bgra_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = KilnSwapchain::choose_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_reported_format() {
        let formats = [format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = KilnSwapchain::choose_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn empty_format_list_is_an_error() {
        assert!(KilnSwapchain::choose_format(&[]).is_err());
    }

    #[test]
    fn fifo_when_mailbox_missing() {
        assert_eq!(
            KilnSwapchain::choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            KilnSwapchain::choose_present_mode(&[vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }
}
