use std::rc::Rc;

use ash::vk;

use crate::error::RenderResult;
use crate::foundation::debug_messenger::DebugType;
use crate::foundation::device::KilnDevice;

/// sampler 的参数集合，可 hash，便于上层做去重缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KilnSamplerDesc {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub anisotropy: bool,
}

impl Default for KilnSamplerDesc {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: true,
        }
    }
}

pub struct KilnSampler {
    handle: vk::Sampler,
    desc: KilnSamplerDesc,
    device: Rc<KilnDevice>,
}

impl DebugType for KilnSampler {
    fn debug_type_name() -> &'static str {
        "KilnSampler"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// new & init
impl KilnSampler {
    pub fn new(device: Rc<KilnDevice>, desc: KilnSamplerDesc, debug_name: &str) -> RenderResult<Self> {
        let max_anisotropy = device.pdevice().properties.limits.max_sampler_anisotropy;
        let sampler_ci = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.anisotropy)
            .max_anisotropy(if desc.anisotropy { max_anisotropy } else { 1.0 })
            .max_lod(vk::LOD_CLAMP_NONE);
        let handle = unsafe { device.handle().create_sampler(&sampler_ci, None)? };

        let sampler = Self { handle, desc, device };
        sampler.device.set_debug_name(&sampler, debug_name);
        Ok(sampler)
    }
}

// getter
impl KilnSampler {
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    #[inline]
    pub fn desc(&self) -> KilnSamplerDesc {
        self.desc
    }
}

// destroy
impl KilnSampler {
    pub fn destroy(mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.handle, None);
        }
        self.handle = vk::Sampler::null();
    }
}

impl Drop for KilnSampler {
    fn drop(&mut self) {
        debug_assert!(self.handle == vk::Sampler::null(), "sampler not destroyed");
    }
}
