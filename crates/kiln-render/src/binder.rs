//! descriptor 绑定：layout 按签名缓存，set 按帧临时分配

use std::collections::HashMap;
use std::rc::Rc;

use ash::vk;
use kiln_gfx::error::{RenderError, RenderResult};
use kiln_gfx::foundation::device::KilnDevice;

use crate::frame::FIF_COUNT;
use crate::handles::{BufferHandle, ImageHandle, SamplerHandle};
use crate::registry::ResourceRegistry;

/// 单个 binding 的种类，对应 descriptor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    CombinedImageSampler,
    StorageBuffer,
}

impl BindingKind {
    fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        }
    }
}

/// set layout 的结构签名；相同签名的 pipeline 共享同一个 layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingSignature {
    bindings: Vec<BindingKind>,
}

impl BindingSignature {
    pub fn new(bindings: Vec<BindingKind>) -> Self {
        Self { bindings }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 数量不匹配是调用方的逻辑错误，双 profile 都报错；
    /// 种类不匹配只在 debug 下断言
    pub fn check(&self, provided: &[BoundResource]) -> RenderResult<()> {
        if provided.len() != self.bindings.len() {
            return Err(RenderError::BindingMismatch {
                declared: self.bindings.len(),
                provided: provided.len(),
            });
        }
        debug_assert!(
            self.bindings.iter().zip(provided).all(|(kind, res)| *kind == res.kind()),
            "binding kinds do not match signature"
        );
        Ok(())
    }
}

/// draw 时提供的一个绑定资源
#[derive(Debug, Clone, Copy)]
pub enum BoundResource {
    UniformBuffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    Texture {
        image: ImageHandle,
        sampler: SamplerHandle,
    },
    StorageBuffer {
        buffer: BufferHandle,
    },
}

impl BoundResource {
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::UniformBuffer { .. } => BindingKind::UniformBuffer,
            Self::Texture { .. } => BindingKind::CombinedImageSampler,
            Self::StorageBuffer { .. } => BindingKind::StorageBuffer,
        }
    }
}

const MAX_SETS_PER_FRAME: u32 = 1024;

/// descriptor 管理
///
/// - layout：按 [`BindingSignature`] 去重的持久缓存
/// - set：从 per-slot 的 pool 里分配，帧开始整池 reset，不单独回收
pub struct DescriptorBinder {
    layouts: HashMap<BindingSignature, vk::DescriptorSetLayout>,
    pools: Vec<vk::DescriptorPool>,
    current_slot: usize,

    device: Rc<KilnDevice>,
    destroyed: bool,
}

// new & init
impl DescriptorBinder {
    pub fn new(device: Rc<KilnDevice>) -> RenderResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_SETS_PER_FRAME,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_SETS_PER_FRAME,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: MAX_SETS_PER_FRAME / 4,
            },
        ];
        let pool_ci = vk::DescriptorPoolCreateInfo::default()
            .max_sets(MAX_SETS_PER_FRAME)
            .pool_sizes(&pool_sizes);

        let pools = (0..FIF_COUNT)
            .map(|_| {
                let pool = unsafe { device.handle().create_descriptor_pool(&pool_ci, None)? };
                Ok(pool)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            layouts: HashMap::new(),
            pools,
            current_slot: 0,
            device,
            destroyed: false,
        })
    }
}

// update
impl DescriptorBinder {
    /// 回收该 slot 上一轮分配的所有 set
    pub fn begin_frame(&mut self, slot: usize) -> RenderResult<()> {
        self.current_slot = slot;
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pools[slot], vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    /// 签名对应的 set layout，不存在则创建并缓存
    pub fn layout(&mut self, signature: &BindingSignature) -> RenderResult<vk::DescriptorSetLayout> {
        if let Some(layout) = self.layouts.get(signature) {
            return Ok(*layout);
        }

        let bindings = signature
            .bindings
            .iter()
            .enumerate()
            .map(|(idx, kind)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(idx as u32)
                    .descriptor_type(kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            })
            .collect::<Vec<_>>();
        let layout_ci = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.handle().create_descriptor_set_layout(&layout_ci, None)? };

        self.layouts.insert(signature.clone(), layout);
        Ok(layout)
    }

    /// 分配一个临时 set 并写入资源，寿命到该 slot 下一次 begin_frame 为止
    pub fn bind(
        &mut self,
        registry: &ResourceRegistry,
        signature: &BindingSignature,
        resources: &[BoundResource],
    ) -> RenderResult<vk::DescriptorSet> {
        signature.check(resources)?;
        let layout = self.layout(signature)?;

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pools[self.current_slot])
            .set_layouts(&layouts);
        let set = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)?[0] };

        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorImageInfo),
        }
        let infos = resources
            .iter()
            .map(|res| {
                Ok(match res {
                    BoundResource::UniformBuffer { buffer, offset, range } => {
                        Info::Buffer(vk::DescriptorBufferInfo {
                            buffer: registry.buffer(*buffer)?.handle(),
                            offset: *offset,
                            range: *range,
                        })
                    }
                    BoundResource::StorageBuffer { buffer } => Info::Buffer(vk::DescriptorBufferInfo {
                        buffer: registry.buffer(*buffer)?.handle(),
                        offset: 0,
                        range: vk::WHOLE_SIZE,
                    }),
                    BoundResource::Texture { image, sampler } => Info::Image(vk::DescriptorImageInfo {
                        sampler: registry.sampler(*sampler)?.handle(),
                        image_view: registry.image(*image)?.view(),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }),
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let writes = infos
            .iter()
            .enumerate()
            .map(|(idx, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(idx as u32)
                    .descriptor_type(signature.bindings[idx].descriptor_type());
                match info {
                    Info::Buffer(buffer_info) => write.buffer_info(std::slice::from_ref(buffer_info)),
                    Info::Image(image_info) => write.image_info(std::slice::from_ref(image_info)),
                }
            })
            .collect::<Vec<_>>();
        unsafe {
            self.device.handle().update_descriptor_sets(&writes, &[]);
        }
        Ok(set)
    }
}

// destroy
impl DescriptorBinder {
    pub fn destroy(mut self) {
        unsafe {
            for (_, layout) in self.layouts.drain() {
                self.device.handle().destroy_descriptor_set_layout(layout, None);
            }
            for pool in self.pools.drain(..) {
                self.device.handle().destroy_descriptor_pool(pool, None);
            }
        }
        self.destroyed = true;
    }
}

impl Drop for DescriptorBinder {
    fn drop(&mut self) {
        debug_assert!(self.destroyed, "descriptor binder not destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> BindingSignature {
        BindingSignature::new(vec![BindingKind::UniformBuffer, BindingKind::CombinedImageSampler])
    }

    #[test]
    fn matching_count_passes() {
        let resources = [
            BoundResource::UniformBuffer {
                buffer: BufferHandle::default(),
                offset: 0,
                range: 64,
            },
            BoundResource::Texture {
                image: ImageHandle::default(),
                sampler: SamplerHandle::default(),
            },
        ];
        assert!(signature().check(&resources).is_ok());
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let resources = [BoundResource::UniformBuffer {
            buffer: BufferHandle::default(),
            offset: 0,
            range: 64,
        }];
        let err = signature().check(&resources).unwrap_err();
        assert!(matches!(
            err,
            RenderError::BindingMismatch {
                declared: 2,
                provided: 1
            }
        ));
    }

    #[test]
    fn signatures_hash_by_structure() {
        use std::collections::HashMap;

        let mut map = HashMap::new();
        map.insert(signature(), 1);
        assert_eq!(map.get(&signature()), Some(&1));
        assert!(!map.contains_key(&BindingSignature::new(vec![BindingKind::StorageBuffer])));
    }
}
