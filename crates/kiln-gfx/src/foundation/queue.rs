use ash::vk;

/// queue 以及它所属的 queue family
#[derive(Clone)]
pub struct KilnQueue {
    pub(crate) handle: vk::Queue,
    pub(crate) family_index: u32,
}

impl KilnQueue {
    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    #[inline]
    pub fn family_index(&self) -> u32 {
        self.family_index
    }
}
