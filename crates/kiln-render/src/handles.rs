//! 资源句柄：slotmap 的 index + generation
//!
//! 句柄是 Copy 的弱引用，资源销毁后旧句柄自然失效，
//! 解引用失败统一报 [`StaleHandle`]
//!
//! [`StaleHandle`]: kiln_gfx::error::RenderError::StaleHandle

slotmap::new_key_type! {
    pub struct BufferHandle;
    pub struct ImageHandle;
    pub struct SamplerHandle;
}
