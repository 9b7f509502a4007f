//! Kiln 的 GFX 层：对 Vulkan 的薄封装
//!
//! 只负责类型安全的对象封装与错误转换，不包含任何帧调度 / 资源策略，
//! 策略层位于 `kiln-render`。

pub mod allocator;
pub mod commands;
pub mod error;
pub mod foundation;
pub mod resources;
pub mod swapchain;
pub mod vertex;
