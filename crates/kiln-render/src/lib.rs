//! Kiln 的渲染层
//!
//! 在 `kiln-gfx` 的对象封装之上提供策略：
//! - [`registry`]：generation 句柄 + 延迟销毁
//! - [`staging`]：按帧预算的上传暂存区
//! - [`frame`]：frames-in-flight 的帧调度
//! - [`recorder`]：draw 录制与自动 barrier
//! - [`binder`]：descriptor layout 缓存与绑定校验
//! - [`pipeline`]：pipeline 缓存
//! - [`renderer`]：以上各部分的组装门面

pub mod binder;
pub mod frame;
pub mod handles;
pub mod pipeline;
pub mod recorder;
pub mod registry;
pub mod renderer;
pub mod staging;

pub use kiln_gfx::error::{RenderError, RenderResult};
