//! Render pass, pipeline and frame synchronization over Vulkan.
//!
//! [`backend`] is the render layer; the remaining modules make up the
//! spinning-cube demo that the `vk-frame` binary runs.

pub mod backend;
pub mod camera;
pub mod config;
pub mod graphics;
pub mod render_object;
