// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each object owns its handle and an Arc to the
// device, so the device outlives everything created from it.

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod draw;
pub mod error;
pub mod framebuffer;
pub mod image;
pub mod pipeline;
pub mod pipeline_layout;
pub mod render_info;
pub mod render_pass;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{Buffer, BufferType};
pub use command::CommandPool;
pub use descriptor::{Descriptor, DescriptorPool};
pub use device::VulkanDevice;
pub use draw::{BufferArg, BufferSlot, CountArg, DrawBuffer, DrawCommand, DrawInfo};
pub use error::RenderError;
pub use framebuffer::{Framebuffer, FramebufferLayout};
pub use image::{DepthStencilLayout, ImageSampler, ImageSamplerLayout};
pub use pipeline::Pipeline;
pub use pipeline_layout::{
    DescriptorKind, DescriptorLayout, InputAttribute, PipelineLayout, ShaderInfo,
    ShaderInputLayout, ShaderStage,
};
pub use render_info::RenderInfo;
pub use render_pass::{AttachmentLayout, RenderPass, RenderPassLayout};
pub use renderer::{RenderLayout, Renderer};
pub use swapchain::Swapchain;
