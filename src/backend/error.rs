// Render layer errors
//
// Contract violations get a typed variant so callers can tell them apart
// after they travel through anyhow. Raw Vulkan failures stay as vk::Result
// wrapped in context.

use ash::vk;
use thiserror::Error;

use super::buffer::BufferType;
use super::render_pass::AttachmentRole;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    /// No queue family on the device exposes the requested capabilities
    #[error("Could not find a matching queue family index for {flags:?}")]
    NoQueueFamily { flags: vk::QueueFlags },

    #[error("No memory type matches bits {type_bits:#x} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("No supported depth format")]
    NoDepthFormat,

    #[error("Renderer used before initialize_render")]
    NotInitialized,

    #[error("Frame {index} is still in flight")]
    FrameInFlight { index: usize },

    #[error("Write of {len} bytes overflows buffer of {capacity} bytes")]
    BufferOverflow { len: usize, capacity: usize },

    #[error("Attachment reference layout {0:?} is neither colour nor depth-stencil")]
    UnsupportedAttachmentLayout(vk::ImageLayout),

    #[error("Render pass needs exactly one colour attachment, got {0}")]
    ColourAttachmentCount(usize),

    #[error("Render pass supports at most one depth-stencil attachment, got {0}")]
    DepthAttachmentCount(usize),

    #[error("Framebuffer has no attachments")]
    EmptyFramebuffer,

    #[error("Framebuffer has {views} views but the render pass declares {attachments} attachments")]
    AttachmentCountMismatch { views: usize, attachments: usize },

    #[error("Attachment {location} is {expected:?} but the framebuffer binds a {found:?} view")]
    AttachmentRoleMismatch {
        location: usize,
        expected: AttachmentRole,
        found: AttachmentRole,
    },

    #[error("Render pass has a depth-stencil attachment but no depth view was given")]
    MissingDepthView,

    #[error("Attachment index {index} out of range (len {len})")]
    AttachmentIndexOutOfRange { index: usize, len: usize },

    #[error("Render pass must be set before building this object")]
    RenderPassNotSet,

    #[error("Pipeline layout has no shader stages")]
    EmptyShaderList,

    #[error("Shader {0} is empty")]
    EmptyShader(String),

    #[error("Input layout index {index} out of range (len {len})")]
    InputIndexOutOfRange { index: usize, len: usize },

    #[error("Descriptor list is empty")]
    EmptyDescriptorList,

    #[error("Descriptor at binding {binding} does not match the pipeline layout")]
    DescriptorBindingMismatch { binding: u32 },

    #[error("Descriptor kind {expected} cannot hold this resource")]
    DescriptorKindMismatch { expected: &'static str },

    #[error("No {kind:?} buffer at slot {index}")]
    MissingBuffer { kind: BufferType, index: usize },

    #[error("Draw info has no pipeline")]
    MissingPipeline,

    #[error("Count {0} does not fit in u32")]
    CountOverflow(u64),

    #[error("No render infos registered")]
    NoRenderInfos,

    #[error("Texture data is {actual} bytes, expected at least {expected}")]
    TextureSizeMismatch { actual: usize, expected: usize },
}
