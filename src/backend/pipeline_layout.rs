// Pipeline layout - everything a graphics pipeline needs except GPU objects
//
// Vertex input is a single interleaved binding (binding 0). Attribute i gets
// location i, descriptor i gets set binding i.

use ash::vk;
use std::path::PathBuf;

use super::error::RenderError;
use super::render_pass::RenderPass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    TessellationControl,
    TessellationEvaluation,
    Geometry,
    Fragment,
    Compute,
    All,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::TessellationControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessellationEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::All => vk::ShaderStageFlags::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DescriptorKind::UniformBuffer => "uniform buffer",
            DescriptorKind::CombinedImageSampler => "combined image sampler",
        }
    }
}

/// A descriptor slot as seen by the shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorLayout {
    pub stage: ShaderStage,
    pub kind: DescriptorKind,
}

impl DescriptorLayout {
    pub fn new(stage: ShaderStage, kind: DescriptorKind) -> Self {
        Self { stage, kind }
    }
}

/// One interleaved vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAttribute {
    pub format: vk::Format,
    pub offset: u32,
}

impl InputAttribute {
    pub fn new(format: vk::Format, offset: u32) -> Self {
        Self { format, offset }
    }
}

/// Vertex stride, attributes and descriptors consumed by a shader pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderInputLayout {
    stride: u32,
    attributes: Vec<InputAttribute>,
    descriptors: Vec<DescriptorLayout>,
}

impl ShaderInputLayout {
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            ..Default::default()
        }
    }

    pub fn set_stride(&mut self, stride: u32) -> &mut Self {
        self.stride = stride;
        self
    }

    pub fn append_attribute(&mut self, attribute: InputAttribute) -> &mut Self {
        self.attributes.push(attribute);
        self
    }

    pub fn set_attribute(
        &mut self,
        index: usize,
        attribute: InputAttribute,
    ) -> Result<(), RenderError> {
        let len = self.attributes.len();
        let slot = self
            .attributes
            .get_mut(index)
            .ok_or(RenderError::InputIndexOutOfRange { index, len })?;
        *slot = attribute;
        Ok(())
    }

    pub fn append_descriptor(&mut self, descriptor: DescriptorLayout) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn set_descriptor(
        &mut self,
        index: usize,
        descriptor: DescriptorLayout,
    ) -> Result<(), RenderError> {
        let len = self.descriptors.len();
        let slot = self
            .descriptors
            .get_mut(index)
            .ok_or(RenderError::InputIndexOutOfRange { index, len })?;
        *slot = descriptor;
        Ok(())
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn attributes(&self) -> &[InputAttribute] {
        &self.attributes
    }

    pub fn descriptors(&self) -> &[DescriptorLayout] {
        &self.descriptors
    }
}

/// SPIR-V file for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderInfo {
    pub stage: ShaderStage,
    pub path: PathBuf,
}

impl ShaderInfo {
    pub fn new(stage: ShaderStage, path: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            path: path.into(),
        }
    }
}

/// Rasterizer, blend, depth and dynamic state of a graphics pipeline
#[derive(Debug, Clone)]
pub struct FixedFunctionState {
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub stencil_test: bool,
    pub stencil_op: vk::StencilOpState,
    pub samples: vk::SampleCountFlags,
    pub flags: vk::PipelineCreateFlags,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        let opaque = vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::RGBA,
            ..Default::default()
        };

        let keep_always = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };

        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            blend_attachments: vec![opaque],
            viewport_count: 1,
            scissor_count: 1,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            stencil_test: false,
            stencil_op: keep_always,
            samples: vk::SampleCountFlags::TYPE_1,
            flags: vk::PipelineCreateFlags::ALLOW_DERIVATIVES,
        }
    }
}

/// Shader stages, vertex input, descriptor set layout bindings and fixed
/// function state for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    shaders: Vec<ShaderInfo>,
    vertex_binding: vk::VertexInputBindingDescription,
    attributes: Vec<vk::VertexInputAttributeDescription>,
    set_bindings: Vec<vk::DescriptorSetLayoutBinding>,
    pub fixed_function: FixedFunctionState,
    render_pass: Option<vk::RenderPass>,
}

impl PipelineLayout {
    pub fn new(shaders: Vec<ShaderInfo>, input: &ShaderInputLayout) -> Result<Self, RenderError> {
        if shaders.is_empty() {
            return Err(RenderError::EmptyShaderList);
        }

        let vertex_binding = vk::VertexInputBindingDescription {
            binding: 0,
            stride: input.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        };

        let attributes = input
            .attributes()
            .iter()
            .enumerate()
            .map(|(location, attribute)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: attribute.format,
                offset: attribute.offset,
            })
            .collect();

        let set_bindings = input
            .descriptors()
            .iter()
            .enumerate()
            .map(|(binding, descriptor)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding as u32)
                    .descriptor_type(descriptor.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(descriptor.stage.flags())
                    .build()
            })
            .collect();

        Ok(Self {
            shaders,
            vertex_binding,
            attributes,
            set_bindings,
            fixed_function: FixedFunctionState::default(),
            render_pass: None,
        })
    }

    /// Target render pass; required before a pipeline is built
    pub fn set_render_pass(&mut self, render_pass: &RenderPass) {
        self.render_pass = Some(render_pass.handle());
    }

    pub fn render_pass(&self) -> Result<vk::RenderPass, RenderError> {
        self.render_pass.ok_or(RenderError::RenderPassNotSet)
    }

    pub fn shaders(&self) -> &[ShaderInfo] {
        &self.shaders
    }

    pub fn vertex_binding(&self) -> &vk::VertexInputBindingDescription {
        &self.vertex_binding
    }

    pub fn attributes(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.attributes
    }

    pub fn set_bindings(&self) -> &[vk::DescriptorSetLayoutBinding] {
        &self.set_bindings
    }
}
