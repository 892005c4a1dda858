// Graphics pipeline creation
//
// Turns a PipelineLayout plus the descriptor pool's set layout into a
// pipeline cache, a VkPipelineLayout and one graphics pipeline. Viewport and
// scissor are dynamic and set per frame by the renderer.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::descriptor::DescriptorPool;
use super::pipeline_layout::PipelineLayout;
use super::shader::{self, ENTRY_POINT};
use super::VulkanDevice;

pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    cache: vk::PipelineCache,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        layout: &PipelineLayout,
        descriptors: &DescriptorPool,
    ) -> Result<Self> {
        let render_pass = layout.render_pass()?;

        let modules = Self::create_modules(&device, layout)?;
        let result = Self::create_pipeline(device.clone(), layout, descriptors, render_pass, &modules);

        // Modules are only needed while the pipeline is being built
        for &(_, module) in &modules {
            unsafe { device.device.destroy_shader_module(module, None) };
        }

        result
    }

    fn create_modules(
        device: &VulkanDevice,
        layout: &PipelineLayout,
    ) -> Result<Vec<(vk::ShaderStageFlags, vk::ShaderModule)>> {
        let mut modules = Vec::with_capacity(layout.shaders().len());

        for info in layout.shaders() {
            let module = shader::load_spirv(&info.path)
                .and_then(|code| shader::create_shader_module(device, &code));

            match module {
                Ok(module) => modules.push((info.stage.flags(), module)),
                Err(e) => {
                    for &(_, module) in &modules {
                        unsafe { device.device.destroy_shader_module(module, None) };
                    }
                    return Err(e);
                }
            }
            log::debug!("Loaded {:?} shader {}", info.stage, info.path.display());
        }

        Ok(modules)
    }

    fn create_pipeline(
        device: Arc<VulkanDevice>,
        layout: &PipelineLayout,
        descriptors: &DescriptorPool,
        render_pass: vk::RenderPass,
        modules: &[(vk::ShaderStageFlags, vk::ShaderModule)],
    ) -> Result<Self> {
        let fixed = &layout.fixed_function;

        let shader_stages: Vec<_> = modules
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage)
                    .module(module)
                    .name(ENTRY_POINT)
                    .build()
            })
            .collect();

        let bindings = [*layout.vertex_binding()];
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(layout.attributes());

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(fixed.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo {
            viewport_count: fixed.viewport_count,
            scissor_count: fixed.scissor_count,
            ..Default::default()
        };

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(fixed.polygon_mode)
            .line_width(fixed.line_width)
            .cull_mode(fixed.cull_mode)
            .front_face(fixed.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(fixed.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(fixed.depth_test)
            .depth_write_enable(fixed.depth_write)
            .depth_compare_op(fixed.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(fixed.stencil_test)
            .front(fixed.stencil_op)
            .back(fixed.stencil_op);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&fixed.blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&fixed.dynamic_states);

        let cache_info = vk::PipelineCacheCreateInfo::builder();
        let cache = unsafe { device.device.create_pipeline_cache(&cache_info, None) }
            .context("Failed to create pipeline cache")?;

        // From here on Drop cleans up
        let mut this = Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            cache,
            device,
        };

        let set_layouts = [descriptors.set_layout()];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        this.layout = unsafe { this.device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .flags(fixed.flags)
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(this.layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_handle(vk::Pipeline::null())
            .base_pipeline_index(-1)
            .build();

        let pipelines = unsafe {
            this.device
                .device
                .create_graphics_pipelines(cache, &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };
        this.pipeline = pipelines[0];

        log::info!(
            "Created graphics pipeline ({} stages, {} attributes)",
            shader_stages.len(),
            layout.attributes().len()
        );

        Ok(this)
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device.device.destroy_pipeline_layout(self.layout, None);
            }
            self.device.device.destroy_pipeline_cache(self.cache, None);
        }
    }
}
