// =============================================================================
// GRAPHICS - Demo scene on top of the backend
// =============================================================================
//
// One render pass (swapchain colour + depth), one pipeline with a uniform
// block and a sampled texture, and a spinning cube.
//
// FRAME FLOW:
// 1. Spin objects, wait for the frame's previous submission
// 2. Upload transforms, record each object's draw buffer inside the pass
// 3. Submit and present

use anyhow::Result;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use crate::backend::{
    AttachmentLayout, Buffer, BufferArg, BufferType, CommandPool, CountArg, DepthStencilLayout,
    Descriptor, DescriptorKind, DescriptorLayout, DescriptorPool, DrawCommand, ImageSampler,
    ImageSamplerLayout, Pipeline, PipelineLayout, RenderInfo, RenderPass, RenderPassLayout,
    Renderer, ShaderInfo, ShaderStage, VulkanDevice,
};
use crate::camera::Camera;
use crate::config::Config;
use crate::render_object::{cube, RenderObject, RenderVertex, Transforms};

const SPIN_DEGREES_PER_SECOND: f32 = 60.0;
const TEXTURE_SIZE: u32 = 256;
const CHECKER_SIZE: u32 = 32;

pub struct Graphics {
    // ─────────────────────────────────────────────────────────────────────────
    // SCENE (dropped before the pipeline objects it records with)
    // ─────────────────────────────────────────────────────────────────────────
    objects: Vec<RenderObject>,
    camera: Camera,
    transforms: Transforms,

    // ─────────────────────────────────────────────────────────────────────────
    // PIPELINE
    // ─────────────────────────────────────────────────────────────────────────
    _pipeline: Arc<Pipeline>,
    descriptor_pool: DescriptorPool,
    _texture: ImageSampler,
    uniform: Buffer,

    // ─────────────────────────────────────────────────────────────────────────
    // FRAME
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Renderer,
    _render_pass: Arc<RenderPass>,
    _command_pool: Arc<CommandPool>,
    device: Arc<VulkanDevice>,
}

impl Graphics {
    pub fn new(
        config: &Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        log::info!("Initializing graphics...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device, command pool, renderer
        // ─────────────────────────────────────────────────────────────────────
        let device = VulkanDevice::new(
            &config.window.title,
            config.debug.validation_layers,
            display,
            window,
        )?;
        let command_pool = Arc::new(CommandPool::new(
            device.clone(),
            device.graphics_queue_family,
        )?);
        let mut renderer = Renderer::new(device.clone(), config.render_layout(width, height))?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Render pass and render targets
        // ─────────────────────────────────────────────────────────────────────
        let render_pass_layout = RenderPassLayout::new(vec![
            AttachmentLayout::swapchain_colour(renderer.colour_format()),
            AttachmentLayout::depth_stencil(renderer.depth_format()),
        ])?;
        let render_pass = Arc::new(RenderPass::new(device.clone(), &render_pass_layout)?);

        renderer.initialize_render(
            render_pass.clone(),
            DepthStencilLayout::new(renderer.depth_format(), width, height),
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pipeline layout
        // ─────────────────────────────────────────────────────────────────────
        let mut input = RenderVertex::input_layout();
        input
            .append_descriptor(DescriptorLayout::new(
                ShaderStage::Vertex,
                DescriptorKind::UniformBuffer,
            ))
            .append_descriptor(DescriptorLayout::new(
                ShaderStage::Fragment,
                DescriptorKind::CombinedImageSampler,
            ));

        let mut pipeline_layout = PipelineLayout::new(
            vec![
                ShaderInfo::new(ShaderStage::Vertex, &config.shaders.vertex),
                ShaderInfo::new(ShaderStage::Fragment, &config.shaders.fragment),
            ],
            &input,
        )?;
        pipeline_layout.set_render_pass(&render_pass);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Resources and descriptors
        // ─────────────────────────────────────────────────────────────────────
        let transforms = Transforms::default();
        let uniform = Buffer::with_data(
            device.clone(),
            BufferType::Uniform,
            bytemuck::bytes_of(&transforms),
        )?;

        let texture = ImageSampler::new(
            device.clone(),
            &command_pool,
            &checkerboard(TEXTURE_SIZE, CHECKER_SIZE),
            ImageSamplerLayout::rgba8(TEXTURE_SIZE, TEXTURE_SIZE),
        )?;

        let descriptors = [
            Descriptor::uniform_buffer(0, &uniform)?,
            Descriptor::image_sampler(1, &texture),
        ];
        let descriptor_pool = DescriptorPool::new(device.clone(), &descriptors, &pipeline_layout)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Pipeline and scene
        // ─────────────────────────────────────────────────────────────────────
        let pipeline = Arc::new(Pipeline::new(
            device.clone(),
            &pipeline_layout,
            &descriptor_pool,
        )?);

        let (vertices, indices) = cube(0.5);
        let cube = RenderObject::new(
            device.clone(),
            command_pool.clone(),
            pipeline.clone(),
            &vertices,
            &indices,
        )?;

        let mut render_info = RenderInfo::new();
        render_info.add_draw_buffer(cube.draw_buffer());
        renderer.add_render_info(render_info);

        let extent = renderer.extent();
        let camera = Camera::new(extent.width as f32 / extent.height.max(1) as f32);

        log::info!("Graphics initialized");

        Ok(Self {
            objects: vec![cube],
            camera,
            transforms,
            _pipeline: pipeline,
            descriptor_pool,
            _texture: texture,
            uniform,
            renderer,
            _render_pass: render_pass,
            _command_pool: command_pool,
            device,
        })
    }

    /// Advance the scene by `dt` seconds and render one frame
    pub fn draw(&mut self, dt: f32) -> Result<()> {
        self.transforms.view = self.camera.view();
        self.transforms.projection = self.camera.projection();

        for object in &mut self.objects {
            object.transform.spin(SPIN_DEGREES_PER_SECOND * dt);
        }

        // Beginning a draw buffer resets it, so the frame's fence must be
        // signaled first
        self.renderer.begin_frame()?;

        for object in &self.objects {
            // The uniform block is shared, so only the last model written
            // reaches the GPU; one object per frame for now
            self.transforms.model = object.model_matrix();
            self.uniform.update(bytemuck::bytes_of(&self.transforms))?;

            let draw_buffer = object.draw_buffer();
            let vertices = object.vertex_slot();
            let indices = object.index_slot();

            draw_buffer.begin()?;
            self.renderer.begin_render_pass(draw_buffer)?;

            draw_buffer.record(&DrawCommand::BindDescriptorSets {
                sets: vec![self.descriptor_pool.set()],
            })?;
            draw_buffer.record(&DrawCommand::BindPipeline)?;
            draw_buffer.record(&DrawCommand::BindVertexBuffers {
                buffers: vec![BufferArg::Slot(vertices)],
            })?;
            draw_buffer.record(&DrawCommand::BindIndexBuffer {
                buffer: BufferArg::Slot(indices),
                index_type: vk::IndexType::UINT32,
            })?;
            draw_buffer.record(&DrawCommand::DrawIndexed {
                index_count: CountArg::indices(indices, vk::IndexType::UINT32),
                instance_count: 1,
            })?;

            self.renderer.end_render_pass(draw_buffer)?;
            draw_buffer.end()?;
        }

        self.renderer.submit()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.renderer.resize(width, height);
        self.camera.set_aspect(width, height);
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Graphics {
    fn drop(&mut self) {
        log::info!("Cleaning up graphics...");
        let _ = self.device.wait_idle();
    }
}

/// RGBA8 checkerboard, `cell` pixels per square
pub fn checkerboard(size: u32, cell: u32) -> Vec<u8> {
    let cell = cell.max(1);
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if light { 0xff } else { 0x40 };
            [v, v, v, 0xff]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_fills_the_texture() {
        let data = checkerboard(TEXTURE_SIZE, CHECKER_SIZE);
        assert_eq!(
            data.len(),
            ImageSamplerLayout::rgba8(TEXTURE_SIZE, TEXTURE_SIZE).required_bytes()
        );
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let data = checkerboard(4, 2);
        let pixel = |x: usize, y: usize| data[(y * 4 + x) * 4];

        assert_eq!(pixel(0, 0), 0xff);
        assert_eq!(pixel(1, 1), 0xff);
        assert_eq!(pixel(2, 0), 0x40);
        assert_eq!(pixel(0, 2), 0x40);
        assert_eq!(pixel(2, 2), 0xff);
        assert!(data.chunks(4).all(|p| p[3] == 0xff));
    }
}
