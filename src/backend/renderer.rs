// Renderer - frame orchestration
//
// Owns the swapchain and everything sized to it (depth-stencil image,
// framebuffers, per-image fences) plus the two frame semaphores, and drives
// acquire -> record -> submit -> present on the device's single queue.
//
// FRAME FLOW:
// 1. begin_frame: acquire image, wait for its fence
// 2. caller begins its draw buffers
// 3. begin_render_pass, record draw commands, end_render_pass
// 4. submit: reset fence, submit every RenderInfo, present

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::draw::DrawBuffer;
use super::error::RenderError;
use super::framebuffer::{Framebuffer, FramebufferLayout};
use super::image::{DepthStencil, DepthStencilLayout};
use super::render_info::RenderInfo;
use super::render_pass::{AttachmentRole, RenderPass, RenderPassLayout};
use super::swapchain::{self, Swapchain};
use super::sync::{FrameFences, FrameSemaphores};
use super::VulkanDevice;

/// Renderer-wide settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderLayout {
    /// Swapchain format used when the surface has no preference
    pub colour_format: vk::Format,
    pub depth_format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub present_mode: vk::PresentModeKHR,
    pub clear_colour: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
    pub validation: bool,
}

impl Default for RenderLayout {
    fn default() -> Self {
        Self {
            colour_format: vk::Format::R8G8B8A8_UNORM,
            depth_format: vk::Format::D32_SFLOAT_S8_UINT,
            width: 1920,
            height: 1080,
            present_mode: vk::PresentModeKHR::MAILBOX,
            clear_colour: [0.1, 0.1, 0.1, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
            validation: false,
        }
    }
}

/// Handle to a render info registered with the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderInfoId(usize);

pub struct Renderer {
    // Swapchain-sized state; declared first so it drops before the swapchain
    framebuffers: Vec<Framebuffer>,
    depth_stencil: Option<DepthStencil>,
    swapchain: Option<Swapchain>,
    fences: FrameFences,
    semaphores: FrameSemaphores,

    render_pass: Option<Arc<RenderPass>>,
    depth_layout: Option<DepthStencilLayout>,
    render_infos: Vec<RenderInfo>,
    layout: RenderLayout,

    current_frame: usize,
    image_acquired: bool,
    needs_rebuild: bool,
    is_running: bool,

    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Create the frame semaphores and settle the colour and depth formats.
    /// Nothing swapchain-related exists until [`Renderer::initialize_render`].
    pub fn new(device: Arc<VulkanDevice>, mut layout: RenderLayout) -> Result<Self> {
        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }
        .context("Failed to query surface formats")?;

        layout.colour_format = swapchain::choose_surface_format(&formats, layout.colour_format)
            .context("Surface reports no formats")?
            .format;

        if !device.is_depth_format_supported(layout.depth_format) {
            let fallback = device.supported_depth_format()?;
            log::warn!(
                "Depth format {:?} unsupported, using {:?}",
                layout.depth_format,
                fallback
            );
            layout.depth_format = fallback;
        }

        log::info!(
            "Renderer formats: colour {:?}, depth {:?}",
            layout.colour_format,
            layout.depth_format
        );

        Ok(Self {
            framebuffers: Vec::new(),
            depth_stencil: None,
            swapchain: None,
            fences: FrameFences::default(),
            semaphores: FrameSemaphores::new(&device)?,
            render_pass: None,
            depth_layout: None,
            render_infos: Vec::new(),
            layout,
            current_frame: 0,
            image_acquired: false,
            needs_rebuild: false,
            is_running: false,
            device,
        })
    }

    /// Build the swapchain, depth-stencil image, framebuffers and fences
    /// for `render_pass`, then start accepting frames
    pub fn initialize_render(
        &mut self,
        render_pass: Arc<RenderPass>,
        depth_layout: DepthStencilLayout,
    ) -> Result<()> {
        log::info!("Initializing render targets...");

        self.render_pass = Some(render_pass);
        self.depth_layout = Some(depth_layout);
        self.build_swapchain_resources()?;
        self.is_running = true;

        log::info!(
            "Renderer running: {} swapchain images at {}x{}",
            self.image_count(),
            self.extent().width,
            self.extent().height
        );
        Ok(())
    }

    fn build_swapchain_resources(&mut self) -> Result<()> {
        let render_pass = self.render_pass.clone().ok_or(RenderError::NotInitialized)?;
        let depth_layout = self.depth_layout.ok_or(RenderError::NotInitialized)?;

        // Everything that references the old images goes first
        self.framebuffers.clear();
        self.depth_stencil = None;
        self.fences.destroy(&self.device.device);

        let old = self.swapchain.take();
        let swapchain = Swapchain::new(
            self.device.clone(),
            self.layout.present_mode,
            self.layout.colour_format,
            self.layout.width,
            self.layout.height,
            old.as_ref(),
        )?;
        drop(old);

        let depth_stencil = match render_pass.layout().depth_reference() {
            Some(_) => Some(DepthStencil::new(
                self.device.clone(),
                depth_layout.with_extent(swapchain.extent),
            )?),
            None => None,
        };

        let layouts = framebuffer_layouts(
            render_pass.layout(),
            &swapchain.image_views,
            depth_stencil.as_ref().map(DepthStencil::view),
            swapchain.extent,
        )?;

        let mut framebuffers = Vec::with_capacity(layouts.len());
        for mut layout in layouts {
            layout.set_render_pass(&render_pass);
            framebuffers.push(Framebuffer::new(self.device.clone(), &layout)?);
        }

        self.fences = FrameFences::new(&self.device, swapchain.image_count())?;
        self.framebuffers = framebuffers;
        self.depth_stencil = depth_stencil;
        self.swapchain = Some(swapchain);
        self.current_frame = 0;
        self.image_acquired = false;
        self.needs_rebuild = false;

        Ok(())
    }

    /// Rebuild everything sized to the swapchain
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        log::info!(
            "Recreating swapchain at {}x{}",
            self.layout.width,
            self.layout.height
        );
        self.device.wait_idle()?;
        self.build_swapchain_resources()
    }

    /// Request a new size; the swapchain is rebuilt before the next acquire
    pub fn resize(&mut self, width: u32, height: u32) {
        self.layout.width = width;
        self.layout.height = height;
        self.needs_rebuild = true;
    }

    fn acquire(&mut self) -> Result<()> {
        if self.image_acquired {
            return Ok(());
        }
        if self.needs_rebuild {
            self.recreate_swapchain()?;
        }

        let present_complete = self.semaphores.present_complete.handle();
        let acquired = self
            .swapchain()?
            .acquire_next_image(u64::MAX, present_complete)?;

        let (index, suboptimal) = match acquired {
            Some(result) => result,
            None => {
                log::warn!("Swapchain out of date on acquire");
                self.recreate_swapchain()?;
                self.swapchain()?
                    .acquire_next_image(u64::MAX, present_complete)?
                    .context("Swapchain still out of date after rebuild")?
            }
        };

        if suboptimal {
            // The image is still usable; rebuild after presenting it
            self.needs_rebuild = true;
        }

        self.current_frame = index as usize;
        self.image_acquired = true;
        Ok(())
    }

    /// Acquire the frame's image if needed and block until its previous
    /// submission finished. Call before beginning any draw buffer of the
    /// frame, since beginning a command buffer resets it.
    pub fn begin_frame(&mut self) -> Result<()> {
        if !self.is_running {
            return Err(RenderError::NotInitialized.into());
        }

        self.acquire()?;
        self.fences
            .wait_until_recordable(self.device.as_ref(), self.current_frame)
    }

    /// Begin the render pass into `draw_buffer` with full-extent viewport
    /// and scissor. Starts the frame first if [`Renderer::begin_frame`]
    /// has not; fails with `FrameInFlight` if the frame's fence is unsignaled.
    pub fn begin_render_pass(&mut self, draw_buffer: &DrawBuffer) -> Result<()> {
        if !self.image_acquired {
            self.begin_frame()?;
        }
        self.fences
            .ensure_recordable(self.device.as_ref(), self.current_frame)?;

        let render_pass = self.render_pass.as_ref().ok_or(RenderError::NotInitialized)?;
        let framebuffer = self
            .framebuffers
            .get(self.current_frame)
            .with_context(|| format!("No framebuffer for frame {}", self.current_frame))?;
        let extent = self.extent();
        let clear = clear_values(&self.layout, render_pass.layout());

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(scissor(extent))
            .clear_values(&clear);

        let cmd = draw_buffer.handle();
        unsafe {
            let device = &self.device.device;
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[scissor(extent)]);
        }

        Ok(())
    }

    pub fn end_render_pass(&self, draw_buffer: &DrawBuffer) -> Result<()> {
        if !self.is_running {
            return Err(RenderError::NotInitialized.into());
        }
        unsafe { self.device.device.cmd_end_render_pass(draw_buffer.handle()) };
        Ok(())
    }

    /// Submit every render info in registration order, then present.
    ///
    /// Each submission is followed by a queue-idle wait. The frame fence
    /// rides on the last submission. Does nothing before initialization.
    pub fn submit(&mut self) -> Result<()> {
        if !self.is_running {
            return Ok(());
        }
        if self.render_infos.is_empty() {
            return Err(RenderError::NoRenderInfos.into());
        }
        if !self.image_acquired {
            anyhow::bail!("submit called without a recorded render pass");
        }

        let device = self.device.as_ref();
        let fence = self.fences.begin_submit(device, self.current_frame)?;

        let present_complete = self.semaphores.present_complete.handle();
        let render_complete = self.semaphores.render_complete.handle();
        let last = self.render_infos.len() - 1;

        for (i, info) in self.render_infos.iter().enumerate() {
            let batch = info.submit_batch(present_complete, render_complete);
            let signal_fence = if i == last { fence } else { vk::Fence::null() };

            unsafe {
                device
                    .device
                    .queue_submit(device.graphics_queue, &[batch.info()], signal_fence)
                    .with_context(|| format!("Failed to submit render info {}", i))?;
                device
                    .device
                    .queue_wait_idle(device.graphics_queue)
                    .context("Failed to wait for queue idle")?;
            }
        }

        self.image_acquired = false;
        let rebuild = self.swapchain()?.present(
            self.device.graphics_queue,
            self.current_frame as u32,
            &[render_complete],
        )?;
        if rebuild {
            log::debug!("Swapchain suboptimal or out of date after present");
            self.needs_rebuild = true;
        }

        Ok(())
    }

    pub fn add_render_info(&mut self, info: RenderInfo) -> RenderInfoId {
        self.render_infos.push(info);
        RenderInfoId(self.render_infos.len() - 1)
    }

    pub fn render_info_mut(&mut self, id: RenderInfoId) -> Option<&mut RenderInfo> {
        self.render_infos.get_mut(id.0)
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RenderError::NotInitialized.into())
    }

    pub fn colour_format(&self) -> vk::Format {
        self.layout.colour_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.layout.depth_format
    }

    /// Current swapchain extent, or the requested size before initialization
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map(|s| s.extent)
            .unwrap_or(vk::Extent2D {
                width: self.layout.width,
                height: self.layout.height,
            })
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn present_complete(&self) -> vk::Semaphore {
        self.semaphores.present_complete.handle()
    }

    pub fn render_complete(&self) -> vk::Semaphore {
        self.semaphores.render_complete.handle()
    }

    pub fn layout(&self) -> &RenderLayout {
        &self.layout
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        self.fences.destroy(&self.device.device);
    }
}

/// One framebuffer layout per swapchain image. Each binds swapchain view i
/// at the pass's colour location and the shared depth view at its
/// depth-stencil location.
pub fn framebuffer_layouts(
    pass: &RenderPassLayout,
    colour_views: &[vk::ImageView],
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> Result<Vec<FramebufferLayout>, RenderError> {
    if colour_views.is_empty() {
        return Err(RenderError::EmptyFramebuffer);
    }

    colour_views
        .iter()
        .map(|&colour_view| {
            let mut layout = FramebufferLayout::new(extent.width, extent.height);
            for &role in pass.roles() {
                let view = match role {
                    AttachmentRole::Colour => colour_view,
                    AttachmentRole::DepthStencil => {
                        depth_view.ok_or(RenderError::MissingDepthView)?
                    }
                };
                layout.append_attachment(view, role);
            }
            layout.validate(pass)?;
            Ok(layout)
        })
        .collect()
}

pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// One clear value per attachment, by location
pub fn clear_values(layout: &RenderLayout, pass: &RenderPassLayout) -> Vec<vk::ClearValue> {
    pass.roles()
        .iter()
        .map(|role| match role {
            AttachmentRole::Colour => vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: layout.clear_colour,
                },
            },
            AttachmentRole::DepthStencil => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: layout.clear_depth,
                    stencil: layout.clear_stencil,
                },
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::render_pass::AttachmentLayout;
    use ash::vk::Handle;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 1920,
        height: 1080,
    };

    #[test]
    fn default_layout() {
        let layout = RenderLayout::default();
        assert_eq!(layout.colour_format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(layout.depth_format, vk::Format::D32_SFLOAT_S8_UINT);
        assert_eq!((layout.width, layout.height), (1920, 1080));
        assert_eq!(layout.clear_colour, [0.1, 0.1, 0.1, 1.0]);
        assert_eq!(layout.clear_depth, 1.0);
        assert_eq!(layout.clear_stencil, 0);
        assert!(!layout.validation);
    }

    #[test]
    fn viewport_and_scissor_cover_the_extent() {
        let vp = viewport(EXTENT);
        assert_eq!((vp.x, vp.y), (0.0, 0.0));
        assert_eq!((vp.width, vp.height), (1920.0, 1080.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));

        let rect = scissor(EXTENT);
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(rect.extent, EXTENT);
    }

    fn colour_depth() -> RenderPassLayout {
        RenderPassLayout::new(vec![
            AttachmentLayout::swapchain_colour(vk::Format::B8G8R8A8_UNORM),
            AttachmentLayout::depth_stencil(vk::Format::D32_SFLOAT_S8_UINT),
        ])
        .unwrap()
    }

    fn depth_colour() -> RenderPassLayout {
        RenderPassLayout::new(vec![
            AttachmentLayout::depth_stencil(vk::Format::D32_SFLOAT_S8_UINT),
            AttachmentLayout::swapchain_colour(vk::Format::B8G8R8A8_UNORM),
        ])
        .unwrap()
    }

    #[test]
    fn clear_values_follow_layout() {
        let layout = RenderLayout {
            clear_colour: [0.2, 0.3, 0.4, 1.0],
            clear_depth: 0.5,
            clear_stencil: 3,
            ..Default::default()
        };
        let values = clear_values(&layout, &colour_depth());

        assert_eq!(values.len(), 2);
        unsafe {
            assert_eq!(values[0].color.float32, [0.2, 0.3, 0.4, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 0.5);
            assert_eq!(values[1].depth_stencil.stencil, 3);
        }
    }

    #[test]
    fn clear_values_follow_attachment_roles() {
        let layout = RenderLayout {
            clear_depth: 0.25,
            ..Default::default()
        };
        let values = clear_values(&layout, &depth_colour());

        unsafe {
            assert_eq!(values[0].depth_stencil.depth, 0.25);
            assert_eq!(values[1].color.float32, layout.clear_colour);
        }
    }

    #[test]
    fn framebuffer_per_image_shares_the_depth_view() {
        let colour: Vec<_> = (1..=3).map(vk::ImageView::from_raw).collect();
        let depth = vk::ImageView::from_raw(50);

        let layouts = framebuffer_layouts(&colour_depth(), &colour, Some(depth), EXTENT).unwrap();

        assert_eq!(layouts.len(), 3);
        for (layout, &view) in layouts.iter().zip(&colour) {
            assert_eq!(layout.views(), &[view, depth]);
            assert_eq!(layout.extent(), EXTENT);
        }
    }

    #[test]
    fn depth_first_pass_binds_depth_view_first() {
        let colour = [vk::ImageView::from_raw(1), vk::ImageView::from_raw(2)];
        let depth = vk::ImageView::from_raw(50);
        let pass = depth_colour();

        let layouts = framebuffer_layouts(&pass, &colour, Some(depth), EXTENT).unwrap();

        assert_eq!(layouts[0].views(), &[depth, colour[0]]);
        assert_eq!(layouts[1].views(), &[depth, colour[1]]);
        assert_eq!(
            pass.attachment_references()[0].layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(layouts[0].validate(&pass), Ok(()));
    }

    #[test]
    fn colour_only_pass_needs_no_depth_view() {
        let pass =
            RenderPassLayout::new(vec![AttachmentLayout::swapchain_colour(vk::Format::B8G8R8A8_UNORM)])
                .unwrap();
        let colour = [vk::ImageView::from_raw(1)];

        let layouts = framebuffer_layouts(&pass, &colour, None, EXTENT).unwrap();
        assert_eq!(layouts[0].views(), &colour);
    }

    #[test]
    fn depth_pass_without_depth_view_is_an_error() {
        let colour = [vk::ImageView::from_raw(1)];
        assert_eq!(
            framebuffer_layouts(&colour_depth(), &colour, None, EXTENT).unwrap_err(),
            RenderError::MissingDepthView
        );
    }

    #[test]
    fn no_swapchain_images_is_an_error() {
        assert_eq!(
            framebuffer_layouts(&colour_depth(), &[], Some(vk::ImageView::from_raw(1)), EXTENT)
                .unwrap_err(),
            RenderError::EmptyFramebuffer
        );
    }
}
