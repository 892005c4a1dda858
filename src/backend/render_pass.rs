// Render pass layout
//
// Describes the attachments of a single-subpass render pass. Each
// attachment's location is its position in the list, and the framebuffer
// must bind views in that same order.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::error::RenderError;
use super::VulkanDevice;

/// One attachment: how it is loaded/stored and the layout the subpass uses
#[derive(Debug, Clone, Copy)]
pub struct AttachmentLayout {
    pub description: vk::AttachmentDescription,
    pub reference_layout: vk::ImageLayout,
}

impl AttachmentLayout {
    pub fn new(description: vk::AttachmentDescription, reference_layout: vk::ImageLayout) -> Self {
        Self {
            description,
            reference_layout,
        }
    }

    /// Swapchain colour target: cleared, stored, handed to presentation
    pub fn swapchain_colour(format: vk::Format) -> Self {
        Self::colour(format, vk::ImageLayout::PRESENT_SRC_KHR)
    }

    /// Offscreen colour target ending in `final_layout`
    pub fn colour(format: vk::Format, final_layout: vk::ImageLayout) -> Self {
        let description = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(final_layout)
            .build();

        Self::new(description, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
    }

    /// Depth-stencil target: depth and stencil both cleared and stored
    pub fn depth_stencil(format: vk::Format) -> Self {
        let description = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::STORE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        Self::new(description, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
    }
}

/// What an attachment location holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    Colour,
    DepthStencil,
}

fn role_of(layout: vk::ImageLayout) -> Result<AttachmentRole, RenderError> {
    match layout {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => Ok(AttachmentRole::Colour),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL => Ok(AttachmentRole::DepthStencil),
        other => Err(RenderError::UnsupportedAttachmentLayout(other)),
    }
}

/// Validated attachment list plus the derived subpass wiring
#[derive(Debug, Clone)]
pub struct RenderPassLayout {
    descriptions: Vec<vk::AttachmentDescription>,
    references: Vec<vk::AttachmentReference>,
    roles: Vec<AttachmentRole>,
    colour_references: Vec<vk::AttachmentReference>,
    depth_reference: Option<vk::AttachmentReference>,
    dependencies: [vk::SubpassDependency; 2],
}

impl RenderPassLayout {
    /// Assign locations and sort attachments into colour and depth-stencil.
    ///
    /// Exactly one colour attachment and at most one depth-stencil
    /// attachment are accepted.
    pub fn new(attachments: Vec<AttachmentLayout>) -> Result<Self, RenderError> {
        let mut descriptions = Vec::with_capacity(attachments.len());
        let mut references = Vec::with_capacity(attachments.len());
        let mut roles = Vec::with_capacity(attachments.len());
        let mut colour_references = Vec::new();
        let mut depth_references = Vec::new();

        for (location, attachment) in attachments.iter().enumerate() {
            let reference = vk::AttachmentReference {
                attachment: location as u32,
                layout: attachment.reference_layout,
            };

            let role = role_of(attachment.reference_layout)?;
            match role {
                AttachmentRole::Colour => colour_references.push(reference),
                AttachmentRole::DepthStencil => depth_references.push(reference),
            }
            roles.push(role);

            descriptions.push(attachment.description);
            references.push(reference);
        }

        if colour_references.len() != 1 {
            return Err(RenderError::ColourAttachmentCount(colour_references.len()));
        }
        if depth_references.len() > 1 {
            return Err(RenderError::DepthAttachmentCount(depth_references.len()));
        }

        Ok(Self {
            descriptions,
            references,
            roles,
            colour_references,
            depth_reference: depth_references.first().copied(),
            dependencies: external_dependencies(),
        })
    }

    /// References in attachment order; `attachment` equals the list index
    pub fn attachment_references(&self) -> &[vk::AttachmentReference] {
        &self.references
    }

    /// Role of each attachment, by location
    pub fn roles(&self) -> &[AttachmentRole] {
        &self.roles
    }

    pub fn colour_references(&self) -> &[vk::AttachmentReference] {
        &self.colour_references
    }

    pub fn depth_reference(&self) -> Option<&vk::AttachmentReference> {
        self.depth_reference.as_ref()
    }

    pub fn descriptions(&self) -> &[vk::AttachmentDescription] {
        &self.descriptions
    }

    pub fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.dependencies
    }

    pub fn attachment_count(&self) -> usize {
        self.descriptions.len()
    }
}

/// Entry and exit dependencies between the subpass and whatever touched the
/// colour attachment outside it
fn external_dependencies() -> [vk::SubpassDependency; 2] {
    let colour_access =
        vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

    [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::MEMORY_READ,
            dst_access_mask: colour_access,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
        vk::SubpassDependency {
            src_subpass: 0,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            src_access_mask: colour_access,
            dst_access_mask: vk::AccessFlags::MEMORY_READ,
            dependency_flags: vk::DependencyFlags::BY_REGION,
        },
    ]
}

/// Render pass with automatic cleanup
pub struct RenderPass {
    handle: vk::RenderPass,
    layout: RenderPassLayout,
    device: Arc<VulkanDevice>,
}

impl RenderPass {
    pub fn new(device: Arc<VulkanDevice>, layout: &RenderPassLayout) -> Result<Self> {
        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(layout.colour_references());
        if let Some(depth) = layout.depth_reference() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass.build()];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(layout.descriptions())
            .subpasses(&subpasses)
            .dependencies(layout.dependencies());

        let handle = unsafe { device.device.create_render_pass(&render_pass_info, None) }
            .context("Failed to create render pass")?;

        log::info!(
            "Created render pass with {} attachments",
            layout.attachment_count()
        );

        Ok(Self {
            handle,
            layout: layout.clone(),
            device,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Attachment order and roles framebuffers must follow
    pub fn layout(&self) -> &RenderPassLayout {
        &self.layout
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_render_pass(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLOUR: vk::Format = vk::Format::B8G8R8A8_UNORM;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;

    #[test]
    fn references_keep_input_order_with_location_as_index() {
        let layout = RenderPassLayout::new(vec![
            AttachmentLayout::depth_stencil(DEPTH),
            AttachmentLayout::swapchain_colour(COLOUR),
        ])
        .unwrap();

        let refs = layout.attachment_references();
        assert_eq!(refs.len(), 2);
        for (i, reference) in refs.iter().enumerate() {
            assert_eq!(reference.attachment, i as u32);
        }
        assert_eq!(refs[0].layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(refs[1].layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(layout.descriptions()[0].format, DEPTH);
        assert_eq!(layout.descriptions()[1].format, COLOUR);
        assert_eq!(
            layout.roles(),
            &[AttachmentRole::DepthStencil, AttachmentRole::Colour]
        );
    }

    #[test]
    fn attachments_are_classified_by_reference_layout() {
        let layout = RenderPassLayout::new(vec![
            AttachmentLayout::swapchain_colour(COLOUR),
            AttachmentLayout::depth_stencil(DEPTH),
        ])
        .unwrap();

        assert_eq!(layout.colour_references().len(), 1);
        assert_eq!(layout.colour_references()[0].attachment, 0);
        assert_eq!(layout.depth_reference().map(|r| r.attachment), Some(1));
    }

    #[test]
    fn colour_only_pass_has_no_depth() {
        let layout =
            RenderPassLayout::new(vec![AttachmentLayout::swapchain_colour(COLOUR)]).unwrap();
        assert!(layout.depth_reference().is_none());
        assert_eq!(layout.attachment_count(), 1);
    }

    #[test]
    fn presets_match_their_roles() {
        let colour = AttachmentLayout::swapchain_colour(COLOUR);
        assert_eq!(colour.description.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(colour.description.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(colour.description.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        let depth = AttachmentLayout::depth_stencil(DEPTH);
        assert_eq!(depth.description.stencil_load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.description.stencil_store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(
            depth.description.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn dependencies_guard_colour_output_both_ways() {
        let layout =
            RenderPassLayout::new(vec![AttachmentLayout::swapchain_colour(COLOUR)]).unwrap();
        let [enter, exit] = [layout.dependencies()[0], layout.dependencies()[1]];

        assert_eq!(enter.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(enter.dst_subpass, 0);
        assert_eq!(enter.src_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(enter.dst_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        assert_eq!(exit.src_subpass, 0);
        assert_eq!(exit.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(exit.dst_access_mask, vk::AccessFlags::MEMORY_READ);
        assert!(exit.dependency_flags.contains(vk::DependencyFlags::BY_REGION));
    }

    #[test]
    fn colour_count_must_be_one() {
        let err = RenderPassLayout::new(vec![AttachmentLayout::depth_stencil(DEPTH)]).unwrap_err();
        assert_eq!(err, RenderError::ColourAttachmentCount(0));

        let err = RenderPassLayout::new(vec![
            AttachmentLayout::swapchain_colour(COLOUR),
            AttachmentLayout::swapchain_colour(COLOUR),
        ])
        .unwrap_err();
        assert_eq!(err, RenderError::ColourAttachmentCount(2));
    }

    #[test]
    fn second_depth_attachment_is_rejected() {
        let err = RenderPassLayout::new(vec![
            AttachmentLayout::swapchain_colour(COLOUR),
            AttachmentLayout::depth_stencil(DEPTH),
            AttachmentLayout::depth_stencil(DEPTH),
        ])
        .unwrap_err();
        assert_eq!(err, RenderError::DepthAttachmentCount(2));
    }

    #[test]
    fn unknown_reference_layout_is_rejected() {
        let mut attachment = AttachmentLayout::swapchain_colour(COLOUR);
        attachment.reference_layout = vk::ImageLayout::GENERAL;

        let err = RenderPassLayout::new(vec![attachment]).unwrap_err();
        assert_eq!(
            err,
            RenderError::UnsupportedAttachmentLayout(vk::ImageLayout::GENERAL)
        );
    }
}
