// Framebuffer layout
//
// Views are bound positionally: view i backs attachment i of the render pass.
// Views appended with a role are checked against the role of their location.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::error::RenderError;
use super::render_pass::{AttachmentRole, RenderPass, RenderPassLayout};
use super::VulkanDevice;

#[derive(Debug, Clone)]
pub struct FramebufferLayout {
    views: Vec<vk::ImageView>,
    roles: Vec<Option<AttachmentRole>>,
    width: u32,
    height: u32,
    render_pass: vk::RenderPass,
}

impl FramebufferLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            views: Vec::new(),
            roles: Vec::new(),
            width,
            height,
            render_pass: vk::RenderPass::null(),
        }
    }

    pub fn append_view(&mut self, view: vk::ImageView) -> &mut Self {
        self.views.push(view);
        self.roles.push(None);
        self
    }

    /// Append a view that must land on an attachment of `role`
    pub fn append_attachment(&mut self, view: vk::ImageView, role: AttachmentRole) -> &mut Self {
        self.views.push(view);
        self.roles.push(Some(role));
        self
    }

    /// Replace the view bound at `index`
    pub fn insert_view(&mut self, view: vk::ImageView, index: usize) -> Result<(), RenderError> {
        let len = self.views.len();
        let slot = self
            .views
            .get_mut(index)
            .ok_or(RenderError::AttachmentIndexOutOfRange { index, len })?;
        *slot = view;
        Ok(())
    }

    pub fn set_render_pass(&mut self, render_pass: &RenderPass) -> &mut Self {
        self.render_pass = render_pass.handle();
        self
    }

    /// Check the views line up with the render pass attachments, in count
    /// and, where known, in role
    pub fn validate(&self, layout: &RenderPassLayout) -> Result<(), RenderError> {
        if self.views.is_empty() {
            return Err(RenderError::EmptyFramebuffer);
        }
        if self.views.len() != layout.attachment_count() {
            return Err(RenderError::AttachmentCountMismatch {
                views: self.views.len(),
                attachments: layout.attachment_count(),
            });
        }

        let roles = self.roles.iter().zip(layout.roles());
        for (location, (bound, &expected)) in roles.enumerate() {
            if let Some(found) = *bound {
                if found != expected {
                    return Err(RenderError::AttachmentRoleMismatch {
                        location,
                        expected,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn attachment_count(&self) -> usize {
        self.views.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }
}

/// Framebuffer with automatic cleanup
pub struct Framebuffer {
    handle: vk::Framebuffer,
    device: Arc<VulkanDevice>,
}

impl Framebuffer {
    pub fn new(device: Arc<VulkanDevice>, layout: &FramebufferLayout) -> Result<Self> {
        if layout.render_pass() == vk::RenderPass::null() {
            return Err(RenderError::RenderPassNotSet.into());
        }
        if layout.views().is_empty() {
            return Err(RenderError::EmptyFramebuffer.into());
        }

        let extent = layout.extent();
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(layout.render_pass())
            .attachments(layout.views())
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let handle = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }
            .context("Failed to create framebuffer")?;

        Ok(Self { handle, device })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_framebuffer(self.handle, None) };
    }
}
