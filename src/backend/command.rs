// Command pools and one-shot setup command buffers

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Pool whose buffers can be reset individually, so draw buffers can be
/// re-recorded every frame
pub struct CommandPool {
    pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { pool, device })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn allocate_primary(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            unsafe { self.device.device.free_command_buffers(self.pool, buffers) };
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Command buffer for uploads and layout transitions, submitted once and
/// waited on. Freed when dropped.
pub struct SetupCommandBuffer<'a> {
    buffer: vk::CommandBuffer,
    pool: &'a CommandPool,
}

impl<'a> SetupCommandBuffer<'a> {
    /// Allocate and start recording
    pub fn begin(pool: &'a CommandPool) -> Result<Self> {
        let buffer = pool.allocate_primary(1)?[0];
        let this = Self { buffer, pool };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            this.pool
                .device
                .device
                .begin_command_buffer(this.buffer, &begin_info)
        }
        .context("Failed to begin setup command buffer")?;

        Ok(this)
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// End recording, submit to the graphics queue and block until it is idle
    pub fn submit_and_wait(self) -> Result<()> {
        let device = &self.pool.device;
        let command_buffers = [self.buffer];

        unsafe {
            device
                .device
                .end_command_buffer(self.buffer)
                .context("Failed to end setup command buffer")?;

            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())
                .context("Failed to submit setup command buffer")?;

            device
                .device
                .queue_wait_idle(device.graphics_queue)
                .context("Failed to wait for setup commands")?;
        }

        Ok(())
    }
}

impl Drop for SetupCommandBuffer<'_> {
    fn drop(&mut self) {
        self.pool.free(&[self.buffer]);
    }
}
