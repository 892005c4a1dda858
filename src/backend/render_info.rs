// Render info - a batch of draw command buffers submitted together

use ash::vk;

use super::draw::DrawBuffer;
use super::sync::SemaphoreSet;

/// Draw command buffers plus optional custom semaphores.
///
/// Without custom semaphores a submission waits on present-complete and
/// signals render-complete. Each custom list that is empty falls back to
/// its default on its own.
#[derive(Debug, Clone, Default)]
pub struct RenderInfo {
    command_buffers: Vec<vk::CommandBuffer>,
    semaphores: Option<SemaphoreSet>,
}

impl RenderInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_semaphores(semaphores: SemaphoreSet) -> Self {
        Self {
            command_buffers: Vec::new(),
            semaphores: Some(semaphores),
        }
    }

    /// Register a draw buffer; returns its position in the batch
    pub fn add_draw_buffer(&mut self, draw_buffer: &DrawBuffer) -> usize {
        self.add_command_buffer(draw_buffer.handle())
    }

    pub fn add_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> usize {
        self.command_buffers.push(command_buffer);
        self.command_buffers.len() - 1
    }

    pub fn set_semaphores(&mut self, semaphores: Option<SemaphoreSet>) {
        self.semaphores = semaphores;
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }

    /// Resolve the semaphores and stage masks for one submission
    pub fn submit_batch(
        &self,
        present_complete: vk::Semaphore,
        render_complete: vk::Semaphore,
    ) -> SubmitBatch {
        let custom = self.semaphores.as_ref();

        let wait = match custom {
            Some(set) if !set.wait.is_empty() => set.wait.clone(),
            _ => vec![present_complete],
        };
        let signal = match custom {
            Some(set) if !set.signal.is_empty() => set.signal.clone(),
            _ => vec![render_complete],
        };

        SubmitBatch {
            wait_stages: vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait.len()],
            wait,
            command_buffers: self.command_buffers.clone(),
            signal,
        }
    }
}

/// Owned arrays behind a `vk::SubmitInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBatch {
    wait: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    command_buffers: Vec<vk::CommandBuffer>,
    signal: Vec<vk::Semaphore>,
}

impl SubmitBatch {
    /// Submit info pointing into this batch; valid while the batch lives
    pub fn info(&self) -> vk::SubmitInfo {
        vk::SubmitInfo::builder()
            .wait_semaphores(&self.wait)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&self.command_buffers)
            .signal_semaphores(&self.signal)
            .build()
    }

    pub fn wait_semaphores(&self) -> &[vk::Semaphore] {
        &self.wait
    }

    pub fn wait_stages(&self) -> &[vk::PipelineStageFlags] {
        &self.wait_stages
    }

    pub fn signal_semaphores(&self) -> &[vk::Semaphore] {
        &self.signal
    }

    pub fn command_buffers(&self) -> &[vk::CommandBuffer] {
        &self.command_buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn semaphore(raw: u64) -> vk::Semaphore {
        vk::Semaphore::from_raw(raw)
    }

    const PRESENT: u64 = 1;
    const RENDER: u64 = 2;

    #[test]
    fn default_batch_waits_on_present_and_signals_render() {
        let mut info = RenderInfo::new();
        assert_eq!(info.add_command_buffer(vk::CommandBuffer::from_raw(10)), 0);
        assert_eq!(info.add_command_buffer(vk::CommandBuffer::from_raw(11)), 1);

        let batch = info.submit_batch(semaphore(PRESENT), semaphore(RENDER));

        assert_eq!(batch.wait_semaphores(), &[semaphore(PRESENT)]);
        assert_eq!(batch.signal_semaphores(), &[semaphore(RENDER)]);
        assert_eq!(
            batch.wait_stages(),
            &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
        );
        assert_eq!(batch.command_buffers().len(), 2);

        let submit = batch.info();
        assert_eq!(submit.wait_semaphore_count, 1);
        assert_eq!(submit.command_buffer_count, 2);
        assert_eq!(submit.signal_semaphore_count, 1);
    }

    #[test]
    fn custom_lists_replace_defaults_independently() {
        let info = RenderInfo::with_semaphores(SemaphoreSet {
            wait: vec![semaphore(5), semaphore(6)],
            signal: Vec::new(),
        });

        let batch = info.submit_batch(semaphore(PRESENT), semaphore(RENDER));
        assert_eq!(batch.wait_semaphores(), &[semaphore(5), semaphore(6)]);
        assert_eq!(batch.wait_stages().len(), 2);
        assert_eq!(batch.signal_semaphores(), &[semaphore(RENDER)]);

        let mut info = RenderInfo::new();
        info.set_semaphores(Some(SemaphoreSet {
            wait: Vec::new(),
            signal: vec![semaphore(9)],
        }));
        let batch = info.submit_batch(semaphore(PRESENT), semaphore(RENDER));
        assert_eq!(batch.wait_semaphores(), &[semaphore(PRESENT)]);
        assert_eq!(batch.signal_semaphores(), &[semaphore(9)]);
    }
}
