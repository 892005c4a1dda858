// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One fence per swapchain image guards re-recording of that frame; two
// frame-scoped semaphores order acquire -> render -> present.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::error::RenderError;
use super::VulkanDevice;

/// Binary semaphore destroyed on drop
pub struct Semaphore {
    handle: vk::Semaphore,
    device: Arc<VulkanDevice>,
}

impl Semaphore {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let handle = unsafe { device.device.create_semaphore(&create_info, None) }
            .context("Failed to create semaphore")?;
        Ok(Self { handle, device })
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_semaphore(self.handle, None) };
    }
}

/// The two semaphores every frame goes through
pub struct FrameSemaphores {
    /// Signaled when the acquired swapchain image is ready to be drawn to
    pub present_complete: Semaphore,
    /// Signaled when rendering finished and the image may be presented
    pub render_complete: Semaphore,
}

impl FrameSemaphores {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        Ok(Self {
            present_complete: Semaphore::new(device.clone())?,
            render_complete: Semaphore::new(device.clone())?,
        })
    }
}

/// Custom wait/signal semaphore lists for a submission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemaphoreSet {
    pub wait: Vec<vk::Semaphore>,
    pub signal: Vec<vk::Semaphore>,
}

/// The fence operations the frame loop needs
pub trait FenceDevice {
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    fn wait_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
}

impl FenceDevice for VulkanDevice {
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        unsafe { self.device.get_fence_status(fence) }.context("Failed to query fence status")
    }

    fn wait_fence(&self, fence: vk::Fence, timeout: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
            .context("Failed to wait for fence")
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }.context("Failed to reset fence")
    }
}

/// One fence per swapchain image, created signaled.
///
/// Fence N is signaled iff the GPU finished the last submission for frame N,
/// so frame N may only be recorded again once it is signaled.
#[derive(Debug, Default)]
pub struct FrameFences {
    fences: Vec<vk::Fence>,
}

impl FrameFences {
    pub fn new(device: &VulkanDevice, count: usize) -> Result<Self> {
        let create_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let fences = (0..count)
            .map(|_| {
                unsafe { device.device.create_fence(&create_info, None) }
                    .context("Failed to create frame fence")
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!("Created {} frame fences", count);
        Ok(Self { fences })
    }

    /// Wrap existing fence handles
    pub fn from_handles(fences: Vec<vk::Fence>) -> Self {
        Self { fences }
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub fn fence(&self, index: usize) -> Result<vk::Fence> {
        self.fences
            .get(index)
            .copied()
            .with_context(|| format!("No fence for frame {} ({} fences)", index, self.fences.len()))
    }

    /// Fail with [`RenderError::FrameInFlight`] if frame `index` is still on the GPU
    pub fn ensure_recordable<D: FenceDevice>(&self, device: &D, index: usize) -> Result<()> {
        let fence = self.fence(index)?;
        if !device.fence_signaled(fence)? {
            return Err(RenderError::FrameInFlight { index }.into());
        }
        Ok(())
    }

    /// Block until frame `index` may be recorded again
    pub fn wait_until_recordable<D: FenceDevice>(&self, device: &D, index: usize) -> Result<()> {
        let fence = self.fence(index)?;
        device.wait_fence(fence, u64::MAX)
    }

    /// Wait for the previous use of frame `index`, then reset its fence so
    /// the next submission can signal it
    pub fn begin_submit<D: FenceDevice>(&self, device: &D, index: usize) -> Result<vk::Fence> {
        let fence = self.fence(index)?;
        device.wait_fence(fence, u64::MAX)?;
        device.reset_fence(fence)?;
        Ok(fence)
    }

    pub fn destroy(&mut self, device: &ash::Device) {
        for fence in self.fences.drain(..) {
            unsafe { device.destroy_fence(fence, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Fences are signaled by `complete`, standing in for the GPU
    #[derive(Default)]
    struct MockFences {
        signaled: RefCell<HashMap<u64, bool>>,
        waits: RefCell<Vec<u64>>,
    }

    impl MockFences {
        fn with_signaled(count: u64) -> (Self, FrameFences) {
            let mock = Self::default();
            let handles = (1..=count)
                .map(|raw| {
                    mock.signaled.borrow_mut().insert(raw, true);
                    vk::Fence::from_raw(raw)
                })
                .collect();
            (mock, FrameFences::from_handles(handles))
        }

        fn complete(&self, fence: vk::Fence) {
            self.signaled.borrow_mut().insert(fence.as_raw(), true);
        }
    }

    impl FenceDevice for MockFences {
        fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
            Ok(self.signaled.borrow()[&fence.as_raw()])
        }

        fn wait_fence(&self, fence: vk::Fence, _timeout: u64) -> Result<()> {
            self.waits.borrow_mut().push(fence.as_raw());
            self.complete(fence);
            Ok(())
        }

        fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
            self.signaled.borrow_mut().insert(fence.as_raw(), false);
            Ok(())
        }
    }

    #[test]
    fn fresh_fences_are_recordable() {
        let (mock, fences) = MockFences::with_signaled(3);
        for i in 0..3 {
            fences.ensure_recordable(&mock, i).unwrap();
        }
    }

    #[test]
    fn frame_in_flight_is_rejected_until_waited() {
        let (mock, fences) = MockFences::with_signaled(2);

        let fence = fences.begin_submit(&mock, 1).unwrap();
        assert_eq!(fence, vk::Fence::from_raw(2));

        let err = fences.ensure_recordable(&mock, 1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RenderError>(),
            Some(&RenderError::FrameInFlight { index: 1 })
        );

        // Other frames are unaffected
        fences.ensure_recordable(&mock, 0).unwrap();

        fences.wait_until_recordable(&mock, 1).unwrap();
        fences.ensure_recordable(&mock, 1).unwrap();
    }

    #[test]
    fn frame_loop_waits_before_rerecording_an_image() {
        let (mock, fences) = MockFences::with_signaled(2);

        // Frame 0: begin_frame, begin_render_pass, submit
        fences.wait_until_recordable(&mock, 0).unwrap();
        fences.ensure_recordable(&mock, 0).unwrap();
        fences.begin_submit(&mock, 0).unwrap();

        // Image 0 comes back while its submission is still pending
        assert!(fences.ensure_recordable(&mock, 0).is_err());
        fences.wait_until_recordable(&mock, 0).unwrap();
        fences.ensure_recordable(&mock, 0).unwrap();

        // begin_frame, begin_submit, begin_frame
        assert_eq!(*mock.waits.borrow(), vec![1, 1, 1]);
    }

    #[test]
    fn begin_submit_waits_before_reset() {
        let (mock, fences) = MockFences::with_signaled(1);
        fences.begin_submit(&mock, 0).unwrap();
        fences.begin_submit(&mock, 0).unwrap();

        assert_eq!(*mock.waits.borrow(), vec![1, 1]);
        assert!(!mock.fence_signaled(vk::Fence::from_raw(1)).unwrap());
    }

    #[test]
    fn out_of_range_frame_is_an_error() {
        let (mock, fences) = MockFences::with_signaled(2);
        assert!(fences.ensure_recordable(&mock, 2).is_err());
        assert_eq!(fences.len(), 2);
    }
}
