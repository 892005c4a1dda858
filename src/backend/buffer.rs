// Host-visible buffers for vertex, index, uniform and staging data
//
// Memory comes from the device's gpu-allocator in CpuToGpu, so every buffer
// stays persistently mapped and updates are a plain copy.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::error::RenderError;
use super::VulkanDevice;

/// What a buffer is used for; decides its usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferType {
    Transfer,
    Uniform,
    Storage,
    Index,
    Vertex,
    Indirect,
}

impl BufferType {
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferType::Transfer => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferType::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferType::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
            BufferType::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferType::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferType::Indirect => vk::BufferUsageFlags::INDIRECT_BUFFER,
        }
    }
}

pub struct Buffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: usize,
    kind: BufferType,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    /// Create a zero-initialised buffer of `size` bytes
    pub fn new(device: Arc<VulkanDevice>, kind: BufferType, size: usize) -> Result<Self> {
        if size == 0 {
            anyhow::bail!("Cannot create an empty {:?} buffer", kind);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size as vk::DeviceSize)
            .usage(kind.usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let allocation = match Self::allocate(&device, buffer, kind) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        log::debug!("Created {:?} buffer ({} bytes)", kind, size);

        let mut this = Self {
            buffer,
            allocation: Some(allocation),
            size,
            kind,
            device,
        };
        this.mapped()?.fill(0);
        Ok(this)
    }

    /// Create a buffer sized to `data` and fill it
    pub fn with_data(device: Arc<VulkanDevice>, kind: BufferType, data: &[u8]) -> Result<Self> {
        let mut buffer = Self::new(device, kind, data.len())?;
        buffer.update(data)?;
        Ok(buffer)
    }

    fn allocate(device: &VulkanDevice, buffer: vk::Buffer, kind: BufferType) -> Result<Allocation> {
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate {:?} buffer memory", kind))?;

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            let _ = device.allocator().free(allocation);
            return Err(e).context("Failed to bind buffer memory");
        }

        Ok(allocation)
    }

    fn mapped(&mut self) -> Result<&mut [u8]> {
        let size = self.size;
        let slice = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .context("Buffer memory is not host mapped")?;
        Ok(&mut slice[..size])
    }

    /// Copy `data` into the start of the buffer.
    ///
    /// Fails with [`RenderError::BufferOverflow`] if `data` is larger than
    /// the buffer; bytes past `data.len()` keep their previous contents.
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        write_mapped(self.mapped()?, data)?;
        Ok(())
    }

    /// Read back the current contents
    pub fn contents(&mut self) -> Result<Vec<u8>> {
        Ok(self.mapped()?.to_vec())
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes as declared at creation
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> BufferType {
        self.kind
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size as vk::DeviceSize,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
    }
}

/// Copy `data` into the front of a mapped region
pub fn write_mapped(dst: &mut [u8], data: &[u8]) -> Result<(), RenderError> {
    let capacity = dst.len();
    let target = dst.get_mut(..data.len()).ok_or(RenderError::BufferOverflow {
        len: data.len(),
        capacity,
    })?;
    target.copy_from_slice(data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_write_round_trips_and_keeps_tail() {
        let mut memory = [0xAAu8; 16];
        let data: Vec<u8> = (0..10).collect();

        write_mapped(&mut memory, &data).unwrap();

        assert_eq!(&memory[..10], data.as_slice());
        assert!(memory[10..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn exact_size_write_fills_buffer() {
        let mut memory = [0u8; 4];
        write_mapped(&mut memory, &[1, 2, 3, 4]).unwrap();
        assert_eq!(memory, [1, 2, 3, 4]);
    }

    #[test]
    fn oversized_write_is_rejected_untouched() {
        let mut memory = [7u8; 8];
        let err = write_mapped(&mut memory, &[0u8; 9]).unwrap_err();

        assert_eq!(err, RenderError::BufferOverflow { len: 9, capacity: 8 });
        assert_eq!(memory, [7u8; 8]);
    }

    #[test]
    fn usage_flags_follow_buffer_type() {
        assert_eq!(BufferType::Vertex.usage(), vk::BufferUsageFlags::VERTEX_BUFFER);
        assert_eq!(BufferType::Index.usage(), vk::BufferUsageFlags::INDEX_BUFFER);
        assert_eq!(BufferType::Uniform.usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
        assert_eq!(BufferType::Transfer.usage(), vk::BufferUsageFlags::TRANSFER_SRC);
    }
}
