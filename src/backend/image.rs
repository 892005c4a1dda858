// Images: depth-stencil targets and sampled textures
//
// Depth-stencil images are device-local, allocated straight from a memory
// type. Textures go through a host-visible staging buffer and a one-shot
// command buffer, then live in the shader-read layout.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::{Buffer, BufferType};
use super::command::{CommandPool, SetupCommandBuffer};
use super::error::RenderError;
use super::VulkanDevice;

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

/// Aspect of a depth format; stencil only when the format carries it
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilLayout {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
}

impl DepthStencilLayout {
    pub fn new(format: vk::Format, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    pub fn with_extent(self, extent: vk::Extent2D) -> Self {
        Self {
            width: extent.width,
            height: extent.height,
            ..self
        }
    }
}

/// Depth-stencil attachment image, memory and view
pub struct DepthStencil {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    layout: DepthStencilLayout,
    device: Arc<VulkanDevice>,
}

impl DepthStencil {
    pub fn new(device: Arc<VulkanDevice>, layout: DepthStencilLayout) -> Result<Self> {
        log::debug!(
            "Creating depth-stencil {:?} {}x{}",
            layout.format,
            layout.width,
            layout.height
        );

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: layout.width,
                height: layout.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(layout.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create depth image")?;

        // Filled in step by step so Drop can clean up a partial build
        let mut this = Self {
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            layout,
            device,
        };

        let requirements = unsafe { this.device.device.get_image_memory_requirements(image) };
        let memory_type_index = this.device.memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        this.memory = unsafe { this.device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate depth image memory")?;

        unsafe { this.device.device.bind_image_memory(image, this.memory, 0) }
            .context("Failed to bind depth image memory")?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(layout.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: depth_aspect(layout.format),
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        this.view = unsafe { this.device.device.create_image_view(&view_info, None) }
            .context("Failed to create depth image view")?;

        Ok(this)
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn layout(&self) -> DepthStencilLayout {
        self.layout
    }
}

impl Drop for DepthStencil {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.device.free_memory(self.memory, None);
            }
        }
    }
}

/// Texture description. Pixel data holds every mip level back to back,
/// largest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSamplerLayout {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
    pub bytes_per_pixel: u32,
}

impl ImageSamplerLayout {
    /// Single-level RGBA8 texture
    pub fn rgba8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format: vk::Format::R8G8B8A8_UNORM,
            bytes_per_pixel: 4,
        }
    }

    /// Bytes needed for all mip levels
    pub fn required_bytes(&self) -> usize {
        (0..self.mip_levels)
            .map(|level| {
                let (w, h) = mip_extent(self.width, self.height, level);
                (w * h * self.bytes_per_pixel) as usize
            })
            .sum()
    }
}

fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// Buffer-to-image copies for each mip level of tightly packed data
pub fn copy_regions(layout: &ImageSamplerLayout) -> Vec<vk::BufferImageCopy> {
    let mut offset = 0u64;
    (0..layout.mip_levels)
        .map(|level| {
            let (width, height) = mip_extent(layout.width, layout.height, level);
            let region = vk::BufferImageCopy {
                buffer_offset: offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            offset += u64::from(width * height * layout.bytes_per_pixel);
            region
        })
        .collect()
}

/// Access masks and stages for an image layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            }
        }
        _ => TransitionMasks {
            src_access: vk::AccessFlags::MEMORY_WRITE,
            dst_access: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
        },
    }
}

/// Sampled texture with view and sampler
pub struct ImageSampler {
    image: vk::Image,
    allocation: Option<Allocation>,
    view: vk::ImageView,
    sampler: vk::Sampler,
    layout: ImageSamplerLayout,
    device: Arc<VulkanDevice>,
}

impl ImageSampler {
    /// Upload `data` and wait for the copy to finish
    pub fn new(
        device: Arc<VulkanDevice>,
        pool: &CommandPool,
        data: &[u8],
        layout: ImageSamplerLayout,
    ) -> Result<Self> {
        let required = layout.required_bytes();
        if data.len() < required {
            return Err(RenderError::TextureSizeMismatch {
                actual: data.len(),
                expected: required,
            }
            .into());
        }

        let staging = Buffer::with_data(device.clone(), BufferType::Transfer, &data[..required])?;

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: layout.width,
                height: layout.height,
                depth: 1,
            })
            .mip_levels(layout.mip_levels)
            .array_layers(1)
            .format(layout.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .context("Failed to create texture image")?;

        let mut this = Self {
            image,
            allocation: None,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            layout,
            device,
        };

        let requirements = unsafe { this.device.device.get_image_memory_requirements(image) };
        let allocation = this
            .device
            .allocator()
            .allocate(&AllocationCreateDesc {
                name: "texture",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate texture memory")?;

        let bound = unsafe {
            this.device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        this.allocation = Some(allocation);
        bound.context("Failed to bind texture memory")?;

        this.upload(pool, &staging)?;
        this.view = this.create_view()?;
        this.sampler = this.create_sampler()?;

        log::debug!(
            "Uploaded {}x{} texture ({} mips)",
            layout.width,
            layout.height,
            layout.mip_levels
        );

        Ok(this)
    }

    fn upload(&self, pool: &CommandPool, staging: &Buffer) -> Result<()> {
        let setup = SetupCommandBuffer::begin(pool)?;
        let cmd = setup.handle();

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: self.layout.mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        };

        self.transition(
            cmd,
            range,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );

        let regions = copy_regions(&self.layout);
        unsafe {
            self.device.device.cmd_copy_buffer_to_image(
                cmd,
                staging.handle(),
                self.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        }

        self.transition(
            cmd,
            range,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        // The staging buffer must outlive this wait
        setup.submit_and_wait()
    }

    fn transition(
        &self,
        cmd: vk::CommandBuffer,
        range: vk::ImageSubresourceRange,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) {
        let masks = transition_masks(old, new);
        let barrier = vk::ImageMemoryBarrier::builder()
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access)
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(range)
            .build();

        unsafe {
            self.device.device.cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn create_view(&self) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.layout.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: self.layout.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe { self.device.device.create_image_view(&view_info, None) }
            .context("Failed to create texture view")
    }

    fn create_sampler(&self) -> Result<vk::Sampler> {
        let anisotropy = self.device.features.sampler_anisotropy == vk::TRUE;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mip_lod_bias(0.0)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(self.layout.mip_levels as f32)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy {
                self.device.properties.limits.max_sampler_anisotropy
            } else {
                1.0
            })
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE);

        unsafe { self.device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create sampler")
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn layout(&self) -> ImageSamplerLayout {
        self.layout
    }
}

impl Drop for ImageSampler {
    fn drop(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.device.destroy_sampler(self.sampler, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.device.destroy_image_view(self.view, None);
            }
            self.device.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::error!("Failed to free texture memory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_formats_get_stencil_aspect() {
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth_aspect(vk::Format::D16_UNORM), vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn mip_regions_are_packed_back_to_back() {
        let layout = ImageSamplerLayout {
            mip_levels: 3,
            ..ImageSamplerLayout::rgba8(8, 4)
        };
        let regions = copy_regions(&layout);

        assert_eq!(regions.len(), 3);
        // 8x4, 4x2, 2x1 at 4 bytes per pixel
        assert_eq!(regions[0].buffer_offset, 0);
        assert_eq!(regions[1].buffer_offset, 128);
        assert_eq!(regions[2].buffer_offset, 128 + 32);
        assert_eq!(regions[2].image_extent.width, 2);
        assert_eq!(regions[2].image_extent.height, 1);
        assert_eq!(regions[2].image_subresource.mip_level, 2);
        assert_eq!(layout.required_bytes(), 128 + 32 + 8);
    }

    #[test]
    fn mip_extent_never_reaches_zero() {
        let layout = ImageSamplerLayout {
            mip_levels: 4,
            ..ImageSamplerLayout::rgba8(4, 1)
        };
        let regions = copy_regions(&layout);
        assert_eq!(regions[3].image_extent.width, 1);
        assert_eq!(regions[3].image_extent.height, 1);
    }

    #[test]
    fn upload_transitions_use_transfer_then_shader_read() {
        let to_transfer = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(to_transfer.src_access, vk::AccessFlags::empty());
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_transfer.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let to_shader = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(to_shader.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_shader.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_shader.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn depth_layout_follows_extent() {
        let layout = DepthStencilLayout::new(vk::Format::D32_SFLOAT, 1920, 1080)
            .with_extent(vk::Extent2D {
                width: 800,
                height: 600,
            });
        assert_eq!((layout.width, layout.height), (800, 600));
        assert_eq!(layout.format, vk::Format::D32_SFLOAT);
    }
}
