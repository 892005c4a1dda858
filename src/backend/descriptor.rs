// Descriptor pool - one descriptor set per pool
//
// Descriptors are grouped by kind to size the pool, then written at the
// binding they declare. Bindings are checked against the pipeline layout
// before anything is created.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::buffer::{Buffer, BufferType};
use super::error::RenderError;
use super::image::ImageSampler;
use super::pipeline_layout::{DescriptorKind, PipelineLayout};
use super::VulkanDevice;

#[derive(Debug, Clone, Copy)]
pub enum DescriptorResource {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

/// A resource bound at one set binding
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    binding: u32,
    kind: DescriptorKind,
    resource: DescriptorResource,
}

impl Descriptor {
    /// Uniform buffer covering the whole buffer
    pub fn uniform_buffer(binding: u32, buffer: &Buffer) -> Result<Self, RenderError> {
        if buffer.kind() != BufferType::Uniform {
            return Err(RenderError::DescriptorKindMismatch {
                expected: DescriptorKind::UniformBuffer.name(),
            });
        }
        Ok(Self::from_buffer_info(binding, buffer.descriptor_info()))
    }

    /// Combined image sampler in shader-read layout
    pub fn image_sampler(binding: u32, sampler: &ImageSampler) -> Self {
        Self::from_image_info(binding, sampler.descriptor_info())
    }

    pub fn from_buffer_info(binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        Self {
            binding,
            kind: DescriptorKind::UniformBuffer,
            resource: DescriptorResource::Buffer(info),
        }
    }

    pub fn from_image_info(binding: u32, info: vk::DescriptorImageInfo) -> Self {
        Self {
            binding,
            kind: DescriptorKind::CombinedImageSampler,
            resource: DescriptorResource::Image(info),
        }
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn kind(&self) -> DescriptorKind {
        self.kind
    }

    pub fn resource(&self) -> &DescriptorResource {
        &self.resource
    }
}

/// Pool sizes derived from a descriptor list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorPoolPlan {
    counts: BTreeMap<DescriptorKind, u32>,
}

impl DescriptorPoolPlan {
    pub fn new(descriptors: &[Descriptor]) -> Self {
        let mut counts = BTreeMap::new();
        for descriptor in descriptors {
            *counts.entry(descriptor.kind()).or_insert(0) += 1;
        }
        Self { counts }
    }

    /// Descriptors of one kind
    pub fn count(&self, kind: DescriptorKind) -> u32 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    /// One pool size per kind present
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.counts
            .iter()
            .map(|(kind, &descriptor_count)| vk::DescriptorPoolSize {
                ty: kind.descriptor_type(),
                descriptor_count,
            })
            .collect()
    }
}

/// Check every descriptor targets a binding the layout declares, with the
/// same descriptor type
pub fn validate_bindings(
    descriptors: &[Descriptor],
    bindings: &[vk::DescriptorSetLayoutBinding],
) -> Result<(), RenderError> {
    if descriptors.is_empty() {
        return Err(RenderError::EmptyDescriptorList);
    }

    for descriptor in descriptors {
        let matches = bindings.iter().any(|binding| {
            binding.binding == descriptor.binding()
                && binding.descriptor_type == descriptor.kind().descriptor_type()
        });
        if !matches {
            return Err(RenderError::DescriptorBindingMismatch {
                binding: descriptor.binding(),
            });
        }
    }
    Ok(())
}

pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    set_layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    device: Arc<VulkanDevice>,
}

impl DescriptorPool {
    /// Create the set layout, the pool, the single set, and write every
    /// descriptor into it
    pub fn new(
        device: Arc<VulkanDevice>,
        descriptors: &[Descriptor],
        layout: &PipelineLayout,
    ) -> Result<Self> {
        validate_bindings(descriptors, layout.set_bindings())?;

        let layout_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(layout.set_bindings());
        let set_layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let plan = DescriptorPoolPlan::new(descriptors);
        let pool_sizes = plan.pool_sizes();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1);

        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(set_layout, None) };
                return Err(e).context("Failed to create descriptor pool");
            }
        };

        // From here on Drop cleans up
        let mut this = Self {
            pool,
            set_layout,
            set: vk::DescriptorSet::null(),
            device,
        };

        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        this.set = unsafe { this.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor set")?[0];

        let writes: Vec<vk::WriteDescriptorSet> = descriptors
            .iter()
            .map(|descriptor| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(this.set)
                    .dst_binding(descriptor.binding())
                    .dst_array_element(0)
                    .descriptor_type(descriptor.kind().descriptor_type());
                match descriptor.resource() {
                    DescriptorResource::Buffer(info) => {
                        write.buffer_info(std::slice::from_ref(info)).build()
                    }
                    DescriptorResource::Image(info) => {
                        write.image_info(std::slice::from_ref(info)).build()
                    }
                }
            })
            .collect();

        unsafe { this.device.device.update_descriptor_sets(&writes, &[]) };

        log::debug!(
            "Created descriptor pool: {} descriptors over {} kinds",
            plan.total(),
            pool_sizes.len()
        );

        Ok(this)
    }

    pub fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its sets
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::pipeline_layout::{
        DescriptorLayout, ShaderInfo, ShaderInputLayout, ShaderStage,
    };

    fn uniform(binding: u32) -> Descriptor {
        Descriptor::from_buffer_info(binding, vk::DescriptorBufferInfo::default())
    }

    fn sampler(binding: u32) -> Descriptor {
        Descriptor::from_image_info(binding, vk::DescriptorImageInfo::default())
    }

    fn layout(kinds: &[DescriptorKind]) -> PipelineLayout {
        let mut input = ShaderInputLayout::new(12);
        for &kind in kinds {
            input.append_descriptor(DescriptorLayout::new(ShaderStage::Vertex, kind));
        }
        PipelineLayout::new(
            vec![ShaderInfo::new(ShaderStage::Vertex, "v.spv")],
            &input,
        )
        .unwrap()
    }

    #[test]
    fn plan_partitions_descriptors_by_kind() {
        let descriptors = [uniform(0), sampler(1), uniform(2), sampler(3), uniform(4)];
        let plan = DescriptorPoolPlan::new(&descriptors);

        assert_eq!(plan.total(), descriptors.len() as u32);
        assert_eq!(plan.count(DescriptorKind::UniformBuffer), 3);
        assert_eq!(plan.count(DescriptorKind::CombinedImageSampler), 2);

        let sizes = plan.pool_sizes();
        assert_eq!(sizes.len(), 2);
        let summed: u32 = sizes.iter().map(|s| s.descriptor_count).sum();
        assert_eq!(summed, plan.total());
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 2);
    }

    #[test]
    fn single_kind_gives_single_pool_size() {
        let plan = DescriptorPoolPlan::new(&[uniform(0)]);
        assert_eq!(plan.pool_sizes().len(), 1);
        assert_eq!(plan.count(DescriptorKind::CombinedImageSampler), 0);
    }

    #[test]
    fn matching_bindings_validate() {
        let layout = layout(&[DescriptorKind::UniformBuffer, DescriptorKind::CombinedImageSampler]);
        assert_eq!(
            validate_bindings(&[uniform(0), sampler(1)], layout.set_bindings()),
            Ok(())
        );
    }

    #[test]
    fn wrong_binding_or_kind_is_rejected() {
        let layout = layout(&[DescriptorKind::UniformBuffer, DescriptorKind::CombinedImageSampler]);

        assert_eq!(
            validate_bindings(&[uniform(1)], layout.set_bindings()),
            Err(RenderError::DescriptorBindingMismatch { binding: 1 })
        );
        assert_eq!(
            validate_bindings(&[sampler(5)], layout.set_bindings()),
            Err(RenderError::DescriptorBindingMismatch { binding: 5 })
        );
        assert_eq!(
            validate_bindings(&[], layout.set_bindings()),
            Err(RenderError::EmptyDescriptorList)
        );
    }
}
