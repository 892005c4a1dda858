// Draw recording
//
// Commands name buffers either by handle or by a slot in the draw info's
// buffer table, and counts either literally or derived from a buffer's size.
// Slots are resolved against the draw info when the command is recorded.

use anyhow::{Context, Result};
use ash::vk;
use std::collections::HashMap;
use std::sync::Arc;

use super::buffer::{Buffer, BufferType};
use super::command::CommandPool;
use super::error::RenderError;
use super::pipeline::Pipeline;

/// Position of a buffer within a draw info, by type then insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferSlot {
    pub kind: BufferType,
    pub index: usize,
}

impl BufferSlot {
    pub fn new(kind: BufferType, index: usize) -> Self {
        Self { kind, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferArg {
    Handle(vk::Buffer),
    Slot(BufferSlot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountArg {
    Value(u32),
    /// Size of the buffer in bytes
    ByteLength(BufferSlot),
    /// Size of the buffer divided by the element stride
    Elements { slot: BufferSlot, stride: u32 },
}

impl CountArg {
    /// Number of indices held by an index buffer
    pub fn indices(slot: BufferSlot, index_type: vk::IndexType) -> Self {
        let stride = if index_type == vk::IndexType::UINT16 { 2 } else { 4 };
        CountArg::Elements { slot, stride }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawCommand {
    BindPipeline,
    BindDescriptorSets { sets: Vec<vk::DescriptorSet> },
    BindVertexBuffers { buffers: Vec<BufferArg> },
    BindIndexBuffer { buffer: BufferArg, index_type: vk::IndexType },
    DrawIndexed { index_count: CountArg, instance_count: u32 },
    Draw { vertex_count: CountArg, instance_count: u32 },
}

/// Lookups a command needs at record time
pub trait DrawSource {
    fn buffer_handle(&self, slot: BufferSlot) -> Result<vk::Buffer, RenderError>;
    fn buffer_size(&self, slot: BufferSlot) -> Result<usize, RenderError>;
    fn pipeline(&self) -> Option<(vk::Pipeline, vk::PipelineLayout)>;
}

/// A draw command with every argument made concrete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedCommand {
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers(Vec<vk::Buffer>),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    DrawIndexed { index_count: u32, instance_count: u32 },
    Draw { vertex_count: u32, instance_count: u32 },
}

fn resolve_buffer<S: DrawSource + ?Sized>(
    source: &S,
    arg: BufferArg,
) -> Result<vk::Buffer, RenderError> {
    match arg {
        BufferArg::Handle(buffer) => Ok(buffer),
        BufferArg::Slot(slot) => source.buffer_handle(slot),
    }
}

fn resolve_count<S: DrawSource + ?Sized>(source: &S, arg: CountArg) -> Result<u32, RenderError> {
    let count = match arg {
        CountArg::Value(value) => return Ok(value),
        CountArg::ByteLength(slot) => source.buffer_size(slot)? as u64,
        CountArg::Elements { slot, stride } => {
            (source.buffer_size(slot)? / stride.max(1) as usize) as u64
        }
    };
    u32::try_from(count).map_err(|_| RenderError::CountOverflow(count))
}

impl DrawCommand {
    pub fn resolve<S: DrawSource + ?Sized>(&self, source: &S) -> Result<ResolvedCommand, RenderError> {
        let pipeline = || source.pipeline().ok_or(RenderError::MissingPipeline);

        Ok(match self {
            DrawCommand::BindPipeline => ResolvedCommand::BindPipeline(pipeline()?.0),
            DrawCommand::BindDescriptorSets { sets } => ResolvedCommand::BindDescriptorSets {
                layout: pipeline()?.1,
                sets: sets.clone(),
            },
            DrawCommand::BindVertexBuffers { buffers } => ResolvedCommand::BindVertexBuffers(
                buffers
                    .iter()
                    .map(|&arg| resolve_buffer(source, arg))
                    .collect::<Result<_, _>>()?,
            ),
            DrawCommand::BindIndexBuffer { buffer, index_type } => {
                ResolvedCommand::BindIndexBuffer(resolve_buffer(source, *buffer)?, *index_type)
            }
            DrawCommand::DrawIndexed {
                index_count,
                instance_count,
            } => ResolvedCommand::DrawIndexed {
                index_count: resolve_count(source, *index_count)?,
                instance_count: *instance_count,
            },
            DrawCommand::Draw {
                vertex_count,
                instance_count,
            } => ResolvedCommand::Draw {
                vertex_count: resolve_count(source, *vertex_count)?,
                instance_count: *instance_count,
            },
        })
    }
}

impl ResolvedCommand {
    pub fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            match self {
                ResolvedCommand::BindPipeline(pipeline) => {
                    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, *pipeline);
                }
                ResolvedCommand::BindDescriptorSets { layout, sets } => {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        *layout,
                        0,
                        sets,
                        &[],
                    );
                }
                ResolvedCommand::BindVertexBuffers(buffers) => {
                    let offsets = vec![0; buffers.len()];
                    device.cmd_bind_vertex_buffers(cmd, 0, buffers, &offsets);
                }
                ResolvedCommand::BindIndexBuffer(buffer, index_type) => {
                    device.cmd_bind_index_buffer(cmd, *buffer, 0, *index_type);
                }
                ResolvedCommand::DrawIndexed {
                    index_count,
                    instance_count,
                } => {
                    device.cmd_draw_indexed(cmd, *index_count, *instance_count, 0, 0, 0);
                }
                ResolvedCommand::Draw {
                    vertex_count,
                    instance_count,
                } => {
                    device.cmd_draw(cmd, *vertex_count, *instance_count, 0, 0);
                }
            }
        }
    }
}

/// A pipeline plus the buffers one object draws with
#[derive(Default)]
pub struct DrawInfo {
    pipeline: Option<Arc<Pipeline>>,
    buffers: HashMap<BufferType, Vec<Buffer>>,
}

impl DrawInfo {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline: Some(pipeline),
            buffers: HashMap::new(),
        }
    }

    pub fn set_pipeline(&mut self, pipeline: Arc<Pipeline>) {
        self.pipeline = Some(pipeline);
    }

    /// Take ownership of a buffer; the slot addresses it in draw commands
    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferSlot {
        let kind = buffer.kind();
        let list = self.buffers.entry(kind).or_default();
        list.push(buffer);
        BufferSlot::new(kind, list.len() - 1)
    }

    pub fn buffer(&self, slot: BufferSlot) -> Result<&Buffer, RenderError> {
        self.buffers
            .get(&slot.kind)
            .and_then(|list| list.get(slot.index))
            .ok_or(RenderError::MissingBuffer {
                kind: slot.kind,
                index: slot.index,
            })
    }

    pub fn buffer_mut(&mut self, slot: BufferSlot) -> Result<&mut Buffer, RenderError> {
        self.buffers
            .get_mut(&slot.kind)
            .and_then(|list| list.get_mut(slot.index))
            .ok_or(RenderError::MissingBuffer {
                kind: slot.kind,
                index: slot.index,
            })
    }

    /// Overwrite the start of the buffer at `slot`
    pub fn update_buffer(&mut self, slot: BufferSlot, data: &[u8]) -> Result<()> {
        self.buffer_mut(slot)?.update(data)
    }
}

impl DrawSource for DrawInfo {
    fn buffer_handle(&self, slot: BufferSlot) -> Result<vk::Buffer, RenderError> {
        self.buffer(slot).map(Buffer::handle)
    }

    fn buffer_size(&self, slot: BufferSlot) -> Result<usize, RenderError> {
        self.buffer(slot).map(Buffer::size)
    }

    fn pipeline(&self) -> Option<(vk::Pipeline, vk::PipelineLayout)> {
        self.pipeline.as_ref().map(|p| (p.handle(), p.layout()))
    }
}

/// One primary command buffer recording the commands of its draw infos
pub struct DrawBuffer {
    buffer: vk::CommandBuffer,
    draw_infos: Vec<DrawInfo>,
    pool: Arc<CommandPool>,
}

impl DrawBuffer {
    pub fn new(pool: Arc<CommandPool>, draw_infos: Vec<DrawInfo>) -> Result<Self> {
        let buffer = pool.allocate_primary(1)?[0];
        Ok(Self {
            buffer,
            draw_infos,
            pool,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Start recording; the previous recording is discarded
    pub fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device()
                .begin_command_buffer(self.buffer, &begin_info)
                .context("Failed to begin draw command buffer")
        }
    }

    pub fn end(&self) -> Result<()> {
        unsafe {
            self.device()
                .end_command_buffer(self.buffer)
                .context("Failed to end draw command buffer")
        }
    }

    /// Record `command` once for every draw info
    pub fn record(&self, command: &DrawCommand) -> Result<()> {
        for info in &self.draw_infos {
            command.resolve(info)?.record(self.device(), self.buffer);
        }
        Ok(())
    }

    /// Record `command` for one draw info only
    pub fn record_single(&self, index: usize, command: &DrawCommand) -> Result<()> {
        let info = self
            .draw_infos
            .get(index)
            .with_context(|| format!("No draw info at index {}", index))?;
        command.resolve(info)?.record(self.device(), self.buffer);
        Ok(())
    }

    pub fn add_draw_info(&mut self, info: DrawInfo) -> usize {
        self.draw_infos.push(info);
        self.draw_infos.len() - 1
    }

    pub fn draw_info(&self, index: usize) -> Option<&DrawInfo> {
        self.draw_infos.get(index)
    }

    pub fn draw_info_mut(&mut self, index: usize) -> Option<&mut DrawInfo> {
        self.draw_infos.get_mut(index)
    }

    fn device(&self) -> &ash::Device {
        &self.pool.device().device
    }
}

impl Drop for DrawBuffer {
    fn drop(&mut self) {
        self.pool.free(&[self.buffer]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[derive(Default)]
    struct MockSource {
        buffers: HashMap<BufferSlot, (vk::Buffer, usize)>,
        pipeline: Option<(vk::Pipeline, vk::PipelineLayout)>,
    }

    impl MockSource {
        fn with(mut self, slot: BufferSlot, raw: u64, size: usize) -> Self {
            self.buffers.insert(slot, (vk::Buffer::from_raw(raw), size));
            self
        }
    }

    impl DrawSource for MockSource {
        fn buffer_handle(&self, slot: BufferSlot) -> Result<vk::Buffer, RenderError> {
            self.buffers
                .get(&slot)
                .map(|&(buffer, _)| buffer)
                .ok_or(RenderError::MissingBuffer {
                    kind: slot.kind,
                    index: slot.index,
                })
        }

        fn buffer_size(&self, slot: BufferSlot) -> Result<usize, RenderError> {
            self.buffers
                .get(&slot)
                .map(|&(_, size)| size)
                .ok_or(RenderError::MissingBuffer {
                    kind: slot.kind,
                    index: slot.index,
                })
        }

        fn pipeline(&self) -> Option<(vk::Pipeline, vk::PipelineLayout)> {
            self.pipeline
        }
    }

    const VERTICES: BufferSlot = BufferSlot {
        kind: BufferType::Vertex,
        index: 0,
    };
    const INDICES: BufferSlot = BufferSlot {
        kind: BufferType::Index,
        index: 0,
    };

    fn cube_source() -> MockSource {
        MockSource {
            pipeline: Some((vk::Pipeline::from_raw(7), vk::PipelineLayout::from_raw(8))),
            ..Default::default()
        }
        .with(VERTICES, 100, 24 * 32)
        .with(INDICES, 200, 36 * 4)
    }

    #[test]
    fn slots_resolve_to_buffer_handles() {
        let source = cube_source();

        let bind = DrawCommand::BindVertexBuffers {
            buffers: vec![BufferArg::Slot(VERTICES), BufferArg::Handle(vk::Buffer::from_raw(5))],
        };
        assert_eq!(
            bind.resolve(&source),
            Ok(ResolvedCommand::BindVertexBuffers(vec![
                vk::Buffer::from_raw(100),
                vk::Buffer::from_raw(5),
            ]))
        );

        let index = DrawCommand::BindIndexBuffer {
            buffer: BufferArg::Slot(INDICES),
            index_type: vk::IndexType::UINT32,
        };
        assert_eq!(
            index.resolve(&source),
            Ok(ResolvedCommand::BindIndexBuffer(
                vk::Buffer::from_raw(200),
                vk::IndexType::UINT32
            ))
        );
    }

    #[test]
    fn index_count_is_elements_not_bytes() {
        let source = cube_source();

        let draw = DrawCommand::DrawIndexed {
            index_count: CountArg::indices(INDICES, vk::IndexType::UINT32),
            instance_count: 1,
        };
        assert_eq!(
            draw.resolve(&source),
            Ok(ResolvedCommand::DrawIndexed {
                index_count: 36,
                instance_count: 1
            })
        );

        let bytes = DrawCommand::Draw {
            vertex_count: CountArg::ByteLength(INDICES),
            instance_count: 2,
        };
        assert_eq!(
            bytes.resolve(&source),
            Ok(ResolvedCommand::Draw {
                vertex_count: 144,
                instance_count: 2
            })
        );
    }

    #[test]
    fn pipeline_commands_use_the_source_pipeline() {
        let source = cube_source();
        assert_eq!(
            DrawCommand::BindPipeline.resolve(&source),
            Ok(ResolvedCommand::BindPipeline(vk::Pipeline::from_raw(7)))
        );

        let sets = vec![vk::DescriptorSet::from_raw(9)];
        assert_eq!(
            DrawCommand::BindDescriptorSets { sets: sets.clone() }.resolve(&source),
            Ok(ResolvedCommand::BindDescriptorSets {
                layout: vk::PipelineLayout::from_raw(8),
                sets
            })
        );
    }

    #[test]
    fn missing_slot_or_pipeline_is_an_error() {
        let source = MockSource::default();

        let draw = DrawCommand::DrawIndexed {
            index_count: CountArg::ByteLength(INDICES),
            instance_count: 1,
        };
        assert_eq!(
            draw.resolve(&source),
            Err(RenderError::MissingBuffer {
                kind: BufferType::Index,
                index: 0
            })
        );
        assert_eq!(
            DrawCommand::BindPipeline.resolve(&source),
            Err(RenderError::MissingPipeline)
        );
    }

    #[test]
    fn uint16_indices_use_two_byte_stride() {
        assert_eq!(
            CountArg::indices(INDICES, vk::IndexType::UINT16),
            CountArg::Elements {
                slot: INDICES,
                stride: 2
            }
        );
    }
}
