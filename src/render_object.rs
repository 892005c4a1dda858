// Render objects: vertex format, cube geometry and a spinning transform

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};
use std::mem::offset_of;
use std::sync::Arc;

use crate::backend::{
    Buffer, BufferSlot, BufferType, CommandPool, DrawBuffer, DrawInfo, InputAttribute, Pipeline,
    ShaderInputLayout, VulkanDevice,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RenderVertex {
    pub position: [f32; 3],
    pub colour: [f32; 3],
    pub uv: [f32; 2],
}

impl RenderVertex {
    /// Vertex input layout matching `shaders/cube.vert`
    pub fn input_layout() -> ShaderInputLayout {
        let mut layout = ShaderInputLayout::new(std::mem::size_of::<Self>() as u32);
        layout
            .append_attribute(InputAttribute::new(
                vk::Format::R32G32B32_SFLOAT,
                offset_of!(Self, position) as u32,
            ))
            .append_attribute(InputAttribute::new(
                vk::Format::R32G32B32_SFLOAT,
                offset_of!(Self, colour) as u32,
            ))
            .append_attribute(InputAttribute::new(
                vk::Format::R32G32_SFLOAT,
                offset_of!(Self, uv) as u32,
            ));
        layout
    }
}

/// Model, view and projection, laid out for a std140 uniform block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Transforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for Transforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

// (outward normal, u, v, colour) with u x v = normal
const FACES: [([f32; 3], [f32; 3], [f32; 3], [f32; 3]); 6] = [
    ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0], [1.0, 0.2, 0.2]),
    ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [0.2, 1.0, 1.0]),
    ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.2, 1.0, 0.2]),
    ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.2, 1.0]),
    ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.2, 0.2, 1.0]),
    ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.2]),
];

/// Cube with four vertices per face so every face gets its own UVs.
///
/// Triangles wind clockwise seen from outside.
pub fn cube(half_extent: f32) -> (Vec<RenderVertex>, Vec<u32>) {
    let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, u, v, colour) in FACES {
        let (normal, u, v) = (Vec3::from(normal), Vec3::from(u), Vec3::from(v));
        let base = vertices.len() as u32;

        for ((su, sv), uv) in corners.into_iter().zip(uvs) {
            let position = (normal + u * su + v * sv) * half_extent;
            vertices.push(RenderVertex {
                position: position.to_array(),
                colour,
                uv,
            });
        }

        // Corners run counter-clockwise around the normal; emit them reversed
        indices.extend([0, 2, 1, 0, 3, 2].map(|i| base + i));
    }

    (vertices, indices)
}

/// Position, scale and a rotation about world up and world right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub scale: Vec3,
    /// Degrees around world up
    pub yaw: f32,
    /// Degrees around world right
    pub pitch: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            scale: Vec3::ONE,
            yaw: 45.0,
            pitch: 45.0,
        }
    }
}

impl Transform {
    /// Spin both angles by `degrees`, wrapping at a full turn
    pub fn spin(&mut self, degrees: f32) {
        self.yaw = (self.yaw + degrees).rem_euclid(360.0);
        self.pitch = (self.pitch + degrees).rem_euclid(360.0);
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw.to_radians()) * Quat::from_rotation_x(self.pitch.to_radians())
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation(), self.position)
    }
}

/// Indexed mesh with its own draw buffer
pub struct RenderObject {
    pub transform: Transform,
    draw_buffer: DrawBuffer,
    vertex_slot: BufferSlot,
    index_slot: BufferSlot,
    index_count: usize,
}

impl RenderObject {
    pub fn new(
        device: Arc<VulkanDevice>,
        pool: Arc<CommandPool>,
        pipeline: Arc<Pipeline>,
        vertices: &[RenderVertex],
        indices: &[u32],
    ) -> Result<Self> {
        let mut draw_info = DrawInfo::new(pipeline);
        let vertex_slot = draw_info.add_buffer(Buffer::with_data(
            device.clone(),
            BufferType::Vertex,
            bytemuck::cast_slice(vertices),
        )?);
        let index_slot = draw_info.add_buffer(Buffer::with_data(
            device,
            BufferType::Index,
            bytemuck::cast_slice(indices),
        )?);

        let draw_buffer = DrawBuffer::new(pool, vec![draw_info])?;

        log::debug!(
            "Render object: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            transform: Transform::default(),
            draw_buffer,
            vertex_slot,
            index_slot,
            index_count: indices.len(),
        })
    }

    pub fn draw_buffer(&self) -> &DrawBuffer {
        &self.draw_buffer
    }

    pub fn vertex_slot(&self) -> BufferSlot {
        self.vertex_slot
    }

    pub fn index_slot(&self) -> BufferSlot {
        self.index_slot
    }

    pub fn index_count(&self) -> usize {
        self.index_count
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.transform.matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = RenderVertex::input_layout();
        assert_eq!(layout.stride(), 32);

        let offsets: Vec<u32> = layout.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(layout.attributes()[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn transforms_are_three_packed_matrices() {
        assert_eq!(std::mem::size_of::<Transforms>(), 3 * 64);
        let transforms = Transforms::default();
        let bytes = bytemuck::bytes_of(&transforms);
        assert_eq!(bytes.len(), 192);
    }

    #[test]
    fn cube_has_24_vertices_and_36_indices() {
        let (vertices, indices) = cube(0.5);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));

        for v in &vertices {
            assert!(v.position.iter().all(|c| c.abs() == 0.5));
        }
    }

    #[test]
    fn cube_triangles_wind_clockwise_from_outside() {
        let (vertices, indices) = cube(1.0);
        let position = |i: u32| Vec3::from(vertices[i as usize].position);

        for tri in indices.chunks(3) {
            let (a, b, c) = (position(tri[0]), position(tri[1]), position(tri[2]));
            let centre = (a + b + c) / 3.0;
            // Outward along the centre; clockwise means the face normal points in
            assert!((b - a).cross(c - a).dot(centre) < 0.0);
        }
    }

    #[test]
    fn spin_wraps_at_full_turn() {
        let mut transform = Transform::default();
        transform.spin(1.0);
        assert_relative_eq!(transform.yaw, 46.0);

        transform.yaw = 359.5;
        transform.spin(1.0);
        assert_relative_eq!(transform.yaw, 0.5);
    }

    #[test]
    fn matrix_applies_scale_then_rotation_then_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            scale: Vec3::splat(2.0),
            yaw: 90.0,
            pitch: 0.0,
        };

        let p = transform.matrix().transform_point3(Vec3::X);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, 1.0, epsilon = 1e-5);
    }
}
