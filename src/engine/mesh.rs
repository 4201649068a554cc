// GPU mesh types: flattens a `RibbonMesh` into vertex/index buffers.
//
//   samples → extrude() → RibbonMesh → RenderMesh::from_ribbon() → GPU
//
// Top and bottom faces share vertices through the index buffer (their vertex
// normals are already +Y / -Y). Walls and caps are flat shaded: each of their
// triangles gets three fresh vertices carrying the face normal.

use glam::{Vec2, Vec3};

use super::path::PathTransform;
use super::ribbon::{RibbonMesh, SubmeshKind};

// ============================================================================
// GPU VERTEX
// ============================================================================

/// GPU-ready ribbon vertex.
///   @location(0) position: vec3<f32>
///   @location(1) normal:   vec3<f32>
///   @location(2) uv:       vec2<f32>
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RibbonVertex {
    pub position: Vec3,
    pub normal:   Vec3,
    pub uv:       Vec2,
}

impl RibbonVertex {
    fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position, normal, uv }
    }

    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<RibbonVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<Vec3>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[Vec3; 2]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}

// ============================================================================
// RENDER MESH
// ============================================================================

/// GPU-ready triangulated mesh.
/// Upload vertex_bytes() to a VERTEX buffer, index_bytes() to an INDEX buffer.
#[derive(Debug, Clone, Default)]
pub struct RenderMesh {
    pub vertices: Vec<RibbonVertex>,
    pub indices:  Vec<u32>,
}

impl RenderMesh {
    /// Flatten a ribbon in its path's local space.
    pub fn from_ribbon(ribbon: &RibbonMesh) -> Self {
        Self::from_ribbon_in(ribbon, &PathTransform::IDENTITY)
    }

    /// Flatten a ribbon and place it in world space with `transform`.
    pub fn from_ribbon_in(ribbon: &RibbonMesh, transform: &PathTransform) -> Self {
        let position = |i: usize| transform.to_world(ribbon.vertices[i]);
        let direction = |n: Vec3| transform.vector_to_world(n).normalize_or_zero();

        let mut vertices: Vec<RibbonVertex> = (0..ribbon.vertex_count())
            .map(|i| RibbonVertex::new(position(i), direction(ribbon.normals[i]), ribbon.uvs[i]))
            .collect();
        let mut indices: Vec<u32> = Vec::new();

        for submesh in &ribbon.submeshes {
            match submesh.kind {
                SubmeshKind::Top | SubmeshKind::Bottom => {
                    indices.extend(submesh.triangles.iter().flatten());
                }
                _ => {
                    for (triangle, normal) in submesh.triangles.iter().zip(&submesh.face_normals) {
                        let normal = direction(*normal);
                        for &i in triangle {
                            indices.push(vertices.len() as u32);
                            let i = i as usize;
                            vertices.push(RibbonVertex::new(position(i), normal, ribbon.uvs[i]));
                        }
                    }
                }
            }
        }

        Self { vertices, indices }
    }

    /// Cast vertex slice to raw bytes for wgpu buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Cast index slice to raw bytes for wgpu buffer upload.
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn index_count(&self) -> usize  { self.indices.len() }

    pub fn is_empty(&self) -> bool { self.indices.is_empty() }
}
