//! Mesh output of surface extraction

use bytemuck::{Pod, Zeroable};

use crate::voxel::{ChunkCoord, MaterialId};

/// Vertex layout handed to the renderer (must match the shader input)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    /// Chunk-local position (12 bytes, offset 0)
    pub position: [f32; 3],
    /// Face normal (12 bytes, offset 12)
    pub normal: [f32; 3],
    /// Texture coordinate in voxel units, repeats once per covered cell (8 bytes, offset 24)
    pub uv: [f32; 2],
    /// Material color, RGBA8 (4 bytes, offset 32)
    pub color: [u8; 4],
    /// Material id (4 bytes, offset 36)
    pub material: u32,
}

impl MeshVertex {
    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2], color: [u8; 3], material: MaterialId) -> Self {
        Self {
            position,
            normal,
            uv,
            color: [color[0], color[1], color[2], 255],
            material: material as u32,
        }
    }
}

/// Contiguous index range drawn with one material
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submesh {
    pub material: MaterialId,
    pub index_start: u32,
    pub index_count: u32,
}

/// Triangle surface of one chunk, tagged with the chunk version it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshBuffer {
    pub coord: ChunkCoord,
    pub version: u64,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    /// Index ranges per material, ascending by material id
    pub submeshes: Vec<Submesh>,
}

impl MeshBuffer {
    pub fn empty(coord: ChunkCoord, version: u64) -> Self {
        Self {
            coord,
            version,
            vertices: Vec::new(),
            indices: Vec::new(),
            submeshes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn quad_count(&self) -> usize {
        self.vertices.len() / 4
    }

    /// Raw vertex bytes for upload
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Raw index bytes for upload
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Approximate heap footprint in bytes
    pub fn memory_size(&self) -> usize {
        self.vertices.len() * std::mem::size_of::<MeshVertex>()
            + self.indices.len() * std::mem::size_of::<u32>()
            + self.submeshes.len() * std::mem::size_of::<Submesh>()
    }
}
