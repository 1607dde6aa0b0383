//! Hand-off of chunk meshes to the rendering collaborator

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::mesh::MeshBuffer;
use crate::voxel::ChunkCoord;

/// World-space placement of a chunk mesh (mesh positions are chunk-local)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkTransform {
    pub coord: ChunkCoord,
    /// World position of the chunk's minimum corner
    pub translation: Vec3,
}

impl ChunkTransform {
    pub fn new(coord: ChunkCoord, chunk_size: u32) -> Self {
        Self {
            coord,
            translation: coord.world_origin(chunk_size),
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
    }

    /// Transform a chunk-local position to world space
    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.translation + local
    }
}

/// Receives meshes of chunks that reach the Meshed state.
pub trait RenderSink {
    /// A chunk has a new mesh. Replaces any mesh previously sent for `coord`.
    fn mesh_ready(&mut self, coord: ChunkCoord, mesh: Arc<MeshBuffer>, transform: ChunkTransform);

    /// The chunk left the world; drop its mesh.
    fn mesh_removed(&mut self, coord: ChunkCoord);
}

/// Discards everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn mesh_ready(&mut self, _coord: ChunkCoord, _mesh: Arc<MeshBuffer>, _transform: ChunkTransform) {}

    fn mesh_removed(&mut self, _coord: ChunkCoord) {}
}

/// Keeps the current mesh of every chunk, for tools and tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    meshes: HashMap<ChunkCoord, (Arc<MeshBuffer>, ChunkTransform)>,
    pub ready_count: usize,
    pub removed_count: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mesh(&self, coord: ChunkCoord) -> Option<&Arc<MeshBuffer>> {
        self.meshes.get(&coord).map(|(mesh, _)| mesh)
    }

    pub fn transform(&self, coord: ChunkCoord) -> Option<ChunkTransform> {
        self.meshes.get(&coord).map(|(_, t)| *t)
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.meshes.contains_key(&coord)
    }

    /// Coordinates with a live mesh, sorted
    pub fn coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<_> = self.meshes.keys().copied().collect();
        coords.sort();
        coords
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Sum of triangles over all live meshes
    pub fn triangle_count(&self) -> usize {
        self.meshes.values().map(|(mesh, _)| mesh.triangle_count()).sum()
    }

    /// Approximate bytes held by all live meshes
    pub fn memory_size(&self) -> usize {
        self.meshes.values().map(|(mesh, _)| mesh.memory_size()).sum()
    }
}

impl RenderSink for RecordingSink {
    fn mesh_ready(&mut self, coord: ChunkCoord, mesh: Arc<MeshBuffer>, transform: ChunkTransform) {
        self.ready_count += 1;
        self.meshes.insert(coord, (mesh, transform));
    }

    fn mesh_removed(&mut self, coord: ChunkCoord) {
        self.removed_count += 1;
        self.meshes.remove(&coord);
    }
}
