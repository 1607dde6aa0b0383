//! Chunk surface extraction with greedy quad merging.
//!
//! For each of the six face directions the extractor walks the chunk layer
//! by layer, builds a 2D mask of exposed faces and merges it into
//! rectangles. Cells across the chunk boundary are read from the
//! neighbor snapshots; a missing neighbor counts as solid so no boundary
//! faces appear until the neighbor is known.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::IVec3;

use crate::streaming::CancelToken;
use crate::voxel::{Face, MaterialId, MaterialRegistry, NeighborFaces, VoxelChunk};
use super::buffer::{MeshBuffer, MeshVertex, Submesh};
use super::greedy::{merge_layer, Quad};

/// Converts chunk voxel data into a `MeshBuffer`.
#[derive(Clone, Debug)]
pub struct MeshExtractor {
    materials: Arc<MaterialRegistry>,
}

impl MeshExtractor {
    pub fn new(materials: Arc<MaterialRegistry>) -> Self {
        Self { materials }
    }

    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    /// Extract the surface of `chunk`.
    ///
    /// Output is a pure function of the chunk content and the neighbor
    /// snapshots. An all-air chunk yields an empty buffer.
    pub fn extract(&self, chunk: &VoxelChunk, neighbors: &NeighborFaces) -> MeshBuffer {
        self.run(chunk, neighbors, None)
            .unwrap_or_else(|| MeshBuffer::empty(chunk.coord(), chunk.version()))
    }

    /// Like `extract`, but checks `cancel` once per layer and returns
    /// `None` as soon as it is set.
    pub fn extract_cancellable(
        &self,
        chunk: &VoxelChunk,
        neighbors: &NeighborFaces,
        cancel: &CancelToken,
    ) -> Option<MeshBuffer> {
        self.run(chunk, neighbors, Some(cancel))
    }

    fn run(
        &self,
        chunk: &VoxelChunk,
        neighbors: &NeighborFaces,
        cancel: Option<&CancelToken>,
    ) -> Option<MeshBuffer> {
        let cancelled = || cancel.is_some_and(CancelToken::is_cancelled);
        let mut builder = MeshBuilder::default();
        if !chunk.is_empty() {
            let mut scratch = LayerScratch::new(chunk.size() as usize);
            for face in Face::ALL {
                for layer in 0..chunk.size() {
                    if cancelled() {
                        return None;
                    }
                    self.extract_layer(chunk, neighbors, face, layer, &mut scratch, &mut builder);
                }
            }
        }
        if cancelled() {
            return None;
        }
        Some(builder.finish(chunk))
    }

    fn extract_layer(
        &self,
        chunk: &VoxelChunk,
        neighbors: &NeighborFaces,
        face: Face,
        layer: u32,
        scratch: &mut LayerScratch,
        builder: &mut MeshBuilder,
    ) {
        let size = chunk.size();
        let d = face.axis();
        let (ua, va) = face.plane_axes();
        let normal = face.normal();
        let on_boundary = layer as i32 == face.boundary_layer(size);
        let outside = neighbors
            .get(face)
            .filter(|snapshot| snapshot.size() == size);

        scratch.reset();
        let mut any = false;
        let mut p = IVec3::ZERO;
        p[d] = layer as i32;
        for v in 0..size {
            for u in 0..size {
                p[ua] = u as i32;
                p[va] = v as i32;
                let cell = chunk.at(p.x as u32, p.y as u32, p.z as u32);
                if cell.is_air() {
                    continue;
                }

                let neighbor = if on_boundary {
                    match outside {
                        Some(snapshot) => snapshot.get(u, v),
                        None => continue,
                    }
                } else {
                    let q = p + normal;
                    chunk.at(q.x as u32, q.y as u32, q.z as u32)
                };

                if !self.materials.occludes(neighbor, cell) {
                    scratch.mask[(v * size + u) as usize] = Some(cell.material);
                    any = true;
                }
            }
        }

        if !any {
            return;
        }
        let n = size as usize;
        merge_layer(&scratch.mask, &mut scratch.visited, n, n, &mut scratch.quads);
        for quad in &scratch.quads {
            builder.push_quad(face, layer, quad, self.materials.color(quad.material));
        }
    }
}

/// Per-layer working buffers reused across layers
struct LayerScratch {
    mask: Vec<Option<MaterialId>>,
    visited: Vec<bool>,
    quads: Vec<Quad>,
}

impl LayerScratch {
    fn new(size: usize) -> Self {
        Self {
            mask: vec![None; size * size],
            visited: vec![false; size * size],
            quads: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.mask.fill(None);
        self.visited.fill(false);
    }
}

#[derive(Default)]
struct MeshBuilder {
    vertices: Vec<MeshVertex>,
    /// Triangle indices grouped by material, ascending
    indices: BTreeMap<MaterialId, Vec<u32>>,
}

impl MeshBuilder {
    fn push_quad(&mut self, face: Face, layer: u32, quad: &Quad, color: [u8; 3]) {
        let d = face.axis();
        let (ua, va) = face.plane_axes();
        let plane = layer as f32 + if face.is_positive() { 1.0 } else { 0.0 };
        let (u0, v0) = (quad.u as f32, quad.v as f32);
        let (u1, v1) = (u0 + quad.width as f32, v0 + quad.height as f32);

        // (u, v, normal) is right-handed, so this order is counter-clockwise
        // seen from the positive side
        let corners = if face.is_positive() {
            [(u0, v0), (u1, v0), (u1, v1), (u0, v1)]
        } else {
            [(u0, v0), (u0, v1), (u1, v1), (u1, v0)]
        };

        let normal = face.normal().as_vec3().to_array();
        let base = self.vertices.len() as u32;
        for (cu, cv) in corners {
            let mut position = [0.0f32; 3];
            position[d] = plane;
            position[ua] = cu;
            position[va] = cv;
            let uv = [cu - u0, cv - v0];
            self.vertices.push(MeshVertex::new(position, normal, uv, color, quad.material));
        }

        self.indices
            .entry(quad.material)
            .or_default()
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn finish(self, chunk: &VoxelChunk) -> MeshBuffer {
        let mut mesh = MeshBuffer::empty(chunk.coord(), chunk.version());
        mesh.vertices = self.vertices;
        for (material, list) in self.indices {
            mesh.submeshes.push(Submesh {
                material,
                index_start: mesh.indices.len() as u32,
                index_count: list.len() as u32,
            });
            mesh.indices.extend(list);
        }
        mesh
    }
}
