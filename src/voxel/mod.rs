//! Voxel data structures: cells, materials, chunks and the chunk grid

pub mod voxel;
pub mod material;
pub mod chunk;
pub mod grid;

pub use voxel::Voxel;
pub use material::{materials, MaterialDef, MaterialId, MaterialRegistry};
pub use chunk::{BoundarySnapshot, ChunkCoord, ChunkState, Face, VoxelChunk, DEFAULT_CHUNK_SIZE};
pub use grid::{ChunkEntry, NeighborFaces, VoxelGrid};
