//! Surface extraction: voxel chunks to triangle meshes

pub mod buffer;
pub mod greedy;
pub mod extractor;

pub use buffer::{MeshBuffer, MeshVertex, Submesh};
pub use extractor::MeshExtractor;
pub use greedy::Quad;
