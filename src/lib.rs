//! Voxelworld - chunked voxel terrain with greedy meshing and
//! viewpoint-driven streaming

pub mod core;
pub mod voxel;
pub mod terrain;
pub mod mesh;
pub mod edit;
pub mod streaming;
pub mod render;
pub mod world;

pub use crate::core::{Error, Result, WorldConfig};
pub use world::VoxelWorld;
