//! Procedural terrain generation

pub mod generator;
pub use generator::{ConstantDensity, DensityFunction, GeneratedChunk, TerrainDensity, TerrainParams, WorldGenerator};
