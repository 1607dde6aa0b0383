//! Error types for the voxel world

use glam::IVec3;
use thiserror::Error;

use crate::voxel::chunk::ChunkCoord;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("cell {cell} is outside chunk bounds [0, {size})")]
    OutOfRange { cell: IVec3, size: u32 },

    #[error("chunk {0:?} is not loaded")]
    ChunkNotLoaded(ChunkCoord),

    #[error("chunk {0:?} not found")]
    NotFound(ChunkCoord),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("generation failed for chunk {coord:?}: {reason}")]
    GenerationFailure { coord: ChunkCoord, reason: String },

    #[error("invalid edit: {0}")]
    InvalidEdit(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
