//! Noise-based procedural terrain and chunk generation

use std::sync::Arc;

use glam::IVec3;
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::edit::{EditOp, EditStore};
use crate::streaming::CancelToken;
use crate::voxel::{materials, ChunkCoord, Voxel, VoxelChunk};

/// Deterministic voxel content as a function of world position.
pub trait DensityFunction: Send + Sync {
    fn sample(&self, pos: IVec3) -> Voxel;
}

impl<F> DensityFunction for F
where
    F: Fn(IVec3) -> Voxel + Send + Sync,
{
    fn sample(&self, pos: IVec3) -> Voxel {
        self(pos)
    }
}

/// The same voxel everywhere
#[derive(Clone, Copy, Debug)]
pub struct ConstantDensity(pub Voxel);

impl DensityFunction for ConstantDensity {
    fn sample(&self, _pos: IVec3) -> Voxel {
        self.0
    }
}

/// Parameters controlling terrain generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u32,
    pub scale: f64,            // Noise frequency per voxel
    pub base_height: f64,      // Height where noise is zero
    pub height_amplitude: f64, // Height change per unit of noise
    pub octaves: usize,        // FBM octaves (detail levels)
    pub persistence: f64,      // FBM persistence
    pub lacunarity: f64,       // FBM lacunarity
    pub sand_level: i32,       // Columns lower than this get a sand top
    pub soil_depth: i32,       // Grass/sand layer thickness above stone
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 0,
            scale: 0.01,
            base_height: 7.5,
            height_amplitude: 15.0,
            octaves: 5,
            persistence: 0.05,
            lacunarity: 2.5,
            sand_level: 4,
            soil_depth: 3,
        }
    }
}

/// Height-field terrain: stone under a thin grass or sand layer.
pub struct TerrainDensity {
    params: TerrainParams,
    noise: Fbm<Perlin>,
}

impl TerrainDensity {
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<Perlin>::new(params.seed)
            .set_octaves(params.octaves)
            .set_persistence(params.persistence)
            .set_lacunarity(params.lacunarity);

        Self { params, noise }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Surface height of the column at (x, z); cells below it are solid
    pub fn height_at(&self, x: i32, z: i32) -> i32 {
        let p = &self.params;
        let n = self.noise.get([x as f64 * p.scale, z as f64 * p.scale]);
        (p.base_height + n * p.height_amplitude).round() as i32
    }

    /// Material of the cell at height `y` in a column of the given height
    pub fn voxel_in_column(&self, y: i32, height: i32) -> Voxel {
        if y >= height {
            Voxel::AIR
        } else if y < height - self.params.soil_depth {
            Voxel::new(materials::STONE)
        } else if height < self.params.sand_level {
            Voxel::new(materials::SAND)
        } else {
            Voxel::new(materials::GRASS)
        }
    }
}

impl DensityFunction for TerrainDensity {
    fn sample(&self, pos: IVec3) -> Voxel {
        self.voxel_in_column(pos.y, self.height_at(pos.x, pos.z))
    }
}

/// A freshly generated chunk
#[derive(Debug)]
pub struct GeneratedChunk {
    pub chunk: VoxelChunk,
    /// Number of recorded edits replayed on top of the base content
    pub replayed: usize,
    /// Set when the recorded edits could not be replayed; the chunk then
    /// holds base content only
    pub replay_error: Option<Error>,
}

/// Fills chunks from a density function and replays recorded edits.
pub struct WorldGenerator {
    density: Arc<dyn DensityFunction>,
    store: Arc<dyn EditStore>,
    chunk_size: u32,
}

impl WorldGenerator {
    pub fn new(density: Arc<dyn DensityFunction>, store: Arc<dyn EditStore>, chunk_size: u32) -> Self {
        Self { density, store, chunk_size }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Generate a chunk with its recorded edits applied.
    ///
    /// A replay failure is logged and the base content is returned.
    pub fn generate(&self, coord: ChunkCoord) -> Result<VoxelChunk> {
        self.generate_cancellable(coord, &CancelToken::new())
            .map(|generated| generated.map(|g| g.chunk))?
            .ok_or_else(|| Error::Worker(format!("generation of {:?} cancelled", coord)))
    }

    /// Generate a chunk, checking `cancel` once per Y layer.
    ///
    /// Returns `Ok(None)` if cancelled. Only allocation failure is an error.
    pub fn generate_cancellable(&self, coord: ChunkCoord, cancel: &CancelToken) -> Result<Option<GeneratedChunk>> {
        let Some(mut chunk) = self.fill_base(coord, Some(cancel))? else {
            return Ok(None);
        };

        let (replayed, replay_error) = match self.replay(&mut chunk) {
            Ok(n) => (n, None),
            Err(e) => {
                log::error!("Chunk {:?}: {}; keeping base content", coord, e);
                chunk = match self.fill_base(coord, None)? {
                    Some(base) => base,
                    None => return Ok(None),
                };
                (0, Some(e))
            }
        };

        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(GeneratedChunk { chunk, replayed, replay_error }))
    }

    /// Base content only, ignoring recorded edits
    pub fn generate_base(&self, coord: ChunkCoord) -> Result<VoxelChunk> {
        self.fill_base(coord, None)?
            .ok_or_else(|| Error::Worker(format!("generation of {:?} cancelled", coord)))
    }

    fn fill_base(&self, coord: ChunkCoord, cancel: Option<&CancelToken>) -> Result<Option<VoxelChunk>> {
        let mut chunk = VoxelChunk::try_new(coord, self.chunk_size)?;
        let origin = coord.voxel_origin(self.chunk_size);
        for y in 0..self.chunk_size {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Ok(None);
            }
            chunk.fill_layer(y, |local| self.density.sample(origin + local));
        }
        Ok(Some(chunk))
    }

    /// Replay the chunk's recorded edits in recording order.
    ///
    /// All records are decoded before any is applied, so a malformed record
    /// leaves the chunk untouched.
    pub fn replay(&self, chunk: &mut VoxelChunk) -> Result<usize> {
        let coord = chunk.coord();
        let origin = coord.voxel_origin(self.chunk_size);
        let records = self.store.edits_in_chunk(coord);

        let ops = records
            .iter()
            .map(|record| {
                let local = record.position - origin;
                if !chunk.contains(local) {
                    return Err(format!("edit #{} at {} lies outside the chunk", record.seq, record.position));
                }
                record
                    .op()
                    .map(|op| (local, op))
                    .map_err(|e| format!("edit #{}: {}", record.seq, e))
            })
            .collect::<std::result::Result<Vec<(IVec3, EditOp)>, String>>()
            .map_err(|reason| Error::GenerationFailure { coord, reason })?;

        for (local, op) in &ops {
            let current = chunk.get_cell(*local)?;
            if let Some(next) = op.apply(current) {
                chunk.set_cell(*local, next)?;
            }
        }
        if !ops.is_empty() {
            log::debug!("Replayed {} edits into chunk {:?}", ops.len(), coord);
        }
        Ok(ops.len())
    }
}
