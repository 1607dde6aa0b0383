//! `VoxelWorld`: grid, generator, mesher, scheduler and edit engine wired
//! together from one configuration.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use glam::{IVec3, Vec3};

use crate::core::{Result, WorldConfig};
use crate::edit::{EditEngine, EditLog, EditOp, EditOutcome, EditStore};
use crate::mesh::MeshExtractor;
use crate::render::RenderSink;
use crate::streaming::{StreamingScheduler, StreamingStats};
use crate::terrain::{DensityFunction, TerrainDensity, WorldGenerator};
use crate::voxel::{ChunkCoord, ChunkState, MaterialRegistry, Voxel, VoxelGrid};

/// A streamed, editable voxel world.
pub struct VoxelWorld {
    config: WorldConfig,
    grid: Arc<VoxelGrid>,
    materials: Arc<MaterialRegistry>,
    scheduler: StreamingScheduler,
    edits: EditEngine,
    /// Set when the world owns its edit log
    edit_log: Option<Arc<Mutex<EditLog>>>,
}

impl VoxelWorld {
    /// Build a world from explicit collaborators.
    pub fn new(
        config: WorldConfig,
        density: Arc<dyn DensityFunction>,
        materials: MaterialRegistry,
        store: Arc<dyn EditStore>,
    ) -> Result<Self> {
        config.validate()?;

        let size = config.chunk_size;
        let grid = Arc::new(VoxelGrid::new(size, config.streaming.max_resident_chunks));
        let materials = Arc::new(materials);
        let generator = Arc::new(WorldGenerator::new(density, Arc::clone(&store), size));
        let extractor = Arc::new(MeshExtractor::new(Arc::clone(&materials)));
        let scheduler = StreamingScheduler::new(config.streaming.clone(), Arc::clone(&grid), generator, extractor)?;
        let edits = EditEngine::new(Arc::clone(&grid), store);

        log::info!(
            "Voxel world ready: chunk size {}, load radius {}, unload radius {}",
            size,
            config.streaming.load_radius,
            config.streaming.unload_radius
        );

        Ok(Self {
            config,
            grid,
            materials,
            scheduler,
            edits,
            edit_log: None,
        })
    }

    /// Noise terrain with the built-in materials. Edits are persisted to
    /// the configured save directory, or kept in memory if there is none.
    pub fn from_config(config: WorldConfig) -> Result<Self> {
        config.validate()?;

        let log = match config.persistence.edit_log_path() {
            Some(path) => {
                let log = EditLog::open(&path, config.chunk_size)?;
                log::info!(
                    "Opened edit log {} ({} edits across {} chunks)",
                    path.display(),
                    log.len(),
                    log.edited_chunks().len()
                );
                log
            }
            None => EditLog::in_memory(config.chunk_size),
        };
        let log = Arc::new(Mutex::new(log));
        let density = Arc::new(TerrainDensity::new(config.terrain.clone()));

        let materials = match &config.materials_path {
            Some(path) => MaterialRegistry::load(path)?,
            None => MaterialRegistry::with_defaults(),
        };

        let mut world = Self::new(config, density, materials, log.clone())?;
        world.edit_log = Some(log);
        Ok(world)
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn grid(&self) -> &Arc<VoxelGrid> {
        &self.grid
    }

    pub fn materials(&self) -> &MaterialRegistry {
        &self.materials
    }

    pub fn scheduler(&self) -> &StreamingScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> StreamingStats {
        self.scheduler.stats()
    }

    /// Advance streaming for the current viewpoint
    pub fn tick(&mut self, viewpoint: Vec3, sink: &mut dyn RenderSink) -> Result<StreamingStats> {
        self.scheduler.tick(viewpoint, sink)
    }

    /// Tick until every chunk around `viewpoint` is meshed.
    pub fn run_until_idle(
        &mut self,
        viewpoint: Vec3,
        sink: &mut dyn RenderSink,
        timeout: Duration,
    ) -> Result<StreamingStats> {
        self.scheduler.run_until_idle(viewpoint, sink, timeout)
    }

    /// Edit one voxel. The edit is recorded and the affected meshes are
    /// rebuilt on a later tick.
    pub fn apply_edit(&self, position: IVec3, op: EditOp) -> Result<EditOutcome> {
        self.edits.apply_edit(position, op)
    }

    /// Voxel at a world position, `None` if its chunk has no data
    pub fn voxel_at(&self, position: IVec3) -> Option<Voxel> {
        self.edits.voxel_at(position)
    }

    pub fn chunk_state(&self, coord: ChunkCoord) -> ChunkState {
        self.scheduler.chunk_state(coord)
    }

    /// Compact the owned edit log. Returns the number of records removed.
    pub fn compact_edits(&self) -> Result<usize> {
        match &self.edit_log {
            Some(log) => log.lock().unwrap_or_else(PoisonError::into_inner).compact(),
            None => Ok(0),
        }
    }

    /// Evict every chunk, notifying the sink of removed meshes.
    pub fn shutdown(&mut self, sink: &mut dyn RenderSink) {
        self.scheduler.clear(sink);
        log::info!("Voxel world shut down after {} ticks", self.scheduler.stats().ticks);
    }
}
