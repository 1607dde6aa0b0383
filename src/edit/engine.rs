//! Runtime voxel editing.

use std::sync::Arc;

use glam::IVec3;

use crate::core::{Error, Result};
use crate::voxel::{ChunkCoord, Voxel, VoxelGrid};
use super::log::EditStore;
use super::op::{EditOp, EditOutcome};

/// Applies edits to resident chunks, records them and invalidates meshes.
pub struct EditEngine {
    grid: Arc<VoxelGrid>,
    store: Arc<dyn EditStore>,
}

impl EditEngine {
    pub fn new(grid: Arc<VoxelGrid>, store: Arc<dyn EditStore>) -> Self {
        Self { grid, store }
    }

    pub fn store(&self) -> &Arc<dyn EditStore> {
        &self.store
    }

    /// Apply an edit at a world voxel coordinate.
    ///
    /// Fails with `ChunkNotLoaded` if the owning chunk is absent or has no
    /// data yet. The edit is recorded before the chunk is touched; if
    /// recording fails the world is left unchanged.
    pub fn apply_edit(&self, world: IVec3, op: EditOp) -> Result<EditOutcome> {
        op.validate()?;
        let (coord, local) = ChunkCoord::from_voxel(world, self.grid.chunk_size());
        let entry = self.grid.get(coord).ok_or(Error::ChunkNotLoaded(coord))?;

        let version = {
            let mut chunk = entry.write();
            if !entry.has_data() {
                return Err(Error::ChunkNotLoaded(coord));
            }

            let current = chunk.get_cell(local)?;
            let Some(next) = op.apply(current) else {
                log::trace!("Edit {:?} at {} changes nothing", op, world);
                return Ok(EditOutcome::Unchanged);
            };

            self.store.record(world, op)?;
            chunk.set_cell(local, next)?;
            let touched = chunk.faces_touching(local);
            entry.publish_faces(&chunk, &touched);
            chunk.version()
        };

        entry.mark_mesh_dirty();
        self.grid.mark_neighbors_dirty(coord);
        log::debug!("Applied {:?} at {} (chunk {:?} now v{})", op, world, coord, version);
        Ok(EditOutcome::Applied { version })
    }

    /// Current voxel at a world coordinate, `None` if not resident
    pub fn voxel_at(&self, world: IVec3) -> Option<Voxel> {
        self.grid.voxel_at(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::EditLog;
    use crate::voxel::{materials, ChunkState, VoxelChunk};
    use std::sync::Mutex;

    fn setup() -> (Arc<VoxelGrid>, Arc<Mutex<EditLog>>, EditEngine) {
        let grid = Arc::new(VoxelGrid::new(4, 64));
        let log = Arc::new(Mutex::new(EditLog::in_memory(4)));
        let engine = EditEngine::new(Arc::clone(&grid), log.clone());
        (grid, log, engine)
    }

    fn load(grid: &VoxelGrid, coord: ChunkCoord, voxel: Voxel) {
        let entry = grid.get_or_create(coord).unwrap();
        entry.install(VoxelChunk::filled(coord, grid.chunk_size(), voxel).unwrap());
        entry.set_state(ChunkState::Meshed);
    }

    #[test]
    fn test_edit_unloaded_chunk() {
        let (grid, log, engine) = setup();
        let result = engine.apply_edit(IVec3::new(1, 1, 1), EditOp::Add(1));
        assert!(matches!(result, Err(Error::ChunkNotLoaded(c)) if c == ChunkCoord::new(0, 0, 0)));

        // Present but still generating
        grid.get_or_create(ChunkCoord::new(0, 0, 0)).unwrap();
        let result = engine.apply_edit(IVec3::new(1, 1, 1), EditOp::Add(1));
        assert!(matches!(result, Err(Error::ChunkNotLoaded(_))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_add_then_remove() {
        let (grid, log, engine) = setup();
        load(&grid, ChunkCoord::new(0, 0, 0), Voxel::AIR);

        let outcome = engine.apply_edit(IVec3::new(1, 2, 1), EditOp::Add(materials::PLACED)).unwrap();
        assert_eq!(outcome, EditOutcome::Applied { version: 1 });
        assert_eq!(engine.voxel_at(IVec3::new(1, 2, 1)), Some(Voxel::new(materials::PLACED)));

        let outcome = engine.apply_edit(IVec3::new(1, 2, 1), EditOp::Remove).unwrap();
        assert_eq!(outcome, EditOutcome::Applied { version: 2 });
        assert_eq!(engine.voxel_at(IVec3::new(1, 2, 1)), Some(Voxel::AIR));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_unchanged_edit_not_recorded() {
        let (grid, log, engine) = setup();
        load(&grid, ChunkCoord::new(0, 0, 0), Voxel::new(materials::STONE));
        let entry = grid.get(ChunkCoord::new(0, 0, 0)).unwrap();

        // Placing into an occupied cell does nothing
        let outcome = engine.apply_edit(IVec3::new(1, 1, 1), EditOp::Add(materials::SAND)).unwrap();
        assert_eq!(outcome, EditOutcome::Unchanged);
        assert!(log.lock().unwrap().is_empty());
        assert!(!entry.is_mesh_dirty());
        assert_eq!(entry.version(), 0);
    }

    #[test]
    fn test_invalid_edit() {
        let (grid, _log, engine) = setup();
        load(&grid, ChunkCoord::new(0, 0, 0), Voxel::AIR);
        assert!(matches!(
            engine.apply_edit(IVec3::ZERO, EditOp::Paint(0)),
            Err(Error::InvalidEdit(_))
        ));
    }

    #[test]
    fn test_boundary_edit_dirties_neighbors() {
        let (grid, _log, engine) = setup();
        let center = ChunkCoord::new(0, 0, 0);
        let east = ChunkCoord::new(1, 0, 0);
        let west = ChunkCoord::new(-1, 0, 0);
        for coord in [center, east, west] {
            load(&grid, coord, Voxel::new(materials::STONE));
        }

        engine.apply_edit(IVec3::new(3, 1, 1), EditOp::Remove).unwrap();

        for coord in [center, east, west] {
            assert!(grid.get(coord).unwrap().is_mesh_dirty(), "{:?}", coord);
        }

        // The east neighbor sees the hole through the published boundary
        let faces = grid.neighbor_faces(east);
        let west_face = faces.get(crate::voxel::Face::NegX).unwrap();
        assert_eq!(west_face.get(1, 1), Voxel::AIR);
        assert_eq!(west_face.version(), 1);
    }

    #[test]
    fn test_paint_keeps_meta_in_chunk() {
        let (grid, _log, engine) = setup();
        let coord = ChunkCoord::new(0, -1, 0);
        load(&grid, coord, Voxel::new(materials::STONE).with_meta(6));

        engine.apply_edit(IVec3::new(0, -1, 0), EditOp::Paint(materials::GRASS)).unwrap();
        assert_eq!(
            engine.voxel_at(IVec3::new(0, -1, 0)),
            Some(Voxel::new(materials::GRASS).with_meta(6))
        );
    }
}
