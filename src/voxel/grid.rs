//! Sparse grid owning every resident chunk.
//!
//! The coordinate map is the only globally shared mutable structure: lookups
//! take a read lock, inserts and removals take the write lock. Each entry
//! carries its own locks for voxel data, published boundary faces, lifecycle
//! state and the current mesh.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glam::IVec3;

use crate::core::{Error, Result};
use crate::mesh::MeshBuffer;
use super::chunk::{BoundarySnapshot, ChunkCoord, ChunkState, Face, VoxelChunk};
use super::voxel::Voxel;

/// Boundary layers of the six face-adjacent neighbors of a chunk.
///
/// Indexed by the face of the chunk being meshed; each snapshot is the
/// neighbor's opposite face. `None` means the neighbor is unloaded.
#[derive(Clone, Debug, Default)]
pub struct NeighborFaces {
    faces: [Option<Arc<BoundarySnapshot>>; 6],
}

impl NeighborFaces {
    /// Every neighbor unloaded
    pub fn unloaded() -> Self {
        Self::default()
    }

    /// Every neighbor presents a uniform layer (e.g. open air around a test chunk)
    pub fn uniform(chunk_size: u32, voxel: Voxel) -> Self {
        let mut faces = Self::default();
        for face in Face::ALL {
            faces.set(face, Arc::new(BoundarySnapshot::uniform(face.opposite(), chunk_size, voxel)));
        }
        faces
    }

    pub fn set(&mut self, face: Face, snapshot: Arc<BoundarySnapshot>) {
        self.faces[face.index()] = Some(snapshot);
    }

    pub fn clear(&mut self, face: Face) {
        self.faces[face.index()] = None;
    }

    pub fn get(&self, face: Face) -> Option<&BoundarySnapshot> {
        self.faces[face.index()].as_deref()
    }

    /// Number of neighbors with data
    pub fn loaded_count(&self) -> usize {
        self.faces.iter().filter(|f| f.is_some()).count()
    }
}

/// A resident chunk plus its streaming bookkeeping.
pub struct ChunkEntry {
    coord: ChunkCoord,
    chunk: RwLock<VoxelChunk>,
    faces: RwLock<[Arc<BoundarySnapshot>; 6]>,
    state: Mutex<ChunkState>,
    mesh_dirty: AtomicBool,
    mesh: Mutex<Option<Arc<MeshBuffer>>>,
}

impl ChunkEntry {
    fn new(chunk: VoxelChunk) -> Self {
        let faces = chunk.boundaries().map(Arc::new);
        Self {
            coord: chunk.coord(),
            chunk: RwLock::new(chunk),
            faces: RwLock::new(faces),
            state: Mutex::new(ChunkState::Generating),
            mesh_dirty: AtomicBool::new(false),
            mesh: Mutex::new(None),
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Shared access to the voxel data
    pub fn read(&self) -> RwLockReadGuard<'_, VoxelChunk> {
        self.chunk.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access to the voxel data.
    ///
    /// Callers that change boundary cells must call `publish_faces` before
    /// releasing the guard.
    pub fn write(&self) -> RwLockWriteGuard<'_, VoxelChunk> {
        self.chunk.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current version of the voxel data
    pub fn version(&self) -> u64 {
        self.read().version()
    }

    /// Latest published snapshot of one face
    pub fn face(&self, face: Face) -> Arc<BoundarySnapshot> {
        let faces = self.faces.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&faces[face.index()])
    }

    /// Republish the given faces from `chunk` (which must be this entry's data).
    pub fn publish_faces(&self, chunk: &VoxelChunk, which: &[Face]) {
        if which.is_empty() {
            return;
        }
        let mut faces = self.faces.write().unwrap_or_else(PoisonError::into_inner);
        for &face in which {
            faces[face.index()] = Arc::new(chunk.boundary(face));
        }
    }

    /// Replace the voxel data wholesale (generation finished) and publish all faces.
    pub fn install(&self, chunk: VoxelChunk) {
        let mut guard = self.write();
        *guard = chunk;
        self.publish_faces(&guard, &Face::ALL);
    }

    fn lock_state(&self) -> MutexGuard<'_, ChunkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ChunkState {
        *self.lock_state()
    }

    pub(crate) fn set_state(&self, state: ChunkState) {
        *self.lock_state() = state;
    }

    pub fn has_data(&self) -> bool {
        self.state().has_data()
    }

    pub fn mark_mesh_dirty(&self) {
        self.mesh_dirty.store(true, Ordering::Release);
    }

    pub fn is_mesh_dirty(&self) -> bool {
        self.mesh_dirty.load(Ordering::Acquire)
    }

    /// Clear the mesh-dirty flag, returning its previous value
    pub(crate) fn take_mesh_dirty(&self) -> bool {
        self.mesh_dirty.swap(false, Ordering::AcqRel)
    }

    /// Mesh currently handed to the renderer, if any
    pub fn mesh(&self) -> Option<Arc<MeshBuffer>> {
        self.mesh.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn set_mesh(&self, mesh: Option<Arc<MeshBuffer>>) -> Option<Arc<MeshBuffer>> {
        let mut slot = self.mesh.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, mesh)
    }
}

impl std::fmt::Debug for ChunkEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkEntry")
            .field("coord", &self.coord)
            .field("state", &self.state())
            .field("mesh_dirty", &self.is_mesh_dirty())
            .finish()
    }
}

/// Container mapping chunk coordinates to resident chunks
pub struct VoxelGrid {
    chunk_size: u32,
    max_chunks: usize,
    chunks: RwLock<HashMap<ChunkCoord, Arc<ChunkEntry>>>,
}

impl VoxelGrid {
    /// Create an empty grid holding at most `max_chunks` chunks
    pub fn new(chunk_size: u32, max_chunks: usize) -> Self {
        Self {
            chunk_size,
            max_chunks,
            chunks: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn map(&self) -> RwLockReadGuard<'_, HashMap<ChunkCoord, Arc<ChunkEntry>>> {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_mut(&self) -> RwLockWriteGuard<'_, HashMap<ChunkCoord, Arc<ChunkEntry>>> {
        self.chunks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a chunk; `None` means unloaded
    pub fn get(&self, coord: ChunkCoord) -> Option<Arc<ChunkEntry>> {
        self.map().get(&coord).cloned()
    }

    /// Return the chunk at `coord`, creating an empty one in state Generating
    /// if absent. Concurrent callers for the same coordinate get the same entry.
    pub fn get_or_create(&self, coord: ChunkCoord) -> Result<Arc<ChunkEntry>> {
        if let Some(entry) = self.get(coord) {
            return Ok(entry);
        }

        let mut map = self.map_mut();
        if let Some(entry) = map.get(&coord) {
            return Ok(Arc::clone(entry));
        }
        if map.len() >= self.max_chunks {
            return Err(Error::ResourceExhausted(format!(
                "grid holds {} chunks (limit {})",
                map.len(),
                self.max_chunks
            )));
        }

        let entry = Arc::new(ChunkEntry::new(VoxelChunk::try_new(coord, self.chunk_size)?));
        map.insert(coord, Arc::clone(&entry));
        Ok(entry)
    }

    /// Release a chunk. Fails with `NotFound` if absent.
    pub fn remove(&self, coord: ChunkCoord) -> Result<Arc<ChunkEntry>> {
        self.map_mut().remove(&coord).ok_or(Error::NotFound(coord))
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.map().contains_key(&coord)
    }

    /// Get the number of resident chunks
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Resident coordinates in sorted order
    pub fn coords(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<_> = self.map().keys().copied().collect();
        coords.sort();
        coords
    }

    /// Resident entries sorted by coordinate
    pub fn entries(&self) -> Vec<Arc<ChunkEntry>> {
        let mut entries: Vec<_> = self.map().values().cloned().collect();
        entries.sort_by_key(|e| e.coord());
        entries
    }

    /// Voxel at a world coordinate, `None` if its chunk has no data yet
    pub fn voxel_at(&self, world: IVec3) -> Option<Voxel> {
        let (coord, local) = ChunkCoord::from_voxel(world, self.chunk_size);
        let entry = self.get(coord)?;
        if !entry.has_data() {
            return None;
        }
        entry.read().get_cell(local).ok()
    }

    /// Collect the neighbor boundary snapshots needed to mesh `coord`.
    pub fn neighbor_faces(&self, coord: ChunkCoord) -> NeighborFaces {
        let mut faces = NeighborFaces::unloaded();
        for face in Face::ALL {
            if let Some(neighbor) = self.get(coord.neighbor(face)) {
                if neighbor.has_data() {
                    faces.set(face, neighbor.face(face.opposite()));
                }
            }
        }
        faces
    }

    /// Mark every resident face neighbor of `coord` mesh-dirty
    pub fn mark_neighbors_dirty(&self, coord: ChunkCoord) -> usize {
        let mut marked = 0;
        for neighbor in coord.neighbors() {
            if let Some(entry) = self.get(neighbor) {
                entry.mark_mesh_dirty();
                marked += 1;
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_grid() {
        let grid = VoxelGrid::new(8, 16);
        assert_eq!(grid.len(), 0);
        assert!(grid.is_empty());
        assert!(grid.get(ChunkCoord::new(0, 0, 0)).is_none());
    }

    #[test]
    fn test_get_or_create() {
        let grid = VoxelGrid::new(8, 16);
        let coord = ChunkCoord::new(1, 2, 3);

        let entry = grid.get_or_create(coord).unwrap();
        assert_eq!(entry.coord(), coord);
        assert_eq!(entry.state(), ChunkState::Generating);
        assert!(entry.read().is_empty());
        assert_eq!(grid.len(), 1);

        let again = grid.get_or_create(coord).unwrap();
        assert!(Arc::ptr_eq(&entry, &again));
        assert_eq!(grid.len(), 1);
    }

    #[test]
    fn test_concurrent_create_returns_single_instance() {
        let grid = Arc::new(VoxelGrid::new(8, 64));
        let coord = ChunkCoord::new(4, -1, 0);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let grid = Arc::clone(&grid);
                thread::spawn(move || grid.get_or_create(coord).unwrap())
            })
            .collect();
        let entries: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(grid.len(), 1);
        for entry in &entries[1..] {
            assert!(Arc::ptr_eq(&entries[0], entry));
        }
    }

    #[test]
    fn test_remove() {
        let grid = VoxelGrid::new(8, 16);
        let coord = ChunkCoord::new(0, 0, 0);
        grid.get_or_create(coord).unwrap();

        assert!(grid.remove(coord).is_ok());
        assert!(!grid.contains(coord));
        assert!(matches!(grid.remove(coord), Err(Error::NotFound(c)) if c == coord));
    }

    #[test]
    fn test_capacity_exhausted() {
        let grid = VoxelGrid::new(4, 2);
        grid.get_or_create(ChunkCoord::new(0, 0, 0)).unwrap();
        grid.get_or_create(ChunkCoord::new(1, 0, 0)).unwrap();

        let result = grid.get_or_create(ChunkCoord::new(2, 0, 0));
        assert!(matches!(result, Err(Error::ResourceExhausted(_))));
        // Existing chunks are still returned at capacity
        assert!(grid.get_or_create(ChunkCoord::new(0, 0, 0)).is_ok());
    }

    #[test]
    fn test_voxel_at_requires_data() {
        let grid = VoxelGrid::new(4, 16);
        let coord = ChunkCoord::new(-1, 0, 0);
        let entry = grid.get_or_create(coord).unwrap();
        entry.install(VoxelChunk::filled(coord, 4, Voxel::new(2)).unwrap());

        // Still generating: treated as unloaded
        assert_eq!(grid.voxel_at(IVec3::new(-1, 0, 0)), None);

        entry.set_state(ChunkState::Ready);
        assert_eq!(grid.voxel_at(IVec3::new(-1, 0, 0)), Some(Voxel::new(2)));
        assert_eq!(grid.voxel_at(IVec3::new(0, 0, 0)), None);
    }

    #[test]
    fn test_neighbor_faces() {
        let grid = VoxelGrid::new(4, 16);
        let center = ChunkCoord::new(0, 0, 0);
        let east = center.neighbor(Face::PosX);

        let entry = grid.get_or_create(east).unwrap();
        let mut chunk = VoxelChunk::try_new(east, 4).unwrap();
        chunk.set_cell(IVec3::new(0, 1, 2), Voxel::new(3)).unwrap();
        entry.install(chunk);

        // Generating neighbors do not contribute
        assert_eq!(grid.neighbor_faces(center).loaded_count(), 0);

        entry.set_state(ChunkState::Ready);
        let faces = grid.neighbor_faces(center);
        assert_eq!(faces.loaded_count(), 1);
        let snapshot = faces.get(Face::PosX).unwrap();
        assert_eq!(snapshot.face(), Face::NegX);
        assert_eq!(snapshot.get(1, 2), Voxel::new(3));
        assert!(faces.get(Face::NegX).is_none());
    }

    #[test]
    fn test_published_faces_follow_edits() {
        let grid = VoxelGrid::new(4, 16);
        let coord = ChunkCoord::new(0, 0, 0);
        let entry = grid.get_or_create(coord).unwrap();

        let before = entry.face(Face::NegY);
        {
            let mut chunk = entry.write();
            chunk.set_cell(IVec3::new(2, 0, 1), Voxel::new(1)).unwrap();
            let touched = chunk.faces_touching(IVec3::new(2, 0, 1));
            entry.publish_faces(&chunk, &touched);
        }
        let after = entry.face(Face::NegY);

        // Old snapshot is unaffected, new one sees the edit
        assert_eq!(before.get(1, 2), Voxel::AIR);
        assert_eq!(after.get(1, 2), Voxel::new(1));
        assert_eq!(after.version(), 1);
    }

    #[test]
    fn test_mesh_dirty_flag() {
        let grid = VoxelGrid::new(4, 16);
        let a = grid.get_or_create(ChunkCoord::new(0, 0, 0)).unwrap();
        grid.get_or_create(ChunkCoord::new(1, 0, 0)).unwrap();

        assert!(!a.is_mesh_dirty());
        assert_eq!(grid.mark_neighbors_dirty(ChunkCoord::new(1, 0, 0)), 1);
        assert!(a.is_mesh_dirty());
        assert!(a.take_mesh_dirty());
        assert!(!a.is_mesh_dirty());
    }
}
