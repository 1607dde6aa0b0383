//! Chunk system for managing cubic regions of voxel space

use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use super::voxel::Voxel;

/// Default number of voxels per chunk side
pub const DEFAULT_CHUNK_SIZE: u32 = 32;

/// Integer coordinate identifying a chunk in the world grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn as_ivec3(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Convert world position to chunk coordinate (one world unit per voxel)
    pub fn from_world_pos(pos: Vec3, chunk_size: u32) -> Self {
        let cs = chunk_size as f32;
        Self {
            x: (pos.x / cs).floor() as i32,
            y: (pos.y / cs).floor() as i32,
            z: (pos.z / cs).floor() as i32,
        }
    }

    /// Split a world voxel coordinate into its chunk and the chunk-local cell
    pub fn from_voxel(voxel: IVec3, chunk_size: u32) -> (Self, IVec3) {
        let cs = chunk_size as i32;
        let chunk = Self::new(voxel.x.div_euclid(cs), voxel.y.div_euclid(cs), voxel.z.div_euclid(cs));
        let local = IVec3::new(voxel.x.rem_euclid(cs), voxel.y.rem_euclid(cs), voxel.z.rem_euclid(cs));
        (chunk, local)
    }

    /// World voxel coordinate of this chunk's minimum corner
    pub fn voxel_origin(&self, chunk_size: u32) -> IVec3 {
        self.as_ivec3() * chunk_size as i32
    }

    /// Get the world-space origin (minimum corner) of this chunk
    pub fn world_origin(&self, chunk_size: u32) -> Vec3 {
        self.voxel_origin(chunk_size).as_vec3()
    }

    /// World-space center of this chunk
    pub fn center(&self, chunk_size: u32) -> Vec3 {
        self.world_origin(chunk_size) + Vec3::splat(chunk_size as f32 * 0.5)
    }

    /// Distance from `pos` to this chunk's center, in chunks
    pub fn distance_in_chunks(&self, pos: Vec3, chunk_size: u32) -> f32 {
        pos.distance(self.center(chunk_size)) / chunk_size as f32
    }

    /// Face-adjacent chunk in the given direction
    pub fn neighbor(&self, face: Face) -> Self {
        let n = self.as_ivec3() + face.normal();
        Self::new(n.x, n.y, n.z)
    }

    /// All six face-adjacent chunks, in `Face::ALL` order
    pub fn neighbors(&self) -> [ChunkCoord; 6] {
        Face::ALL.map(|face| self.neighbor(face))
    }
}

/// One of the six axis-aligned faces of a cube.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    NegX,
    PosX,
    NegY,
    PosY,
    NegZ,
    PosZ,
}

impl Face {
    /// Fixed scan order used everywhere faces are iterated
    pub const ALL: [Face; 6] = [Face::NegX, Face::PosX, Face::NegY, Face::PosY, Face::NegZ, Face::PosZ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Axis index: 0 = x, 1 = y, 2 = z
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    pub fn is_positive(self) -> bool {
        self.index() % 2 == 1
    }

    pub fn opposite(self) -> Face {
        Face::ALL[self.index() ^ 1]
    }

    /// Outward unit normal
    pub fn normal(self) -> IVec3 {
        let mut n = IVec3::ZERO;
        n[self.axis()] = if self.is_positive() { 1 } else { -1 };
        n
    }

    /// The two in-plane axes (u, v); (axis, u, v) is a cyclic permutation of (x, y, z)
    pub fn plane_axes(self) -> (usize, usize) {
        let d = self.axis();
        ((d + 1) % 3, (d + 2) % 3)
    }

    /// Layer index of this face inside a chunk of the given size
    pub fn boundary_layer(self, chunk_size: u32) -> i32 {
        if self.is_positive() { chunk_size as i32 - 1 } else { 0 }
    }
}

/// Lifecycle state of a chunk in the streaming system.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    Unloaded,
    Generating,
    Ready,
    MeshPending,
    Meshed,
    Evicting,
}

impl ChunkState {
    /// Whether the chunk's voxel data is resident and readable
    pub fn has_data(self) -> bool {
        matches!(self, ChunkState::Ready | ChunkState::MeshPending | ChunkState::Meshed)
    }
}

/// Read-only copy of one outer voxel layer of a chunk.
///
/// Cells are indexed by the face's (u, v) plane axes, `v * size + u`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundarySnapshot {
    face: Face,
    size: u32,
    version: u64,
    cells: Vec<Voxel>,
}

impl BoundarySnapshot {
    /// A face layer of uniform content (used for synthetic neighbors)
    pub fn uniform(face: Face, size: u32, voxel: Voxel) -> Self {
        Self { face, size, version: 0, cells: vec![voxel; (size * size) as usize] }
    }

    pub fn face(&self) -> Face {
        self.face
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Version of the source chunk when the snapshot was taken
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, u: u32, v: u32) -> Voxel {
        self.cells[(v * self.size + u) as usize]
    }
}

/// A fixed-size cube of voxel cells.
#[derive(Clone, Debug)]
pub struct VoxelChunk {
    coord: ChunkCoord,
    size: u32,
    cells: Vec<Voxel>,
    /// Incremented on every cell edit
    version: u64,
    /// Set on every cell edit, cleared once a mesh of this version is accepted
    dirty: bool,
}

impl VoxelChunk {
    /// Create a new empty (all air) chunk.
    ///
    /// Fails with `ResourceExhausted` if the cell storage cannot be allocated.
    pub fn try_new(coord: ChunkCoord, size: u32) -> Result<Self> {
        let count = (size as usize)
            .checked_pow(3)
            .ok_or_else(|| Error::ResourceExhausted(format!("chunk size {} overflows", size)))?;
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(count)
            .map_err(|e| Error::ResourceExhausted(format!("cannot allocate chunk {:?}: {}", coord, e)))?;
        cells.resize(count, Voxel::AIR);

        Ok(Self { coord, size, cells, version: 0, dirty: false })
    }

    /// Create a chunk filled with a single voxel value.
    pub fn filled(coord: ChunkCoord, size: u32, voxel: Voxel) -> Result<Self> {
        let mut chunk = Self::try_new(coord, size)?;
        chunk.cells.fill(voxel);
        Ok(chunk)
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Whether a local coordinate is inside [0, size) on every axis
    pub fn contains(&self, local: IVec3) -> bool {
        let s = self.size as i32;
        local.cmpge(IVec3::ZERO).all() && local.cmplt(IVec3::splat(s)).all()
    }

    fn index(&self, local: IVec3) -> Result<usize> {
        if !self.contains(local) {
            log::debug!("cell {} out of range for chunk {:?} (size {})", local, self.coord, self.size);
            return Err(Error::OutOfRange { cell: local, size: self.size });
        }
        let s = self.size as usize;
        Ok(local.x as usize + s * (local.y as usize + s * local.z as usize))
    }

    /// Unchecked read for hot loops; caller guarantees bounds
    #[inline]
    pub(crate) fn at(&self, x: u32, y: u32, z: u32) -> Voxel {
        let s = self.size as usize;
        self.cells[x as usize + s * (y as usize + s * z as usize)]
    }

    /// Read a cell, bounds-checked.
    pub fn get_cell(&self, local: IVec3) -> Result<Voxel> {
        Ok(self.cells[self.index(local)?])
    }

    /// Write a cell, bump the version and mark the chunk dirty.
    pub fn set_cell(&mut self, local: IVec3, voxel: Voxel) -> Result<()> {
        let idx = self.index(local)?;
        self.cells[idx] = voxel;
        self.version += 1;
        self.dirty = true;
        Ok(())
    }

    /// Fill one Y layer from a function of local coordinates.
    ///
    /// Used for base content; does not count as an edit.
    pub fn fill_layer(&mut self, y: u32, mut f: impl FnMut(IVec3) -> Voxel) {
        let s = self.size;
        for z in 0..s {
            for x in 0..s {
                let idx = (x + s * (y + s * z)) as usize;
                self.cells[idx] = f(IVec3::new(x as i32, y as i32, z as i32));
            }
        }
    }

    /// Raw cell storage, x-fastest then y then z
    pub fn cells(&self) -> &[Voxel] {
        &self.cells
    }

    /// True if every cell is air
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Voxel::is_air)
    }

    /// Number of non-air cells
    pub fn solid_count(&self) -> usize {
        self.cells.iter().filter(|v| !v.is_air()).count()
    }

    /// Faces of the chunk that a local cell touches
    pub fn faces_touching(&self, local: IVec3) -> Vec<Face> {
        Face::ALL
            .into_iter()
            .filter(|face| local[face.axis()] == face.boundary_layer(self.size))
            .collect()
    }

    /// Copy the outermost layer on one face.
    pub fn boundary(&self, face: Face) -> BoundarySnapshot {
        let s = self.size;
        let (ua, va) = face.plane_axes();
        let layer = face.boundary_layer(s);
        let mut cells = Vec::with_capacity((s * s) as usize);
        let mut p = IVec3::ZERO;
        p[face.axis()] = layer;
        for v in 0..s {
            for u in 0..s {
                p[ua] = u as i32;
                p[va] = v as i32;
                cells.push(self.at(p.x as u32, p.y as u32, p.z as u32));
            }
        }
        BoundarySnapshot { face, size: s, version: self.version, cells }
    }

    /// Snapshots of all six faces, in `Face::ALL` order
    pub fn boundaries(&self) -> [BoundarySnapshot; 6] {
        Face::ALL.map(|face| self.boundary(face))
    }
}
