//! Voxel cell type

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use super::material::MaterialId;

/// Single voxel cell - exactly 2 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Voxel {
    /// Material ID (0 = air)
    pub material: MaterialId,
    /// Free-form metadata (damage, color index)
    pub meta: u8,
}

impl Voxel {
    /// Empty/air voxel
    pub const AIR: Voxel = Voxel { material: 0, meta: 0 };

    /// Create a voxel of the given material with no metadata
    pub const fn new(material: MaterialId) -> Self {
        Self { material, meta: 0 }
    }

    /// Copy of this voxel with the given metadata
    pub const fn with_meta(self, meta: u8) -> Self {
        Self { meta, ..self }
    }

    /// Check if voxel is air
    pub fn is_air(&self) -> bool {
        self.material == 0
    }
}
