//! Material table: names, colors and transparency per material id.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use super::voxel::Voxel;

/// Material identifier stored in each voxel
pub type MaterialId = u8;

/// Built-in material ids
pub mod materials {
    use super::MaterialId;

    pub const AIR: MaterialId = 0;
    pub const STONE: MaterialId = 1;
    pub const GRASS: MaterialId = 2;
    pub const SAND: MaterialId = 3;
    pub const PLACED: MaterialId = 4;
}

/// Description of one material
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialDef {
    pub id: MaterialId,
    pub name: String,
    /// Base color (RGB888)
    pub color: [u8; 3],
    /// Transparent materials do not hide the faces of other materials
    #[serde(default)]
    pub transparent: bool,
}

impl MaterialDef {
    pub fn new(id: MaterialId, name: &str, color: [u8; 3]) -> Self {
        Self { id, name: name.to_string(), color, transparent: false }
    }

    pub fn transparent(mut self) -> Self {
        self.transparent = true;
        self
    }
}

/// Lookup table from material id to definition.
///
/// Id 0 is always air. Ids without a definition are treated as opaque.
#[derive(Clone, Debug)]
pub struct MaterialRegistry {
    defs: Vec<Option<MaterialDef>>,
}

impl MaterialRegistry {
    /// Registry that only knows air
    pub fn new() -> Self {
        let mut defs = vec![None; 256];
        defs[materials::AIR as usize] = Some(MaterialDef::new(materials::AIR, "Air", [0, 0, 0]).transparent());
        Self { defs }
    }

    /// Registry with the built-in terrain materials
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for def in [
            MaterialDef::new(materials::STONE, "Stone", [128, 128, 128]),
            MaterialDef::new(materials::GRASS, "Grass", [34, 139, 34]),
            MaterialDef::new(materials::SAND, "Sand", [238, 214, 175]),
            MaterialDef::new(materials::PLACED, "Placed Block", [200, 120, 60]),
        ] {
            let id = def.id as usize;
            registry.defs[id] = Some(def);
        }
        registry
    }

    /// Parse a JSON array of material definitions on top of the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let defs: Vec<MaterialDef> = serde_json::from_str(json)?;
        let mut registry = Self::with_defaults();
        for def in defs {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Load a JSON material table from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Add or replace a material definition. Air cannot be redefined.
    pub fn register(&mut self, def: MaterialDef) -> Result<()> {
        if def.id == materials::AIR {
            return Err(Error::Config("material id 0 is reserved for air".into()));
        }
        let slot = def.id as usize;
        self.defs[slot] = Some(def);
        Ok(())
    }

    pub fn get(&self, id: MaterialId) -> Option<&MaterialDef> {
        self.defs[id as usize].as_ref()
    }

    /// Color for a material, grey for unknown ids
    pub fn color(&self, id: MaterialId) -> [u8; 3] {
        self.get(id).map(|d| d.color).unwrap_or([128, 128, 128])
    }

    /// Non-air and not transparent
    pub fn is_opaque(&self, id: MaterialId) -> bool {
        if id == materials::AIR {
            return false;
        }
        self.get(id).map(|d| !d.transparent).unwrap_or(true)
    }

    /// Whether `neighbor` hides the face of `cell` that touches it.
    pub fn occludes(&self, neighbor: Voxel, cell: Voxel) -> bool {
        self.is_opaque(neighbor.material) || (!neighbor.is_air() && neighbor.material == cell.material)
    }

    /// Number of defined materials, air included
    pub fn len(&self) -> usize {
        self.defs.iter().filter(|d| d.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
