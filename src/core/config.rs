//! World configuration: chunk size, streaming radii, per-tick budgets,
//! terrain parameters and persistence location.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::terrain::generator::TerrainParams;

/// Streaming radii and work budgets.
///
/// Radii are measured in chunks, from the viewpoint to a chunk's center.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks whose center is within this radius are generated and meshed
    pub load_radius: f32,
    /// Chunks whose center is beyond this radius are evicted (must exceed `load_radius`)
    pub unload_radius: f32,
    /// Generate jobs dispatched per tick (K)
    pub max_generate_per_tick: usize,
    /// Mesh jobs dispatched per tick (M)
    pub max_mesh_per_tick: usize,
    /// Capacity of each request queue; overflow drops the farthest requests
    pub max_queued_requests: usize,
    /// Jobs allowed on the worker pool at once
    pub max_in_flight: usize,
    /// Worker threads (0 = one per core)
    pub worker_threads: usize,
    /// Hard cap on chunks held by the grid
    pub max_resident_chunks: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_radius: 4.0,
            unload_radius: 6.0,
            max_generate_per_tick: 8,
            max_mesh_per_tick: 8,
            max_queued_requests: 4096,
            max_in_flight: 64,
            worker_threads: 0,
            max_resident_chunks: 32768,
        }
    }
}

impl StreamingConfig {
    /// Upper bound on chunks that can be resident with these radii.
    ///
    /// Saturates at `usize::MAX` for radii too large to count.
    pub fn resident_bound(&self) -> usize {
        let side = (self.unload_radius.max(0.0).ceil() as usize)
            .saturating_mul(2)
            .saturating_add(2);
        side.saturating_mul(side).saturating_mul(side)
    }
}

/// Where recorded edits are stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// World / save identifier; names the edit log file
    pub save_id: String,
    /// Directory for edit logs (None = keep edits in memory only)
    pub save_dir: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_id: "default".to_string(),
            save_dir: None,
        }
    }
}

impl PersistenceConfig {
    /// Path of the edit log for this save, if persistence is enabled.
    pub fn edit_log_path(&self) -> Option<PathBuf> {
        self.save_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.vxed", self.save_id)))
    }
}

/// Top-level configuration for a voxel world.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Voxels per chunk side
    pub chunk_size: u32,
    pub streaming: StreamingConfig,
    pub terrain: TerrainParams,
    pub persistence: PersistenceConfig,
    /// JSON material table layered over the built-in materials
    pub materials_path: Option<PathBuf>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            streaming: StreamingConfig::default(),
            terrain: TerrainParams::default(),
            persistence: PersistenceConfig::default(),
            materials_path: None,
        }
    }
}

impl WorldConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: WorldConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the invariants the scheduler relies on.
    pub fn validate(&self) -> Result<()> {
        let s = &self.streaming;
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be at least 1".into()));
        }
        if !s.load_radius.is_finite() || !s.unload_radius.is_finite() {
            return Err(Error::Config(format!(
                "streaming radii must be finite, got load {} / unload {}",
                s.load_radius, s.unload_radius
            )));
        }
        if !(s.load_radius >= 0.0) {
            return Err(Error::Config(format!("load_radius must be non-negative, got {}", s.load_radius)));
        }
        if !(s.unload_radius > s.load_radius) {
            return Err(Error::Config(format!(
                "unload_radius ({}) must be strictly greater than load_radius ({})",
                s.unload_radius, s.load_radius
            )));
        }
        if s.max_generate_per_tick == 0 || s.max_mesh_per_tick == 0 {
            return Err(Error::Config("per-tick budgets must be at least 1".into()));
        }
        if s.max_queued_requests == 0 || s.max_in_flight == 0 {
            return Err(Error::Config("queue and in-flight limits must be at least 1".into()));
        }
        if s.max_resident_chunks < s.resident_bound() {
            return Err(Error::Config(format!(
                "max_resident_chunks ({}) cannot hold the {} chunks inside unload_radius",
                s.max_resident_chunks,
                s.resident_bound()
            )));
        }
        if self.persistence.save_id.is_empty() {
            return Err(Error::Config("save_id must not be empty".into()));
        }
        Ok(())
    }
}
