//! Runtime voxel editing and edit persistence

pub mod op;
pub mod log;
pub mod engine;

pub use op::{EditOp, EditOutcome, EditRecord};
pub use log::{EditLog, EditStore};
pub use engine::EditEngine;
