//! Edit operations and their recorded form.

use glam::IVec3;

use crate::core::{Error, Result};
use crate::voxel::{MaterialId, Voxel};

/// A runtime voxel edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EditOp {
    /// Fill an air cell with a material
    Add(MaterialId),
    /// Clear a solid cell to air
    Remove,
    /// Change the material of a solid cell, keeping its metadata
    Paint(MaterialId),
}

impl EditOp {
    const ADD: u8 = 1;
    const REMOVE: u8 = 2;
    const PAINT: u8 = 3;

    /// Op code stored in the edit log
    pub fn code(self) -> u8 {
        match self {
            EditOp::Add(_) => Self::ADD,
            EditOp::Remove => Self::REMOVE,
            EditOp::Paint(_) => Self::PAINT,
        }
    }

    /// Material operand (0 for `Remove`)
    pub fn material(self) -> MaterialId {
        match self {
            EditOp::Add(m) | EditOp::Paint(m) => m,
            EditOp::Remove => 0,
        }
    }

    /// Rebuild an op from its stored code and operand.
    pub fn decode(code: u8, material: MaterialId) -> Result<Self> {
        let op = match code {
            Self::ADD => EditOp::Add(material),
            Self::REMOVE => EditOp::Remove,
            Self::PAINT => EditOp::Paint(material),
            _ => return Err(Error::InvalidEdit(format!("unknown op code {}", code))),
        };
        op.validate()?;
        Ok(op)
    }

    /// Reject ops that could never change anything meaningful.
    pub fn validate(self) -> Result<()> {
        match self {
            EditOp::Add(0) => Err(Error::InvalidEdit("Add with air material; use Remove".into())),
            EditOp::Paint(0) => Err(Error::InvalidEdit("Paint with air material; use Remove".into())),
            _ => Ok(()),
        }
    }

    /// New cell value, or `None` if the op leaves `current` unchanged.
    pub fn apply(self, current: Voxel) -> Option<Voxel> {
        let next = match self {
            EditOp::Add(m) if current.is_air() => Voxel::new(m),
            EditOp::Remove if !current.is_air() => Voxel::AIR,
            EditOp::Paint(m) if !current.is_air() => Voxel { material: m, ..current },
            _ => return None,
        };
        (next != current).then_some(next)
    }
}

/// One persisted edit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditRecord {
    /// Recording order, strictly increasing within a log
    pub seq: u64,
    /// World voxel coordinate
    pub position: IVec3,
    pub op_code: u8,
    pub material: MaterialId,
}

impl EditRecord {
    pub fn new(seq: u64, position: IVec3, op: EditOp) -> Self {
        Self {
            seq,
            position,
            op_code: op.code(),
            material: op.material(),
        }
    }

    /// Decode the stored operation.
    pub fn op(&self) -> Result<EditOp> {
        EditOp::decode(self.op_code, self.material)
    }
}

/// Result of a successful `apply_edit`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// The cell changed; `version` is the chunk version after the edit
    Applied { version: u64 },
    /// The op had no effect; nothing was recorded or invalidated
    Unchanged,
}

impl EditOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EditOutcome::Applied { .. })
    }
}
