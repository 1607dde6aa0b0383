//! Append-only log of edits for persistence.
//!
//! File layout: `VXED` magic, u32 version, then fixed-size little-endian
//! records `{seq u64, x i32, y i32, z i32, op u8, material u8}`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use glam::IVec3;

use crate::core::{Error, Result};
use crate::voxel::{ChunkCoord, Voxel};
use super::op::{EditOp, EditRecord};

const MAGIC: &[u8; 4] = b"VXED";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 8;
const RECORD_LEN: usize = 22;

/// Where edits are recorded and read back for replay.
pub trait EditStore: Send + Sync {
    /// Durably record an edit, returning the stored record.
    fn record(&self, position: IVec3, op: EditOp) -> Result<EditRecord>;

    /// All edits inside a chunk, in recording order.
    fn edits_in_chunk(&self, coord: ChunkCoord) -> Vec<EditRecord>;
}

/// Append-only edit log, optionally backed by a file.
#[derive(Debug)]
pub struct EditLog {
    path: Option<PathBuf>,
    chunk_size: u32,
    records: Vec<EditRecord>,
    /// chunk -> indices into `records`
    chunk_index: HashMap<ChunkCoord, Vec<usize>>,
    next_seq: u64,
}

impl EditLog {
    /// Log that lives only in memory
    pub fn in_memory(chunk_size: u32) -> Self {
        Self::empty(None, chunk_size)
    }

    fn empty(path: Option<PathBuf>, chunk_size: u32) -> Self {
        Self {
            path,
            chunk_size,
            records: Vec::new(),
            chunk_index: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Open an existing log file or create a new one.
    ///
    /// A truncated trailing record is dropped (and cut from the file).
    /// Records with unknown op codes are kept; they fail at replay time.
    pub fn open(path: impl AsRef<Path>, chunk_size: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut log = Self::empty(Some(path.clone()), chunk_size);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            log.save()?;
            return Ok(log);
        }

        if data.len() < HEADER_LEN || &data[0..4] != MAGIC {
            return Err(invalid_data(format!("{} is not an edit log", path.display())));
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != VERSION {
            return Err(invalid_data(format!("unsupported edit log version: {}", version)));
        }

        let body = &data[HEADER_LEN..];
        let mut chunks = body.chunks_exact(RECORD_LEN);
        for bytes in &mut chunks {
            log.push(decode_record(bytes));
        }
        let tail = chunks.remainder().len();
        if tail > 0 {
            log::warn!(
                "Edit log {} ends with a truncated record ({} bytes), ignoring it",
                path.display(),
                tail
            );
            let valid_len = (data.len() - tail) as u64;
            OpenOptions::new().write(true).open(&path)?.set_len(valid_len)?;
        }

        log::info!("Loaded {} edits from {}", log.records.len(), path.display());
        Ok(log)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn push(&mut self, record: EditRecord) {
        let (coord, _) = ChunkCoord::from_voxel(record.position, self.chunk_size);
        self.chunk_index.entry(coord).or_default().push(self.records.len());
        self.next_seq = self.next_seq.max(record.seq + 1);
        self.records.push(record);
    }

    fn rebuild_chunk_index(&mut self) {
        self.chunk_index.clear();
        for (i, record) in self.records.iter().enumerate() {
            let (coord, _) = ChunkCoord::from_voxel(record.position, self.chunk_size);
            self.chunk_index.entry(coord).or_default().push(i);
        }
    }

    /// Append an edit and flush it to disk.
    ///
    /// Nothing changes in memory if the write fails.
    pub fn append(&mut self, position: IVec3, op: EditOp) -> Result<EditRecord> {
        op.validate()?;
        let record = EditRecord::new(self.next_seq, position, op);

        if let Some(path) = &self.path {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&encode_record(&record))?;
            writer.flush()?;
        }

        self.push(record);
        Ok(record)
    }

    /// Edits inside a chunk, in recording order.
    pub fn edits_in_chunk(&self, coord: ChunkCoord) -> Vec<EditRecord> {
        self.chunk_index
            .get(&coord)
            .map(|ids| ids.iter().map(|&i| self.records[i]).collect())
            .unwrap_or_default()
    }

    /// Chunks that have at least one recorded edit
    pub fn edited_chunks(&self) -> Vec<ChunkCoord> {
        let mut coords: Vec<_> = self.chunk_index.keys().copied().collect();
        coords.sort();
        coords
    }

    pub fn records(&self) -> &[EditRecord] {
        &self.records
    }

    /// Get edit count.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shorten each cell's history to the fewest records that replay to
    /// the same result on any base content. Returns the number of records
    /// removed.
    pub fn compact(&mut self) -> Result<usize> {
        let mut per_cell: HashMap<IVec3, Vec<EditRecord>> = HashMap::new();
        for record in &self.records {
            per_cell.entry(record.position).or_default().push(*record);
        }

        let mut compacted: Vec<EditRecord> = per_cell
            .values()
            .flat_map(|history| reduce_cell(history))
            .collect();
        compacted.sort_by_key(|r| r.seq);

        let removed = self.records.len() - compacted.len();
        let previous = std::mem::replace(&mut self.records, compacted);

        if let Some(path) = self.path.clone() {
            let temp_path = path.with_extension("tmp");
            let written = write_log(&temp_path, &self.records).and_then(|_| fs::rename(&temp_path, &path));
            if let Err(e) = written {
                self.records = previous;
                return Err(e.into());
            }
        }

        self.rebuild_chunk_index();
        log::debug!("Compacted edit log: {} records removed, {} kept", removed, self.records.len());
        Ok(removed)
    }

    /// Write all edits to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            write_log(path, &self.records)?;
        }
        Ok(())
    }
}

impl EditStore for Mutex<EditLog> {
    fn record(&self, position: IVec3, op: EditOp) -> Result<EditRecord> {
        self.lock().unwrap_or_else(PoisonError::into_inner).append(position, op)
    }

    fn edits_in_chunk(&self, coord: ChunkCoord) -> Vec<EditRecord> {
        self.lock().unwrap_or_else(PoisonError::into_inner).edits_in_chunk(coord)
    }
}

/// Minimal equivalent history for one cell.
///
/// A `Remove` fixes the cell to air regardless of what came before, so only
/// the latest one matters and everything after it folds into a single `Add`.
/// Without a `Remove`, only the first `Add` can fire, and only the last
/// `Paint` on either side of it is observable.
fn reduce_cell(history: &[EditRecord]) -> Vec<EditRecord> {
    let Some(ops) = history.iter().map(|r| r.op().ok()).collect::<Option<Vec<EditOp>>>() else {
        return history.to_vec();
    };
    let Some(last) = history.last() else {
        return Vec::new();
    };

    if let Some(start) = ops.iter().rposition(|op| *op == EditOp::Remove) {
        let end = ops[start + 1..]
            .iter()
            .fold(Voxel::AIR, |cell, op| op.apply(cell).unwrap_or(cell));
        let mut kept = vec![history[start]];
        if !end.is_air() {
            kept.push(EditRecord::new(last.seq, last.position, EditOp::Add(end.material)));
        }
        return kept;
    }

    let last_paint = |from: usize, to: usize| (from..to).rev().find(|&i| matches!(ops[i], EditOp::Paint(_)));
    let kept: Vec<usize> = match ops.iter().position(|op| matches!(op, EditOp::Add(_))) {
        None => last_paint(0, ops.len()).into_iter().collect(),
        Some(add) => match last_paint(add + 1, ops.len()) {
            Some(paint) => vec![add, paint],
            None => last_paint(0, add).into_iter().chain([add]).collect(),
        },
    };
    kept.into_iter().map(|i| history[i]).collect()
}

fn invalid_data(message: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidData, message))
}

fn write_log(path: &Path, records: &[EditRecord]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    for record in records {
        writer.write_all(&encode_record(record))?;
    }
    writer.flush()
}

fn encode_record(record: &EditRecord) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    buf[0..8].copy_from_slice(&record.seq.to_le_bytes());
    buf[8..12].copy_from_slice(&record.position.x.to_le_bytes());
    buf[12..16].copy_from_slice(&record.position.y.to_le_bytes());
    buf[16..20].copy_from_slice(&record.position.z.to_le_bytes());
    buf[20] = record.op_code;
    buf[21] = record.material;
    buf
}

fn decode_record(bytes: &[u8]) -> EditRecord {
    let i32_at = |at: usize| i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&bytes[0..8]);
    EditRecord {
        seq: u64::from_le_bytes(seq),
        position: IVec3::new(i32_at(8), i32_at(12), i32_at(16)),
        op_code: bytes[20],
        material: bytes[21],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(history: &[EditRecord], base: Voxel) -> Voxel {
        history.iter().fold(base, |cell, r| {
            let op = r.op().unwrap();
            op.apply(cell).unwrap_or(cell)
        })
    }

    #[test]
    fn test_in_memory_append() {
        let mut log = EditLog::in_memory(8);
        assert!(log.is_empty());

        let a = log.append(IVec3::new(1, 2, 3), EditOp::Add(4)).unwrap();
        let b = log.append(IVec3::new(-1, 0, 0), EditOp::Remove).unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(log.len(), 2);
        assert!(log.path().is_none());
    }

    #[test]
    fn test_rejects_invalid_op() {
        let mut log = EditLog::in_memory(8);
        assert!(matches!(log.append(IVec3::ZERO, EditOp::Add(0)), Err(Error::InvalidEdit(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn test_edits_in_chunk_ordered() {
        let mut log = EditLog::in_memory(4);
        log.append(IVec3::new(0, 0, 0), EditOp::Add(1)).unwrap();
        log.append(IVec3::new(5, 0, 0), EditOp::Add(2)).unwrap();
        log.append(IVec3::new(3, 3, 3), EditOp::Paint(3)).unwrap();
        log.append(IVec3::new(-1, 0, 0), EditOp::Remove).unwrap();

        let origin = log.edits_in_chunk(ChunkCoord::new(0, 0, 0));
        assert_eq!(origin.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(log.edits_in_chunk(ChunkCoord::new(1, 0, 0)).len(), 1);
        assert_eq!(log.edits_in_chunk(ChunkCoord::new(-1, 0, 0)).len(), 1);
        assert!(log.edits_in_chunk(ChunkCoord::new(9, 9, 9)).is_empty());
        assert_eq!(log.edited_chunks().len(), 3);
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saves").join("world.vxed");

        {
            let mut log = EditLog::open(&path, 8).unwrap();
            log.append(IVec3::new(1, 2, 3), EditOp::Add(4)).unwrap();
            log.append(IVec3::new(-9, 0, 7), EditOp::Paint(2)).unwrap();
        }

        let mut log = EditLog::open(&path, 8).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[1].position, IVec3::new(-9, 0, 7));
        assert_eq!(log.records()[1].op().unwrap(), EditOp::Paint(2));

        // Sequence numbers continue after reload
        let next = log.append(IVec3::ZERO, EditOp::Remove).unwrap();
        assert_eq!(next.seq, 3);
    }

    #[test]
    fn test_truncated_tail_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.vxed");
        {
            let mut log = EditLog::open(&path, 8).unwrap();
            log.append(IVec3::new(1, 1, 1), EditOp::Add(1)).unwrap();
            log.append(IVec3::new(2, 2, 2), EditOp::Add(1)).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(len - 5).unwrap();

        let mut log = EditLog::open(&path, 8).unwrap();
        assert_eq!(log.len(), 1);

        // Appending after recovery keeps the file well-formed
        log.append(IVec3::new(3, 3, 3), EditOp::Add(2)).unwrap();
        let reloaded = EditLog::open(&path, 8).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.records()[1].position, IVec3::new(3, 3, 3));
    }

    #[test]
    fn test_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.vxed");
        fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
        assert!(matches!(EditLog::open(&path, 8), Err(Error::Io(_))));
    }

    #[test]
    fn test_unknown_op_code_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.vxed");
        let bad = EditRecord { seq: 1, position: IVec3::new(0, 1, 0), op_code: 77, material: 1 };
        write_log(&path, &[bad]).unwrap();

        let log = EditLog::open(&path, 8).unwrap();
        let edits = log.edits_in_chunk(ChunkCoord::new(0, 0, 0));
        assert_eq!(edits.len(), 1);
        assert!(edits[0].op().is_err());
    }

    #[test]
    fn test_reduce_cell_preserves_replay() {
        let p = IVec3::new(2, 2, 2);
        let histories: Vec<Vec<EditOp>> = vec![
            vec![EditOp::Add(1), EditOp::Paint(2), EditOp::Add(3), EditOp::Paint(4)],
            vec![EditOp::Paint(2), EditOp::Add(3)],
            vec![EditOp::Paint(2), EditOp::Paint(5)],
            vec![EditOp::Add(1), EditOp::Remove, EditOp::Add(2), EditOp::Paint(3)],
            vec![EditOp::Paint(1), EditOp::Remove],
            vec![EditOp::Remove, EditOp::Add(6), EditOp::Remove, EditOp::Add(2)],
        ];

        for ops in histories {
            let history: Vec<EditRecord> = ops
                .iter()
                .enumerate()
                .map(|(i, op)| EditRecord::new(i as u64 + 1, p, *op))
                .collect();
            let reduced = reduce_cell(&history);
            assert!(reduced.len() <= 2, "{:?} reduced to {:?}", ops, reduced);
            assert!(reduced.windows(2).all(|w| w[0].seq < w[1].seq));
            for base in [Voxel::AIR, Voxel::new(7).with_meta(3)] {
                assert_eq!(replay(&history, base), replay(&reduced, base), "{:?} on {:?}", ops, base);
            }
        }
    }

    #[test]
    fn test_compact_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.vxed");
        let mut log = EditLog::open(&path, 8).unwrap();

        let cell = IVec3::new(1, 1, 1);
        log.append(cell, EditOp::Add(1)).unwrap();
        log.append(cell, EditOp::Remove).unwrap();
        log.append(cell, EditOp::Add(2)).unwrap();
        log.append(cell, EditOp::Paint(3)).unwrap();
        log.append(IVec3::new(5, 5, 5), EditOp::Add(4)).unwrap();

        let removed = log.compact().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(log.len(), 3);

        let reloaded = EditLog::open(&path, 8).unwrap();
        assert_eq!(reloaded.records(), log.records());
        let cell_edits: Vec<_> = reloaded
            .edits_in_chunk(ChunkCoord::new(0, 0, 0))
            .into_iter()
            .filter(|r| r.position == cell)
            .map(|r| r.op().unwrap())
            .collect();
        assert_eq!(cell_edits, vec![EditOp::Remove, EditOp::Add(3)]);
    }

    #[test]
    fn test_store_trait_on_mutex() {
        let store: Box<dyn EditStore> = Box::new(Mutex::new(EditLog::in_memory(4)));
        store.record(IVec3::new(1, 0, 0), EditOp::Add(2)).unwrap();
        assert_eq!(store.edits_in_chunk(ChunkCoord::new(0, 0, 0)).len(), 1);
    }
}
