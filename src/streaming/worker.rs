//! Worker pool for generate and mesh jobs
//!
//! Jobs run on a rayon thread pool and report back through a bounded
//! tokio channel that only the coordinating thread drains. The number of
//! outstanding jobs never exceeds the channel capacity, so workers never
//! block on send.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{Error, Result};
use crate::mesh::{MeshBuffer, MeshExtractor};
use crate::terrain::{GeneratedChunk, WorldGenerator};
use crate::voxel::{ChunkCoord, ChunkEntry, NeighborFaces};
use super::priority::RequestKind;

/// Cooperative cancellation flag shared with a running job
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub type JobId = u64;

/// What a finished job produced
#[derive(Debug)]
pub enum JobOutcome {
    Generated(GeneratedChunk),
    Meshed(MeshBuffer),
    /// Abandoned at a cancellation point, or superseded after cancellation
    Cancelled,
    Failed(Error),
}

/// Message sent from a worker to the coordinator
#[derive(Debug)]
pub struct JobResult {
    pub id: JobId,
    pub coord: ChunkCoord,
    pub kind: RequestKind,
    pub outcome: JobOutcome,
}

struct InFlight {
    id: JobId,
    cancel: CancelToken,
}

/// Dispatches jobs to worker threads and collects their results.
pub struct JobPool {
    pool: rayon::ThreadPool,
    generator: Arc<WorldGenerator>,
    extractor: Arc<MeshExtractor>,
    result_tx: mpsc::Sender<JobResult>,
    result_rx: mpsc::Receiver<JobResult>,
    /// Current job per chunk
    in_flight: HashMap<ChunkCoord, InFlight>,
    /// Submitted jobs whose result has not been drained, cancelled ones included
    outstanding: usize,
    max_in_flight: usize,
    next_id: JobId,
}

impl JobPool {
    /// Create a pool with `threads` workers (0 = one per core).
    pub fn new(
        threads: usize,
        max_in_flight: usize,
        generator: Arc<WorldGenerator>,
        extractor: Arc<MeshExtractor>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("voxel-worker-{}", i))
            .build()
            .map_err(|e| Error::Worker(format!("failed to start worker pool: {}", e)))?;
        let max_in_flight = max_in_flight.max(1);
        let (result_tx, result_rx) = mpsc::channel(max_in_flight);

        log::debug!(
            "Worker pool started: {} threads, {} jobs in flight",
            pool.current_num_threads(),
            max_in_flight
        );

        Ok(Self {
            pool,
            generator,
            extractor,
            result_tx,
            result_rx,
            in_flight: HashMap::new(),
            outstanding: 0,
            max_in_flight,
            next_id: 1,
        })
    }

    pub fn generator(&self) -> &Arc<WorldGenerator> {
        &self.generator
    }

    pub fn extractor(&self) -> &Arc<MeshExtractor> {
        &self.extractor
    }

    /// Whether another job may be submitted
    pub fn can_submit(&self) -> bool {
        self.outstanding < self.max_in_flight
    }

    pub fn is_in_flight(&self, coord: ChunkCoord) -> bool {
        self.in_flight.contains_key(&coord)
    }

    /// Jobs that still count for their chunk
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Jobs whose results have not been drained yet
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding == 0
    }

    fn register(&mut self, coord: ChunkCoord, kind: RequestKind) -> Option<(JobId, CancelToken)> {
        if !self.can_submit() || self.in_flight.contains_key(&coord) {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelToken::new();
        self.in_flight.insert(coord, InFlight { id, cancel: cancel.clone() });
        log::trace!("Submitted {:?} job {} for chunk {:?}", kind, id, coord);
        self.outstanding += 1;
        Some((id, cancel))
    }

    /// Run the generator for a chunk. Returns `None` if at capacity or the
    /// chunk already has a job.
    pub fn submit_generate(&mut self, coord: ChunkCoord) -> Option<JobId> {
        let (id, cancel) = self.register(coord, RequestKind::Generate)?;
        let generator = Arc::clone(&self.generator);
        let tx = self.result_tx.clone();

        self.pool.spawn(move || {
            let outcome = run_guarded(|| match generator.generate_cancellable(coord, &cancel) {
                Ok(Some(generated)) => JobOutcome::Generated(generated),
                Ok(None) => JobOutcome::Cancelled,
                Err(e) => JobOutcome::Failed(e),
            });
            let _ = tx.blocking_send(JobResult { id, coord, kind: RequestKind::Generate, outcome });
        });
        Some(id)
    }

    /// Extract a mesh from a snapshot of the chunk taken when the job starts.
    pub fn submit_mesh(&mut self, entry: Arc<ChunkEntry>, neighbors: NeighborFaces) -> Option<JobId> {
        let coord = entry.coord();
        let (id, cancel) = self.register(coord, RequestKind::Mesh)?;
        let extractor = Arc::clone(&self.extractor);
        let tx = self.result_tx.clone();

        self.pool.spawn(move || {
            let outcome = run_guarded(|| {
                if cancel.is_cancelled() {
                    return JobOutcome::Cancelled;
                }
                let snapshot = entry.read().clone();
                match extractor.extract_cancellable(&snapshot, &neighbors, &cancel) {
                    Some(mesh) => JobOutcome::Meshed(mesh),
                    None => JobOutcome::Cancelled,
                }
            });
            let _ = tx.blocking_send(JobResult { id, coord, kind: RequestKind::Mesh, outcome });
        });
        Some(id)
    }

    /// Signal the chunk's job to stop. Its result, if any, is reported as
    /// `Cancelled`.
    pub fn cancel(&mut self, coord: ChunkCoord) -> bool {
        match self.in_flight.remove(&coord) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Collect every result that has arrived (non-blocking).
    pub fn drain(&mut self) -> Vec<JobResult> {
        let mut results = Vec::new();
        while let Ok(mut result) = self.result_rx.try_recv() {
            self.outstanding = self.outstanding.saturating_sub(1);

            let current = self
                .in_flight
                .get(&result.coord)
                .is_some_and(|job| job.id == result.id);
            if current {
                self.in_flight.remove(&result.coord);
            } else {
                result.outcome = JobOutcome::Cancelled;
            }
            results.push(result);
        }
        results
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        for job in self.in_flight.values() {
            job.cancel.cancel();
        }
    }
}

fn run_guarded(job: impl FnOnce() -> JobOutcome) -> JobOutcome {
    panic::catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|_| JobOutcome::Failed(Error::Worker("job panicked".into())))
}
