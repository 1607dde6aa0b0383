//! Streaming scheduler: decides which chunks are generated, meshed and
//! evicted around a moving viewpoint.
//!
//! The scheduler runs on a single coordinating thread. All chunk state
//! transitions happen in `tick`, when job results are drained:
//!
//! Unloaded -> Generating -> Ready -> MeshPending <-> Meshed -> Evicting -> Unloaded
//!
//! Chunks load when their center is within `load_radius` chunks of the
//! viewpoint and are evicted only beyond the larger `unload_radius`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;

use crate::core::{Error, Result, StreamingConfig};
use crate::mesh::{MeshBuffer, MeshExtractor};
use crate::render::{ChunkTransform, RenderSink};
use crate::terrain::{GeneratedChunk, WorldGenerator};
use crate::voxel::{ChunkCoord, ChunkState, VoxelGrid};
use super::budget::TickBudget;
use super::priority::{PushResult, RequestKind, RequestQueue, StreamingRequest};
use super::worker::{JobOutcome, JobPool};

/// Counters are cumulative since the scheduler was created; the last five
/// fields describe the state after the most recent tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Ticks run
    pub ticks: u64,
    /// Generate jobs dispatched
    pub generate_dispatched: u64,
    /// Mesh jobs dispatched
    pub mesh_dispatched: u64,
    /// Chunks that reached Ready
    pub generated: u64,
    /// Meshes handed to the renderer
    pub meshed: u64,
    /// Chunks evicted
    pub evicted: u64,
    /// Mesh results discarded because the chunk changed during extraction
    pub stale_meshes: u64,
    /// Job results discarded after cancellation
    pub cancelled_jobs: u64,
    /// Requests dropped because a queue was full
    pub dropped_requests: u64,
    /// Chunks whose recorded edits could not be replayed
    pub generation_failures: u64,
    pub resident_chunks: usize,
    pub meshed_chunks: usize,
    pub queued_generate: usize,
    pub queued_mesh: usize,
    pub in_flight: usize,
}

/// Coordinates chunk generation, meshing and eviction.
pub struct StreamingScheduler {
    config: StreamingConfig,
    chunk_size: u32,
    grid: Arc<VoxelGrid>,
    jobs: JobPool,
    generate_queue: RequestQueue,
    mesh_queue: RequestQueue,
    viewpoint: Vec3,
    stats: StreamingStats,
}

impl StreamingScheduler {
    pub fn new(
        config: StreamingConfig,
        grid: Arc<VoxelGrid>,
        generator: Arc<WorldGenerator>,
        extractor: Arc<MeshExtractor>,
    ) -> Result<Self> {
        let jobs = JobPool::new(config.worker_threads, config.max_in_flight, generator, extractor)?;
        Ok(Self {
            chunk_size: grid.chunk_size(),
            generate_queue: RequestQueue::new(RequestKind::Generate, config.max_queued_requests),
            mesh_queue: RequestQueue::new(RequestKind::Mesh, config.max_queued_requests),
            config,
            grid,
            jobs,
            viewpoint: Vec3::ZERO,
            stats: StreamingStats::default(),
        })
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn grid(&self) -> &Arc<VoxelGrid> {
        &self.grid
    }

    pub fn stats(&self) -> StreamingStats {
        self.stats
    }

    /// Viewpoint of the last tick
    pub fn viewpoint(&self) -> Vec3 {
        self.viewpoint
    }

    /// Lifecycle state of a chunk; absent chunks are `Unloaded`
    pub fn chunk_state(&self, coord: ChunkCoord) -> ChunkState {
        self.grid
            .get(coord)
            .map(|entry| entry.state())
            .unwrap_or(ChunkState::Unloaded)
    }

    /// Run one scheduling step for the given viewpoint.
    ///
    /// Only resource exhaustion (the grid cannot hold another chunk) is
    /// returned as an error, and only after resident chunks have had their
    /// mesh work dispatched. Failures of single jobs are logged and retried.
    pub fn tick(&mut self, viewpoint: Vec3, sink: &mut dyn RenderSink) -> Result<StreamingStats> {
        self.viewpoint = viewpoint;
        self.stats.ticks += 1;

        self.apply_results(sink);
        self.evict_far(viewpoint, sink);
        self.request_generation(viewpoint);
        self.request_meshes(viewpoint);
        self.reprioritize(viewpoint);

        let mut budget = TickBudget::new(self.config.max_generate_per_tick, self.config.max_mesh_per_tick);
        let dispatched = self.dispatch_generate(&mut budget);
        self.dispatch_mesh(&mut budget);

        self.refresh_gauges();
        dispatched?;
        log::trace!(
            "tick {}: {} resident, {} meshed, {} queued, {} in flight",
            self.stats.ticks,
            self.stats.resident_chunks,
            self.stats.meshed_chunks,
            self.stats.queued_generate + self.stats.queued_mesh,
            self.stats.in_flight
        );
        Ok(self.stats)
    }

    /// Nothing queued, running or waiting to be meshed.
    pub fn is_idle(&self) -> bool {
        self.generate_queue.is_empty()
            && self.mesh_queue.is_empty()
            && self.jobs.is_idle()
            && self
                .grid
                .entries()
                .iter()
                .all(|entry| entry.state() == ChunkState::Meshed && !entry.is_mesh_dirty())
    }

    /// Tick until idle, or fail once `timeout` has passed.
    pub fn run_until_idle(
        &mut self,
        viewpoint: Vec3,
        sink: &mut dyn RenderSink,
        timeout: Duration,
    ) -> Result<StreamingStats> {
        let deadline = Instant::now() + timeout;
        loop {
            let stats = self.tick(viewpoint, sink)?;
            if self.is_idle() {
                return Ok(stats);
            }
            if Instant::now() >= deadline {
                return Err(Error::Worker(format!("streaming did not settle within {:?}", timeout)));
            }
            if !self.jobs.is_idle() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Evict every chunk (e.g. on shutdown).
    pub fn clear(&mut self, sink: &mut dyn RenderSink) {
        for coord in self.grid.coords() {
            self.evict(coord, sink);
        }
        self.generate_queue.clear();
        self.mesh_queue.clear();
        self.refresh_gauges();
    }

    fn apply_results(&mut self, sink: &mut dyn RenderSink) {
        for result in self.jobs.drain() {
            let coord = result.coord;
            match result.outcome {
                JobOutcome::Generated(generated) => self.finish_generate(coord, generated),
                JobOutcome::Meshed(mesh) => self.finish_mesh(coord, mesh, sink),
                JobOutcome::Cancelled => self.stats.cancelled_jobs += 1,
                JobOutcome::Failed(e) => {
                    log::error!("{:?} job for chunk {:?} failed: {}", result.kind, coord, e);
                    let Some(entry) = self.grid.get(coord) else {
                        continue;
                    };
                    if result.kind == RequestKind::Generate && entry.state() == ChunkState::Generating {
                        // Requested again on the next tick
                        let _ = self.grid.remove(coord);
                    } else {
                        entry.mark_mesh_dirty();
                    }
                }
            }
        }
    }

    fn finish_generate(&mut self, coord: ChunkCoord, generated: GeneratedChunk) {
        let Some(entry) = self.grid.get(coord) else {
            return;
        };
        if entry.state() != ChunkState::Generating {
            return;
        }
        if generated.replay_error.is_some() {
            self.stats.generation_failures += 1;
        }

        entry.install(generated.chunk);
        entry.set_state(ChunkState::Ready);
        entry.mark_mesh_dirty();

        // Neighbors meshed against an unknown boundary can now see this one
        for neighbor in coord.neighbors() {
            if let Some(other) = self.grid.get(neighbor) {
                if other.has_data() {
                    other.mark_mesh_dirty();
                }
            }
        }
        self.stats.generated += 1;
    }

    fn finish_mesh(&mut self, coord: ChunkCoord, mesh: MeshBuffer, sink: &mut dyn RenderSink) {
        let Some(entry) = self.grid.get(coord) else {
            return;
        };
        if entry.state() != ChunkState::MeshPending {
            return;
        }

        let current = entry.version();
        if mesh.version != current {
            log::debug!(
                "Discarding stale mesh for {:?} (built from v{}, chunk is v{})",
                coord,
                mesh.version,
                current
            );
            self.stats.stale_meshes += 1;
            entry.mark_mesh_dirty();
            return;
        }

        {
            let mut chunk = entry.write();
            if chunk.version() == mesh.version {
                chunk.clear_dirty();
            }
        }
        let mesh = Arc::new(mesh);
        entry.set_mesh(Some(Arc::clone(&mesh)));
        entry.set_state(ChunkState::Meshed);
        sink.mesh_ready(coord, mesh, ChunkTransform::new(coord, self.chunk_size));
        self.stats.meshed += 1;
    }

    fn evict_far(&mut self, viewpoint: Vec3, sink: &mut dyn RenderSink) {
        let unload = self.config.unload_radius;
        let evictions: Vec<StreamingRequest> = self
            .grid
            .coords()
            .into_iter()
            .filter_map(|coord| {
                let distance = coord.distance_in_chunks(viewpoint, self.chunk_size);
                (distance > unload).then(|| StreamingRequest::new(coord, RequestKind::Evict, distance))
            })
            .collect();

        if !evictions.is_empty() {
            log::debug!("Evicting {} chunks beyond radius {}", evictions.len(), unload);
        }
        for request in evictions {
            self.evict(request.coord, sink);
        }
    }

    fn evict(&mut self, coord: ChunkCoord, sink: &mut dyn RenderSink) {
        let Some(entry) = self.grid.get(coord) else {
            return;
        };
        entry.set_state(ChunkState::Evicting);
        self.jobs.cancel(coord);
        self.generate_queue.remove(coord);
        self.mesh_queue.remove(coord);

        if self.grid.remove(coord).is_err() {
            return;
        }
        if entry.set_mesh(None).is_some() {
            sink.mesh_removed(coord);
        }
        entry.set_state(ChunkState::Unloaded);
        self.stats.evicted += 1;
    }

    fn request_generation(&mut self, viewpoint: Vec3) {
        let load = self.config.load_radius;
        let center = ChunkCoord::from_world_pos(viewpoint, self.chunk_size);
        let r = load.ceil() as i32 + 1;

        for dz in -r..=r {
            for dy in -r..=r {
                for dx in -r..=r {
                    let coord = ChunkCoord::new(center.x + dx, center.y + dy, center.z + dz);
                    let distance = coord.distance_in_chunks(viewpoint, self.chunk_size);
                    if distance > load || self.grid.contains(coord) || self.generate_queue.contains(coord) {
                        continue;
                    }
                    if let PushResult::Dropped(dropped) = self.generate_queue.push(coord, distance) {
                        log::debug!("Generate queue full, dropped {:?}", dropped);
                        self.stats.dropped_requests += 1;
                    }
                }
            }
        }
    }

    fn request_meshes(&mut self, viewpoint: Vec3) {
        for entry in self.grid.entries() {
            let state = entry.state();
            if !state.has_data() {
                continue;
            }
            let coord = entry.coord();
            // A running extraction keeps the dirty flag for the next round
            if self.jobs.is_in_flight(coord) {
                continue;
            }

            let dirty = entry.take_mesh_dirty();
            if !dirty && state != ChunkState::MeshPending {
                continue;
            }
            entry.set_state(ChunkState::MeshPending);
            if self.mesh_queue.contains(coord) {
                continue;
            }

            let distance = coord.distance_in_chunks(viewpoint, self.chunk_size);
            if let PushResult::Dropped(dropped) = self.mesh_queue.push(coord, distance) {
                log::debug!("Mesh queue full, dropped {:?}", dropped);
                self.stats.dropped_requests += 1;
            }
        }
    }

    fn reprioritize(&mut self, viewpoint: Vec3) {
        let load = self.config.load_radius;
        let size = self.chunk_size;
        let grid = &self.grid;

        self.generate_queue.reprioritize(|coord| {
            let distance = coord.distance_in_chunks(viewpoint, size);
            (distance <= load && !grid.contains(coord)).then_some(distance)
        });
        self.mesh_queue.reprioritize(|coord| {
            grid.get(coord)
                .filter(|entry| entry.has_data())
                .map(|_| coord.distance_in_chunks(viewpoint, size))
        });
    }

    fn dispatch_generate(&mut self, budget: &mut TickBudget) -> Result<()> {
        while !budget.exhausted(RequestKind::Generate) && self.jobs.can_submit() {
            let Some(request) = self.generate_queue.pop() else {
                break;
            };
            let coord = request.coord;
            let entry = match self.grid.get_or_create(coord) {
                Ok(entry) => entry,
                Err(e) => {
                    self.generate_queue.push(coord, request.distance);
                    log::error!("Cannot create chunk {:?}: {}", coord, e);
                    return Err(e);
                }
            };
            if entry.state() != ChunkState::Generating || self.jobs.is_in_flight(coord) {
                continue;
            }
            if self.jobs.submit_generate(coord).is_some() {
                budget.try_take(RequestKind::Generate);
                self.stats.generate_dispatched += 1;
            }
        }
        Ok(())
    }

    fn dispatch_mesh(&mut self, budget: &mut TickBudget) {
        while !budget.exhausted(RequestKind::Mesh) && self.jobs.can_submit() {
            let Some(request) = self.mesh_queue.pop() else {
                break;
            };
            let coord = request.coord;
            let Some(entry) = self.grid.get(coord) else {
                continue;
            };
            if entry.state() != ChunkState::MeshPending || self.jobs.is_in_flight(coord) {
                continue;
            }
            let neighbors = self.grid.neighbor_faces(coord);
            if self.jobs.submit_mesh(entry, neighbors).is_some() {
                budget.try_take(RequestKind::Mesh);
                self.stats.mesh_dispatched += 1;
            }
        }
    }

    fn refresh_gauges(&mut self) {
        let entries = self.grid.entries();
        self.stats.resident_chunks = entries.len();
        self.stats.meshed_chunks = entries
            .iter()
            .filter(|entry| entry.state() == ChunkState::Meshed)
            .count();
        self.stats.queued_generate = self.generate_queue.len();
        self.stats.queued_mesh = self.mesh_queue.len();
        self.stats.in_flight = self.jobs.in_flight_count();
    }
}

impl Drop for StreamingScheduler {
    fn drop(&mut self) {
        log::debug!(
            "Scheduler shutting down with {} chunks resident, {} jobs outstanding",
            self.grid.len(),
            self.jobs.outstanding()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{EditLog, EditOp};
    use crate::render::RecordingSink;
    use crate::terrain::DensityFunction;
    use crate::voxel::{materials, MaterialRegistry, Voxel, VoxelChunk};
    use glam::IVec3;
    use std::sync::Mutex;

    const SIZE: u32 = 4;
    const TIMEOUT: Duration = Duration::from_secs(20);

    fn floor(pos: IVec3) -> Voxel {
        if pos.y < 0 { Voxel::new(materials::STONE) } else { Voxel::AIR }
    }

    fn config(load: f32, unload: f32) -> StreamingConfig {
        StreamingConfig {
            load_radius: load,
            unload_radius: unload,
            worker_threads: 2,
            ..StreamingConfig::default()
        }
    }

    fn scheduler_with(
        config: StreamingConfig,
        max_chunks: usize,
        store: Arc<Mutex<EditLog>>,
        density: Arc<dyn DensityFunction>,
    ) -> StreamingScheduler {
        let grid = Arc::new(VoxelGrid::new(SIZE, max_chunks));
        let generator = Arc::new(WorldGenerator::new(density, store, SIZE));
        let extractor = Arc::new(MeshExtractor::new(Arc::new(MaterialRegistry::with_defaults())));
        StreamingScheduler::new(config, grid, generator, extractor).unwrap()
    }

    fn scheduler(config: StreamingConfig) -> StreamingScheduler {
        let store = Arc::new(Mutex::new(EditLog::in_memory(SIZE)));
        scheduler_with(config, 4096, store, Arc::new(floor))
    }

    /// Center of chunk (0, 0, 0)
    fn origin_view() -> Vec3 {
        Vec3::splat(SIZE as f32 * 0.5)
    }

    #[test]
    fn test_initial_load() {
        let mut sched = scheduler(config(1.0, 2.0));
        let mut sink = RecordingSink::new();
        let stats = sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        // The chunk itself plus its six face neighbors are within one chunk
        assert_eq!(stats.resident_chunks, 7);
        assert_eq!(stats.meshed_chunks, 7);
        assert_eq!(stats.generated, 7);
        assert_eq!(sink.len(), 7);
        for coord in sched.grid().coords() {
            assert_eq!(sched.chunk_state(coord), ChunkState::Meshed);
        }
        assert_eq!(sched.chunk_state(ChunkCoord::new(1, 1, 0)), ChunkState::Unloaded);

        // Only the floor chunk has a visible surface: its top face under air
        let below = sink.mesh(ChunkCoord::new(0, -1, 0)).unwrap();
        assert_eq!(below.quad_count(), 1);
        assert_eq!(below.vertices[0].normal, [0.0, 1.0, 0.0]);
        assert!(sink.mesh(ChunkCoord::new(0, 0, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_budget_limits_dispatch() {
        let mut cfg = config(2.0, 3.0);
        cfg.max_generate_per_tick = 2;
        cfg.max_mesh_per_tick = 1;
        let mut sched = scheduler(cfg);
        let mut sink = RecordingSink::new();

        let mut last = sched.stats();
        for _ in 0..20 {
            let stats = sched.tick(origin_view(), &mut sink).unwrap();
            assert!(stats.generate_dispatched - last.generate_dispatched <= 2);
            assert!(stats.mesh_dispatched - last.mesh_dispatched <= 1);
            last = stats;
        }

        let stats = sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();
        assert_eq!(stats.resident_chunks as u64, stats.generated);
        assert_eq!(stats.meshed_chunks, stats.resident_chunks);
    }

    #[test]
    fn test_closest_chunks_generated_first() {
        let mut cfg = config(2.0, 3.0);
        cfg.max_generate_per_tick = 1;
        let mut sched = scheduler(cfg);
        let mut sink = RecordingSink::new();

        sched.tick(origin_view(), &mut sink).unwrap();
        // First dispatched chunk is the one containing the viewpoint
        assert_eq!(sched.grid().coords(), vec![ChunkCoord::new(0, 0, 0)]);
    }

    #[test]
    fn test_hysteresis_prevents_thrashing() {
        let mut sched = scheduler(config(1.0, 2.0));
        let mut sink = RecordingSink::new();

        let a = origin_view();
        // 0.6 chunks along +x: chunk (-1, 0, 0) leaves the load radius but
        // stays inside the unload radius
        let b = a + Vec3::new(SIZE as f32 * 0.6, 0.0, 0.0);

        sched.run_until_idle(a, &mut sink, TIMEOUT).unwrap();
        sched.run_until_idle(b, &mut sink, TIMEOUT).unwrap();
        let settled = sched.stats();
        assert!(sched.grid().contains(ChunkCoord::new(-1, 0, 0)));

        for _ in 0..10 {
            sched.run_until_idle(a, &mut sink, TIMEOUT).unwrap();
            sched.run_until_idle(b, &mut sink, TIMEOUT).unwrap();
        }

        let stats = sched.stats();
        assert_eq!(stats.generated, settled.generated);
        assert_eq!(stats.evicted, settled.evicted);
        assert_eq!(stats.evicted, 0);
    }

    #[test]
    fn test_moving_away_evicts_and_notifies() {
        let mut sched = scheduler(config(1.0, 2.0));
        let mut sink = RecordingSink::new();
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();
        let old: Vec<ChunkCoord> = sched.grid().coords();

        let far = origin_view() + Vec3::new(SIZE as f32 * 50.0, 0.0, 0.0);
        let stats = sched.run_until_idle(far, &mut sink, TIMEOUT).unwrap();

        assert_eq!(stats.evicted, old.len() as u64);
        assert_eq!(sink.removed_count, old.len());
        for coord in old {
            assert!(!sched.grid().contains(coord));
            assert!(!sink.contains(coord));
        }
        assert_eq!(sink.len(), 7);
    }

    #[test]
    fn test_eviction_while_generating() {
        let mut sched = scheduler(config(1.0, 2.0));
        let mut sink = RecordingSink::new();

        // Dispatch generation, then jump away before results are applied
        sched.tick(origin_view(), &mut sink).unwrap();
        assert!(sched.stats().generate_dispatched > 0);
        let far = origin_view() + Vec3::new(0.0, 0.0, SIZE as f32 * 50.0);
        let stats = sched.run_until_idle(far, &mut sink, TIMEOUT).unwrap();

        assert!(stats.evicted >= 7);
        assert!(sched.grid().coords().iter().all(|c| c.z >= 48));
        // Nothing from the abandoned area reached the renderer
        assert!(sink.coords().iter().all(|c| c.z >= 48));
    }

    #[test]
    fn test_stale_mesh_discarded() {
        let mut sched = scheduler(config(1.0, 2.0));
        let mut sink = RecordingSink::new();
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        let coord = ChunkCoord::new(0, 0, 0);
        let entry = sched.grid().get(coord).unwrap();
        let old_version = entry.version();
        entry.set_state(ChunkState::MeshPending);
        entry.write().set_cell(IVec3::new(1, 1, 1), Voxel::new(materials::PLACED)).unwrap();
        let ready_before = sink.ready_count;

        // A result built from the old content arrives after the edit
        let stale = MeshBuffer::empty(coord, old_version);
        sched.finish_mesh(coord, stale, &mut sink);

        assert_eq!(sched.stats().stale_meshes, 1);
        assert_eq!(sink.ready_count, ready_before);
        assert_eq!(entry.state(), ChunkState::MeshPending);
        assert!(entry.is_mesh_dirty());

        // The next round re-meshes the new content
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();
        let mesh = sink.mesh(coord).unwrap();
        assert_eq!(mesh.version, entry.version());
        assert_eq!(mesh.quad_count(), 6);
    }

    #[test]
    fn test_neighbor_arrival_remeshes_boundary() {
        // Solid below y = 0: chunk (0, -1, 0) first meshes with unknown
        // neighbors (no faces), then gains its top face when (0, 0, 0) loads
        let mut cfg = config(1.0, 2.0);
        cfg.max_generate_per_tick = 1;
        let mut sched = scheduler(cfg);
        let mut sink = RecordingSink::new();
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        let below = sink.mesh(ChunkCoord::new(0, -1, 0)).unwrap();
        assert_eq!(below.quad_count(), 1);
    }

    #[test]
    fn test_resource_exhaustion_surfaces() {
        let store = Arc::new(Mutex::new(EditLog::in_memory(SIZE)));
        let mut sched = scheduler_with(config(1.0, 2.0), 3, store, Arc::new(floor));
        let mut sink = RecordingSink::new();

        let result = sched.run_until_idle(origin_view(), &mut sink, TIMEOUT);
        assert!(matches!(result, Err(Error::ResourceExhausted(_))));
        assert_eq!(sched.grid().len(), 3);
    }

    #[test]
    fn test_accepted_mesh_clears_chunk_dirty() {
        let store = Arc::new(Mutex::new(EditLog::in_memory(SIZE)));
        store.lock().unwrap().append(IVec3::new(1, -1, 1), EditOp::Remove).unwrap();
        let mut sched = scheduler_with(config(1.0, 2.0), 4096, store.clone(), Arc::new(floor));
        let mut sink = RecordingSink::new();
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        // Replayed edits dirty the chunk until its mesh is accepted
        for entry in sched.grid().entries() {
            assert!(!entry.read().is_dirty());
        }

        let engine = crate::edit::EditEngine::new(Arc::clone(sched.grid()), store);
        engine.apply_edit(IVec3::new(2, -1, 2), EditOp::Remove).unwrap();
        let below = sched.grid().get(ChunkCoord::new(0, -1, 0)).unwrap();
        assert!(below.read().is_dirty());

        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();
        assert!(!below.read().is_dirty());
    }

    #[test]
    fn test_full_grid_still_meshes_resident_chunks() {
        let store = Arc::new(Mutex::new(EditLog::in_memory(SIZE)));
        let mut sched = scheduler_with(config(1.0, 2.0), 3, store, Arc::new(floor));
        let mut sink = RecordingSink::new();

        let deadline = Instant::now() + TIMEOUT;
        let mut errors = 0;
        while Instant::now() < deadline {
            if let Err(e) = sched.tick(origin_view(), &mut sink) {
                assert!(matches!(e, Error::ResourceExhausted(_)));
                errors += 1;
            }
            let stats = sched.stats();
            if stats.generated == 3 && stats.meshed_chunks == 3 && stats.in_flight == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(errors > 0);
        assert_eq!(sched.grid().len(), 3);
        assert_eq!(sink.len(), 3);
        for coord in sched.grid().coords() {
            assert_eq!(sched.chunk_state(coord), ChunkState::Meshed);
        }
        let stats = sched.stats();
        assert_eq!(stats.resident_chunks, 3);
        assert_eq!(stats.meshed_chunks, 3);
        assert!(stats.queued_generate > 0);
    }

    #[test]
    fn test_generation_failure_is_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.vxed");
        {
            let mut log = EditLog::open(&path, SIZE).unwrap();
            log.append(IVec3::new(1, -1, 1), EditOp::Remove).unwrap();
            log.append(IVec3::new(1, 5, 1), EditOp::Add(materials::PLACED)).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8 + 20] = 250;
        std::fs::write(&path, bytes).unwrap();

        let store = Arc::new(Mutex::new(EditLog::open(&path, SIZE).unwrap()));
        let mut sched = scheduler_with(config(1.0, 2.0), 4096, store, Arc::new(floor));
        let mut sink = RecordingSink::new();
        let stats = sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        assert_eq!(stats.generation_failures, 1);
        assert_eq!(stats.meshed_chunks, 7);
        // Base content kept in the failed chunk, the sibling replayed its edit
        assert_eq!(sched.grid().voxel_at(IVec3::new(1, -1, 1)), Some(Voxel::new(materials::STONE)));
        assert_eq!(sched.grid().voxel_at(IVec3::new(1, 5, 1)), Some(Voxel::new(materials::PLACED)));
    }

    #[test]
    fn test_clear_evicts_everything() {
        let mut sched = scheduler(config(1.0, 2.0));
        let mut sink = RecordingSink::new();
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        sched.clear(&mut sink);
        assert!(sched.grid().is_empty());
        assert!(sink.is_empty());
        assert_eq!(sched.stats().resident_chunks, 0);
    }

    #[test]
    fn test_regenerated_chunk_matches_replay() {
        let store = Arc::new(Mutex::new(EditLog::in_memory(SIZE)));
        let mut sched = scheduler_with(config(1.0, 2.0), 4096, store.clone(), Arc::new(floor));
        let mut sink = RecordingSink::new();
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        let engine = crate::edit::EditEngine::new(Arc::clone(sched.grid()), store.clone());
        let edits = [
            (IVec3::new(0, -1, 0), EditOp::Remove),
            (IVec3::new(2, 0, 2), EditOp::Add(materials::PLACED)),
            (IVec3::new(2, 0, 2), EditOp::Paint(materials::SAND)),
            (IVec3::new(3, -2, 1), EditOp::Paint(materials::GRASS)),
        ];
        for (pos, op) in edits {
            assert!(engine.apply_edit(pos, op).unwrap().is_applied());
        }
        let before: Vec<(ChunkCoord, Vec<Voxel>)> = [ChunkCoord::new(0, -1, 0), ChunkCoord::new(0, 0, 0)]
            .iter()
            .map(|&c| (c, sched.grid().get(c).unwrap().read().cells().to_vec()))
            .collect();

        // Away and back
        let far = origin_view() + Vec3::new(SIZE as f32 * 50.0, 0.0, 0.0);
        sched.run_until_idle(far, &mut sink, TIMEOUT).unwrap();
        assert!(!sched.grid().contains(ChunkCoord::new(0, 0, 0)));
        sched.run_until_idle(origin_view(), &mut sink, TIMEOUT).unwrap();

        for (coord, cells) in before {
            let entry = sched.grid().get(coord).unwrap();
            assert_eq!(entry.read().cells(), &cells[..]);

            // Same as base content with the edits replayed in order
            let mut expected = VoxelChunk::try_new(coord, SIZE).unwrap();
            let origin = coord.voxel_origin(SIZE);
            for y in 0..SIZE {
                expected.fill_layer(y, |local| floor(origin + local));
            }
            for (pos, op) in edits {
                let (c, local) = ChunkCoord::from_voxel(pos, SIZE);
                if c == coord {
                    let current = expected.get_cell(local).unwrap();
                    if let Some(next) = op.apply(current) {
                        expected.set_cell(local, next).unwrap();
                    }
                }
            }
            assert_eq!(entry.read().cells(), expected.cells());
        }
    }
}
