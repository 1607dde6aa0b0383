//! Bounded priority queue of streaming requests, closest chunk first

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::voxel::ChunkCoord;

/// What a request asks the scheduler to do
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Generate,
    Mesh,
    Evict,
}

/// Transient work item for one chunk
#[derive(Clone, Copy, Debug)]
pub struct StreamingRequest {
    pub coord: ChunkCoord,
    pub kind: RequestKind,
    /// Distance from the viewpoint in chunks (lower = more urgent)
    pub distance: f32,
    /// Insertion order, breaks distance ties
    seq: u64,
}

impl StreamingRequest {
    pub fn new(coord: ChunkCoord, kind: RequestKind, distance: f32) -> Self {
        Self { coord, kind, distance, seq: 0 }
    }
}

// Implement Ord/PartialOrd for BinaryHeap (max-heap by default)
impl Eq for StreamingRequest {}

impl PartialEq for StreamingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for StreamingRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // Closer first, then older first
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for StreamingRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of `RequestQueue::push`
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PushResult {
    Queued,
    /// The chunk already has a queued request
    AlreadyQueued,
    /// The queue was full; the farthest request (possibly the new one) was dropped
    Dropped(ChunkCoord),
}

/// Bounded queue holding at most one request per chunk.
pub struct RequestQueue {
    kind: RequestKind,
    heap: BinaryHeap<StreamingRequest>,
    queued: HashSet<ChunkCoord>,
    capacity: usize,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new(kind: RequestKind, capacity: usize) -> Self {
        Self {
            kind,
            heap: BinaryHeap::new(),
            queued: HashSet::new(),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Add a request; on overflow the farthest request is dropped.
    pub fn push(&mut self, coord: ChunkCoord, distance: f32) -> PushResult {
        if self.queued.contains(&coord) {
            return PushResult::AlreadyQueued;
        }

        let mut dropped = None;
        if self.heap.len() >= self.capacity {
            let farthest = self
                .heap
                .iter()
                .copied()
                .min()
                .map(|r| (r.coord, r.distance));
            match farthest {
                Some((far_coord, far_distance)) if far_distance > distance => {
                    self.remove(far_coord);
                    dropped = Some(far_coord);
                }
                _ => return PushResult::Dropped(coord),
            }
        }

        let request = StreamingRequest {
            coord,
            kind: self.kind,
            distance,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.heap.push(request);
        self.queued.insert(coord);

        match dropped {
            Some(far) => PushResult::Dropped(far),
            None => PushResult::Queued,
        }
    }

    /// Take the closest request
    pub fn pop(&mut self) -> Option<StreamingRequest> {
        let request = self.heap.pop()?;
        self.queued.remove(&request.coord);
        Some(request)
    }

    pub fn peek(&self) -> Option<&StreamingRequest> {
        self.heap.peek()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.queued.contains(&coord)
    }

    /// Remove the request for a chunk, if queued
    pub fn remove(&mut self, coord: ChunkCoord) -> bool {
        if !self.queued.remove(&coord) {
            return false;
        }
        self.heap.retain(|r| r.coord != coord);
        true
    }

    /// Recompute every distance; requests mapped to `None` are dropped.
    /// Returns the number dropped.
    pub fn reprioritize(&mut self, mut distance: impl FnMut(ChunkCoord) -> Option<f32>) -> usize {
        let before = self.heap.len();
        let requests = std::mem::take(&mut self.heap).into_vec();
        self.heap = requests
            .into_iter()
            .filter_map(|mut r| {
                r.distance = distance(r.coord)?;
                Some(r)
            })
            .collect();
        if self.heap.len() != before {
            self.queued = self.heap.iter().map(|r| r.coord).collect();
        }
        before - self.heap.len()
    }

    /// Get the number of queued requests
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Clear all queued requests
    pub fn clear(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }
}
