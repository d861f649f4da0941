//! Background chunk I/O on a fixed pool of worker threads.
//!
//! Jobs are queued on a bounded channel and executed against a shared
//! [`ChunkStore`]. Completed jobs are delivered on a second bounded channel
//! that the owner drains. Every queued job carries a cancellation flag that
//! workers check before touching the store. Jobs queued for the same position
//! and kind share one flag, so a single cancel reaches all of them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use dashmap::DashMap;
use strata_config::StorageConfig;

use crate::chunk::{Chunk, ChunkPos};
use crate::error::StorageError;
use crate::region::SectorLocation;
use crate::store::ChunkStore;

/// Work for an I/O thread.
#[derive(Debug)]
pub enum IoJob {
    /// Read the chunk at a position.
    Load(ChunkPos),
    /// Write a chunk to its own position.
    Save(Chunk),
}

/// Discriminant of an [`IoJob`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IoJobKind {
    /// [`IoJob::Load`].
    Load,
    /// [`IoJob::Save`].
    Save,
}

impl IoJob {
    /// Chunk the job operates on.
    pub fn position(&self) -> ChunkPos {
        match self {
            Self::Load(pos) => *pos,
            Self::Save(chunk) => chunk.position(),
        }
    }

    /// Load or save.
    pub fn kind(&self) -> IoJobKind {
        match self {
            Self::Load(_) => IoJobKind::Load,
            Self::Save(_) => IoJobKind::Save,
        }
    }
}

/// A finished job.
#[derive(Debug)]
pub enum IoResult {
    /// Outcome of [`IoJob::Load`].
    Loaded {
        /// Requested position.
        pos: ChunkPos,
        /// The chunk, `None` if nothing is stored there.
        result: Result<Option<Chunk>, StorageError>,
    },
    /// Outcome of [`IoJob::Save`]. The chunk is handed back either way.
    Saved {
        /// The saved chunk, clean on success.
        chunk: Chunk,
        /// Where it was written.
        result: Result<SectorLocation, StorageError>,
    },
}

impl IoResult {
    /// Chunk the job operated on.
    pub fn position(&self) -> ChunkPos {
        match self {
            Self::Loaded { pos, .. } => *pos,
            Self::Saved { chunk, .. } => chunk.position(),
        }
    }
}

type JobKey = (ChunkPos, IoJobKind);

/// Cancellation flag shared by every queued job with the same key.
struct ActiveEntry {
    cancelled: Arc<AtomicBool>,
    pending: usize,
}

type ActiveJobs = DashMap<JobKey, ActiveEntry>;

/// Registers one more job under `key` and returns its flag.
fn register(active: &ActiveJobs, key: JobKey) -> Arc<AtomicBool> {
    let mut entry = active.entry(key).or_insert_with(|| ActiveEntry {
        cancelled: Arc::new(AtomicBool::new(false)),
        pending: 0,
    });
    entry.pending += 1;
    Arc::clone(&entry.cancelled)
}

/// Drops one job's claim on `key`. Entries replaced after a cancel are left
/// alone.
fn release(active: &ActiveJobs, key: JobKey, flag: &Arc<AtomicBool>) {
    if let Some(mut entry) = active.get_mut(&key)
        && Arc::ptr_eq(&entry.cancelled, flag)
    {
        entry.pending -= 1;
    }
    active.remove_if(&key, |_, entry| entry.pending == 0);
}

/// Flags every queued job for `pos`.
fn cancel_jobs(active: &ActiveJobs, pos: ChunkPos) -> bool {
    let mut cancelled = false;
    for kind in [IoJobKind::Load, IoJobKind::Save] {
        if let Some((_, entry)) = active.remove(&(pos, kind)) {
            entry.cancelled.store(true, Ordering::Release);
            cancelled = true;
        }
    }
    cancelled
}

struct QueuedJob {
    job: IoJob,
    cancelled: Arc<AtomicBool>,
}

/// Runs chunk loads and saves on background threads.
pub struct IoWorkerPool {
    job_sender: Option<Sender<QueuedJob>>,
    result_receiver: Receiver<IoResult>,
    active: Arc<ActiveJobs>,
    in_flight: Arc<AtomicU64>,
    workers: Vec<JoinHandle<()>>,
}

impl IoWorkerPool {
    /// Starts `threads` workers (at least one) with room for `queue_capacity`
    /// pending jobs and as many undrained results.
    pub fn new(
        store: Arc<ChunkStore>,
        threads: usize,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let capacity = queue_capacity.max(1);
        let (job_sender, job_receiver) = bounded::<QueuedJob>(capacity);
        let (result_sender, result_receiver) = bounded::<IoResult>(capacity);
        let active = Arc::new(ActiveJobs::new());
        let in_flight = Arc::new(AtomicU64::new(0));

        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let store = Arc::clone(&store);
            let jobs = job_receiver.clone();
            let results = result_sender.clone();
            let active = Arc::clone(&active);
            let in_flight = Arc::clone(&in_flight);
            let handle = std::thread::Builder::new()
                .name(format!("strata-io-{index}"))
                .spawn(move || run_worker(&store, &jobs, &results, &active, &in_flight))?;
            workers.push(handle);
        }
        tracing::debug!(threads, capacity, "started chunk io pool");

        Ok(Self {
            job_sender: Some(job_sender),
            result_receiver,
            active,
            in_flight,
            workers,
        })
    }

    /// Starts a pool sized by `config`; `io_threads = 0` uses one thread per CPU.
    pub fn from_config(store: Arc<ChunkStore>, config: &StorageConfig) -> std::io::Result<Self> {
        let threads = match config.io_threads {
            0 => num_cpus::get(),
            n => n,
        };
        Self::new(store, threads, config.queue_capacity)
    }

    /// Queues a job.
    ///
    /// Returns `Err(job)` if the queue is full or the pool has shut down.
    #[allow(clippy::result_large_err)]
    pub fn submit(&self, job: IoJob) -> Result<(), IoJob> {
        let Some(sender) = &self.job_sender else {
            return Err(job);
        };
        let key = (job.position(), job.kind());
        let cancelled = register(&self.active, key);
        self.in_flight.fetch_add(1, Ordering::AcqRel);

        sender.try_send(QueuedJob { job, cancelled }).map_err(|e| {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            let queued = e.into_inner();
            release(&self.active, key, &queued.cancelled);
            queued.job
        })
    }

    /// Cancels every pending job for `pos`, duplicates included.
    ///
    /// A job already running completes, but its result is discarded.
    /// Returns `true` if anything was cancelled.
    pub fn cancel(&self, pos: ChunkPos) -> bool {
        cancel_jobs(&self.active, pos)
    }

    /// Drains every completed job without blocking.
    pub fn drain_results(&self) -> Vec<IoResult> {
        self.result_receiver.try_iter().collect()
    }

    /// Waits up to `timeout` for the next completed job.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<IoResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Jobs queued or executing.
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Returns `true` if a job of `kind` for `pos` is queued or running.
    pub fn is_pending(&self, pos: ChunkPos, kind: IoJobKind) -> bool {
        self.active.contains_key(&(pos, kind))
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting jobs, finishes the queue and joins the workers.
    ///
    /// Returns results not yet drained.
    pub fn shutdown(mut self) -> Vec<IoResult> {
        self.stop()
    }

    fn stop(&mut self) -> Vec<IoResult> {
        self.job_sender = None;
        let mut leftover = Vec::new();
        for handle in self.workers.drain(..) {
            // Workers block on a full result channel, so keep draining.
            while !handle.is_finished() {
                leftover.extend(self.result_receiver.try_iter());
                std::thread::sleep(Duration::from_millis(1));
            }
            if handle.join().is_err() {
                tracing::error!("chunk io worker panicked");
            }
        }
        leftover.extend(self.result_receiver.try_iter());
        leftover
    }
}

impl Drop for IoWorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let discarded = self.stop().len();
            if discarded > 0 {
                tracing::warn!(discarded, "chunk io pool dropped with undrained results");
            }
        }
    }
}

fn run_worker(
    store: &ChunkStore,
    jobs: &Receiver<QueuedJob>,
    results: &Sender<IoResult>,
    active: &ActiveJobs,
    in_flight: &AtomicU64,
) {
    while let Ok(QueuedJob { job, cancelled }) = jobs.recv() {
        let pos = job.position();
        let key = (pos, job.kind());

        if cancelled.load(Ordering::Acquire) {
            tracing::debug!(x = pos.x, z = pos.z, kind = ?key.1, "dropped cancelled io job");
        } else {
            let result = execute(store, job);
            if !cancelled.load(Ordering::Acquire) {
                // The owner may have dropped the receiver during shutdown.
                let _ = results.send(result);
            }
        }

        release(active, key, &cancelled);
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn execute(store: &ChunkStore, job: IoJob) -> IoResult {
    match job {
        IoJob::Load(pos) => IoResult::Loaded {
            pos,
            result: store.load(pos),
        },
        IoJob::Save(mut chunk) => {
            let result = store.save(&mut chunk);
            IoResult::Saved { chunk, result }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
