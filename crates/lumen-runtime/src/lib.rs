//! Worker pool running light propagation jobs over independent blocks.
#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use lumen_blocks::BlockRegistry;
use lumen_geom::Vec3i;
use lumen_light::{LightError, LightSeed, PaddedBuf, Propagator, SpillEvent};
use rayon::{ThreadPool, ThreadPoolBuilder};

/// How long a worker sleeps on an empty queue before re-checking.
const SYNC_INTERVAL: Duration = Duration::from_millis(500);

/// Jobs a worker takes per wake before going back to the queue condition.
const MAX_BATCH: usize = 8;

#[derive(Clone, Debug)]
pub struct LightJob {
    pub block_pos: Vec3i,
    pub buf: PaddedBuf,
    pub seeds: Vec<LightSeed>,
    pub lod: u8,
    pub job_id: u64,
}

#[derive(Clone, Debug)]
pub struct LightJobOut {
    pub block_pos: Vec3i,
    /// Updated light channel for the block interior, in storage order.
    pub light: Vec<u8>,
    pub add_spills: Vec<SpillEvent>,
    pub remove_spills: Vec<SpillEvent>,
    pub job_id: u64,
    pub t_process_ms: u32,
}

/// Fixed pool of light workers, each owning one reusable [`Propagator`].
/// Jobs for distinct blocks run in parallel; serializing jobs for the same
/// block is the submitter's responsibility.
pub struct LightSpreader {
    job_tx: Sender<LightJob>,
    res_rx: Receiver<Result<LightJobOut, LightError>>,
    _pool: Arc<ThreadPool>,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
    pub workers: usize,
}

impl LightSpreader {
    pub fn new(
        workers: usize,
        block_size_pow2: u32,
        padding: usize,
        reg: Arc<BlockRegistry>,
    ) -> Result<Self, LightError> {
        let workers = workers.max(1);
        let (job_tx, job_rx) = unbounded::<LightJob>();
        let (res_tx, res_rx) = unbounded::<Result<LightJobOut, LightError>>();
        let queued = Arc::new(AtomicUsize::new(0));
        let inflight = Arc::new(AtomicUsize::new(0));

        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("lumen-light-{i}"))
                .build()
                .expect("light pool"),
        );
        for _ in 0..workers {
            // Building the propagator here surfaces bad geometry before any
            // thread spawns.
            let propagator = Propagator::new(block_size_pow2, padding)?;
            let rx = job_rx.clone();
            let tx = res_tx.clone();
            let reg = reg.clone();
            let queued = queued.clone();
            let inflight = inflight.clone();
            pool.spawn(move || worker_loop(rx, tx, reg, propagator, queued, inflight));
        }

        Ok(Self {
            job_tx,
            res_rx,
            _pool: pool,
            queued,
            inflight,
            workers,
        })
    }

    /// Non-blocking submit.
    pub fn push(&self, job: LightJob) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if self.job_tx.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Non-blocking drain of completed jobs.
    pub fn drain(&self) -> Vec<Result<LightJobOut, LightError>> {
        self.res_rx.try_iter().collect()
    }

    /// Blocking pop of one completed job. `None` means every worker is gone.
    pub fn recv(&self) -> Option<Result<LightJobOut, LightError>> {
        self.res_rx.recv().ok()
    }

    pub fn queue_counts(&self) -> (usize, usize) {
        (
            self.queued.load(Ordering::Relaxed),
            self.inflight.load(Ordering::Relaxed),
        )
    }
}

fn worker_loop(
    rx: Receiver<LightJob>,
    tx: Sender<Result<LightJobOut, LightError>>,
    reg: Arc<BlockRegistry>,
    mut propagator: Propagator,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
) {
    'outer: loop {
        let job = match rx.recv_timeout(SYNC_INTERVAL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if !run_job(job, &mut propagator, &reg, &tx, &queued, &inflight) {
            break;
        }
        for _ in 1..MAX_BATCH {
            match rx.try_recv() {
                Ok(job) => {
                    if !run_job(job, &mut propagator, &reg, &tx, &queued, &inflight) {
                        break 'outer;
                    }
                }
                Err(_) => break,
            }
        }
    }
}

/// Returns false when the job failed; the error is fatal for this worker.
fn run_job(
    job: LightJob,
    propagator: &mut Propagator,
    reg: &BlockRegistry,
    tx: &Sender<Result<LightJobOut, LightError>>,
    queued: &AtomicUsize,
    inflight: &AtomicUsize,
) -> bool {
    queued.fetch_sub(1, Ordering::Relaxed);
    inflight.fetch_add(1, Ordering::Relaxed);
    let LightJob {
        block_pos,
        mut buf,
        seeds,
        lod,
        job_id,
    } = job;
    let t0 = Instant::now();
    let res = propagator
        .process_block(reg, block_pos, &mut buf, &seeds)
        .map(|out| {
            let t_process_ms = t0.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
            log::info!(
                target: "perf",
                "ms={} light_spread block=({}, {}, {}) lod={} seeds={} spills={}",
                t_process_ms,
                block_pos.x,
                block_pos.y,
                block_pos.z,
                lod,
                seeds.len(),
                out.add_spills.len() + out.remove_spills.len()
            );
            LightJobOut {
                block_pos,
                light: buf.interior_light(),
                add_spills: out.add_spills,
                remove_spills: out.remove_spills,
                job_id,
                t_process_ms,
            }
        });
    inflight.fetch_sub(1, Ordering::Relaxed);
    let ok = res.is_ok();
    if let Err(e) = &res {
        log::error!(
            "light job {} for block ({}, {}, {}) failed: {}",
            job_id,
            block_pos.x,
            block_pos.y,
            block_pos.z,
            e
        );
    }
    let _ = tx.send(res);
    ok
}
