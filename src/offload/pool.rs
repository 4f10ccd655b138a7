//! Fixed-size pool of OS-thread workers.
//!
//! # Responsibilities
//! - Dispatch a task to an idle worker, or queue it FIFO when all are busy
//! - Hand the next queued job to a worker as soon as it finishes
//! - Drop crashed workers from the pool without replacing them
//!
//! # Design Decisions
//! - Tasks and results cross the thread boundary as serialized JSON
//! - Each worker owns a private job channel; the pool only tracks ids
//! - Workers hold a weak reference back to the pool so dropping the pool
//!   stops them

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::observability::metrics;
use crate::offload::tasks::{self, OffloadTask};

/// Message handler run inside a worker: serialized task in, serialized result out.
pub type Processor = Arc<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OffloadError {
    #[error("Offload task failed: {0}")]
    TaskFailed(String),

    #[error("Offload worker {0} crashed")]
    WorkerCrashed(usize),

    #[error("No offload workers left")]
    NoWorkers,

    #[error("Offload pool is shut down")]
    ShutDown,
}

type Reply = oneshot::Sender<Result<Value, OffloadError>>;

struct Job {
    payload: String,
    reply: Reply,
}

struct WorkerHandle {
    jobs: mpsc::Sender<Job>,
    thread: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
struct PoolState {
    workers: HashMap<usize, WorkerHandle>,
    idle: VecDeque<usize>,
    queue: VecDeque<Job>,
    shut_down: bool,
}

impl PoolState {
    /// Send `job` to `id`. A closed channel means the worker is gone.
    fn dispatch(&mut self, id: usize, job: Job) -> Result<(), Job> {
        match self.workers.get(&id) {
            Some(worker) => worker.jobs.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }

    fn fail_queue(&mut self, error: OffloadError) {
        for job in self.queue.drain(..) {
            let _ = job.reply.send(Err(error.clone()));
        }
        metrics::record_offload_queue_depth(0);
    }
}

struct PoolShared {
    size: usize,
    state: Mutex<PoolState>,
}

impl PoolShared {
    /// Worker `id` finished a job: give it the next queued job or mark it idle.
    fn finish(&self, id: usize) {
        let mut state = self.state.lock().expect("offload pool mutex poisoned");
        if state.shut_down {
            return;
        }
        match state.queue.pop_front() {
            Some(job) => {
                metrics::record_offload_queue_depth(state.queue.len());
                tracing::debug!(worker = id, queued = state.queue.len(), "dispatching queued task");
                if let Err(job) = state.dispatch(id, job) {
                    state.queue.push_front(job);
                }
            }
            None => state.idle.push_back(id),
        }
    }

    /// Remove a crashed worker; with none left, fail everything queued.
    fn remove_worker(&self, id: usize) {
        let mut state = self.state.lock().expect("offload pool mutex poisoned");
        state.workers.remove(&id);
        state.idle.retain(|idle| *idle != id);
        tracing::error!(worker = id, remaining = state.workers.len(), "offload worker crashed");
        if state.workers.is_empty() {
            state.fail_queue(OffloadError::NoWorkers);
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_workers: usize,
    pub live_workers: usize,
    pub available_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
}

pub struct OffloadPool {
    shared: Arc<PoolShared>,
}

impl OffloadPool {
    /// Start `size` workers running the built-in task handlers.
    pub fn new(size: usize) -> std::io::Result<Self> {
        Self::with_processor(size, Arc::new(tasks::process_message))
    }

    /// Start `size` workers running `processor`.
    pub fn with_processor(size: usize, processor: Processor) -> std::io::Result<Self> {
        let shared = Arc::new(PoolShared {
            size,
            state: Mutex::new(PoolState::default()),
        });

        let mut workers = HashMap::with_capacity(size);
        for id in 0..size {
            let (tx, rx) = mpsc::channel();
            let processor = processor.clone();
            let pool = Arc::downgrade(&shared);
            let thread = thread::Builder::new()
                .name(format!("offload-{id}"))
                .spawn(move || worker_loop(id, rx, processor, pool))?;
            workers.insert(
                id,
                WorkerHandle {
                    jobs: tx,
                    thread: Some(thread),
                },
            );
        }

        {
            let mut state = shared.state.lock().expect("offload pool mutex poisoned");
            state.workers = workers;
            state.idle = (0..size).collect();
        }
        tracing::info!(workers = size, "offload pool started");

        Ok(Self { shared })
    }

    /// Run `task` on a worker, waiting in the FIFO queue if all are busy.
    pub async fn execute(&self, task: OffloadTask) -> Result<Value, OffloadError> {
        let payload = serde_json::to_string(&task).map_err(|e| OffloadError::TaskFailed(e.to_string()))?;
        let (reply, result) = oneshot::channel();
        self.submit(Job { payload, reply })?;
        result.await.unwrap_or(Err(OffloadError::ShutDown))
    }

    fn submit(&self, job: Job) -> Result<(), OffloadError> {
        let mut state = self.shared.state.lock().expect("offload pool mutex poisoned");
        if state.shut_down {
            return Err(OffloadError::ShutDown);
        }
        if state.workers.is_empty() {
            return Err(OffloadError::NoWorkers);
        }

        let mut job = job;
        while let Some(id) = state.idle.pop_front() {
            match state.dispatch(id, job) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    // worker thread already gone
                    state.workers.remove(&id);
                    job = returned;
                }
            }
        }
        if state.workers.is_empty() {
            return Err(OffloadError::NoWorkers);
        }

        state.queue.push_back(job);
        metrics::record_offload_queue_depth(state.queue.len());
        tracing::debug!(queued = state.queue.len(), "all offload workers busy, task queued");
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().expect("offload pool mutex poisoned");
        let live = state.workers.len();
        let available = state.idle.len();
        PoolStats {
            total_workers: self.shared.size,
            live_workers: live,
            available_workers: available,
            busy_workers: live.saturating_sub(available),
            queued_tasks: state.queue.len(),
        }
    }

    /// Stop accepting work, fail queued jobs and join every worker thread.
    ///
    /// Blocks until in-flight tasks finish.
    pub fn shutdown(&self) {
        let threads: Vec<thread::JoinHandle<()>> = {
            let mut state = self.shared.state.lock().expect("offload pool mutex poisoned");
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.fail_queue(OffloadError::ShutDown);
            state.idle.clear();
            // dropping the senders ends each worker's receive loop
            state
                .workers
                .drain()
                .filter_map(|(_, mut worker)| worker.thread.take())
                .collect()
        };

        tracing::info!(workers = threads.len(), "shutting down offload pool");
        for thread in threads {
            if thread.join().is_err() {
                tracing::warn!("offload worker panicked during shutdown");
            }
        }
    }
}

fn worker_loop(id: usize, jobs: mpsc::Receiver<Job>, processor: Processor, pool: Weak<PoolShared>) {
    while let Ok(job) = jobs.recv() {
        match panic::catch_unwind(AssertUnwindSafe(|| processor(&job.payload))) {
            Ok(result) => {
                let reply = result.map_err(OffloadError::TaskFailed).and_then(|encoded| {
                    serde_json::from_str(&encoded).map_err(|e| OffloadError::TaskFailed(e.to_string()))
                });
                let _ = job.reply.send(reply);
                match pool.upgrade() {
                    Some(pool) => pool.finish(id),
                    None => break,
                }
            }
            Err(_) => {
                let _ = job.reply.send(Err(OffloadError::WorkerCrashed(id)));
                if let Some(pool) = pool.upgrade() {
                    pool.remove_worker(id);
                }
                return;
            }
        }
    }
    tracing::debug!(worker = id, "offload worker exiting");
}
