//! Background byte movement between the cache and the external store.
//!
//! A fixed pool of worker threads drains a FIFO queue of preload
//! (store -> cache) and persist (cache -> store) tasks. Each task may
//! carry its own store handle; otherwise the mover-wide default applies.
//! Failures are logged and not retried: a submitter treats a preload that
//! never landed as a cache miss and goes to the external store itself.

use crate::block_store::BlockStore;
use anycache_lib::metrics::DataMoverMetrics;
use anycache_lib::{AcError, AcResult, BlockId};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use ufs::UnderFileSystem;

enum TaskKind {
    Preload,
    Persist,
}

struct MoverTask {
    kind: TaskKind,
    block_id: BlockId,
    ufs_path: String,
    offset_in_ufs: u64,
    /// Bytes to preload; unused by persist (the block length rules).
    length: u64,
    /// Per-task store; takes precedence over the mover default.
    ufs: Option<Arc<dyn UnderFileSystem>>,
}

struct QueueState {
    tasks: VecDeque<MoverTask>,
    active: usize,
    running: bool,
}

struct MoverShared {
    block_store: Arc<BlockStore>,
    default_ufs: Option<Arc<dyn UnderFileSystem>>,
    queue: Mutex<QueueState>,
    task_cv: Condvar,
    done_cv: Condvar,
    metrics: Arc<DataMoverMetrics>,
}

pub struct DataMover {
    shared: Arc<MoverShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DataMover {
    pub fn new(
        block_store: Arc<BlockStore>,
        default_ufs: Option<Arc<dyn UnderFileSystem>>,
        num_threads: usize,
        metrics: Arc<DataMoverMetrics>,
    ) -> Self {
        let shared = Arc::new(MoverShared {
            block_store,
            default_ufs,
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                active: 0,
                running: true,
            }),
            task_cv: Condvar::new(),
            done_cv: Condvar::new(),
            metrics,
        });

        let mut threads = Vec::with_capacity(num_threads);
        for _ in 0..num_threads.max(1) {
            let shared = Arc::clone(&shared);
            threads.push(std::thread::spawn(move || worker_loop(shared)));
        }
        info!("data mover started with {} threads", num_threads.max(1));

        Self {
            shared,
            threads: Mutex::new(threads),
        }
    }

    /// Queue a preload: read `length` bytes at `offset` from the external
    /// store and land them in the cache block.
    pub fn submit_preload(
        &self,
        block_id: BlockId,
        ufs_path: &str,
        offset: u64,
        length: u64,
        ufs: Option<Arc<dyn UnderFileSystem>>,
    ) -> AcResult<()> {
        self.submit(MoverTask {
            kind: TaskKind::Preload,
            block_id,
            ufs_path: ufs_path.to_string(),
            offset_in_ufs: offset,
            length,
            ufs,
        })
    }

    /// Queue a persist: write the whole cached block into the external
    /// store at `offset`.
    pub fn submit_persist(
        &self,
        block_id: BlockId,
        ufs_path: &str,
        offset: u64,
        ufs: Option<Arc<dyn UnderFileSystem>>,
    ) -> AcResult<()> {
        self.submit(MoverTask {
            kind: TaskKind::Persist,
            block_id,
            ufs_path: ufs_path.to_string(),
            offset_in_ufs: offset,
            length: 0,
            ufs,
        })
    }

    fn submit(&self, task: MoverTask) -> AcResult<()> {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if !queue.running {
                return Err(AcError::Unavailable("data mover stopped".to_string()));
            }
            queue.tasks.push_back(task);
        }
        self.shared.task_cv.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and nothing is in flight.
    pub fn wait_all(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        while !(queue.tasks.is_empty() && queue.active == 0) {
            queue = self.shared.done_cv.wait(queue).unwrap();
        }
    }

    /// Stop the pool. Pending tasks are discarded; in-flight tasks finish.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if !queue.running {
                return;
            }
            queue.running = false;
            queue.tasks.clear();
        }
        self.shared.task_cv.notify_all();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().unwrap().tasks.len()
    }
}

impl Drop for DataMover {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<MoverShared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            while queue.tasks.is_empty() && queue.running {
                queue = shared.task_cv.wait(queue).unwrap();
            }
            if !queue.running {
                return;
            }
            let task = queue.tasks.pop_front().unwrap();
            queue.active += 1;
            task
        };

        if let Err(err) = execute_task(&shared, &task) {
            shared.metrics.record_failure();
            warn!(
                "data mover task for block {} failed: {}",
                task.block_id, err
            );
        }

        {
            let mut queue = shared.queue.lock().unwrap();
            queue.active -= 1;
        }
        shared.done_cv.notify_all();
    }
}

fn execute_task(shared: &MoverShared, task: &MoverTask) -> AcResult<()> {
    let ufs = task
        .ufs
        .as_ref()
        .or(shared.default_ufs.as_ref())
        .ok_or_else(|| AcError::Internal("no external store for data mover task".to_string()))?;

    match task.kind {
        TaskKind::Preload => {
            let mut buf = vec![0u8; task.length as usize];
            let n = ufs.read_range(&task.ufs_path, task.offset_in_ufs, &mut buf)?;
            buf.truncate(n);

            shared.block_store.ensure_block(task.block_id, n as u64)?;
            shared.block_store.write_block(task.block_id, 0, &buf)?;
            shared.metrics.record_preload();
            debug!(
                "preloaded {} bytes from {} into block {}",
                n, task.ufs_path, task.block_id
            );
        }
        TaskKind::Persist => {
            let meta = shared.block_store.block_meta(task.block_id)?;
            let mut buf = vec![0u8; meta.length as usize];
            let n = shared.block_store.read_block(task.block_id, 0, &mut buf)?;
            buf.truncate(n);

            ufs.create(&task.ufs_path, true)?;
            ufs.write_at(&task.ufs_path, task.offset_in_ufs, &buf)?;
            shared.metrics.record_persist();
            debug!(
                "persisted block {} ({} bytes) to {}",
                task.block_id, n, task.ufs_path
            );
        }
    }
    Ok(())
}
