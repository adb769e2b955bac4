//! Worker membership and health.

use anycache_lib::{now_ms, AcError, AcResult, WorkerId, WorkerInfo};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Mutex;

struct WorkerManagerInner {
    workers: HashMap<WorkerId, WorkerInfo>,
    next_id: WorkerId,
}

pub struct WorkerManager {
    inner: Mutex<WorkerManagerInner>,
    heartbeat_timeout_ms: i64,
}

impl WorkerManager {
    pub fn new(heartbeat_timeout_ms: u64) -> Self {
        Self {
            inner: Mutex::new(WorkerManagerInner {
                workers: HashMap::new(),
                next_id: 1,
            }),
            heartbeat_timeout_ms: heartbeat_timeout_ms as i64,
        }
    }

    /// Register a worker. Re-registration by address is idempotent: the
    /// existing id is refreshed and returned, so a restarted worker keeps
    /// its identity.
    pub fn register(&self, address: &str, capacity: u64, used: u64) -> WorkerId {
        let mut inner = self.inner.lock().unwrap();
        let now = now_ms();

        for (id, w) in inner.workers.iter_mut() {
            if w.address == address {
                w.capacity_bytes = capacity;
                w.used_bytes = used;
                w.last_heartbeat_ms = now;
                w.alive = true;
                info!("worker re-registered: id={}, address={}", id, address);
                return *id;
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.workers.insert(
            id,
            WorkerInfo {
                id,
                address: address.to_string(),
                capacity_bytes: capacity,
                used_bytes: used,
                last_heartbeat_ms: now,
                alive: true,
            },
        );
        info!(
            "worker registered: id={}, address={}, capacity={}MB",
            id,
            address,
            capacity / (1024 * 1024)
        );
        id
    }

    pub fn heartbeat(&self, id: WorkerId, capacity: u64, used: u64) -> AcResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let w = inner
            .workers
            .get_mut(&id)
            .ok_or_else(|| AcError::NotFound(format!("worker {} not registered", id)))?;
        w.capacity_bytes = capacity;
        w.used_bytes = used;
        w.last_heartbeat_ms = now_ms();
        w.alive = true;
        Ok(())
    }

    pub fn get_worker(&self, id: WorkerId) -> AcResult<WorkerInfo> {
        let inner = self.inner.lock().unwrap();
        inner
            .workers
            .get(&id)
            .cloned()
            .ok_or_else(|| AcError::NotFound(format!("worker {} not found", id)))
    }

    pub fn live_workers(&self) -> Vec<WorkerInfo> {
        let inner = self.inner.lock().unwrap();
        inner.workers.values().filter(|w| w.alive).cloned().collect()
    }

    /// Pick the alive worker with the most available bytes for a new write.
    pub fn select_worker_for_write(&self) -> AcResult<WorkerInfo> {
        let inner = self.inner.lock().unwrap();
        let mut best: Option<&WorkerInfo> = None;
        for w in inner.workers.values() {
            if !w.alive {
                continue;
            }
            let better = match best {
                Some(b) => w.available_bytes() > b.available_bytes(),
                None => w.available_bytes() > 0,
            };
            if better {
                best = Some(w);
            }
        }
        best.cloned()
            .ok_or_else(|| AcError::Unavailable("no workers available".to_string()))
    }

    /// Mark workers whose last heartbeat is older than the timeout as not
    /// alive; returns the newly dead ids.
    pub fn check_heartbeats(&self) -> Vec<WorkerId> {
        let mut inner = self.inner.lock().unwrap();
        let now = now_ms();
        let mut dead = Vec::new();
        for (id, w) in inner.workers.iter_mut() {
            if w.alive && now - w.last_heartbeat_ms > self.heartbeat_timeout_ms {
                w.alive = false;
                dead.push(*id);
                warn!("worker {} ({}): heartbeat timeout", id, w.address);
            }
        }
        dead
    }

    pub fn live_worker_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.workers.values().filter(|w| w.alive).count()
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new(30_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent_by_address() {
        let mgr = WorkerManager::new(30_000);
        let id1 = mgr.register("w1:29999", 1000, 0);
        let id2 = mgr.register("w2:29999", 2000, 0);
        assert_ne!(id1, id2);

        let again = mgr.register("w1:29999", 1500, 100);
        assert_eq!(again, id1);
        let w = mgr.get_worker(id1).unwrap();
        assert_eq!(w.capacity_bytes, 1500);
        assert_eq!(mgr.live_worker_count(), 2);
    }

    #[test]
    fn test_select_most_available() {
        let mgr = WorkerManager::new(30_000);
        mgr.register("small", 1000, 900);
        let big = mgr.register("big", 10_000, 2_000);
        let picked = mgr.select_worker_for_write().unwrap();
        assert_eq!(picked.id, big);
    }

    #[test]
    fn test_select_with_no_workers_is_unavailable() {
        let mgr = WorkerManager::new(30_000);
        let err = mgr.select_worker_for_write().unwrap_err();
        assert_eq!(err.code(), anycache_lib::StatusCode::Unavailable);
    }

    #[test]
    fn test_heartbeat_timeout_marks_dead() {
        let mgr = WorkerManager::new(10);
        let id = mgr.register("w1", 1000, 0);
        std::thread::sleep(std::time::Duration::from_millis(30));

        let dead = mgr.check_heartbeats();
        assert_eq!(dead, vec![id]);
        assert!(!mgr.get_worker(id).unwrap().alive);
        // already-dead workers are not reported again
        assert!(mgr.check_heartbeats().is_empty());

        // a heartbeat revives the worker
        mgr.heartbeat(id, 1000, 10).unwrap();
        assert!(mgr.get_worker(id).unwrap().alive);
    }

    #[test]
    fn test_heartbeat_unknown_worker() {
        let mgr = WorkerManager::new(30_000);
        assert!(mgr.heartbeat(42, 0, 0).unwrap_err().is_not_found());
    }
}
