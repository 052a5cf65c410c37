use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::handler::NetObj;
use crate::worker::{NetWorker, MAX_OBJS_PER_WORKER};

/// Bin-packs network objects across demultiplexing workers.
///
/// Placement scans live workers from most- to least-recently-added and
/// takes the first with spare capacity, spawning a fresh worker when all
/// are full. A worker whose last object is removed is sent into shutdown;
/// living objects are never re-packed onto fewer workers.
pub struct NetThreadPool {
    inner: Mutex<PoolInner>,
}

#[derive(Default)]
struct PoolInner {
    workers: Vec<WorkerEntry>,
    by_obj: HashMap<usize, Arc<NetWorker>>,
    shutting_down: Vec<Arc<NetWorker>>,
    spawned: usize,
}

struct WorkerEntry {
    worker: Arc<NetWorker>,
    count: usize,
}

/// Identity key for a registered object: the address of its allocation.
fn obj_key(obj: &Arc<dyn NetObj>) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

impl NetThreadPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Places the object on a worker, spawning one if every live worker is
    /// at capacity.
    pub fn add_net_obj(&self, obj: Arc<dyn NetObj>) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.reap_finished();

        let key = obj_key(&obj);

        if let Some(idx) = inner
            .workers
            .iter()
            .rposition(|entry| entry.count < MAX_OBJS_PER_WORKER)
        {
            let worker = Arc::clone(&inner.workers[idx].worker);
            inner.workers[idx].count += 1;
            worker.add_net_obj(obj);
            let prev = inner.by_obj.insert(key, worker);
            assert!(prev.is_none(), "network object placed twice");
            return Ok(());
        }

        let (worker, poller) = NetWorker::create()?;
        worker.add_net_obj(obj);
        let name = format!("net-worker-{}", inner.spawned);
        inner.spawned += 1;
        let thread_worker = Arc::clone(&worker);
        thread::Builder::new()
            .name(name)
            .spawn(move || thread_worker.run(poller))?;

        let prev = inner.by_obj.insert(key, Arc::clone(&worker));
        assert!(prev.is_none(), "network object placed twice");
        inner.workers.push(WorkerEntry { worker, count: 1 });
        Ok(())
    }

    /// Removes the object from its owning worker. A worker left without
    /// objects starts shutting down. Unknown objects are ignored.
    pub fn remove_net_obj(&self, obj: &Arc<dyn NetObj>) {
        let mut inner = self.inner.lock().unwrap();
        inner.reap_finished();

        let worker = match inner.by_obj.remove(&obj_key(obj)) {
            Some(worker) => worker,
            None => return,
        };
        worker.remove_net_obj(Arc::clone(obj));

        if let Some(idx) = inner
            .workers
            .iter()
            .position(|entry| Arc::ptr_eq(&entry.worker, &worker))
        {
            inner.workers[idx].count -= 1;
            if inner.workers[idx].count == 0 {
                let entry = inner.workers.remove(idx);
                entry.worker.start_shutdown();
                inner.shutting_down.push(entry.worker);
            }
        }
    }

    /// Waits until every shutting-down worker has finished or the
    /// cumulative timeout elapses. The per-worker budget shrinks by the
    /// wall time already spent.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let mut all_done = true;
        let mut budget = timeout;
        let started = Instant::now();

        for idx in (0..inner.shutting_down.len()).rev() {
            if inner.shutting_down[idx].wait_for_shutdown(budget) {
                inner.shutting_down.remove(idx);
            } else {
                all_done = false;
            }
            budget = timeout.saturating_sub(started.elapsed());
        }

        all_done
    }

    /// Number of live (not shutting-down) workers.
    pub fn live_worker_count(&self) -> usize {
        self.inner.lock().unwrap().workers.len()
    }

    /// Number of workers currently in shutdown.
    pub fn shutting_down_count(&self) -> usize {
        self.inner.lock().unwrap().shutting_down.len()
    }
}

impl Default for NetThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolInner {
    /// Discards workers whose threads have already finished.
    fn reap_finished(&mut self) {
        self.shutting_down.retain(|worker| !worker.is_shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NetEvent;
    use mio::{Registry, Token};

    struct TestObj;

    impl NetObj for TestObj {
        fn attach(&self, _registry: &Registry, _token: Token) -> io::Result<()> {
            Ok(())
        }

        fn detach(&self) {}

        fn on_event(&self, _event: &NetEvent) {}
    }

    fn test_objs(n: usize) -> Vec<Arc<dyn NetObj>> {
        (0..n).map(|_| Arc::new(TestObj) as Arc<dyn NetObj>).collect()
    }

    #[test]
    fn test_single_worker_up_to_capacity() {
        let pool = NetThreadPool::new();
        let objs = test_objs(MAX_OBJS_PER_WORKER);

        for obj in &objs {
            pool.add_net_obj(Arc::clone(obj)).unwrap();
        }
        assert_eq!(pool.live_worker_count(), 1);

        for obj in &objs {
            pool.remove_net_obj(obj);
        }
        assert!(pool.wait_for_shutdown(Duration::from_secs(10)));
    }

    #[test]
    fn test_overflow_spawns_second_worker() {
        let pool = NetThreadPool::new();
        let objs = test_objs(MAX_OBJS_PER_WORKER + 1);

        for obj in &objs[..MAX_OBJS_PER_WORKER] {
            pool.add_net_obj(Arc::clone(obj)).unwrap();
        }
        assert_eq!(pool.live_worker_count(), 1);

        pool.add_net_obj(Arc::clone(&objs[MAX_OBJS_PER_WORKER])).unwrap();
        assert_eq!(pool.live_worker_count(), 2);

        // emptying the overflow worker sends it into shutdown, leaving the
        // first worker live
        pool.remove_net_obj(&objs[MAX_OBJS_PER_WORKER]);
        assert_eq!(pool.live_worker_count(), 1);
        assert_eq!(pool.shutting_down_count(), 1);

        for obj in &objs[..MAX_OBJS_PER_WORKER] {
            pool.remove_net_obj(obj);
        }
        assert!(pool.wait_for_shutdown(Duration::from_secs(10)));
        assert_eq!(pool.shutting_down_count(), 0);
    }

    #[test]
    fn test_remove_unknown_object_is_ignored() {
        let pool = NetThreadPool::new();
        let obj: Arc<dyn NetObj> = Arc::new(TestObj);
        pool.remove_net_obj(&obj);
        assert_eq!(pool.live_worker_count(), 0);
    }

    #[test]
    fn test_wait_for_shutdown_with_no_workers() {
        let pool = NetThreadPool::new();
        assert!(pool.wait_for_shutdown(Duration::from_millis(10)));
    }
}
