use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use log::warn;
use mio::{Events, Registry, Token};

use crate::event::NetEvent;
use crate::handler::NetObj;
use crate::poll::{Poller, WAKE_TOKEN};

/// The maximum number of network objects placed on one worker: the wait-set
/// width of the classic demultiplexer (64) minus the interrupt slot.
pub const MAX_OBJS_PER_WORKER: usize = 63;

const EVENTS_CAPACITY: usize = 64;

enum Change {
    Add(Arc<dyn NetObj>),
    Remove(Arc<dyn NetObj>),
}

/// A worker that multiplexes a bounded set of network objects on one thread.
///
/// The token table lives on the worker's own thread and is mutated only
/// there; outside threads enqueue change requests and wake the blocking
/// poll. Shutdown is a two-event protocol: `start_shutdown` requests the
/// exit, the is-shutdown event reports it.
pub struct NetWorker {
    waker: Arc<mio::Waker>,
    changes: Mutex<VecDeque<Change>>,
    shutdown_requested: AtomicBool,
    is_shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
    thread_id: Mutex<Option<ThreadId>>,
}

impl NetWorker {
    /// Creates the worker and the poller its thread will run.
    pub fn create() -> io::Result<(Arc<NetWorker>, Poller)> {
        let poller = Poller::new()?;
        let worker = Arc::new(NetWorker {
            waker: poller.waker(),
            changes: Mutex::new(VecDeque::new()),
            shutdown_requested: AtomicBool::new(false),
            is_shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
            thread_id: Mutex::new(None),
        });
        Ok((worker, poller))
    }

    /// The demultiplexing loop. Runs until shutdown is requested, then
    /// signals the is-shutdown event last.
    pub fn run(self: Arc<Self>, mut poller: Poller) {
        *self.thread_id.lock().unwrap() = Some(thread::current().id());

        let registry = match poller.registry() {
            Ok(registry) => registry,
            Err(e) => {
                warn!("worker could not obtain a demultiplexer registry: {}", e);
                self.signal_shutdown_complete();
                return;
            }
        };

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut objs: HashMap<Token, Arc<dyn NetObj>> = HashMap::new();
        let mut next_token = WAKE_TOKEN.0 + 1;

        'run: while !self.shutdown_requested.load(Ordering::SeqCst) {
            if let Err(e) = poller.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                warn!("demultiplexer wait failed: {}", e);
                break;
            }

            for event in events.iter() {
                if self.shutdown_requested.load(Ordering::SeqCst) {
                    break 'run;
                }

                if event.token() == WAKE_TOKEN {
                    self.drain_changes(&registry, &mut objs, &mut next_token);
                } else if let Some(obj) = objs.get(&event.token()) {
                    // Transient stack reference so the object outlives a
                    // re-entrant removal from inside its own callback.
                    let obj = Arc::clone(obj);
                    obj.on_event(&NetEvent::from(event));
                }
            }
        }

        for obj in objs.values() {
            obj.detach();
        }
        self.signal_shutdown_complete();
    }

    /// Applies queued additions and removals. Only the worker's own thread
    /// touches the token table.
    fn drain_changes(
        &self,
        registry: &Registry,
        objs: &mut HashMap<Token, Arc<dyn NetObj>>,
        next_token: &mut usize,
    ) {
        let mut changes = self.changes.lock().unwrap();
        while let Some(change) = changes.pop_front() {
            match change {
                Change::Add(obj) => {
                    let token = Token(*next_token);
                    *next_token += 1;
                    if let Err(e) = obj.attach(registry, token) {
                        warn!("could not attach network object: {}", e);
                        continue;
                    }
                    objs.insert(token, obj);
                }
                Change::Remove(obj) => {
                    // removal matches by object identity
                    let found = objs
                        .iter()
                        .find(|(_, candidate)| Arc::ptr_eq(candidate, &obj))
                        .map(|(token, _)| *token);
                    if let Some(token) = found {
                        if let Some(removed) = objs.remove(&token) {
                            removed.detach();
                        }
                    }
                }
            }
        }
    }

    /// Queues the object for addition and interrupts the wait.
    pub fn add_net_obj(&self, obj: Arc<dyn NetObj>) {
        self.changes.lock().unwrap().push_back(Change::Add(obj));
        self.wake();
    }

    /// Queues the object for removal and interrupts the wait.
    pub fn remove_net_obj(&self, obj: Arc<dyn NetObj>) {
        self.changes.lock().unwrap().push_back(Change::Remove(obj));
        self.wake();
    }

    /// Requests the loop to exit at its next wait-return.
    pub fn start_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Whether the worker's thread has completed shutdown.
    pub fn is_shutdown(&self) -> bool {
        *self.is_shutdown.lock().unwrap()
    }

    /// Waits for the worker's thread to finish. Returns `false` immediately
    /// when called from that very thread, which could never observe its own
    /// exit within the timeout.
    pub fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        if *self.thread_id.lock().unwrap() == Some(thread::current().id()) {
            return false;
        }

        let done = self.is_shutdown.lock().unwrap();
        let (done, _) = self
            .shutdown_cv
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap();
        *done
    }

    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!("could not wake worker: {}", e);
        }
    }

    fn signal_shutdown_complete(&self) {
        *self.is_shutdown.lock().unwrap() = true;
        self.shutdown_cv.notify_all();
    }
}
