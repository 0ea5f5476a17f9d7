//! A FIFO work queue drained by one dedicated worker thread.
//!
//! Callers enqueue closures and return immediately. Items run strictly one at
//! a time in submission order, so everything funneled through one queue is
//! serialized. A failing or panicking item is recorded and the worker moves
//! on to the next one.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Task = Box<dyn FnOnce(&TaskContext) -> Result<()> + Send + 'static>;
type IdleHandler = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Running,
    Aborted,
}

struct Inner {
    tasks: VecDeque<Task>,
    state: QueueState,
    worker_alive: bool,
    aborting: bool,
    last_status: Option<String>,
    errors: Vec<Error>,
    active: Duration,
    busy_since: Option<Instant>,
    idle_handlers: Vec<IdleHandler>,
}

struct Shared {
    name: String,
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Tasks run outside the lock, so a poisoned guard still holds
        // consistent bookkeeping.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handed to every task; lets it publish progress and notice abort requests.
pub struct TaskContext {
    shared: Option<Arc<Shared>>,
}

impl TaskContext {
    /// A context not attached to any queue, for running task bodies inline.
    pub fn detached() -> Self {
        Self { shared: None }
    }

    pub fn set_status(&self, status: impl Into<String>) {
        if let Some(shared) = &self.shared {
            shared.lock().last_status = Some(status.into());
        }
    }

    pub fn is_aborting(&self) -> bool {
        self.shared
            .as_ref()
            .map(|shared| shared.lock().aborting)
            .unwrap_or(false)
    }
}

/// Cloning yields another handle to the same queue and worker.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                inner: Mutex::new(Inner {
                    tasks: VecDeque::new(),
                    state: QueueState::Idle,
                    worker_alive: false,
                    aborting: false,
                    last_status: None,
                    errors: Vec::new(),
                    active: Duration::ZERO,
                    busy_since: None,
                    idle_handlers: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Appends a task. Starts the worker if it is not running, which also
    /// clears a previous abort.
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce(&TaskContext) -> Result<()> + Send + 'static,
    {
        let mut inner = self.shared.lock();
        inner.tasks.push_back(Box::new(task));
        if inner.worker_alive {
            return Ok(());
        }

        inner.aborting = false;
        inner.state = QueueState::Running;
        inner.worker_alive = true;
        drop(inner);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("vssmigrate-{}", self.shared.name))
            .spawn(move || run_worker(shared));

        if let Err(e) = spawned {
            let mut inner = self.shared.lock();
            inner.tasks.clear();
            inner.worker_alive = false;
            inner.state = QueueState::Idle;
            self.shared.changed.notify_all();
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Discards pending tasks. The task currently running is allowed to
    /// finish; the worker stops before starting another. Tasks enqueued
    /// before the worker has stopped are discarded as well.
    pub fn abort(&self) {
        let mut inner = self.shared.lock();
        let discarded = inner.tasks.len();
        inner.tasks.clear();
        if inner.worker_alive {
            inner.aborting = true;
        }
        debug!(queue = %self.shared.name, discarded, "Abort requested");
        self.shared.changed.notify_all();
    }

    /// Blocks until the worker has drained the queue or stopped on abort.
    pub fn wait_idle(&self) {
        let mut inner = self.shared.lock();
        while inner.worker_alive {
            inner = self
                .shared
                .changed
                .wait(inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with an upper bound. Returns
    /// whether the queue went idle in time.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        while inner.worker_alive {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .changed
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            inner = guard;
        }
        true
    }

    /// Registers a callback fired on the worker thread each time the queue
    /// drains. It does not fire when the queue stops because of an abort.
    pub fn on_idle<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.lock().idle_handlers.push(Arc::new(handler));
    }

    pub fn state(&self) -> QueueState {
        self.shared.lock().state
    }

    pub fn is_idle(&self) -> bool {
        !self.shared.lock().worker_alive
    }

    pub fn is_aborting(&self) -> bool {
        self.shared.lock().aborting
    }

    pub fn last_status(&self) -> Option<String> {
        self.shared.lock().last_status.clone()
    }

    /// Total time spent executing tasks, including the one in progress.
    pub fn active_time(&self) -> Duration {
        let inner = self.shared.lock();
        match inner.busy_since {
            Some(since) => inner.active + since.elapsed(),
            None => inner.active,
        }
    }

    /// Takes the errors recorded since the last call.
    pub fn fetch_errors(&self) -> Option<Vec<Error>> {
        let mut inner = self.shared.lock();
        if inner.errors.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut inner.errors))
        }
    }
}

fn run_worker(shared: Arc<Shared>) {
    let context = TaskContext {
        shared: Some(Arc::clone(&shared)),
    };

    loop {
        let task = {
            let mut inner = shared.lock();
            if inner.aborting {
                inner.tasks.clear();
                inner.worker_alive = false;
                inner.state = QueueState::Aborted;
                shared.changed.notify_all();
                debug!(queue = %shared.name, "Worker stopped after abort");
                return;
            }
            match inner.tasks.pop_front() {
                Some(task) => {
                    inner.busy_since = Some(Instant::now());
                    task
                }
                None => {
                    inner.worker_alive = false;
                    inner.state = QueueState::Idle;
                    let handlers = inner.idle_handlers.clone();
                    shared.changed.notify_all();
                    drop(inner);
                    for handler in handlers {
                        handler();
                    }
                    return;
                }
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&context)));

        let mut inner = shared.lock();
        if let Some(since) = inner.busy_since.take() {
            inner.active += since.elapsed();
        }
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(queue = %shared.name, error = %e, "Queued task failed");
                inner.errors.push(e);
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(queue = %shared.name, %message, "Queued task panicked");
                inner.errors.push(Error::TaskPanicked(message));
            }
        }
    }
}
