//! Task ownership and bounded shutdown.
//!
//! Every long-running component (the BLE engine, each sensor decoder)
//! owns a [`Lifecycle`]: a stop flag its tasks poll cooperatively and a
//! registry of the tasks it spawned.  Shutdown is always bounded:
//!
//! ```text
//!   shutdown(timeout)
//!     │
//!     ├─ no tasks ──────────────────────────────▶ Idle
//!     │
//!     ├─ set stop flag, wake waiters
//!     ├─ await every task ── all done ──────────▶ Graceful
//!     │        │
//!     │     timeout
//!     │        ▼
//!     └─ cancel().await each survivor ─────────▶ Forced
//! ```

use core::cell::{Cell, RefCell};
use core::future::{Future, poll_fn};
use core::task::{Poll, Waker};
use std::rc::Rc;

use edge_executor::{LocalExecutor, Task};
use embassy_time::{Duration, with_timeout};
use log::{debug, warn};

/// The single-threaded executor every task in the firmware runs on.
pub type Executor = LocalExecutor<'static, 64>;

/// Drive `executor` until `fut` resolves.  Unlike `Executor::run`, `fut`
/// may borrow from the caller's stack.
pub async fn run_until<F: Future>(executor: &Executor, fut: F) -> F::Output {
    futures_lite::future::or(fut, async {
        loop {
            executor.tick().await;
        }
    })
    .await
}

// ───────────────────────────────────────────────────────────────
// Stop flag
// ───────────────────────────────────────────────────────────────

/// Cooperative cancellation token.  Clones share one flag.
#[derive(Clone, Default)]
pub struct StopFlag {
    inner: Rc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    set: Cell<bool>,
    waiters: RefCell<Vec<Waker>>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every task parked in [`StopFlag::wait`].
    pub fn set(&self) {
        self.inner.set.set(true);
        let waiters = core::mem::take(&mut *self.inner.waiters.borrow_mut());
        for waker in waiters {
            waker.wake();
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.get()
    }

    /// Resolve once the flag is raised.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.inner.set.get() {
                return Poll::Ready(());
            }
            let mut waiters = self.inner.waiters.borrow_mut();
            if !waiters.iter().any(|w| w.will_wake(cx.waker())) {
                waiters.push(cx.waker().clone());
            }
            Poll::Pending
        })
        .await;
    }

    /// Race `fut` against the flag.  `None` means the flag won.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        futures_lite::future::or(async { Some(fut.await) }, async {
            self.wait().await;
            None
        })
        .await
    }
}

// ───────────────────────────────────────────────────────────────
// Lifecycle
// ───────────────────────────────────────────────────────────────

/// How a [`Lifecycle::shutdown`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Nothing was running.
    Idle,
    /// Every task observed the stop flag and returned.
    Graceful,
    /// The timeout elapsed and survivors were cancelled.
    Forced,
}

/// Named task registry plus the stop flag those tasks observe.
pub struct Lifecycle {
    owner: &'static str,
    stop: StopFlag,
    tasks: RefCell<Vec<(&'static str, Task<()>)>>,
}

impl Lifecycle {
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            stop: StopFlag::new(),
            tasks: RefCell::new(Vec::new()),
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_set()
    }

    /// True if a task registered under `name` exists and has not returned.
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .borrow()
            .iter()
            .any(|(n, task)| *n == name && !task.is_finished())
    }

    /// Tasks still registered and not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .borrow()
            .iter()
            .filter(|(_, task)| !task.is_finished())
            .count()
    }

    /// Spawn `fut` under `name` unless one is already running or the
    /// component is stopping.  Returns whether a task was spawned.
    pub fn spawn<F>(&self, executor: &Executor, name: &'static str, fut: F) -> bool
    where
        F: Future<Output = ()> + 'static,
    {
        if self.stop.is_set() {
            debug!("{}: not spawning '{}' while stopping", self.owner, name);
            return false;
        }
        if self.is_running(name) {
            return false;
        }
        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|(n, task)| *n != name || !task.is_finished());
        tasks.push((name, executor.spawn(fut)));
        debug!("{}: spawned '{}'", self.owner, name);
        true
    }

    /// Cancel one named task immediately and wait for its future to drop.
    pub async fn cancel(&self, name: &str) {
        let task = {
            let mut tasks = self.tasks.borrow_mut();
            tasks
                .iter()
                .position(|(n, _)| *n == name)
                .map(|idx| tasks.swap_remove(idx).1)
        };
        if let Some(task) = task {
            task.cancel().await;
            debug!("{}: cancelled '{}'", self.owner, name);
        }
    }

    /// Bounded shutdown: raise the stop flag, wait up to `timeout` for
    /// every task, then force-cancel whatever is left.  Idempotent.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        let drained: Vec<_> = self.tasks.borrow_mut().drain(..).collect();
        self.stop.set();
        if drained.is_empty() {
            return ShutdownOutcome::Idle;
        }

        let mut slots: Vec<(&'static str, Option<Task<()>>)> = drained
            .into_iter()
            .map(|(name, task)| (name, Some(task)))
            .collect();

        let joined = with_timeout(timeout, async {
            for (_, slot) in slots.iter_mut() {
                if let Some(task) = slot.as_mut() {
                    task.await;
                    *slot = None;
                }
            }
        })
        .await;

        if joined.is_ok() {
            debug!("{}: all tasks stopped", self.owner);
            return ShutdownOutcome::Graceful;
        }

        for (name, slot) in slots {
            if let Some(task) = slot {
                warn!(
                    "{}: '{}' ignored stop for {} ms, cancelling",
                    self.owner,
                    name,
                    timeout.as_millis()
                );
                task.cancel().await;
            }
        }
        ShutdownOutcome::Forced
    }
}
