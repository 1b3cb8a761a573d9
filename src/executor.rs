//! Serial execution contexts.
//!
//! A bridge is bound to the executor of the transport it adapts (an event
//! loop, typically). Work that must not run on the caller's thread, like
//! attaching the first subscriber, is handed to it. The executor must run
//! tasks one at a time and in submission order.

use std::{
  collections::VecDeque,
  fmt::{Debug, Formatter},
  sync::Arc,
};

use parking_lot::Mutex;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A serial executor.
pub trait Executor: Send + Sync {
  /// Queues `task`. Never runs it inline on the calling thread.
  fn execute(&self, task: Task);
}

/// Shared executor handle. Identity matters: see [`same_executor`].
pub type ExecutorRef = Arc<dyn Executor>;

impl Debug for dyn Executor {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("dyn Executor").finish_non_exhaustive()
  }
}

/// Whether two handles point at the same executor instance.
#[inline]
pub fn same_executor(a: &ExecutorRef, b: &ExecutorRef) -> bool {
  Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Panics when a transport context runs on a different executor than the one
/// the bridge was built for. Serializing against two event loops at once is
/// impossible, so this is a programming error rather than a stream failure.
#[track_caller]
pub(crate) fn assert_same_executor(bound: &ExecutorRef, offered: &ExecutorRef, bridge: &str) {
  assert!(
    same_executor(bound, offered),
    "{bridge} was constructed with a different executor than the context it was attached to"
  );
}

// ============================================================================
// ManualExecutor
// ============================================================================

/// Executor that queues tasks until [`ManualExecutor::run_pending`] is called.
///
/// Deterministic, so it is what the tests use. Also handy for embedding a
/// bridge in a hand-written event loop.
#[derive(Default)]
pub struct ManualExecutor {
  queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
  pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

  /// Runs queued tasks, including those queued by the tasks themselves,
  /// until the queue is empty. Returns how many ran.
  pub fn run_pending(&self) -> usize {
    let mut ran = 0;
    loop {
      let Some(task) = self.queue.lock().pop_front() else { return ran };
      task();
      ran += 1;
    }
  }

  pub fn pending(&self) -> usize { self.queue.lock().len() }
}

impl Executor for ManualExecutor {
  fn execute(&self, task: Task) { self.queue.lock().push_back(task); }
}

// ============================================================================
// ThreadPoolExecutor
// ============================================================================

/// A dedicated thread backed by a one-worker `futures` thread pool.
#[cfg(feature = "thread-pool")]
pub struct ThreadPoolExecutor {
  pool: futures::executor::ThreadPool,
}

#[cfg(feature = "thread-pool")]
impl ThreadPoolExecutor {
  pub fn new() -> std::io::Result<Arc<Self>> {
    let pool = futures::executor::ThreadPool::builder()
      .pool_size(1)
      .name_prefix("rxbridge-")
      .create()?;
    Ok(Arc::new(Self { pool }))
  }
}

#[cfg(feature = "thread-pool")]
impl Executor for ThreadPoolExecutor {
  fn execute(&self, task: Task) { self.pool.spawn_ok(async move { task() }); }
}

// ============================================================================
// TokioExecutor
// ============================================================================

/// Serial executor on a tokio runtime: one spawned task drains an unbounded
/// queue, so submissions run in order even on a multi-thread runtime.
#[cfg(feature = "tokio-executor")]
pub struct TokioExecutor {
  tx: tokio::sync::mpsc::UnboundedSender<Task>,
}

#[cfg(feature = "tokio-executor")]
impl TokioExecutor {
  pub fn new(handle: &tokio::runtime::Handle) -> Arc<Self> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Task>();
    handle.spawn(async move {
      while let Some(task) = rx.recv().await {
        task();
      }
    });
    Arc::new(Self { tx })
  }

  /// Binds to the runtime the caller is running on.
  ///
  /// Panics outside a tokio runtime, like `tokio::spawn`.
  pub fn current() -> Arc<Self> { Self::new(&tokio::runtime::Handle::current()) }
}

#[cfg(feature = "tokio-executor")]
impl Executor for TokioExecutor {
  fn execute(&self, task: Task) {
    if self.tx.send(task).is_err() {
      tracing::warn!("tokio executor stopped, task dropped");
    }
  }
}
