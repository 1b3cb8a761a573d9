//! Transport stand-ins shared by the integration tests.
#![allow(dead_code)]

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  mpsc, Arc, Mutex,
};

use rxbridge::prelude::*;

/// A chunk of pooled memory. Counts its releases.
#[derive(Debug)]
pub struct Chunk {
  pub seq: u32,
  released: Arc<AtomicUsize>,
}

impl Chunk {
  pub fn new(seq: u32, released: &Arc<AtomicUsize>) -> Self {
    Self { seq, released: released.clone() }
  }
}

impl Release for Chunk {
  fn release(self) { self.released.fetch_add(1, Ordering::SeqCst); }
}

/// Inbound side of a connection.
pub struct Inbound {
  executor: ExecutorRef,
  pub reads: AtomicUsize,
  pub closes: AtomicUsize,
}

impl Inbound {
  pub fn new(executor: ExecutorRef) -> Arc<Self> {
    Arc::new(Self { executor, reads: AtomicUsize::new(0), closes: AtomicUsize::new(0) })
  }
}

impl<T: Send> SourceContext<T> for Inbound {
  fn executor(&self) -> ExecutorRef { self.executor.clone() }

  fn read(&self) { self.reads.fetch_add(1, Ordering::SeqCst); }

  fn close(&self) { self.closes.fetch_add(1, Ordering::SeqCst); }
}

/// How an [`Outbound`] completes its writes.
pub enum Completion {
  /// Before `write` returns.
  Immediate,
  /// When the test says so, through [`Outbound::complete`].
  Manual(Mutex<Vec<WriteCompletion>>),
  /// On whatever thread drains the channel.
  Channel(Mutex<mpsc::Sender<WriteCompletion>>),
}

/// Outbound side of a connection.
pub struct Outbound<T> {
  executor: ExecutorRef,
  completion: Completion,
  pub written: Mutex<Vec<T>>,
  pub closes: AtomicUsize,
  on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<T> Outbound<T> {
  pub fn new(executor: ExecutorRef, completion: Completion) -> Arc<Self> {
    Arc::new(Self {
      executor,
      completion,
      written: Mutex::new(vec![]),
      closes: AtomicUsize::new(0),
      on_close: Mutex::new(None),
    })
  }

  pub fn manual(executor: ExecutorRef) -> Arc<Self> {
    Self::new(executor, Completion::Manual(Mutex::new(vec![])))
  }

  pub fn on_close(&self, f: impl FnOnce() + Send + 'static) {
    *self.on_close.lock().unwrap() = Some(Box::new(f));
  }

  /// Completes the `n` oldest in-flight writes.
  pub fn complete(&self, n: usize) {
    let Completion::Manual(pending) = &self.completion else { panic!("not a manual outbound") };
    let ready: Vec<_> = pending.lock().unwrap().drain(..n).collect();
    ready.into_iter().for_each(WriteCompletion::succeed);
  }

  pub fn written_len(&self) -> usize { self.written.lock().unwrap().len() }
}

impl<T: Send> SinkContext<T> for Outbound<T> {
  fn executor(&self) -> ExecutorRef { self.executor.clone() }

  fn is_active(&self) -> bool { true }

  fn is_writable(&self) -> bool { true }

  fn write(&self, item: T, completion: WriteCompletion) {
    self.written.lock().unwrap().push(item);
    match &self.completion {
      Completion::Immediate => completion.succeed(),
      Completion::Manual(pending) => pending.lock().unwrap().push(completion),
      Completion::Channel(tx) => {
        let _ = tx.lock().unwrap().send(completion);
      }
    }
  }

  fn close(&self) {
    self.closes.fetch_add(1, Ordering::SeqCst);
    if let Some(f) = self.on_close.lock().unwrap().take() {
      f();
    }
  }
}
