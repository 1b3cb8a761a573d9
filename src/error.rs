//! Error type shared by every bridge.
//!
//! Errors travel to subscribers as values through `on_error`, so
//! [`StreamError`] is cheap to clone: external causes are kept behind an
//! `Arc`.

use std::{error::Error as StdError, sync::Arc};

/// Crate-wide result alias.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

/// Shared, type-erased external cause.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Every failure a bridge can signal or return.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
  /// `request(n)` was called with `n <= 0`.
  #[error(
    "request for {requested} elements violates rule 3.9 of the reactive streams specification"
  )]
  IllegalDemand {
    /// The offending argument.
    requested: i64,
  },

  /// A publisher that supports a single subscriber was subscribed twice.
  #[error("only one subscriber supported")]
  AlreadySubscribed,

  /// The push-based source reported a failure.
  #[error("upstream failed: {0}")]
  Upstream(Cause),

  /// The transport behind a sink failed a write.
  #[error("transport failed: {0}")]
  Transport(Cause),

  /// The transport went away before the stream finished.
  #[error("transport closed")]
  Closed,

  /// A subscriber callback panicked; the stream was cancelled.
  #[error("subscriber panicked in {context}")]
  SubscriberPanicked {
    /// The callback that panicked.
    context: &'static str,
  },

  /// Watermark configuration rejected.
  #[error("invalid demand watermarks: low {low} must be below high {high}")]
  InvalidWatermarks {
    /// Requested low watermark.
    low: u64,
    /// Requested high watermark.
    high: u64,
  },
}

impl StreamError {
  /// Wraps a source failure.
  pub fn upstream<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Self::Upstream(Arc::new(err))
  }

  /// Wraps a transport (sink side) failure.
  pub fn transport<E>(err: E) -> Self
  where
    E: StdError + Send + Sync + 'static,
  {
    Self::Transport(Arc::new(err))
  }

  /// Whether this error comes from misuse of the reactive streams protocol
  /// rather than from the source or the transport.
  pub fn is_protocol_violation(&self) -> bool {
    matches!(self, Self::IllegalDemand { .. } | Self::AlreadySubscribed)
  }
}
