//! # rxbridge: reactive streams backpressure for push-based transports
//!
//! Bridges between transports that *push* (a socket handler delivering
//! messages as they arrive, an outbound channel that accepts writes) and
//! reactive streams consumers that *pull* through explicit demand.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use rxbridge::prelude::*;
//!
//! struct Socket(ExecutorRef);
//!
//! impl SourceContext<String> for Socket {
//!   fn executor(&self) -> ExecutorRef { self.0.clone() }
//!   fn read(&self) {}
//!   fn close(&self) {}
//! }
//!
//! struct Print;
//!
//! impl Subscriber<String> for Print {
//!   fn on_subscribe(&mut self, subscription: SubscriptionRef) { subscription.request(i64::MAX) }
//!   fn on_next(&mut self, line: String) { println!("{line}") }
//!   fn on_error(&mut self, _err: StreamError) {}
//!   fn on_complete(&mut self) {}
//! }
//!
//! let executor = ManualExecutor::new();
//! let publisher = SourcePublisher::new(executor.clone());
//! publisher.attach(Arc::new(Socket(executor.clone())));
//! publisher.subscribe(Print);
//! executor.run_pending();
//!
//! publisher.on_element("hello".to_string());
//! publisher.on_source_complete();
//! assert_eq!(publisher.state(), SourceState::Done);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`SourcePublisher`] | Push-based source exposed as a single-subscriber publisher |
//! | [`SinkSubscriber`] | Subscriber writing into a push-based sink, demand between watermarks |
//! | [`Subscription`] | `request(n)` / `cancel()`, callable from any thread |
//! | [`WorkLoop`] | Serializes every signal to a subscriber without holding a lock across it |
//! | [`Release`] | Explicit disposal of elements that are never delivered |
//!
//! ## Feature Flags
//!
//! - **`thread-pool`** (default): [`ThreadPoolExecutor`], a serial executor on
//!   a dedicated `futures` pool thread
//! - **`tokio-executor`**: `TokioExecutor`, a serial executor on a tokio
//!   runtime
//!
//! [`SourcePublisher`]: source::SourcePublisher
//! [`SinkSubscriber`]: sink::SinkSubscriber
//! [`Subscription`]: subscription::Subscription
//! [`WorkLoop`]: work_loop::WorkLoop
//! [`Release`]: signal::Release
//! [`ThreadPoolExecutor`]: executor::ThreadPoolExecutor

pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod signal;
pub mod sink;
pub mod source;
pub mod subscriber;
pub mod subscription;
pub mod work_loop;

#[cfg(test)]
mod testing;

pub use prelude::*;
