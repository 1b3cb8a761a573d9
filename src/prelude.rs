//! Prelude module for convenient imports

pub use crate::{
  config::Watermarks,
  error::StreamError,
  executor::{same_executor, Executor, ExecutorRef, ManualExecutor, Task},
  signal::{Release, Signal},
  sink::{SinkContext, SinkContextRef, SinkState, SinkSubscriber, WriteCompletion},
  source::{SourceContext, SourceContextRef, SourcePublisher, SourceState},
  subscriber::{BoxedSubscriber, Publisher, Subscriber},
  subscription::{
    Demand, DemandHandler, DemandSubscription, EmptySubscription, Subscription, SubscriptionRef,
  },
};
#[cfg(feature = "thread-pool")]
pub use crate::executor::ThreadPoolExecutor;
#[cfg(feature = "tokio-executor")]
pub use crate::executor::TokioExecutor;
