//! A priority task scheduler with dependency gating.
//!
//! Tasks are registered with a [`Scheduler`] and run one at a time on a
//! background worker, most urgent first. A task whose dependencies have not
//! completed is deferred with a priority penalty. Every lifecycle change is
//! published to an [`EventSink`].

// Core infrastructure
pub mod core;
pub mod logging;

pub mod scheduler;
pub mod task;

// Re-exports for convenience
pub use core::{Result, SchedulerConfig, SchedulerConfigBuilder, SchedulerError};
pub use scheduler::{
    BroadcastEventSink, BufferingEventSink, DependencyGraph, EventSink, LoggingEventSink,
    NullEventSink, PublishedEvent, Scheduler, SchedulerStats,
};
pub use task::{
    CompositeTask, ExecutionContext, FnAction, Priority, Task, TaskAction, TaskFailure,
    TaskOutcome, TaskStatus,
};
