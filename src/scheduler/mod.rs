//! The scheduling service: registry, ready queue, worker loop and events.

pub mod events;
pub mod graph;
pub mod ready_queue;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod signals;

pub use events::{
    BroadcastEventSink, BufferingEventSink, EventPublisher, EventSink, LoggingEventSink,
    NullEventSink, PublishedEvent, ServiceEventData, ServiceEventKind, TaskEventData,
    TaskEventKind,
};
pub use graph::{DependencyGraph, TaskNode};
pub use ready_queue::{QueueEntry, ReadyQueue};
pub use registry::{Insertion, TaskRegistry};
pub use scheduler::{Scheduler, SchedulerStats};
pub use signals::ControlSignals;
