//! Lifecycle event publishing
//!
//! Every task and scheduler transition is turned into an `(event_type, data)`
//! pair and handed to an [`EventSink`]. Delivery is best effort: a sink that
//! panics or drops events never affects scheduling.

use async_broadcast::{InactiveReceiver, Receiver, Sender, TrySendError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::task::{Priority, Task, TaskStatus};

/// Task lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Added,
    Started,
    Completed,
    Failed,
    Cancelled,
}

impl TaskEventKind {
    pub fn event_type(self) -> &'static str {
        match self {
            TaskEventKind::Added => "task_added",
            TaskEventKind::Started => "task_started",
            TaskEventKind::Completed => "task_completed",
            TaskEventKind::Failed => "task_failed",
            TaskEventKind::Cancelled => "task_cancelled",
        }
    }
}

/// Scheduler-level transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceEventKind {
    Started,
    Paused,
    Resumed,
    Stopped,
}

impl ServiceEventKind {
    pub fn event_type(self) -> &'static str {
        match self {
            ServiceEventKind::Started => "scheduler_started",
            ServiceEventKind::Paused => "scheduler_paused",
            ServiceEventKind::Resumed => "scheduler_resumed",
            ServiceEventKind::Stopped => "scheduler_stopped",
        }
    }
}

/// Payload of a task event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEventData {
    pub task_name: String,
    pub task_type: String,
    pub task_status: TaskStatus,
    pub task_priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Seconds, present on completion and failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TaskEventData {
    pub fn from_task(kind: TaskEventKind, task: &Task) -> Self {
        let mut data = Self {
            task_name: task.name(),
            task_type: task.kind().to_string(),
            task_status: task.status(),
            task_priority: task.priority(),
            timestamp: Utc::now(),
            execution_time: None,
            result: None,
            error_message: None,
        };
        match kind {
            TaskEventKind::Completed => {
                data.execution_time = task.execution_time().map(|d| d.as_secs_f64());
                data.result = task.result();
            }
            TaskEventKind::Failed => {
                data.execution_time = task.execution_time().map(|d| d.as_secs_f64());
                data.error_message = task.error_message();
            }
            TaskEventKind::Added | TaskEventKind::Started | TaskEventKind::Cancelled => {}
        }
        data
    }
}

/// Payload of a scheduler event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEventData {
    pub pending_task_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Event sink trait for emitting events
pub trait EventSink: Send + Sync {
    fn publish(&self, event_type: &str, data: &Value);
}

/// A simple logging event sink
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn publish(&self, event_type: &str, data: &Value) {
        debug!(event_type, %data, "Event");
    }
}

/// Discards everything
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish(&self, _event_type: &str, _data: &Value) {}
}

/// An event as delivered to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub event_type: String,
    pub data: Value,
}

/// A buffering event sink that collects events
#[derive(Clone, Default)]
pub struct BufferingEventSink {
    events: Arc<RwLock<Vec<PublishedEvent>>>,
}

impl BufferingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_events(&self) -> Vec<PublishedEvent> {
        self.events.read().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }

    /// Events of one type, in publication order
    pub fn of_type(&self, event_type: &str) -> Vec<PublishedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Event types published for one task, in order
    pub fn types_for_task(&self, task_name: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|e| e.data.get("task_name").and_then(Value::as_str) == Some(task_name))
            .map(|e| e.event_type.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn publish(&self, event_type: &str, data: &Value) {
        self.events.write().push(PublishedEvent {
            event_type: event_type.to_string(),
            data: data.clone(),
        });
    }
}

/// Fans events out to any number of async subscribers.
///
/// When a subscriber falls behind the oldest event is dropped.
pub struct BroadcastEventSink {
    sender: Sender<PublishedEvent>,
    _keepalive: InactiveReceiver<PublishedEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        sender.set_await_active(false);
        Self {
            sender,
            _keepalive: receiver.deactivate(),
        }
    }

    /// New receiver seeing events published from now on
    pub fn subscribe(&self) -> Receiver<PublishedEvent> {
        self.sender.new_receiver()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event_type: &str, data: &Value) {
        let event = PublishedEvent {
            event_type: event_type.to_string(),
            data: data.clone(),
        };
        match self.sender.try_broadcast(event) {
            Ok(None) => {}
            Ok(Some(dropped)) => {
                debug!("Subscriber lagging, dropped {} event", dropped.event_type);
            }
            Err(TrySendError::Inactive(_)) => {}
            Err(e) => debug!("Broadcast of {} failed: {}", event_type, e),
        }
    }
}

/// Turns lifecycle transitions into sink calls
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub fn task_event(&self, kind: TaskEventKind, task: &Task) {
        let data = TaskEventData::from_task(kind, task);
        self.emit(kind.event_type(), &data);
    }

    pub fn service_event(&self, kind: ServiceEventKind, pending_task_count: usize) {
        let data = ServiceEventData {
            pending_task_count,
            timestamp: Utc::now(),
        };
        self.emit(kind.event_type(), &data);
    }

    fn emit<T: Serialize>(&self, event_type: &str, data: &T) {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", event_type, e);
                return;
            }
        };
        let sink = &self.sink;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.publish(event_type, &value))).is_err() {
            error!("Event sink panicked while publishing {}", event_type);
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(Arc::new(LoggingEventSink))
    }
}
