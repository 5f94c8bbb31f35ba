use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::action::{FnAction, TaskAction};
use super::context::ExecutionContext;
use super::model::{Priority, TaskFailure, TaskOutcome, TaskStatus};

/// Invoked once after a task reaches `Completed`
pub type CompletionCallback = Arc<dyn Fn(&Task) + Send + Sync>;
/// Invoked once after a task reaches `Failed`, with the error message
pub type FailureCallback = Arc<dyn Fn(&Task, &str) + Send + Sync>;

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    result: Option<Value>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    fn new() -> Self {
        Self {
            status: TaskStatus::Pending,
            result: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// A named, prioritized unit of work.
///
/// Tasks are shared as `Arc<Task>`; every operation takes `&self`. The
/// status only moves forward through the state machine described on
/// [`TaskStatus`], so terminal callbacks fire at most once.
pub struct Task {
    name: RwLock<String>,
    priority: Priority,
    action: Box<dyn TaskAction>,
    state: Mutex<TaskState>,
    dependencies: RwLock<Vec<Arc<Task>>>,
    completion_callbacks: Mutex<Vec<CompletionCallback>>,
    failure_callbacks: Mutex<Vec<FailureCallback>>,
}

impl Task {
    pub fn new(name: impl Into<String>, priority: Priority, action: impl TaskAction) -> Self {
        Self {
            name: RwLock::new(name.into()),
            priority,
            action: Box::new(action),
            state: Mutex::new(TaskState::new()),
            dependencies: RwLock::new(Vec::new()),
            completion_callbacks: Mutex::new(Vec::new()),
            failure_callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Build a task from a closure
    pub fn from_fn<F>(name: impl Into<String>, priority: Priority, func: F) -> Self
    where
        F: Fn(&ExecutionContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self::new(name, priority, FnAction::new(func))
    }

    /// Builder form of [`add_dependency`](Self::add_dependency)
    pub fn with_dependency(self, dependency: &Arc<Task>) -> Self {
        self.add_dependency(dependency.clone());
        self
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.name.write() = name;
    }

    /// Task type, as reported in lifecycle events
    pub fn kind(&self) -> &str {
        self.action.kind()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    pub fn result(&self) -> Option<Value> {
        self.state.lock().result.clone()
    }

    pub fn error_message(&self) -> Option<String> {
        self.state.lock().error_message.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().finished_at
    }

    /// Wall time between start and the terminal transition.
    ///
    /// While running this is the time elapsed so far.
    pub fn execution_time(&self) -> Option<Duration> {
        let state = self.state.lock();
        let started = state.started_at?;
        let end = state.finished_at.unwrap_or_else(Utc::now);
        (end - started).to_std().ok()
    }

    pub fn children(&self) -> &[Arc<Task>] {
        self.action.children()
    }

    pub fn dependencies(&self) -> Vec<Arc<Task>> {
        self.dependencies.read().clone()
    }

    pub fn add_dependency(&self, dependency: Arc<Task>) {
        if std::ptr::eq(self, Arc::as_ptr(&dependency)) {
            warn!("Task {} cannot depend on itself, ignoring", self.name());
            return;
        }
        let mut deps = self.dependencies.write();
        if deps.iter().any(|d| Arc::ptr_eq(d, &dependency)) {
            return;
        }
        deps.push(dependency);
    }

    pub fn add_completion_callback<F>(&self, callback: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.completion_callbacks.lock().push(Arc::new(callback));
    }

    pub fn add_failure_callback<F>(&self, callback: F)
    where
        F: Fn(&Task, &str) + Send + Sync + 'static,
    {
        self.failure_callbacks.lock().push(Arc::new(callback));
    }

    /// True iff every dependency has completed
    pub fn is_ready(&self) -> bool {
        self.dependencies
            .read()
            .iter()
            .all(|dep| dep.status() == TaskStatus::Completed)
    }

    /// Names of dependencies that have not completed yet
    pub fn unmet_dependencies(&self) -> Vec<String> {
        self.dependencies
            .read()
            .iter()
            .filter(|dep| dep.status() != TaskStatus::Completed)
            .map(|dep| dep.name())
            .collect()
    }

    /// `Pending -> Running`
    pub fn start(&self) -> bool {
        let started = self.transition(TaskStatus::Running, |state| {
            state.started_at = Some(Utc::now());
        });
        if !started {
            warn!("Cannot start task {} from status {}", self.name(), self.status());
        }
        started
    }

    /// `Running -> Completed`, then completion callbacks
    pub fn complete(&self, result: Value) -> bool {
        let completed = self.transition(TaskStatus::Completed, |state| {
            state.result = Some(result);
            state.finished_at = Some(Utc::now());
        });
        if !completed {
            warn!("Cannot complete task {} from status {}", self.name(), self.status());
            return false;
        }

        let callbacks = self.completion_callbacks.lock().clone();
        for callback in callbacks {
            self.guard_callback("completion", || callback(self));
        }
        true
    }

    /// `Running -> Failed`, then failure callbacks
    pub fn fail(&self, message: impl Into<String>, partial: Option<Value>) -> bool {
        let message = message.into();
        let failed = self.transition(TaskStatus::Failed, |state| {
            state.error_message = Some(message.clone());
            state.result = partial;
            state.finished_at = Some(Utc::now());
        });
        if !failed {
            warn!("Cannot fail task {} from status {}", self.name(), self.status());
            return false;
        }

        let callbacks = self.failure_callbacks.lock().clone();
        for callback in callbacks {
            self.guard_callback("failure", || callback(self, &message));
        }
        true
    }

    /// `Pending -> Cancelled`; false from any other status
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(TaskStatus::Cancelled, |state| {
            state.finished_at = Some(Utc::now());
        });
        if !cancelled {
            warn!("Cannot cancel task {} from status {}", self.name(), self.status());
        }
        cancelled
    }

    /// Call the action, turning errors and panics into a failed outcome.
    ///
    /// Does not touch the task status.
    pub fn execute(&self, ctx: &ExecutionContext) -> TaskOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.action.execute(ctx))) {
            Ok(Ok(value)) => TaskOutcome::Completed(value),
            Ok(Err(err)) => {
                let partial = err
                    .downcast_ref::<TaskFailure>()
                    .and_then(|failure| failure.partial.clone());
                TaskOutcome::Failed {
                    error: format!("{:#}", err),
                    partial,
                }
            }
            Err(payload) => TaskOutcome::Failed {
                error: format!("Task panicked: {}", panic_message(payload.as_ref())),
                partial: None,
            },
        }
    }

    /// Full lifecycle on the calling thread: `start -> execute -> complete | fail`.
    ///
    /// Returns `None` when the task is not pending.
    pub fn run(&self, ctx: &ExecutionContext) -> Option<TaskOutcome> {
        if !self.start() {
            return None;
        }
        Some(self.run_started(ctx))
    }

    /// Execute a task already moved to `Running` and apply the terminal transition
    pub(crate) fn run_started(&self, ctx: &ExecutionContext) -> TaskOutcome {
        debug!("Executing task {}", self.name());
        let outcome = self.execute(ctx);
        match &outcome {
            TaskOutcome::Completed(value) => {
                self.complete(value.clone());
            }
            TaskOutcome::Failed { error: message, partial } => {
                error!("Task {} failed: {}", self.name(), message);
                self.fail(message.clone(), partial.clone());
            }
        }
        outcome
    }

    fn transition(&self, next: TaskStatus, apply: impl FnOnce(&mut TaskState)) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_transition_to(next) {
            return false;
        }
        state.status = next;
        apply(&mut state);
        true
    }

    fn guard_callback(&self, which: &str, call: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
            error!(
                "Task {} {} callback panicked: {}",
                self.name(),
                which,
                panic_message(payload.as_ref())
            );
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("priority", &self.priority)
            .field("status", &self.status())
            .field("dependencies", &self.dependencies.read().len())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
