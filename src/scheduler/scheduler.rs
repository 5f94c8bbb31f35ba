use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::events::{EventPublisher, EventSink, LoggingEventSink, ServiceEventKind, TaskEventKind};
use super::graph::DependencyGraph;
use super::ready_queue::{QueueEntry, ReadyQueue};
use super::registry::TaskRegistry;
use super::signals::ControlSignals;
use crate::core::{Result, SchedulerConfig, SchedulerError};
use crate::task::task::panic_message;
use crate::task::{
    CompletionCallback, ExecutionContext, FailureCallback, ServiceHandle, Task, TaskOutcome,
    TaskStatus,
};

/// Accepts tasks and runs them one at a time on a background worker.
///
/// Pending tasks are drawn from a priority queue; a task whose dependencies
/// have not completed is pushed back with a priority penalty so ready work
/// always wins. Control calls (`start`/`pause`/`resume`/`stop`) never fail:
/// misuse is logged and reported through the boolean return value.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    worker: Mutex<Option<WorkerHandle>>,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    /// Disconnects when the worker thread exits
    exited: Receiver<()>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    registry: TaskRegistry,
    ready_queue: ReadyQueue,
    signals: ControlSignals,
    context: ExecutionContext,
    publisher: EventPublisher,
    completion_callbacks: RwLock<Vec<CompletionCallback>>,
    failure_callbacks: RwLock<Vec<FailureCallback>>,
}

/// Snapshot of scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub total_tasks: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub ready_queue_size: usize,
    pub ready_queue_capacity: Option<usize>,
    pub is_running: bool,
    pub is_paused: bool,
}

impl Scheduler {
    /// Create a scheduler that logs its events through `tracing`
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_sink(config, Arc::new(LoggingEventSink))
    }

    /// Create a scheduler publishing lifecycle events to `sink`
    pub fn with_sink(config: SchedulerConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let ready_queue = ReadyQueue::with_capacity(config.queue_capacity);
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                registry: TaskRegistry::new(),
                ready_queue,
                signals: ControlSignals::new(),
                context: ExecutionContext::new(),
                publisher: EventPublisher::new(sink),
                completion_callbacks: RwLock::new(Vec::new()),
                failure_callbacks: RwLock::new(Vec::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register a task and, while running, queue it.
    ///
    /// A name collision renames the new task instead of replacing the
    /// existing one; adding an already registered task changes nothing.
    /// Returns the name the task is stored under.
    pub fn add_task(&self, task: Arc<Task>) -> String {
        let inner = &self.inner;
        let insertion = inner.registry.insert(task.clone(), |task| {
            if inner.signals.is_running() && task.status() == TaskStatus::Pending {
                let entry = QueueEntry::new(task.priority().ordinal(), task.name());
                if !inner.ready_queue.push(entry) {
                    warn!(
                        "Ready queue full, task {} stays pending until the next refill",
                        task.name()
                    );
                }
            }
        });
        if !insertion.is_new() {
            return insertion.into_name();
        }
        let name = insertion.into_name();
        info!("Added task {} ({})", name, task.priority());
        inner.publisher.task_event(TaskEventKind::Added, &task);
        name
    }

    pub fn add_tasks(&self, tasks: impl IntoIterator<Item = Arc<Task>>) -> Vec<String> {
        tasks.into_iter().map(|task| self.add_task(task)).collect()
    }

    pub fn get_task(&self, name: &str) -> Option<Arc<Task>> {
        self.inner.registry.get(name)
    }

    /// All registered tasks, optionally filtered by status
    pub fn get_tasks(&self, status: Option<TaskStatus>) -> Vec<Arc<Task>> {
        self.inner.registry.list(status)
    }

    /// Cancel a pending task. Returns false for unknown or non-pending tasks.
    pub fn cancel_task(&self, name: &str) -> bool {
        if !self.inner.registry.cancel(name) {
            return false;
        }
        info!("Cancelled task {}", name);
        if let Some(task) = self.inner.registry.get(name) {
            self.inner.publisher.task_event(TaskEventKind::Cancelled, &task);
        }
        true
    }

    /// Cancel every pending task, reporting success per task name
    pub fn cancel_all_tasks(&self) -> HashMap<String, bool> {
        self.inner
            .registry
            .pending_names()
            .into_iter()
            .map(|name| {
                let cancelled = self.cancel_task(&name);
                (name, cancelled)
            })
            .collect()
    }

    /// Spawn the worker. False (with a warning) if already running.
    pub fn start_execution(&self) -> bool {
        let mut worker = self.worker.lock();
        let Some(generation) = self.inner.signals.begin() else {
            warn!("Task scheduler is already running");
            return false;
        };

        // Entries left from a previous run are rebuilt from the pending set
        self.inner.ready_queue.clear();

        match self.spawn_worker(generation) {
            Ok(handle) => *worker = Some(handle),
            Err(e) => {
                error!("Failed to start task scheduler: {}", e);
                self.inner.signals.finish();
                return false;
            }
        }

        let pending = self.inner.registry.pending_count();
        info!("Task scheduler started with {} pending tasks", pending);
        self.inner
            .publisher
            .service_event(ServiceEventKind::Started, pending);
        true
    }

    /// Stop picking up new tasks; the task in flight runs to completion
    pub fn pause_execution(&self) -> bool {
        if !self.inner.signals.pause() {
            warn!("Task scheduler is not running or already paused");
            return false;
        }
        info!("Task scheduler paused");
        self.inner
            .publisher
            .service_event(ServiceEventKind::Paused, self.pending_task_count());
        true
    }

    pub fn resume_execution(&self) -> bool {
        if !self.inner.signals.resume() {
            warn!("Task scheduler is not running or not paused");
            return false;
        }
        info!("Task scheduler resumed");
        self.inner
            .publisher
            .service_event(ServiceEventKind::Resumed, self.pending_task_count());
        true
    }

    /// Signal the worker to stop and wait for it, up to the configured timeout.
    ///
    /// Always returns promptly; a worker still inside a long task is left
    /// to finish it and exit on its own.
    pub fn stop_execution(&self) -> bool {
        if !self.inner.signals.is_running() {
            warn!("Task scheduler is not running");
            return false;
        }

        self.inner.signals.request_stop();

        if let Some(handle) = self.worker.lock().take() {
            self.join_worker(handle);
        }

        self.inner.signals.finish();
        info!("Task scheduler stopped");
        self.inner
            .publisher
            .service_event(ServiceEventKind::Stopped, self.pending_task_count());
        true
    }

    pub fn is_running(&self) -> bool {
        self.inner.signals.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.signals.is_paused()
    }

    /// Run one task on the calling thread, bypassing the registry and queue.
    ///
    /// Publishes the same started/terminal events as the worker. Returns
    /// true iff the task ends `Completed`; a task that is not pending is
    /// left untouched and yields false.
    pub fn execute_task_synchronously(&self, task: &Task) -> bool {
        if !task.start() {
            warn!(
                "Cannot execute task {} synchronously from status {}",
                task.name(),
                task.status()
            );
            return false;
        }
        // A registered task run here no longer counts as pending
        self.inner.registry.discard(&task.name());
        info!("Executing task {} synchronously", task.name());
        self.inner.publisher.task_event(TaskEventKind::Started, task);
        let outcome = task.run_started(&self.inner.context);
        self.inner.settle(task, &outcome);
        outcome.is_success()
    }

    /// Replace every service handle in the execution context
    pub fn set_execution_context(&self, services: HashMap<String, ServiceHandle>) {
        debug!("Execution context replaced with {} services", services.len());
        self.inner.context.replace_all(services);
    }

    pub fn add_to_execution_context<T>(&self, key: impl Into<String>, service: T)
    where
        T: std::any::Any + Send + Sync,
    {
        self.inner.context.insert(key, service);
    }

    /// Shared handle to the context passed to every task
    pub fn execution_context(&self) -> ExecutionContext {
        self.inner.context.clone()
    }

    /// Called after any task run by this scheduler completes
    pub fn register_task_completion_callback<F>(&self, callback: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.inner.completion_callbacks.write().push(Arc::new(callback));
    }

    /// Called after any task run by this scheduler fails
    pub fn register_task_failure_callback<F>(&self, callback: F)
    where
        F: Fn(&Task, &str) + Send + Sync + 'static,
    {
        self.inner.failure_callbacks.write().push(Arc::new(callback));
    }

    pub fn pending_task_count(&self) -> usize {
        self.inner.registry.pending_count()
    }

    pub fn ready_queue_len(&self) -> usize {
        self.inner.ready_queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let counts = self.inner.registry.status_counts();
        let count = |status: TaskStatus| counts.get(&status).copied().unwrap_or(0);
        SchedulerStats {
            total_tasks: counts.values().sum(),
            pending: count(TaskStatus::Pending),
            running: count(TaskStatus::Running),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            cancelled: count(TaskStatus::Cancelled),
            ready_queue_size: self.inner.ready_queue.len(),
            ready_queue_capacity: self.inner.ready_queue.capacity(),
            is_running: self.is_running(),
            is_paused: self.is_paused(),
        }
    }

    /// Dependency view of every registered task
    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_tasks(&self.inner.registry.list(None))
    }

    fn spawn_worker(&self, generation: u64) -> Result<WorkerHandle> {
        let (exit_tx, exit_rx) = channel::bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let thread_name = self.inner.config.worker_thread_name.clone();

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let _exit = exit_tx;
                inner.run_loop(generation);
            })
            .map_err(|source| SchedulerError::WorkerSpawn {
                thread_name,
                source,
            })?;

        Ok(WorkerHandle {
            join,
            exited: exit_rx,
        })
    }

    fn join_worker(&self, handle: WorkerHandle) {
        if handle.join.thread().id() == thread::current().id() {
            debug!("stop_execution called from the worker thread, not joining");
            return;
        }

        let timeout = self.inner.config.stop_join_timeout();
        match handle.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Worker did not stop within {:?}, leaving it to finish its current task",
                    timeout
                );
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join.join().is_err() {
                    error!("Task scheduler worker panicked");
                }
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.inner.signals.request_stop();
    }
}

impl SchedulerInner {
    fn run_loop(&self, generation: u64) {
        info!("Execution loop started");

        while self.signals.should_continue(generation) {
            if self.signals.is_paused() {
                self.signals.wait_while_paused();
                continue;
            }

            if self.ready_queue.is_empty() {
                self.refill_ready_queue();
            }

            let Some(entry) = self.ready_queue.pop_timeout(self.config.dequeue_timeout()) else {
                continue;
            };

            // A pause or stop may have arrived while waiting on the queue
            if self.signals.is_paused() || !self.signals.should_continue(generation) {
                let name = entry.name.clone();
                if !self.ready_queue.push(entry) {
                    warn!(
                        "Ready queue full, task {} stays pending until the next refill",
                        name
                    );
                }
                continue;
            }

            self.process_entry(entry);
        }

        self.signals.finish_generation(generation);
        info!("Execution loop stopped");
    }

    fn refill_ready_queue(&self) {
        let pending = self.registry.pending_by_priority();
        if pending.is_empty() {
            return;
        }
        debug!("Refilling ready queue with {} pending tasks", pending.len());
        for task in pending {
            let entry = QueueEntry::new(task.priority().ordinal(), task.name());
            if !self.ready_queue.push(entry) {
                warn!("Ready queue full during refill");
                break;
            }
        }
    }

    fn process_entry(&self, entry: QueueEntry) {
        let Some(task) = self.registry.get(&entry.name) else {
            debug!("Discarding queue entry for unknown task {}", entry.name);
            return;
        };
        if task.status() != TaskStatus::Pending {
            debug!(
                "Discarding queue entry for task {} with status {}",
                entry.name,
                task.status()
            );
            self.registry.discard(&entry.name);
            return;
        }

        if !task.is_ready() {
            debug!(
                "Task {} waiting on {:?}, requeueing",
                entry.name,
                task.unmet_dependencies()
            );
            let penalized = QueueEntry::new(
                entry.priority.saturating_add(self.config.dependency_penalty),
                entry.name,
            );
            if !self.ready_queue.push(penalized) {
                warn!("Ready queue full, blocked task stays pending until the next refill");
            }
            let backoff = self.config.requeue_backoff();
            if !backoff.is_zero() {
                thread::sleep(backoff);
            }
            return;
        }

        let Some(task) = self.registry.claim(&entry.name) else {
            return;
        };

        info!("Starting task {}", entry.name);
        self.publisher.task_event(TaskEventKind::Started, &task);
        let outcome = task.run_started(&self.context);
        self.settle(&task, &outcome);
    }

    /// Publish the terminal event and run scheduler-level callbacks
    fn settle(&self, task: &Task, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Completed(_) => {
                info!(
                    "Task {} completed in {:?}",
                    task.name(),
                    task.execution_time().unwrap_or_default()
                );
                self.publisher.task_event(TaskEventKind::Completed, task);
                let callbacks = self.completion_callbacks.read().clone();
                for callback in callbacks {
                    guard_callback(task, || callback(task));
                }
            }
            TaskOutcome::Failed { error: message, .. } => {
                self.publisher.task_event(TaskEventKind::Failed, task);
                let callbacks = self.failure_callbacks.read().clone();
                for callback in callbacks {
                    guard_callback(task, || callback(task, message));
                }
            }
        }
    }
}

fn guard_callback(task: &Task, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        error!(
            "Scheduler callback for task {} panicked: {}",
            task.name(),
            panic_message(payload.as_ref())
        );
    }
}
