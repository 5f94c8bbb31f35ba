use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::task::{Task, TaskStatus};

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<String, Arc<Task>>,
    pending: HashSet<String>,
}

impl RegistryState {
    /// Drop names whose task left `Pending` outside the registry
    fn prune_pending(&mut self) {
        let RegistryState { tasks, pending } = self;
        pending.retain(|name| {
            tasks
                .get(name)
                .is_some_and(|task| task.status() == TaskStatus::Pending)
        });
    }
}

/// Result of [`TaskRegistry::insert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// Stored under this name
    New(String),
    /// The same task was already stored under this name; nothing changed
    Existing(String),
}

impl Insertion {
    pub fn name(&self) -> &str {
        match self {
            Insertion::New(name) | Insertion::Existing(name) => name,
        }
    }

    pub fn into_name(self) -> String {
        match self {
            Insertion::New(name) | Insertion::Existing(name) => name,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Insertion::New(_))
    }
}

/// Name-keyed store of every task added to a scheduler, plus the names
/// still eligible to run.
///
/// Both maps sit behind one lock so membership checks and status changes
/// made here are atomic with respect to each other. Tasks can also change
/// status through their own handle, so every read of the pending set first
/// prunes names that are no longer `Pending`.
pub struct TaskRegistry {
    inner: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState::default()),
        }
    }

    /// Insert a task, renaming it first if its name is taken by another task.
    ///
    /// Never replaces an existing entry. Inserting a task that is already
    /// registered is a no-op. `on_insert` runs while the lock is still held,
    /// and only for new entries.
    pub fn insert(&self, task: Arc<Task>, on_insert: impl FnOnce(&Arc<Task>)) -> Insertion {
        let mut state = self.inner.lock();

        let requested = task.name();
        if state
            .tasks
            .get(&requested)
            .is_some_and(|existing| Arc::ptr_eq(existing, &task))
        {
            warn!("Task {} is already registered, ignoring", requested);
            return Insertion::Existing(requested);
        }

        let mut name = requested.clone();
        while state.tasks.contains_key(&name) {
            name = format!("{}_{}", requested, &Uuid::new_v4().simple().to_string()[..8]);
        }
        if name != requested {
            warn!(
                "Task name {} already registered, adding new task as {}",
                requested, name
            );
            task.set_name(name.clone());
        }

        if task.status() == TaskStatus::Pending {
            state.pending.insert(name.clone());
        }
        state.tasks.insert(name.clone(), task.clone());
        on_insert(&task);

        debug!("Registered task {} ({} total)", name, state.tasks.len());
        Insertion::New(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Task>> {
        self.inner.lock().tasks.get(name).cloned()
    }

    /// All tasks, optionally only those with the given status
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<Arc<Task>> {
        let state = self.inner.lock();
        state
            .tasks
            .values()
            .filter(|task| status.map_or(true, |s| task.status() == s))
            .cloned()
            .collect()
    }

    /// Pending tasks, most urgent first
    pub fn pending_by_priority(&self) -> Vec<Arc<Task>> {
        let mut state = self.inner.lock();
        state.prune_pending();
        let mut pending: Vec<Arc<Task>> = state
            .pending
            .iter()
            .filter_map(|name| state.tasks.get(name).cloned())
            .collect();
        pending.sort_by_key(|task| task.priority());
        pending
    }

    /// Move a pending task to `Running`, removing it from the pending set.
    ///
    /// Returns `None` when the task is unknown or no longer pending.
    pub fn claim(&self, name: &str) -> Option<Arc<Task>> {
        let mut state = self.inner.lock();
        let task = state.tasks.get(name).cloned()?;
        if !state.pending.contains(name) || task.status() != TaskStatus::Pending {
            state.pending.remove(name);
            return None;
        }
        if !task.start() {
            return None;
        }
        state.pending.remove(name);
        Some(task)
    }

    /// Remove `name` from the pending set unless its task is still `Pending`
    pub fn discard(&self, name: &str) {
        let mut state = self.inner.lock();
        let still_pending = state
            .tasks
            .get(name)
            .is_some_and(|task| task.status() == TaskStatus::Pending);
        if !still_pending && state.pending.remove(name) {
            debug!("Dropped {} from the pending set", name);
        }
    }

    /// Cancel a pending task; false for unknown or non-pending tasks
    pub fn cancel(&self, name: &str) -> bool {
        let mut state = self.inner.lock();
        let Some(task) = state.tasks.get(name).cloned() else {
            warn!("Cannot cancel unknown task {}", name);
            return false;
        };
        if task.status() != TaskStatus::Pending {
            state.pending.remove(name);
            warn!("Cannot cancel task {} with status {}", name, task.status());
            return false;
        }
        if !task.cancel() {
            return false;
        }
        state.pending.remove(name);
        true
    }

    /// Names of tasks currently `Pending`
    pub fn pending_names(&self) -> Vec<String> {
        let mut state = self.inner.lock();
        state.prune_pending();
        state.pending.iter().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        let mut state = self.inner.lock();
        state.prune_pending();
        state.pending.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count of tasks per status
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let state = self.inner.lock();
        let mut counts = HashMap::new();
        for task in state.tasks.values() {
            *counts.entry(task.status()).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use serde_json::json;

    fn task(name: &str, priority: Priority) -> Arc<Task> {
        Arc::new(Task::from_fn(name, priority, |_| Ok(json!(null))))
    }

    #[test]
    fn test_collision_renames_new_task() {
        let registry = TaskRegistry::new();
        let original = task("scan", Priority::Normal);
        let duplicate = task("scan", Priority::High);

        assert_eq!(registry.insert(original.clone(), |_| {}), Insertion::New("scan".into()));
        let renamed = registry.insert(duplicate.clone(), |_| {}).into_name();

        assert_ne!(renamed, "scan");
        assert!(renamed.starts_with("scan_"));
        assert_eq!(duplicate.name(), renamed);
        assert_eq!(original.name(), "scan");
        assert!(Arc::ptr_eq(&registry.get("scan").unwrap(), &original));
        assert!(Arc::ptr_eq(&registry.get(&renamed).unwrap(), &duplicate));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.pending_count(), 2);
    }

    #[test]
    fn test_pending_sorted_by_priority() {
        let registry = TaskRegistry::new();
        registry.insert(task("a", Priority::Low), |_| {});
        registry.insert(task("b", Priority::High), |_| {});
        registry.insert(task("c", Priority::Normal), |_| {});

        let names: Vec<String> = registry
            .pending_by_priority()
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_claim_and_cancel() {
        let registry = TaskRegistry::new();
        registry.insert(task("run", Priority::Normal), |_| {});
        registry.insert(task("drop", Priority::Normal), |_| {});

        let claimed = registry.claim("run").unwrap();
        assert_eq!(claimed.status(), TaskStatus::Running);
        assert!(registry.claim("run").is_none());
        assert!(!registry.cancel("run"));

        assert!(registry.cancel("drop"));
        assert!(!registry.cancel("drop"));
        assert!(!registry.cancel("missing"));
        assert!(registry.claim("drop").is_none());
        assert!(registry.claim("missing").is_none());
        assert_eq!(registry.pending_count(), 0);

        let counts = registry.status_counts();
        assert_eq!(counts.get(&TaskStatus::Running), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Cancelled), Some(&1));
        assert_eq!(registry.list(Some(TaskStatus::Cancelled)).len(), 1);
        assert_eq!(registry.list(None).len(), 2);
    }

    #[test]
    fn test_non_pending_task_not_marked_pending() {
        let registry = TaskRegistry::new();
        let done = task("done", Priority::Normal);
        done.cancel();
        registry.insert(done, |_| {});
        assert_eq!(registry.pending_count(), 0);
        assert!(registry.claim("done").is_none());
    }

    #[test]
    fn test_same_task_registered_once() {
        let registry = TaskRegistry::new();
        let scan = task("scan", Priority::Normal);
        let mut hook_calls = 0;

        assert!(registry.insert(scan.clone(), |_| hook_calls += 1).is_new());
        let again = registry.insert(scan.clone(), |_| hook_calls += 1);

        assert_eq!(again, Insertion::Existing("scan".into()));
        assert_eq!(hook_calls, 1);
        assert_eq!(scan.name(), "scan");
        assert!(Arc::ptr_eq(&registry.get("scan").unwrap(), &scan));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn test_pending_set_follows_outside_transitions() {
        let registry = TaskRegistry::new();
        let ran = task("ran", Priority::High);
        let dropped = task("dropped", Priority::Normal);
        let waiting = task("waiting", Priority::Low);
        for t in [&ran, &dropped, &waiting] {
            registry.insert(t.clone(), |_| {});
        }

        ran.run(&crate::task::ExecutionContext::new());
        dropped.cancel();

        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.pending_names(), vec!["waiting"]);
        let names: Vec<String> = registry
            .pending_by_priority()
            .iter()
            .map(|t| t.name())
            .collect();
        assert_eq!(names, vec!["waiting"]);
    }

    #[test]
    fn test_discard_keeps_pending_tasks() {
        let registry = TaskRegistry::new();
        let done = task("done", Priority::Normal);
        let idle = task("idle", Priority::Normal);
        registry.insert(done.clone(), |_| {});
        registry.insert(idle.clone(), |_| {});
        done.run(&crate::task::ExecutionContext::new());

        registry.discard("done");
        registry.discard("idle");
        registry.discard("missing");
        assert_eq!(registry.pending_names(), vec!["idle"]);
    }
}
