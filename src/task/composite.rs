use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::action::TaskAction;
use super::context::ExecutionContext;
use super::model::{Priority, TaskOutcome};
use super::task::Task;

/// Runs child tasks strictly in order, stopping at the first failure.
///
/// Each child goes through its own lifecycle, so child statuses and
/// callbacks are observable. The composite's result lists the children's
/// results in order.
pub struct CompositeTask {
    children: Vec<Arc<Task>>,
}

impl CompositeTask {
    pub fn new(children: Vec<Arc<Task>>) -> Self {
        Self { children }
    }

    pub fn with_child(mut self, child: Arc<Task>) -> Self {
        self.children.push(child);
        self
    }

    /// Wrap into a [`Task`]
    pub fn into_task(self, name: impl Into<String>, priority: Priority) -> Task {
        Task::new(name, priority, self)
    }
}

impl TaskAction for CompositeTask {
    fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        let mut results = Vec::with_capacity(self.children.len());

        for child in &self.children {
            let name = child.name();
            debug!("Running sub-task {}", name);
            match child.run(ctx) {
                Some(TaskOutcome::Completed(value)) => results.push(value),
                Some(TaskOutcome::Failed { error, .. }) => {
                    info!("Sub-task {} failed, skipping remaining sub-tasks", name);
                    return Err(anyhow!("Sub-task '{}' failed: {}", name, error));
                }
                None => {
                    return Err(anyhow!(
                        "Sub-task '{}' failed: cannot start from status {}",
                        name,
                        child.status()
                    ));
                }
            }
        }

        Ok(json!(results))
    }

    fn kind(&self) -> &str {
        "CompositeTask"
    }

    fn children(&self) -> &[Arc<Task>] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn step(name: &str, ok: bool) -> Arc<Task> {
        Arc::new(Task::from_fn(name, Priority::Normal, move |_| {
            if ok {
                Ok(json!(true))
            } else {
                Err(anyhow!("template not matched"))
            }
        }))
    }

    #[test]
    fn test_all_children_succeed() {
        let composite = CompositeTask::new(vec![step("a", true)])
            .with_child(step("b", true))
            .into_task("sequence", Priority::High);

        assert_eq!(composite.kind(), "CompositeTask");
        assert_eq!(composite.children().len(), 2);

        let outcome = composite.run(&ExecutionContext::new()).unwrap();
        assert_eq!(outcome, TaskOutcome::Completed(json!([true, true])));
        assert_eq!(composite.status(), TaskStatus::Completed);
        assert!(composite
            .children()
            .iter()
            .all(|c| c.status() == TaskStatus::Completed));
    }

    #[test]
    fn test_short_circuit_on_failure() {
        let c_ran = Arc::new(AtomicBool::new(false));
        let flag = c_ran.clone();
        let c = Arc::new(Task::from_fn("C", Priority::Normal, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(json!(null))
        }));

        let composite = CompositeTask::new(vec![step("A", true), step("B", false), c.clone()])
            .into_task("combo", Priority::Normal);
        composite.run(&ExecutionContext::new());

        assert_eq!(composite.status(), TaskStatus::Failed);
        assert_eq!(
            composite.error_message().as_deref(),
            Some("Sub-task 'B' failed: template not matched")
        );
        assert!(!c_ran.load(Ordering::SeqCst));
        assert_eq!(c.status(), TaskStatus::Pending);
    }

    #[test]
    fn test_cancelled_child_fails_composite() {
        let child = step("skip", true);
        child.cancel();
        let composite = CompositeTask::new(vec![child]).into_task("c", Priority::Low);
        composite.run(&ExecutionContext::new());
        assert_eq!(composite.status(), TaskStatus::Failed);
        assert!(composite.error_message().unwrap().contains("'skip'"));
    }
}
