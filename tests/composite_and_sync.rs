//! Composite tasks and the synchronous execution path.

use anyhow::anyhow;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use taskline::{
    BufferingEventSink, CompositeTask, Priority, Scheduler, SchedulerConfig, Task, TaskFailure,
    TaskStatus,
};

fn scheduler() -> (Scheduler, BufferingEventSink) {
    let sink = BufferingEventSink::new();
    let scheduler =
        Scheduler::with_sink(SchedulerConfig::development(), Arc::new(sink.clone())).unwrap();
    (scheduler, sink)
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn succeed(name: &str) -> Arc<Task> {
    Arc::new(Task::from_fn(name, Priority::Normal, |_| Ok(json!("done"))))
}

fn fail(name: &str) -> Arc<Task> {
    Arc::new(Task::from_fn(name, Priority::Normal, |_| Err(anyhow!("button missing"))))
}

#[test]
fn test_composite_short_circuits_in_scheduler() {
    let (scheduler, sink) = scheduler();
    let c_ran = Arc::new(AtomicBool::new(false));
    let c = {
        let c_ran = c_ran.clone();
        Arc::new(Task::from_fn("C", Priority::Normal, move |_| {
            c_ran.store(true, Ordering::SeqCst);
            Ok(json!(null))
        }))
    };

    let combo = Arc::new(
        CompositeTask::new(vec![succeed("A"), fail("B"), c.clone()])
            .into_task("open_shop", Priority::High),
    );
    scheduler.add_task(combo.clone());
    scheduler.start_execution();
    assert!(wait_for(|| combo.status().is_terminal()));
    scheduler.stop_execution();

    assert_eq!(combo.status(), TaskStatus::Failed);
    assert!(combo.error_message().unwrap().contains("B"));
    assert!(!c_ran.load(Ordering::SeqCst));
    assert_eq!(c.status(), TaskStatus::Pending);

    let failed = &sink.of_type("task_failed")[0].data;
    assert_eq!(failed["task_type"], json!("CompositeTask"));
    assert_eq!(failed["task_name"], json!("open_shop"));
}

#[test]
fn test_sync_matches_queued_outcome() {
    let (scheduler, _) = scheduler();

    let sync_ok = succeed("sync_ok");
    let sync_err = fail("sync_err");
    assert!(scheduler.execute_task_synchronously(&sync_ok));
    assert!(!scheduler.execute_task_synchronously(&sync_err));

    let queued_ok = succeed("queued_ok");
    let queued_err = fail("queued_err");
    scheduler.add_task(queued_ok.clone());
    scheduler.add_task(queued_err.clone());
    scheduler.start_execution();
    assert!(wait_for(|| queued_ok.status().is_terminal() && queued_err.status().is_terminal()));
    scheduler.stop_execution();

    assert_eq!(sync_ok.status(), queued_ok.status());
    assert_eq!(sync_ok.status(), TaskStatus::Completed);
    assert_eq!(sync_ok.result(), queued_ok.result());
    assert_eq!(sync_err.status(), queued_err.status());
    assert_eq!(sync_err.status(), TaskStatus::Failed);
    assert_eq!(sync_err.error_message(), queued_err.error_message());
}

#[test]
fn test_sync_events_and_callbacks() {
    let (scheduler, sink) = scheduler();
    let scheduler_calls = Arc::new(AtomicUsize::new(0));
    let task_calls = Arc::new(AtomicUsize::new(0));

    let counter = scheduler_calls.clone();
    scheduler.register_task_completion_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let task = succeed("sync");
    let counter = task_calls.clone();
    task.add_completion_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(scheduler.execute_task_synchronously(&task));
    assert_eq!(sink.event_types(), vec!["task_started", "task_completed"]);
    assert_eq!(scheduler_calls.load(Ordering::SeqCst), 1);
    assert_eq!(task_calls.load(Ordering::SeqCst), 1);

    // Already terminal: left untouched
    assert!(!scheduler.execute_task_synchronously(&task));
    assert_eq!(task.status(), TaskStatus::Completed);
    assert_eq!(task_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sink.event_types().len(), 2);
}

#[test]
fn test_sync_ignores_dependencies_and_registry() {
    let (scheduler, _) = scheduler();
    let never_run = succeed("never_run");
    let dependent = Task::from_fn("dependent", Priority::Low, |_| Ok(json!(1)))
        .with_dependency(&never_run);

    assert!(scheduler.execute_task_synchronously(&dependent));
    assert!(scheduler.get_task("dependent").is_none());
    assert_eq!(never_run.status(), TaskStatus::Pending);
}

#[test]
fn test_partial_result_kept_on_failure() {
    let (scheduler, sink) = scheduler();
    let task = Task::from_fn("scroll_list", Priority::Normal, |_| {
        Err(TaskFailure::new("list ended early")
            .with_partial(json!({"items": 3}))
            .into())
    });

    assert!(!scheduler.execute_task_synchronously(&task));
    assert_eq!(task.error_message().as_deref(), Some("list ended early"));
    assert_eq!(task.result(), Some(json!({"items": 3})));
    assert_eq!(
        sink.of_type("task_failed")[0].data["error_message"],
        json!("list ended early")
    );
}
