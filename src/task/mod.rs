//! Task model: the state machine, composite tasks and the execution context.

pub mod action;
pub mod composite;
pub mod context;
pub mod model;
#[allow(clippy::module_inception)]
pub mod task;

pub use action::{FnAction, TaskAction};
pub use composite::CompositeTask;
pub use context::{ExecutionContext, ServiceHandle};
pub use model::{Priority, TaskFailure, TaskOutcome, TaskStatus};
pub use task::{CompletionCallback, FailureCallback, Task};
