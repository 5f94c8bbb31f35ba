use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use super::context::ExecutionContext;
use super::task::Task;

/// Work performed by a task against collaborator services.
///
/// `execute` is a blocking call. Return `Ok` with the task result on
/// success; any `Err` (or a panic) fails the task. Wrap a
/// [`TaskFailure`](super::TaskFailure) in the error to keep a partial result.
pub trait TaskAction: Send + Sync + 'static {
    /// Perform the action.
    fn execute(&self, ctx: &ExecutionContext) -> Result<Value>;

    /// Task type reported in lifecycle events
    fn kind(&self) -> &str {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base)
    }

    /// Child tasks owned by this action, empty unless composite
    fn children(&self) -> &[Arc<Task>] {
        &[]
    }
}

/// Closure-backed action
pub struct FnAction<F> {
    kind: String,
    func: F,
}

impl<F> FnAction<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            kind: "FnAction".to_string(),
            func,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

impl<F> TaskAction for FnAction<F>
where
    F: Fn(&ExecutionContext) -> Result<Value> + Send + Sync + 'static,
{
    fn execute(&self, ctx: &ExecutionContext) -> Result<Value> {
        (self.func)(ctx)
    }

    fn kind(&self) -> &str {
        &self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CaptureScreen;

    impl TaskAction for CaptureScreen {
        fn execute(&self, _ctx: &ExecutionContext) -> Result<Value> {
            Ok(json!({"width": 1920}))
        }
    }

    #[test]
    fn test_default_kind_is_type_name() {
        assert_eq!(CaptureScreen.kind(), "CaptureScreen");
        assert!(CaptureScreen.children().is_empty());
    }

    #[test]
    fn test_fn_action() {
        let action = FnAction::new(|ctx: &ExecutionContext| {
            let scale = ctx.get::<u32>("scale").map(|s| *s).unwrap_or(1);
            Ok(json!(scale * 2))
        })
        .with_kind("Doubler");

        let ctx = ExecutionContext::new();
        ctx.insert("scale", 21u32);
        assert_eq!(action.execute(&ctx).unwrap(), json!(42));
        assert_eq!(action.kind(), "Doubler");
    }
}
