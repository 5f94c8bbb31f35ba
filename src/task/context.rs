use dashmap::DashMap;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to a collaborator service stored in the context
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Service handles made available to every executing task.
///
/// Clones share the same underlying map. Keys are opaque to the scheduler;
/// each concrete task decides which services it needs.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    services: Arc<DashMap<String, ServiceHandle>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous handle under `key`
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, service: T) {
        self.services.insert(key.into(), Arc::new(service));
    }

    /// Register an already shared handle
    pub fn insert_handle(&self, key: impl Into<String>, handle: ServiceHandle) {
        self.services.insert(key.into(), handle);
    }

    /// Typed lookup; `None` when the key is missing or holds another type
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let handle = self.services.get(key)?.value().clone();
        handle.downcast::<T>().ok()
    }

    pub fn get_handle(&self, key: &str) -> Option<ServiceHandle> {
        self.services.get(key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<ServiceHandle> {
        self.services.remove(key).map(|(_, handle)| handle)
    }

    /// Swap the whole service set in place, visible to every clone
    pub fn replace_all(&self, services: HashMap<String, ServiceHandle>) {
        self.services.clear();
        for (key, handle) in services {
            self.services.insert(key, handle);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("ExecutionContext").field("services", &keys).finish()
    }
}
