//! Handler registry -- a collection of task handlers keyed by task type.
//!
//! The registry lets a worker look up the handler for a claimed task's
//! type at runtime. Task types are an open extension point: a worker
//! serves whatever subset of types its registry covers.

use std::collections::HashMap;

use relay_db::models::TaskType;

use super::trait_def::TaskHandler;

/// A collection of registered [`TaskHandler`] implementations, keyed by
/// the task type they serve.
///
/// # Example
///
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register(PlanHandler::new(backend, 3));
/// let handler = registry.get(TaskType::Plan).unwrap();
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Box<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// The handler is stored under the type returned by
    /// [`TaskHandler::task_type`]. If a handler for the same type is
    /// already registered, it is replaced and the old one is returned.
    pub fn register(&mut self, handler: impl TaskHandler + 'static) -> Option<Box<dyn TaskHandler>> {
        let task_type = handler.task_type();
        self.handlers.insert(task_type, Box::new(handler))
    }

    /// Look up the handler for a task type.
    pub fn get(&self, task_type: TaskType) -> Option<&dyn TaskHandler> {
        self.handlers.get(&task_type).map(|b| b.as_ref())
    }

    /// List the task types with a registered handler.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn task_types(&self) -> Vec<TaskType> {
        self.handlers.keys().copied().collect()
    }

    /// Return the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
