//! Task handlers -- the pluggable per-task-type computation.

pub mod registry;
pub mod subprocess;
pub mod trait_def;

pub use registry::HandlerRegistry;
pub use subprocess::SubprocessHandler;
pub use trait_def::{HandlerContext, TaskHandler};
