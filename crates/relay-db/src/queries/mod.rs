//! Query functions, one module per entity family.

pub mod logs;
pub mod tasks;
pub mod workers;
pub mod workflows;
