//! Store layer for relay: PostgreSQL pool management, migrations, row
//! models, and query functions.
//!
//! All engine state lives in the database; every process using this crate
//! is stateless and may be killed or restarted at any point. The query
//! functions here are the only write paths, and every conditional update
//! is a single-row statement so no multi-document transaction is needed.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
