//! Database queries, one module per table.
//!
//! Every mutation is a single scoped transaction; no application-level lock
//! spans multiple database calls.

pub mod catalog;
pub mod credential;
pub mod event;
pub mod execution;
pub mod queue;
pub mod runtime;
pub mod workload;
