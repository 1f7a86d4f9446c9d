//! NoETL Worker Library
//!
//! A stateless worker process: it registers with the server, lease-polls
//! the job queue, dispatches leased jobs to action executors, heartbeats
//! the leases it holds, and reports results back as events. Losing a
//! lease is a normal outcome; the worker abandons the in-flight work and
//! the queue re-delivers elsewhere.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod worker;

pub use config::WorkerConfig;
pub use worker::Worker;
