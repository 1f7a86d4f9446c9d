//! HTTP client for the server API.

mod server;

pub use server::{ClientError, LeasedJob, ReportedEvent, ServerClient};
