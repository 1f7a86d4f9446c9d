//! Database models and API DTOs.

mod catalog;
mod credential;
mod event;
mod execution;
mod queue;
mod runtime;

pub use catalog::{Catalog, CatalogRegisterRequest, CatalogResponse};
pub use credential::{Credential, CredentialRequest, CredentialResponse};
pub use event::{Event, EventAppendRequest, EventResponse, EventStatus, EventType};
pub use execution::{Execution, ExecutionResponse, ExecutionStatus};
pub use queue::{
    FailOutcome, JobStatus, LeaseRequest, QueueJob, QueueJobResponse, QueueJobSpec, RetryPolicy,
};
pub use runtime::{Runtime, RuntimeRegisterRequest, RuntimeStatus};
