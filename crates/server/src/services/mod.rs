//! Service layer: the operations handlers call, one service per concern.

pub mod catalog;
pub mod credential;
pub mod execution;
pub mod queue;
pub mod runtime;

pub use catalog::CatalogService;
pub use credential::CredentialService;
pub use execution::ExecutionService;
pub use queue::QueueService;
pub use runtime::RuntimeService;
