//! NoETL Tool Library
//!
//! Action executors shared by worker processes.
//!
//! This crate provides:
//! - The executor capability framework: [`Tool`] trait plus [`ToolRegistry`]
//! - Built-in executors: http, shell
//! - Template engine with Jinja2-compatible syntax
//! - Credential-to-auth resolution for executor invocations
//!
//! Executors classify their failures as transient or permanent via
//! [`FailureKind`]; the worker dispatcher translates that classification
//! into queue retry behavior.

pub mod auth;
pub mod context;
pub mod error;
pub mod registry;
pub mod result;
pub mod template;
pub mod tools;

pub use context::ExecutionContext;
pub use error::{FailureKind, ToolError};
pub use registry::{Tool, ToolConfig, ToolRegistry};
pub use result::{ToolResult, ToolStatus};
