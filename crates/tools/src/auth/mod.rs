//! Authentication resolution for executors.

mod resolver;

pub use resolver::{AuthCredentials, AuthResolver};
