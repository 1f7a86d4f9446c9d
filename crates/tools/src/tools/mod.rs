//! Built-in tool implementations.

pub mod http;
pub mod shell;

use crate::registry::ToolRegistry;

pub use http::HttpTool;
pub use shell::ShellTool;

/// Create a registry with all built-in tools registered.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(HttpTool::new());
    registry.register(ShellTool::new());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert!(registry.has("http"));
        assert!(registry.has("shell"));
    }
}
