//! Built-in tool implementations for oxpilot.
//!
//! These give the agent its hands: run shell commands and read, write, and
//! list files in the workspace. Anything else is reachable through `shell`.

pub mod file_read;
pub mod file_write;
pub mod list_dir;
pub mod shell;

use std::sync::Arc;

use oxpilot_core::tool::ToolRegistry;

pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use list_dir::ListDirTool;
pub use shell::ShellTool;

/// Operational limits for the built-in tools, usually filled from config.
#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub shell_timeout_secs: u64,
    pub shell_max_output: usize,
    pub read_max_lines: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            shell_timeout_secs: 30,
            shell_max_output: 8192,
            read_max_lines: 500,
        }
    }
}

/// Create a registry with all built-in tools.
pub fn default_registry(limits: &ToolLimits) -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(ShellTool::new(
        limits.shell_timeout_secs,
        limits.shell_max_output,
    )));
    registry.register(Arc::new(FileReadTool::new(limits.read_max_lines)));
    registry.register(Arc::new(FileWriteTool));
    registry.register(Arc::new(ListDirTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_tools() {
        let registry = default_registry(&ToolLimits::default());
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["list_dir", "read_file", "shell", "write_file"]);
    }
}
