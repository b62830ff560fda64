//! Tool host
//!
//! The built-in tool catalog, the registry that validates and dispatches
//! calls, and the stdin/stdout wire protocol. Every tool is scoped to one
//! workspace root at registration time.

pub mod echo;
pub mod file_ops;
pub mod host;
pub mod registry;
pub mod traits;
pub mod web_app;

use std::path::Path;

use crate::error::Result;
use crate::trace::ActionLog;

pub use registry::{ToolRegistry, ToolSpec};
pub use traits::Tool;

/// Build the full built-in registry for a workspace.
///
/// The workspace root must already be resolved via
/// [`crate::sandbox::resolve_workspace_root`].
pub fn build_registry(workspace_root: &Path) -> Result<ToolRegistry> {
    let root = workspace_root.to_path_buf();
    let mut registry = ToolRegistry::new().with_action_log(ActionLog::for_workspace(&root));

    registry.register(file_ops::CreateFileTool::new(root.clone()))?;
    registry.register(file_ops::ReadFileTool::new(root.clone()))?;
    registry.register(file_ops::ListDirectoryTool::new(root.clone()))?;
    registry.register(file_ops::AppendToFileTool::new(root.clone()))?;
    registry.register(file_ops::InsertAfterMarkerTool::new(root.clone()))?;
    registry.register(file_ops::ReplaceRangeTool::new(root.clone()))?;
    registry.register(web_app::ScaffoldWebAppTool::new(root.clone()))?;
    registry.register(web_app::ValidateWebAppTool::new(root.clone()))?;
    registry.register(web_app::RunUnitTestsTool::new(root.clone()))?;
    registry.register(web_app::PlanWebBuildTool::new())?;
    registry.register(echo::SandboxEchoPathTool::new(root))?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn registry_holds_the_full_catalog() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(&dir.path().canonicalize().unwrap()).unwrap();
        assert_eq!(registry.count(), 11);
        assert!(registry.contains("replace_range"));
        assert!(registry.contains("plan_web_build"));
    }

    #[test]
    fn every_stage_allowed_tool_exists_in_the_catalog() {
        let dir = TempDir::new().unwrap();
        let registry = build_registry(&dir.path().canonicalize().unwrap()).unwrap();
        for stage in crate::orchestrator::Stage::SEQUENCE {
            for tool in stage.allowed_tools() {
                assert!(registry.contains(tool), "{tool} missing from catalog");
            }
        }
    }
}
