//! Resolution of logical workspace directories
//!
//! Logical workspaces are owned by a separate lifecycle subsystem; this crate
//! only checks whether a workspace id currently has an active or archived
//! directory on disk.

use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use std::path::PathBuf;

/// Where a logical workspace currently lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceLocation {
    Active(PathBuf),
    Archived(PathBuf),
    Missing,
}

/// Looks up logical workspace directories by id
pub trait WorkspaceLocator: Send + Sync {
    fn locate(&self, workspace_id: &str) -> WorkspaceLocation;
}

/// Locator over an `<root>/<id>` (active) and `<archive>/<id>` (archived) layout
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    active_root: PathBuf,
    archive_root: PathBuf,
}

impl DirectoryLocator {
    pub fn new(active_root: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            active_root: active_root.into(),
            archive_root: archive_root.into(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.workspaces_root.clone(), config.archive_root())
    }
}

impl WorkspaceLocator for DirectoryLocator {
    fn locate(&self, workspace_id: &str) -> WorkspaceLocation {
        let active = self.active_root.join(workspace_id);
        if active.is_dir() {
            return WorkspaceLocation::Active(active);
        }
        let archived = self.archive_root.join(workspace_id);
        if archived.is_dir() {
            return WorkspaceLocation::Archived(archived);
        }
        WorkspaceLocation::Missing
    }
}

/// Reject ids that are empty or could escape the workspace roots
pub fn validate_workspace_id(workspace_id: &str) -> CmuxResult<()> {
    let trimmed = workspace_id.trim();
    if trimmed.is_empty() {
        return Err(CmuxError::invalid_argument("workspace id is required"));
    }
    if trimmed != workspace_id
        || workspace_id == "."
        || workspace_id == ".."
        || workspace_id.contains(['/', '\\'])
    {
        return Err(CmuxError::invalid_argument(format!(
            "invalid workspace id: {workspace_id:?}"
        )));
    }
    Ok(())
}

/// Resolve a workspace id to its active directory
///
/// Archived workspaces fail with `workspace_not_active`, unknown ones with `workspace_not_found`.
pub fn require_active(locator: &dyn WorkspaceLocator, workspace_id: &str) -> CmuxResult<PathBuf> {
    validate_workspace_id(workspace_id)?;
    match locator.locate(workspace_id) {
        WorkspaceLocation::Active(path) => Ok(path),
        WorkspaceLocation::Archived(_) => Err(CmuxError::new(
            ErrorCode::WorkspaceNotActive,
            format!("workspace {workspace_id} is archived"),
        )),
        WorkspaceLocation::Missing => Err(CmuxError::new(
            ErrorCode::WorkspaceNotFound,
            format!("workspace {workspace_id} not found"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout() -> (TempDir, DirectoryLocator) {
        let temp = TempDir::new().unwrap();
        let active = temp.path().join("workspaces");
        let archive = active.join(".archive");
        std::fs::create_dir_all(active.join("ws-live")).unwrap();
        std::fs::create_dir_all(archive.join("ws-old")).unwrap();
        let locator = DirectoryLocator::new(active, archive);
        (temp, locator)
    }

    #[test]
    fn test_require_active_classifies_locations() {
        let (_temp, locator) = layout();

        assert!(require_active(&locator, "ws-live").is_ok());
        assert_eq!(
            require_active(&locator, "ws-old").unwrap_err().code,
            ErrorCode::WorkspaceNotActive
        );
        assert_eq!(
            require_active(&locator, "ws-none").unwrap_err().code,
            ErrorCode::WorkspaceNotFound
        );
    }

    #[test]
    fn test_rejects_path_like_ids() {
        for bad in ["", "  ", "..", "a/b", "a\\b", " padded"] {
            assert_eq!(
                validate_workspace_id(bad).unwrap_err().code,
                ErrorCode::InvalidArgument,
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_workspace_id("PROJ-123").is_ok());
    }
}
