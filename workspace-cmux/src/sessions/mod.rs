//! Session capture and restore
//!
//! Save snapshots a workspace's runtime panes/surfaces to disk; resume replays
//! focus and browser state from a snapshot onto the mapped runtime workspace.

pub mod capture;
pub mod models;
pub mod naming;
pub mod resume;
pub mod store;

pub use capture::{SaveOutcome, SaveRequest, SessionCaptureEngine};
pub use models::{SessionDocument, SessionEntry, SessionIndex};
pub use resume::{ResumeOutcome, ResumeRequest, SessionResumeEngine};
pub use store::{JsonSessionStore, SessionStore};

use crate::cmux::client::{CancelToken, RuntimeClient};
use crate::cmux::mapping::{MappingFile, RuntimeEntry};
use crate::errors::{CmuxError, CmuxResult, ErrorCode};

/// The single runtime entry a workspace must have before save/resume
pub(crate) fn require_mapped_entry<'m>(
    mapping: &'m MappingFile,
    workspace_id: &str,
) -> CmuxResult<&'m RuntimeEntry> {
    match mapping.entries(workspace_id) {
        [entry] => Ok(entry),
        [] => Err(CmuxError::new(
            ErrorCode::CmuxNotMapped,
            format!("workspace {workspace_id} has no cmux workspace; open it first"),
        )),
        entries => Err(CmuxError::new(
            ErrorCode::CmuxNotMapped,
            format!(
                "workspace {workspace_id} maps to {} cmux workspaces; expected exactly one",
                entries.len()
            ),
        )),
    }
}

pub(crate) fn require_live(
    client: &dyn RuntimeClient,
    ctx: &CancelToken,
    runtime_id: &str,
) -> CmuxResult<()> {
    client
        .identify(ctx, Some(runtime_id), None)
        .map(|_| ())
        .map_err(|e| CmuxError::runtime(ErrorCode::CmuxRuntimeUnavailable, "identify", e))
}
