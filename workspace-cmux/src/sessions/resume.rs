// Resume: replay a captured session onto the workspace's mapped runtime session
// Selecting the runtime workspace is the only fatal step; focus and browser loads are
// best-effort and each is attempted regardless of the others

use crate::cmux::client::{CancelToken, RuntimeClient};
use crate::cmux::mapping::MappingStore;
use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use crate::sessions::models::{SessionDocument, SessionEntry};
use crate::sessions::store::SessionStore;
use crate::sessions::{require_live, require_mapped_entry};
use crate::workspace_paths::{require_active, WorkspaceLocator};
use log::{info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeRequest {
    pub workspace_id: String,
    /// Newest session when absent
    pub session_id: Option<String>,
    pub skip_browser: bool,
    /// Report `session_restore_partial` when any step produced a warning
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResumeOutcome {
    pub workspace_id: String,
    pub session_id: String,
    pub runtime_workspace_id: String,
    pub focus_restored: bool,
    pub browser_restored: bool,
    pub warnings: Vec<String>,
    /// `Some(SessionRestorePartial)` for a strict resume that produced warnings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl ResumeOutcome {
    pub fn is_partial(&self) -> bool {
        self.code == Some(ErrorCode::SessionRestorePartial)
    }
}

pub struct SessionResumeEngine<'a> {
    client: &'a dyn RuntimeClient,
    mappings: &'a dyn MappingStore,
    sessions: &'a dyn SessionStore,
    locator: &'a dyn WorkspaceLocator,
}

impl<'a> SessionResumeEngine<'a> {
    pub fn new(
        client: &'a dyn RuntimeClient,
        mappings: &'a dyn MappingStore,
        sessions: &'a dyn SessionStore,
        locator: &'a dyn WorkspaceLocator,
    ) -> Self {
        Self {
            client,
            mappings,
            sessions,
            locator,
        }
    }

    pub fn resume(&self, ctx: &CancelToken, request: &ResumeRequest) -> CmuxResult<ResumeOutcome> {
        let workspace_id = request.workspace_id.as_str();
        require_active(self.locator, workspace_id)?;
        let mapping = self.mappings.load()?;
        let runtime_id = require_mapped_entry(&mapping, workspace_id)?.runtime_id.clone();

        let entry = self.find_session(workspace_id, request.session_id.as_deref())?;
        let document = self.sessions.read_document(&entry)?;
        let session_dir = self
            .sessions
            .root()
            .join(&entry.path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.sessions.session_dir(workspace_id, &entry.session_id));

        require_live(self.client, ctx, &runtime_id)?;
        self.client
            .select_workspace(ctx, &runtime_id)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxSelectFailed, "workspace.select", e))?;

        let mut warnings = Vec::new();
        let focus_restored = self.restore_focus(ctx, &runtime_id, &document, &mut warnings);
        let browser_restored = if request.skip_browser {
            false
        } else {
            self.restore_browsers(ctx, &runtime_id, &document, &session_dir, &mut warnings)
        };

        for warning in &warnings {
            warn!("resume {workspace_id}/{}: {warning}", entry.session_id);
        }
        let code = (request.strict && !warnings.is_empty())
            .then_some(ErrorCode::SessionRestorePartial);
        info!(
            "resumed session {} of workspace {workspace_id} (focus: {focus_restored}, browser: {browser_restored}, warnings: {})",
            entry.session_id,
            warnings.len()
        );

        Ok(ResumeOutcome {
            workspace_id: workspace_id.to_string(),
            session_id: entry.session_id,
            runtime_workspace_id: runtime_id,
            focus_restored,
            browser_restored,
            warnings,
            code,
        })
    }

    fn find_session(
        &self,
        workspace_id: &str,
        session_id: Option<&str>,
    ) -> CmuxResult<SessionEntry> {
        let index = self.sessions.load()?;
        let found = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => index.find(workspace_id, id),
            None => index.latest(workspace_id),
        };
        found.cloned().ok_or_else(|| {
            CmuxError::new(
                ErrorCode::SessionNotFound,
                match session_id {
                    Some(id) => format!("workspace {workspace_id} has no session {id}"),
                    None => format!("workspace {workspace_id} has no saved sessions"),
                },
            )
        })
    }

    fn restore_focus(
        &self,
        ctx: &CancelToken,
        runtime_id: &str,
        document: &SessionDocument,
        warnings: &mut Vec<String>,
    ) -> bool {
        let Some(pane) = document.focus_pane_id.as_deref() else {
            return false;
        };
        match self.client.focus_pane(ctx, pane, runtime_id) {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("pane {pane}: pane.focus: {e:#}"));
                false
            }
        }
    }

    /// True when at least one browser surface was restored
    fn restore_browsers(
        &self,
        ctx: &CancelToken,
        runtime_id: &str,
        document: &SessionDocument,
        session_dir: &Path,
        warnings: &mut Vec<String>,
    ) -> bool {
        let mut restored = false;

        for (pane, surface) in document
            .panes
            .iter()
            .flat_map(|p| p.surfaces.iter().map(move |s| (p, s)))
        {
            let Some(relative) = surface.browser_state_path.as_deref() else {
                continue;
            };
            let key = surface.key();
            if key.is_empty() {
                warnings.push(format!(
                    "pane {}: browser surface without id or ref; state not restored",
                    pane.key()
                ));
                continue;
            }

            let path: PathBuf = session_dir.join(relative);
            if !path.is_file() {
                warnings.push(format!(
                    "surface {key}: browser state file missing: {}",
                    path.display()
                ));
                continue;
            }

            match self.client.browser_state_load(ctx, runtime_id, key, &path) {
                Ok(()) => restored = true,
                Err(e) => warnings.push(format!("surface {key}: browser.state.load: {e:#}")),
            }
        }

        restored
    }
}
