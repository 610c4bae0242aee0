//! Switch-target resolution
//!
//! Precedence, most specific first:
//! 1. workspace + handle
//! 2. workspace only
//! 3. handle only (searched across every workspace)
//! 4. nothing: interactive workspace selection
//!
//! Interactive choices go through an injected [`Selector`]; non-interactive
//! callers get a coded failure instead of a prompt.

use crate::clock::Clock;
use crate::cmux::client::{CancelToken, RuntimeClient};
use crate::cmux::mapping::{MappingFile, MappingStore, RuntimeEntry};
use crate::cmux::reconcile::ReconciliationEngine;
use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use anyhow::Result;
use log::info;
use serde::Serialize;

/// A workspace offered to the interactive selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceCandidate {
    pub workspace_id: String,
    pub entry_count: usize,
    /// Title of the most recently used entry
    pub title: String,
}

/// Interactive chooser; `Ok(None)` means the user backed out
pub trait Selector {
    fn select_workspace(&self, candidates: &[WorkspaceCandidate]) -> Result<Option<String>>;

    /// Returns an index into `entries`
    fn select_entry(&self, workspace_id: &str, entries: &[RuntimeEntry]) -> Result<Option<usize>>;
}

/// Selector for callers that can never prompt
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSelector;

impl Selector for NoSelector {
    fn select_workspace(&self, _candidates: &[WorkspaceCandidate]) -> Result<Option<String>> {
        Ok(None)
    }

    fn select_entry(
        &self,
        _workspace_id: &str,
        _entries: &[RuntimeEntry],
    ) -> Result<Option<usize>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchRequest<'r> {
    pub workspace_id: Option<&'r str>,
    pub handle: Option<&'r str>,
    pub non_interactive: bool,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a switch request to exactly one mapped entry
pub fn resolve(
    mapping: &MappingFile,
    request: &SwitchRequest<'_>,
    selector: &dyn Selector,
) -> CmuxResult<(String, RuntimeEntry)> {
    let workspace_id = non_blank(request.workspace_id);
    let handle = non_blank(request.handle);
    let non_interactive = request.non_interactive;

    match (workspace_id, handle) {
        (Some(workspace_id), Some(handle)) => {
            let entries = mapped_entries(mapping, workspace_id)?;
            let matches: Vec<RuntimeEntry> = entries
                .iter()
                .filter(|e| e.matches_handle(handle))
                .cloned()
                .collect();
            match matches.len() {
                1 => Ok(single(workspace_id, matches)),
                0 if non_interactive => Err(CmuxError::new(
                    ErrorCode::CmuxNotMapped,
                    format!("no cmux workspace {handle} mapped to {workspace_id}"),
                )),
                0 => resolve_entries(workspace_id, entries, false, selector),
                _ => resolve_entries(workspace_id, &matches, non_interactive, selector),
            }
        }
        (Some(workspace_id), None) => {
            let entries = mapped_entries(mapping, workspace_id)?;
            resolve_entries(workspace_id, entries, non_interactive, selector)
        }
        (None, Some(handle)) => {
            let mut matches: Vec<(String, RuntimeEntry)> = mapping
                .workspaces
                .iter()
                .flat_map(|(id, ws)| {
                    ws.entries
                        .iter()
                        .filter(|e| e.matches_handle(handle))
                        .map(move |e| (id.clone(), e.clone()))
                })
                .collect();
            if matches.len() == 1 {
                return Ok(matches.remove(0));
            }
            if non_interactive {
                return Err(if matches.is_empty() {
                    CmuxError::new(
                        ErrorCode::CmuxNotMapped,
                        format!("no mapped cmux workspace matches {handle}"),
                    )
                } else {
                    CmuxError::new(
                        ErrorCode::CmuxAmbiguousTarget,
                        format!(
                            "{handle} matches {} mapped workspaces; pass a workspace id",
                            matches.len()
                        ),
                    )
                });
            }
            // Picking among cross-workspace matches is not supported; fall back to a full pick
            select_interactively(mapping, selector)
        }
        (None, None) => {
            if non_interactive {
                return Err(CmuxError::new(
                    ErrorCode::NonInteractiveSelectionRequired,
                    "a workspace id or handle is required in non-interactive mode",
                ));
            }
            select_interactively(mapping, selector)
        }
    }
}

fn mapped_entries<'m>(
    mapping: &'m MappingFile,
    workspace_id: &str,
) -> CmuxResult<&'m [RuntimeEntry]> {
    let entries = mapping.entries(workspace_id);
    if entries.is_empty() {
        return Err(CmuxError::new(
            ErrorCode::CmuxNotMapped,
            format!("workspace {workspace_id} has no cmux workspace; open it first"),
        ));
    }
    Ok(entries)
}

fn single(workspace_id: &str, mut entries: Vec<RuntimeEntry>) -> (String, RuntimeEntry) {
    (workspace_id.to_string(), entries.remove(0))
}

/// Pick one entry of a workspace: automatic if there is exactly one
fn resolve_entries(
    workspace_id: &str,
    entries: &[RuntimeEntry],
    non_interactive: bool,
    selector: &dyn Selector,
) -> CmuxResult<(String, RuntimeEntry)> {
    match entries.len() {
        0 => Err(CmuxError::new(
            ErrorCode::CmuxNotMapped,
            format!("workspace {workspace_id} has no cmux workspace"),
        )),
        1 => Ok(single(workspace_id, entries.to_vec())),
        n if non_interactive => Err(CmuxError::new(
            ErrorCode::CmuxAmbiguousTarget,
            format!("workspace {workspace_id} has {n} cmux workspaces; pass a handle"),
        )),
        _ => {
            let index = selector
                .select_entry(workspace_id, entries)
                .map_err(CmuxError::internal)?
                .ok_or_else(|| CmuxError::invalid_argument("selection cancelled"))?;
            let entry = entries.get(index).cloned().ok_or_else(|| {
                CmuxError::internal(format!("selector returned out-of-range index {index}"))
            })?;
            Ok((workspace_id.to_string(), entry))
        }
    }
}

fn select_interactively(
    mapping: &MappingFile,
    selector: &dyn Selector,
) -> CmuxResult<(String, RuntimeEntry)> {
    let candidates: Vec<WorkspaceCandidate> = mapping
        .workspaces
        .iter()
        .filter(|(_, ws)| !ws.entries.is_empty())
        .map(|(id, ws)| WorkspaceCandidate {
            workspace_id: id.clone(),
            entry_count: ws.entries.len(),
            title: ws
                .entries
                .iter()
                .max_by_key(|e| e.last_used_at)
                .map(|e| e.title_snapshot.clone())
                .unwrap_or_default(),
        })
        .collect();

    let workspace_id = match candidates.len() {
        0 => {
            return Err(CmuxError::new(
                ErrorCode::CmuxNotMapped,
                "no workspace has a cmux workspace yet",
            ));
        }
        1 => candidates[0].workspace_id.clone(),
        _ => selector
            .select_workspace(&candidates)
            .map_err(CmuxError::internal)?
            .ok_or_else(|| CmuxError::invalid_argument("selection cancelled"))?,
    };

    let entries = mapped_entries(mapping, &workspace_id)?;
    resolve_entries(&workspace_id, entries, false, selector)
}

/// Outcome of a completed switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchOutcome {
    pub workspace_id: String,
    pub runtime_id: String,
    pub handle: String,
    pub title: String,
    pub pruned: usize,
    pub warnings: Vec<String>,
}

/// Reconcile, resolve, select and persist
pub struct SwitchService<'a> {
    client: &'a dyn RuntimeClient,
    store: &'a dyn MappingStore,
    clock: &'a dyn Clock,
}

impl<'a> SwitchService<'a> {
    pub fn new(
        client: &'a dyn RuntimeClient,
        store: &'a dyn MappingStore,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            client,
            store,
            clock,
        }
    }

    pub fn switch(
        &self,
        ctx: &CancelToken,
        mapping: &mut MappingFile,
        request: &SwitchRequest<'_>,
        selector: &dyn Selector,
    ) -> CmuxResult<SwitchOutcome> {
        let view = ReconciliationEngine::new(self.client, self.store).sync(ctx, mapping, true)?;

        let (workspace_id, entry) = resolve(mapping, request, selector)?;

        self.client
            .select_workspace(ctx, &entry.runtime_id)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxSelectFailed, "workspace.select", e))?;

        mapping.touch(&workspace_id, &entry.runtime_id, self.clock.now_utc());
        self.store.save(mapping)?;

        info!(
            "switched to workspace {workspace_id} (cmux {} {})",
            entry.runtime_id,
            entry.handle()
        );

        Ok(SwitchOutcome {
            handle: entry.handle(),
            workspace_id,
            runtime_id: entry.runtime_id,
            title: entry.title_snapshot,
            pruned: view.pruned,
            warnings: view.warnings,
        })
    }
}
