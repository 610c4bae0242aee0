// Workspace <-> runtime mapping persisted to <state_dir>/cmux-mapping.json
// Holds the per-workspace ordinal counter and the runtime entries bound to it

use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use crate::persistence::{null_as_default, read_json_optional, write_json_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Current on-disk schema version
pub const MAPPING_VERSION: u32 = 1;

/// Prefix of the synthetic handle built from an entry's ordinal
pub const HANDLE_PREFIX: &str = "workspace:";

/// Binding between a logical workspace and one runtime session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    /// Opaque handle assigned by the runtime
    #[serde(rename = "cmux_workspace_id")]
    pub runtime_id: String,
    /// Assigned at creation, never changes
    pub ordinal: u64,
    pub title_snapshot: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

impl RuntimeEntry {
    /// Synthetic handle: `workspace:<ordinal>`
    pub fn handle(&self) -> String {
        format!("{HANDLE_PREFIX}{}", self.ordinal)
    }

    /// Exact runtime-id match or synthetic handle match
    pub fn matches_handle(&self, handle: &str) -> bool {
        self.runtime_id == handle || self.handle() == handle
    }
}

fn first_ordinal() -> u64 {
    1
}

/// Mapping state for one logical workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMapping {
    #[serde(default = "first_ordinal")]
    pub next_ordinal: u64,
    /// At most one live entry under the current open policy
    #[serde(default, deserialize_with = "null_as_default")]
    pub entries: Vec<RuntimeEntry>,
}

impl Default for WorkspaceMapping {
    fn default() -> Self {
        Self {
            next_ordinal: first_ordinal(),
            entries: Vec::new(),
        }
    }
}

/// Whole mapping file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingFile {
    pub version: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workspaces: BTreeMap<String, WorkspaceMapping>,
}

impl Default for MappingFile {
    fn default() -> Self {
        Self {
            version: MAPPING_VERSION,
            workspaces: BTreeMap::new(),
        }
    }
}

impl MappingFile {
    /// Entries bound to a workspace (empty if unmapped)
    pub fn entries(&self, workspace_id: &str) -> &[RuntimeEntry] {
        self.workspaces
            .get(workspace_id)
            .map(|m| m.entries.as_slice())
            .unwrap_or(&[])
    }

    /// Mapping for a workspace, created with defaults if absent
    pub fn workspace_mut(&mut self, workspace_id: &str) -> &mut WorkspaceMapping {
        self.workspaces.entry(workspace_id.to_string()).or_default()
    }

    /// Find a mutable entry by runtime id
    pub fn entry_mut(&mut self, workspace_id: &str, runtime_id: &str) -> Option<&mut RuntimeEntry> {
        self.workspaces
            .get_mut(workspace_id)?
            .entries
            .iter_mut()
            .find(|e| e.runtime_id == runtime_id)
    }

    /// Refresh `last_used_at` on an entry; returns false if it no longer exists
    pub fn touch(&mut self, workspace_id: &str, runtime_id: &str, now: DateTime<Utc>) -> bool {
        match self.entry_mut(workspace_id, runtime_id) {
            Some(entry) => {
                entry.last_used_at = now;
                true
            }
            None => false,
        }
    }

    /// Every distinct runtime id across all workspaces, in stable order
    pub fn runtime_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .workspaces
            .values()
            .flat_map(|m| m.entries.iter().map(|e| e.runtime_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Drop entries whose runtime id fails `keep`; returns how many were removed
    pub fn retain_entries(&mut self, mut keep: impl FnMut(&RuntimeEntry) -> bool) -> usize {
        let mut removed = 0;
        for mapping in self.workspaces.values_mut() {
            let before = mapping.entries.len();
            mapping.entries.retain(|e| keep(e));
            removed += before - mapping.entries.len();
        }
        removed
    }
}

/// Allocate the next ordinal for a workspace
///
/// An absent workspace starts at 1. The counter is incremented past the returned value.
pub fn allocate_ordinal(mapping: &mut MappingFile, workspace_id: &str) -> u64 {
    let workspace = mapping.workspace_mut(workspace_id);
    if workspace.next_ordinal == 0 {
        workspace.next_ordinal = first_ordinal();
    }
    let ordinal = workspace.next_ordinal;
    workspace.next_ordinal += 1;
    ordinal
}

/// Canonical runtime title for a workspace
///
/// Deterministic so repeated renames are idempotent: `"<id> #<n>"` or `"<id>: <title> #<n>"`.
pub fn format_workspace_title(
    workspace_id: &str,
    user_title: Option<&str>,
    ordinal: u64,
) -> String {
    match user_title.map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) => format!("{workspace_id}: {title} #{ordinal}"),
        None => format!("{workspace_id} #{ordinal}"),
    }
}

/// Persistence port for the mapping file
pub trait MappingStore: Send + Sync {
    /// Load the mapping; a missing file yields an empty mapping at the current version
    fn load(&self) -> CmuxResult<MappingFile>;

    /// Persist the mapping atomically
    fn save(&self, mapping: &MappingFile) -> CmuxResult<()>;
}

/// JSON file-backed mapping store
#[derive(Debug, Clone)]
pub struct JsonMappingStore {
    path: PathBuf,
}

impl JsonMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MappingStore for JsonMappingStore {
    fn load(&self) -> CmuxResult<MappingFile> {
        let mapping: MappingFile = read_json_optional(&self.path)
            .map_err(CmuxError::internal)?
            .unwrap_or_default();

        if mapping.version != MAPPING_VERSION {
            return Err(CmuxError::new(
                ErrorCode::InternalError,
                format!(
                    "unsupported mapping version {} in {} (expected {})",
                    mapping.version,
                    self.path.display(),
                    MAPPING_VERSION
                ),
            ));
        }

        Ok(mapping)
    }

    fn save(&self, mapping: &MappingFile) -> CmuxResult<()> {
        write_json_atomic(&self.path, mapping).map_err(CmuxError::state_write)
    }
}
