//! Session capture models (v1 schema)

use crate::persistence::null_as_default;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema version of both the session index and session documents
pub const SESSIONS_VERSION: u32 = 1;

/// Unique (per workspace) session identifier
/// Format: "20260206T131233Z-fix-api-timeout" (label suffix optional, "-2" etc. on collision)
pub type SessionId = String;

/// Index row describing one captured session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Session document path, relative to the sessions root
    pub path: String,
    pub pane_count: usize,
    pub surface_count: usize,
    pub browser_state_saved: bool,
}

/// Sessions captured for one workspace, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSessions {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sessions: Vec<SessionEntry>,
}

/// Session index file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIndex {
    pub version: u32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workspaces: BTreeMap<String, WorkspaceSessions>,
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self {
            version: SESSIONS_VERSION,
            workspaces: BTreeMap::new(),
        }
    }
}

/// Newest first by `created_at`, ties broken by `session_id` descending
fn sort_newest_first(sessions: &mut [SessionEntry]) {
    sessions.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.session_id.cmp(&a.session_id))
    });
}

impl SessionIndex {
    pub fn sessions(&self, workspace_id: &str) -> &[SessionEntry] {
        self.workspaces
            .get(workspace_id)
            .map(|w| w.sessions.as_slice())
            .unwrap_or(&[])
    }

    pub fn find(&self, workspace_id: &str, session_id: &str) -> Option<&SessionEntry> {
        self.sessions(workspace_id)
            .iter()
            .find(|s| s.session_id == session_id)
    }

    pub fn latest(&self, workspace_id: &str) -> Option<&SessionEntry> {
        self.sessions(workspace_id).first()
    }

    /// Insert (or replace by id) and keep the workspace's list ordered
    pub fn insert(&mut self, workspace_id: &str, entry: SessionEntry) {
        let sessions = &mut self
            .workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .sessions;
        sessions.retain(|s| s.session_id != entry.session_id);
        sessions.push(entry);
        sort_newest_first(sessions);
    }

    pub fn remove(&mut self, workspace_id: &str, session_id: &str) -> Option<SessionEntry> {
        let sessions = &mut self.workspaces.get_mut(workspace_id)?.sessions;
        let index = sessions.iter().position(|s| s.session_id == session_id)?;
        Some(sessions.remove(index))
    }

    /// Re-establish ordering after loading a file written elsewhere
    pub fn normalize(&mut self) {
        for workspace in self.workspaces.values_mut() {
            sort_newest_first(&mut workspace.sessions);
        }
    }
}

/// Captured surface inside a pane
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSnapshot {
    #[serde(default)]
    pub surface_id: String,
    #[serde(default)]
    pub surface_ref: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, rename = "type")]
    pub surface_type: String,
    #[serde(default)]
    pub selected: bool,
    /// Screen text file, relative to the session directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_path: Option<String>,
    /// Browser state file, relative to the session directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_state_path: Option<String>,
}

impl SurfaceSnapshot {
    /// Id when present, otherwise ref
    pub fn key(&self) -> &str {
        if self.surface_id.is_empty() {
            &self.surface_ref
        } else {
            &self.surface_id
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneSnapshot {
    #[serde(default)]
    pub pane_id: String,
    #[serde(default)]
    pub pane_ref: String,
    #[serde(default)]
    pub focused: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub surfaces: Vec<SurfaceSnapshot>,
}

impl PaneSnapshot {
    /// Id when present, otherwise ref
    pub fn key(&self) -> &str {
        if self.pane_id.is_empty() {
            &self.pane_ref
        } else {
            &self.pane_id
        }
    }
}

/// Full snapshot of one runtime session, stored beside its artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub version: u32,
    pub session_id: SessionId,
    pub workspace_id: String,
    pub runtime_workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_pane_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub panes: Vec<PaneSnapshot>,
}

impl SessionDocument {
    pub fn surface_count(&self) -> usize {
        self.panes.iter().map(|p| p.surfaces.len()).sum()
    }

    pub fn browser_state_saved(&self) -> bool {
        self.panes
            .iter()
            .flat_map(|p| &p.surfaces)
            .any(|s| s.browser_state_path.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(session_id: &str, secs: u32) -> SessionEntry {
        SessionEntry {
            session_id: session_id.to_string(),
            label: None,
            created_at: Utc.with_ymd_and_hms(2026, 2, 7, 10, 0, secs).unwrap(),
            path: format!("ws/{session_id}/session.json"),
            pane_count: 1,
            surface_count: 1,
            browser_state_saved: false,
        }
    }

    #[test]
    fn test_insert_orders_newest_first_with_id_tiebreak() {
        let mut index = SessionIndex::default();
        index.insert("ws", entry("a", 1));
        index.insert("ws", entry("c", 3));
        index.insert("ws", entry("b-2", 2));
        index.insert("ws", entry("b", 2));

        let ids: Vec<&str> = index
            .sessions("ws")
            .iter()
            .map(|s| s.session_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b-2", "b", "a"]);
        assert_eq!(index.latest("ws").unwrap().session_id, "c");
    }

    #[test]
    fn test_remove_and_find() {
        let mut index = SessionIndex::default();
        index.insert("ws", entry("a", 1));
        assert!(index.find("ws", "a").is_some());
        assert!(index.remove("ws", "a").is_some());
        assert!(index.find("ws", "a").is_none());
        assert!(index.remove("other", "a").is_none());
    }

    #[test]
    fn test_document_wire_format() {
        let doc = SessionDocument {
            version: SESSIONS_VERSION,
            session_id: "20260207T100000Z".to_string(),
            workspace_id: "ws".to_string(),
            runtime_workspace_id: "rt-1".to_string(),
            label: None,
            created_at: Utc.with_ymd_and_hms(2026, 2, 7, 10, 0, 0).unwrap(),
            focus_pane_id: Some("pane-1".to_string()),
            panes: vec![PaneSnapshot {
                pane_id: "pane-1".to_string(),
                pane_ref: "pane:1".to_string(),
                focused: true,
                surfaces: vec![SurfaceSnapshot {
                    surface_id: "s-1".to_string(),
                    surface_type: "browser".to_string(),
                    browser_state_path: Some("browser-s-1.json".to_string()),
                    ..Default::default()
                }],
            }],
        };

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["panes"][0]["surfaces"][0]["type"], "browser");
        assert!(json["panes"][0]["surfaces"][0].get("screen_path").is_none());
        assert!(json.get("label").is_none());
        assert_eq!(doc.surface_count(), 1);
        assert!(doc.browser_state_saved());
    }
}
