//! Session store: index file, per-session directories, document I/O
//!
//! Layout under the sessions root:
//! - `index.json`: the [`SessionIndex`]
//! - `<workspace_id>/<session_id>/session.json`: one [`SessionDocument`]
//! - `<workspace_id>/<session_id>/screen-*.txt`, `browser-*.json`: captured artifacts
//!
//! Writes are atomic (temp file + fsync + rename) and assume a single writer.

use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use crate::persistence::{read_json_optional, write_json_atomic};
use crate::sessions::models::{SessionDocument, SessionEntry, SessionIndex, SESSIONS_VERSION};
use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// File name of a session document inside its session directory
pub const DOCUMENT_FILE: &str = "session.json";

/// Persistence port for captured sessions
pub trait SessionStore: Send + Sync {
    /// Load the index; a missing file yields an empty index at the current version
    fn load(&self) -> CmuxResult<SessionIndex>;

    fn save(&self, index: &SessionIndex) -> CmuxResult<()>;

    /// Directory session paths are relative to
    fn root(&self) -> &Path;

    /// Sessions of one workspace, newest first
    fn list(&self, workspace_id: &str) -> CmuxResult<Vec<SessionEntry>> {
        Ok(self.load()?.sessions(workspace_id).to_vec())
    }

    fn session_dir(&self, workspace_id: &str, session_id: &str) -> PathBuf {
        self.root().join(workspace_id).join(session_id)
    }

    /// Write a document into its session directory; returns its root-relative path
    fn write_document(&self, document: &SessionDocument) -> CmuxResult<String> {
        let relative = Path::new(&document.workspace_id)
            .join(&document.session_id)
            .join(DOCUMENT_FILE);
        write_json_atomic(&self.root().join(&relative), document).map_err(CmuxError::state_write)?;
        Ok(relative.to_string_lossy().into_owned())
    }

    /// Read the document an index entry points at
    fn read_document(&self, entry: &SessionEntry) -> CmuxResult<SessionDocument> {
        let path = resolve_relative(self.root(), &entry.path)?;
        let document: SessionDocument = read_json_optional(&path)
            .map_err(CmuxError::internal)?
            .ok_or_else(|| {
                CmuxError::new(
                    ErrorCode::SessionNotFound,
                    format!(
                        "session {} has no document at {}",
                        entry.session_id,
                        path.display()
                    ),
                )
            })?;

        if document.version != SESSIONS_VERSION {
            return Err(CmuxError::new(
                ErrorCode::InternalError,
                format!(
                    "unsupported session document version {} in {}",
                    document.version,
                    path.display()
                ),
            ));
        }
        Ok(document)
    }

    /// Remove a session from the index and delete its directory
    fn delete_session(&self, workspace_id: &str, session_id: &str) -> CmuxResult<SessionEntry> {
        let mut index = self.load()?;
        let entry = index.remove(workspace_id, session_id).ok_or_else(|| {
            CmuxError::new(
                ErrorCode::SessionNotFound,
                format!("workspace {workspace_id} has no session {session_id}"),
            )
        })?;
        self.save(&index)?;

        let dir = self.session_dir(workspace_id, session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!("removed {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CmuxError::state_write(format!(
                    "remove {}: {e}",
                    dir.display()
                )))
            }
        }

        info!("deleted session {session_id} of workspace {workspace_id}");
        Ok(entry)
    }
}

/// Join a stored relative path onto the root, refusing anything that escapes it
fn resolve_relative(root: &Path, relative: &str) -> CmuxResult<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(CmuxError::new(
            ErrorCode::InternalError,
            format!("invalid session path {relative:?}"),
        ));
    }
    Ok(root.join(rel))
}

/// JSON file-backed session store
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    root: PathBuf,
    index_path: PathBuf,
}

impl JsonSessionStore {
    /// Store rooted at `root` with its index at `<root>/index.json`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let index_path = root.join("index.json");
        Self { root, index_path }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            root: config.sessions_root(),
            index_path: config.sessions_index_file(),
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

impl SessionStore for JsonSessionStore {
    fn load(&self) -> CmuxResult<SessionIndex> {
        let mut index: SessionIndex = read_json_optional(&self.index_path)
            .map_err(CmuxError::internal)?
            .unwrap_or_default();

        if index.version != SESSIONS_VERSION {
            return Err(CmuxError::new(
                ErrorCode::InternalError,
                format!(
                    "unsupported session index version {} in {} (expected {})",
                    index.version,
                    self.index_path.display(),
                    SESSIONS_VERSION
                ),
            ));
        }

        index.normalize();
        Ok(index)
    }

    fn save(&self, index: &SessionIndex) -> CmuxResult<()> {
        write_json_atomic(&self.index_path, index).map_err(CmuxError::state_write)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::models::{PaneSnapshot, SurfaceSnapshot};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn document(session_id: &str) -> SessionDocument {
        SessionDocument {
            version: SESSIONS_VERSION,
            session_id: session_id.to_string(),
            workspace_id: "ws-1".to_string(),
            runtime_workspace_id: "rt-1".to_string(),
            label: Some("label".to_string()),
            created_at: Utc.with_ymd_and_hms(2026, 2, 6, 13, 12, 33).unwrap(),
            focus_pane_id: None,
            panes: vec![PaneSnapshot {
                pane_id: "p-1".to_string(),
                surfaces: vec![SurfaceSnapshot {
                    surface_id: "s-1".to_string(),
                    screen_path: Some("screen-s-1.txt".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn entry_for(doc: &SessionDocument, path: String) -> SessionEntry {
        SessionEntry {
            session_id: doc.session_id.clone(),
            label: doc.label.clone(),
            created_at: doc.created_at,
            path,
            pane_count: doc.panes.len(),
            surface_count: doc.surface_count(),
            browser_state_saved: doc.browser_state_saved(),
        }
    }

    #[test]
    fn test_load_missing_index_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path().join("cmux-sessions"));
        assert_eq!(store.load().unwrap(), SessionIndex::default());
        assert!(store.list("ws-1").unwrap().is_empty());
    }

    #[test]
    fn test_load_rejects_version_mismatch() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path());
        fs::write(store.index_path(), r#"{"version": 7, "workspaces": {}}"#).unwrap();
        assert_eq!(store.load().unwrap_err().code, ErrorCode::InternalError);
    }

    #[test]
    fn test_document_roundtrip_and_relative_path() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path());
        let doc = document("20260206T131233Z-label");

        let path = store.write_document(&doc).unwrap();
        assert_eq!(
            Path::new(&path),
            Path::new("ws-1/20260206T131233Z-label/session.json")
        );
        assert!(temp.path().join(&path).is_file());

        let read = store.read_document(&entry_for(&doc, path)).unwrap();
        assert_eq!(read, doc);
    }

    #[test]
    fn test_read_document_rejects_escaping_path() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path());
        let doc = document("s");
        let err = store
            .read_document(&entry_for(&doc, "../../etc/passwd".to_string()))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_read_document_missing_file() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path());
        let doc = document("s");
        let err = store
            .read_document(&entry_for(&doc, "ws-1/s/session.json".to_string()))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
    }

    #[test]
    fn test_delete_session_removes_entry_and_directory() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path());
        let doc = document("s-1");
        let path = store.write_document(&doc).unwrap();

        let mut index = store.load().unwrap();
        index.insert("ws-1", entry_for(&doc, path));
        store.save(&index).unwrap();

        let removed = store.delete_session("ws-1", "s-1").unwrap();
        assert_eq!(removed.session_id, "s-1");
        assert!(store.list("ws-1").unwrap().is_empty());
        assert!(!store.session_dir("ws-1", "s-1").exists());

        let err = store.delete_session("ws-1", "s-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::SessionNotFound);
    }

    #[test]
    fn test_delete_session_tolerates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let store = JsonSessionStore::new(temp.path());
        let doc = document("gone");

        let mut index = SessionIndex::default();
        index.insert("ws-1", entry_for(&doc, "ws-1/gone/session.json".to_string()));
        store.save(&index).unwrap();

        assert!(store.delete_session("ws-1", "gone").is_ok());
    }
}
