//! Save: capture a workspace's runtime panes, surfaces, screens and browser state
//!
//! Only the preconditions are fatal. Once capture starts, a pane whose surfaces
//! cannot be listed is skipped and a surface whose screen or browser state
//! cannot be captured keeps its structural entry; both are reported as warnings.

use crate::clock::Clock;
use crate::cmux::client::{CancelToken, Pane, RuntimeClient, Surface};
use crate::cmux::mapping::MappingStore;
use crate::errors::{CmuxError, CmuxResult, ErrorCode};
use crate::persistence::atomic_write;
use crate::sessions::models::{
    PaneSnapshot, SessionDocument, SessionEntry, SurfaceSnapshot, SESSIONS_VERSION,
};
use crate::sessions::naming::{session_id, unique_file_component};
use crate::sessions::store::SessionStore;
use crate::sessions::{require_live, require_mapped_entry};
use crate::workspace_paths::{require_active, WorkspaceLocator};
use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub workspace_id: String,
    pub label: Option<String>,
    /// Screen lines read per surface (scrollback included)
    pub screen_lines: u32,
    /// Also persist state of browser surfaces
    pub include_browser: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveOutcome {
    pub workspace_id: String,
    pub session_id: String,
    pub runtime_workspace_id: String,
    /// Absolute path of the written session document
    pub document_path: PathBuf,
    pub pane_count: usize,
    pub surface_count: usize,
    pub browser_state_saved: bool,
    pub warnings: Vec<String>,
}

pub struct SessionCaptureEngine<'a> {
    client: &'a dyn RuntimeClient,
    mappings: &'a dyn MappingStore,
    sessions: &'a dyn SessionStore,
    locator: &'a dyn WorkspaceLocator,
    clock: &'a dyn Clock,
}

impl<'a> SessionCaptureEngine<'a> {
    pub fn new(
        client: &'a dyn RuntimeClient,
        mappings: &'a dyn MappingStore,
        sessions: &'a dyn SessionStore,
        locator: &'a dyn WorkspaceLocator,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            client,
            mappings,
            sessions,
            locator,
            clock,
        }
    }

    pub fn save(&self, ctx: &CancelToken, request: &SaveRequest) -> CmuxResult<SaveOutcome> {
        let workspace_id = request.workspace_id.as_str();
        require_active(self.locator, workspace_id)?;
        let mapping = self.mappings.load()?;
        let entry = require_mapped_entry(&mapping, workspace_id)?;
        let runtime_id = entry.runtime_id.as_str();
        require_live(self.client, ctx, runtime_id)?;

        let mut index = self.sessions.load()?;
        let created_at = self.clock.now_utc();
        let label = request
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        let existing: HashSet<&str> = index
            .sessions(workspace_id)
            .iter()
            .map(|s| s.session_id.as_str())
            .collect();
        let session_id = session_id(created_at, label.as_deref(), &existing);

        let panes = self
            .client
            .list_panes(ctx, runtime_id)
            .map_err(|e| CmuxError::runtime(ErrorCode::CmuxListFailed, "pane.list", e))?;

        let session_dir = self.sessions.session_dir(workspace_id, &session_id);
        std::fs::create_dir_all(&session_dir).map_err(|e| {
            CmuxError::state_write(format!("create {}: {e}", session_dir.display()))
        })?;

        let mut scratch = Scratch {
            dir: &session_dir,
            warnings: Vec::new(),
            file_keys: HashSet::new(),
        };
        let mut snapshots = Vec::with_capacity(panes.len());
        for pane in &panes {
            if let Some(snapshot) =
                self.capture_pane(ctx, runtime_id, pane, request, &mut scratch)
            {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.key().cmp(b.key()));
        let warnings = scratch.warnings;

        let focus_pane_id = snapshots
            .iter()
            .find(|p| p.focused && !p.key().is_empty())
            .map(|p| p.key().to_string());

        let document = SessionDocument {
            version: SESSIONS_VERSION,
            session_id: session_id.clone(),
            workspace_id: workspace_id.to_string(),
            runtime_workspace_id: runtime_id.to_string(),
            label: label.clone(),
            created_at,
            focus_pane_id,
            panes: snapshots,
        };

        let stored = self.sessions.write_document(&document).and_then(|relative| {
            let entry = SessionEntry {
                session_id: session_id.clone(),
                label,
                created_at,
                path: relative,
                pane_count: document.panes.len(),
                surface_count: document.surface_count(),
                browser_state_saved: document.browser_state_saved(),
            };
            index.insert(workspace_id, entry.clone());
            self.sessions.save(&index)?;
            Ok(entry)
        });
        let index_entry = match stored {
            Ok(entry) => entry,
            Err(e) => {
                // Nothing references the directory unless the index was saved
                if let Err(cleanup) = std::fs::remove_dir_all(&session_dir) {
                    warn!("failed to remove {}: {cleanup}", session_dir.display());
                }
                return Err(e);
            }
        };

        for warning in &warnings {
            warn!("save {workspace_id}/{session_id}: {warning}");
        }
        info!(
            "saved session {session_id} for workspace {workspace_id}: {} pane(s), {} surface(s)",
            index_entry.pane_count, index_entry.surface_count
        );

        Ok(SaveOutcome {
            workspace_id: workspace_id.to_string(),
            session_id,
            runtime_workspace_id: runtime_id.to_string(),
            document_path: self.sessions.root().join(&index_entry.path),
            pane_count: index_entry.pane_count,
            surface_count: index_entry.surface_count,
            browser_state_saved: index_entry.browser_state_saved,
            warnings,
        })
    }

    /// `None` when the pane has to be skipped
    fn capture_pane(
        &self,
        ctx: &CancelToken,
        runtime_id: &str,
        pane: &Pane,
        request: &SaveRequest,
        scratch: &mut Scratch<'_>,
    ) -> Option<PaneSnapshot> {
        let pane_key = pane.key();
        if pane_key.is_empty() {
            scratch
                .warnings
                .push("pane without id or ref skipped".to_string());
            return None;
        }

        let surfaces = match self.client.list_pane_surfaces(ctx, runtime_id, pane_key) {
            Ok(surfaces) => surfaces,
            Err(e) => {
                scratch
                    .warnings
                    .push(format!("pane {pane_key}: surface.list: {e:#}"));
                return None;
            }
        };

        let mut snapshots = Vec::with_capacity(surfaces.len());
        for surface in &surfaces {
            let snapshot =
                self.capture_surface(ctx, runtime_id, pane_key, surface, request, scratch);
            snapshots.push(snapshot);
        }

        Some(PaneSnapshot {
            pane_id: pane.id.clone(),
            pane_ref: pane.pane_ref.clone(),
            focused: pane.focused,
            surfaces: snapshots,
        })
    }

    fn capture_surface(
        &self,
        ctx: &CancelToken,
        runtime_id: &str,
        pane_key: &str,
        surface: &Surface,
        request: &SaveRequest,
        scratch: &mut Scratch<'_>,
    ) -> SurfaceSnapshot {
        let mut snapshot = SurfaceSnapshot {
            surface_id: surface.id.clone(),
            surface_ref: surface.surface_ref.clone(),
            title: surface.title.clone(),
            surface_type: surface.surface_type.clone(),
            selected: surface.selected,
            screen_path: None,
            browser_state_path: None,
        };

        let key = surface.key();
        if key.is_empty() {
            scratch.warnings.push(format!(
                "pane {pane_key}: surface without id or ref; nothing captured"
            ));
            return snapshot;
        }
        let file_key = unique_file_component(key, &mut scratch.file_keys);

        match self
            .client
            .read_screen(ctx, runtime_id, key, request.screen_lines, true)
        {
            Ok(text) => {
                let name = format!("screen-{file_key}.txt");
                match atomic_write(&scratch.dir.join(&name), text.as_bytes()) {
                    Ok(()) => snapshot.screen_path = Some(name),
                    Err(e) => scratch
                        .warnings
                        .push(format!("surface {key}: write screen: {e:#}")),
                }
            }
            Err(e) => scratch
                .warnings
                .push(format!("surface {key}: read-screen: {e:#}")),
        }

        if request.include_browser && surface.is_browser() {
            let name = format!("browser-{file_key}.json");
            match self
                .client
                .browser_state_save(ctx, runtime_id, key, &scratch.dir.join(&name))
            {
                Ok(()) => snapshot.browser_state_path = Some(name),
                Err(e) => scratch
                    .warnings
                    .push(format!("surface {key}: browser.state.save: {e:#}")),
            }
        }

        snapshot
    }
}

/// State shared by every pane and surface of one save
struct Scratch<'d> {
    dir: &'d Path,
    warnings: Vec<String>,
    /// Artifact file keys already handed out in `dir`
    file_keys: HashSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::cmux::mapping::{MappingFile, RuntimeEntry};
    use crate::sessions::models::SessionIndex;
    use crate::sessions::store::JsonSessionStore;
    use crate::test_support::{FakeRuntime, MemoryMappingStore};
    use crate::workspace_paths::DirectoryLocator;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        runtime: FakeRuntime,
        mappings: MemoryMappingStore,
        sessions: JsonSessionStore,
        locator: DirectoryLocator,
        clock: FixedClock,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let active = temp.path().join("workspaces");
        std::fs::create_dir_all(active.join("ws-1")).unwrap();

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 2, 6, 13, 12, 33).unwrap());
        let mut mapping = MappingFile::default();
        mapping.workspace_mut("ws-1").entries.push(RuntimeEntry {
            runtime_id: "rt-1".to_string(),
            ordinal: 1,
            title_snapshot: "ws-1 #1".to_string(),
            created_at: clock.0,
            last_used_at: clock.0,
        });

        let runtime = FakeRuntime::new();
        runtime.add_workspace("rt-1");
        runtime.set_panes(
            "rt-1",
            vec![
                Pane {
                    id: "p-2".to_string(),
                    pane_ref: "pane:2".to_string(),
                    focused: true,
                },
                Pane {
                    id: "p-1".to_string(),
                    pane_ref: "pane:1".to_string(),
                    focused: false,
                },
            ],
        );
        runtime.set_surfaces(
            "p-1",
            vec![Surface {
                id: "s-1".to_string(),
                surface_type: "terminal".to_string(),
                ..Default::default()
            }],
        );
        runtime.set_surfaces(
            "p-2",
            vec![Surface {
                id: "s-2".to_string(),
                surface_type: "browser".to_string(),
                ..Default::default()
            }],
        );
        runtime.set_screen("s-1", "$ cargo test\n");

        Fixture {
            sessions: JsonSessionStore::new(temp.path().join("state").join("cmux-sessions")),
            locator: DirectoryLocator::new(active, temp.path().join("workspaces/.archive")),
            mappings: MemoryMappingStore::with(mapping),
            _temp: temp,
            runtime,
            clock,
        }
    }

    fn request(label: Option<&str>) -> SaveRequest {
        SaveRequest {
            workspace_id: "ws-1".to_string(),
            label: label.map(str::to_string),
            screen_lines: 200,
            include_browser: true,
        }
    }

    #[test]
    fn test_save_writes_document_artifacts_and_index() {
        let f = fixture();
        let client = f.runtime.client();
        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &f.sessions, &f.locator, &f.clock);

        let outcome = engine
            .save(&CancelToken::new(), &request(Some("Fix API timeout")))
            .unwrap();

        assert_eq!(outcome.session_id, "20260206T131233Z-fix-api-timeout");
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.pane_count, 2);
        assert_eq!(outcome.surface_count, 2);
        assert!(outcome.browser_state_saved);

        let listed = f.sessions.list("ws-1").unwrap();
        let document = f.sessions.read_document(&listed[0]).unwrap();
        // Sorted by pane key regardless of enumeration order
        assert_eq!(document.panes[0].pane_id, "p-1");
        assert_eq!(document.focus_pane_id.as_deref(), Some("p-2"));

        let dir = outcome.document_path.parent().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("screen-s-1.txt")).unwrap(),
            "$ cargo test\n"
        );
        assert!(dir.join("browser-s-2.json").is_file());
        assert_eq!(
            document.panes[1].surfaces[0].browser_state_path.as_deref(),
            Some("browser-s-2.json")
        );
    }

    #[test]
    fn test_browser_state_skipped_unless_requested() {
        let f = fixture();
        let client = f.runtime.client();
        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &f.sessions, &f.locator, &f.clock);

        let mut req = request(None);
        req.include_browser = false;
        let outcome = engine.save(&CancelToken::new(), &req).unwrap();

        assert_eq!(outcome.session_id, "20260206T131233Z");
        assert!(!outcome.browser_state_saved);
    }

    #[test]
    fn test_surface_failures_become_warnings() {
        let f = fixture();
        f.runtime.fail_screen("s-1");
        f.runtime.fail_browser_save("s-2");
        f.runtime.set_surfaces(
            "p-1",
            vec![
                Surface {
                    id: "s-1".to_string(),
                    ..Default::default()
                },
                Surface::default(),
            ],
        );
        let client = f.runtime.client();
        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &f.sessions, &f.locator, &f.clock);

        let outcome = engine.save(&CancelToken::new(), &request(None)).unwrap();

        assert_eq!(outcome.warnings.len(), 3);
        // The id-less surface is still recorded
        assert_eq!(outcome.surface_count, 3);
        assert!(!outcome.browser_state_saved);
    }

    #[test]
    fn test_preconditions() {
        let f = fixture();
        let client = f.runtime.client();

        let unmapped = MemoryMappingStore::default();
        let engine =
            SessionCaptureEngine::new(&client, &unmapped, &f.sessions, &f.locator, &f.clock);
        let err = engine.save(&CancelToken::new(), &request(None)).unwrap_err();
        assert_eq!(err.code, ErrorCode::CmuxNotMapped);

        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &f.sessions, &f.locator, &f.clock);
        let mut req = request(None);
        req.workspace_id = "ws-missing".to_string();
        let err = engine.save(&CancelToken::new(), &req).unwrap_err();
        assert_eq!(err.code, ErrorCode::WorkspaceNotFound);

        f.runtime.remove_workspace("rt-1");
        let err = engine.save(&CancelToken::new(), &request(None)).unwrap_err();
        assert_eq!(err.code, ErrorCode::CmuxRuntimeUnavailable);
        assert!(f.sessions.list("ws-1").unwrap().is_empty());
    }

    /// Index writes always fail; everything else goes to the wrapped store
    struct ReadOnlyIndex<'s>(&'s JsonSessionStore);

    impl SessionStore for ReadOnlyIndex<'_> {
        fn load(&self) -> CmuxResult<SessionIndex> {
            self.0.load()
        }

        fn save(&self, _index: &SessionIndex) -> CmuxResult<()> {
            Err(CmuxError::state_write("index is read-only"))
        }

        fn root(&self) -> &Path {
            self.0.root()
        }
    }

    #[test]
    fn test_failed_save_leaves_no_session_directory() {
        let f = fixture();
        let client = f.runtime.client();
        let workspace_dir = f.sessions.root().join("ws-1");

        f.runtime.fail_pane_list("rt-1");
        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &f.sessions, &f.locator, &f.clock);
        let err = engine.save(&CancelToken::new(), &request(None)).unwrap_err();
        assert_eq!(err.code, ErrorCode::CmuxListFailed);
        assert!(!workspace_dir.exists());

        // Index write fails after the artifacts were written
        let f = fixture();
        let client = f.runtime.client();
        let read_only = ReadOnlyIndex(&f.sessions);
        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &read_only, &f.locator, &f.clock);
        let err = engine.save(&CancelToken::new(), &request(None)).unwrap_err();
        assert_eq!(err.code, ErrorCode::StateWriteFailed);
        assert!(!f
            .sessions
            .session_dir("ws-1", "20260206T131233Z")
            .exists());
        assert!(f.sessions.list("ws-1").unwrap().is_empty());
    }

    #[test]
    fn test_colliding_surface_keys_get_distinct_files() {
        let f = fixture();
        f.runtime.set_surfaces(
            "p-1",
            vec![
                Surface {
                    id: "surface:1".to_string(),
                    ..Default::default()
                },
                Surface {
                    id: "surface_1".to_string(),
                    ..Default::default()
                },
            ],
        );
        f.runtime.set_screen("surface:1", "first\n");
        f.runtime.set_screen("surface_1", "second\n");
        let client = f.runtime.client();
        let engine =
            SessionCaptureEngine::new(&client, &f.mappings, &f.sessions, &f.locator, &f.clock);

        let outcome = engine.save(&CancelToken::new(), &request(None)).unwrap();
        assert!(outcome.warnings.is_empty());

        let entry = f.sessions.list("ws-1").unwrap().remove(0);
        let document = f.sessions.read_document(&entry).unwrap();
        let paths: Vec<&str> = document.panes[0]
            .surfaces
            .iter()
            .filter_map(|s| s.screen_path.as_deref())
            .collect();
        assert_eq!(paths, vec!["screen-surface_1.txt", "screen-surface_1-2.txt"]);

        let dir = outcome.document_path.parent().unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join(paths[0])).unwrap(),
            "first\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.join(paths[1])).unwrap(),
            "second\n"
        );
    }
}
