use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use tempfile::TempDir;
use workspace_cmux::clock::FixedClock;
use workspace_cmux::cmux::mapping::{JsonMappingStore, RuntimeEntry};
use workspace_cmux::config::Config;
use workspace_cmux::sessions::JsonSessionStore;
use workspace_cmux::workspace_paths::DirectoryLocator;

/// Sandbox with state and workspace roots under one temp dir
pub struct Sandbox {
    _temp: TempDir,
    pub config: Config,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let config = Config::rooted_at(temp.path());
        config.ensure_dirs().expect("create state dirs");
        std::fs::create_dir_all(&config.workspaces_root).expect("create workspaces root");
        Self {
            _temp: temp,
            config,
        }
    }

    /// Create an active workspace directory
    pub fn active(&self, workspace_id: &str) -> PathBuf {
        let dir = self.config.workspaces_root.join(workspace_id);
        std::fs::create_dir_all(&dir).expect("create workspace dir");
        dir
    }

    /// Create an archived workspace directory
    pub fn archived(&self, workspace_id: &str) -> PathBuf {
        let dir = self.config.archive_root().join(workspace_id);
        std::fs::create_dir_all(&dir).expect("create archived dir");
        dir
    }

    pub fn locator(&self) -> DirectoryLocator {
        DirectoryLocator::from_config(&self.config)
    }

    pub fn mapping_store(&self) -> JsonMappingStore {
        JsonMappingStore::new(self.config.mapping_file())
    }

    pub fn session_store(&self) -> JsonSessionStore {
        JsonSessionStore::from_config(&self.config)
    }
}

pub fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 6, hour, minute, second)
        .single()
        .expect("valid timestamp")
}

pub fn clock(hour: u32, minute: u32, second: u32) -> FixedClock {
    FixedClock(at(hour, minute, second))
}

pub fn entry(runtime_id: &str, ordinal: u64) -> RuntimeEntry {
    RuntimeEntry {
        runtime_id: runtime_id.to_string(),
        ordinal,
        title_snapshot: format!("ws #{ordinal}"),
        created_at: at(8, 0, 0),
        last_used_at: at(8, 0, 0),
    }
}
