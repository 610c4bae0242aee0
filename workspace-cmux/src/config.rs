// Environment configuration helpers
// Resolves where mapping/session state lives, where logical workspaces are on disk,
// and how the cmux runtime is invoked

use std::path::{Path, PathBuf};

/// Default number of parallel workers for multi-target open
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of screen lines captured per surface
pub const DEFAULT_SCREEN_LINES: u32 = 200;

/// Configuration for state paths and runtime invocation
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for persistent state (mapping file, session captures)
    pub state_dir: PathBuf,
    /// Root holding logical workspace directories: `<root>/<id>` when active,
    /// `<root>/.archive/<id>` when archived
    pub workspaces_root: PathBuf,
    /// Path or name of the cmux executable
    pub cmux_bin: PathBuf,
    /// Worker count for concurrent open
    pub concurrency: usize,
    /// Lines of screen buffer captured per surface on save
    pub screen_lines: u32,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            workspaces_root: Self::default_workspaces_root(),
            cmux_bin: PathBuf::from("cmux"),
            concurrency: DEFAULT_CONCURRENCY,
            screen_lines: DEFAULT_SCREEN_LINES,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default_paths();

        if let Ok(dir) = std::env::var("WSCMUX_STATE_DIR") {
            if !dir.trim().is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("WSCMUX_WORKSPACES_ROOT") {
            if !dir.trim().is_empty() {
                config.workspaces_root = PathBuf::from(dir);
            }
        }
        if let Ok(bin) = std::env::var("WSCMUX_CMUX_BIN") {
            if !bin.trim().is_empty() {
                config.cmux_bin = PathBuf::from(bin);
            }
        }
        if let Some(n) = parse_env_number::<usize>("WSCMUX_CONCURRENCY") {
            config.concurrency = n.max(1);
        }
        if let Some(n) = parse_env_number::<u32>("WSCMUX_SCREEN_LINES") {
            if n > 0 {
                config.screen_lines = n;
            }
        }

        config
    }

    /// Configuration rooted entirely under one directory (tests, sandboxes)
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            state_dir: base.join("state"),
            workspaces_root: base.join("workspaces"),
            ..Self::default_paths()
        }
    }

    fn default_state_dir() -> PathBuf {
        // All platforms: ~/.wscmux/ (or /tmp/wscmux if home unavailable)
        dirs::home_dir()
            .map(|h| h.join(".wscmux"))
            .unwrap_or_else(|| PathBuf::from("/tmp/wscmux"))
    }

    fn default_workspaces_root() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join("workspaces"))
            .unwrap_or_else(|| PathBuf::from("/tmp/wscmux/workspaces"))
    }

    /// Get the mapping file path
    pub fn mapping_file(&self) -> PathBuf {
        self.state_dir.join("cmux-mapping.json")
    }

    /// Root directory for captured sessions
    pub fn sessions_root(&self) -> PathBuf {
        self.state_dir.join("cmux-sessions")
    }

    /// Session index file path
    pub fn sessions_index_file(&self) -> PathBuf {
        self.sessions_root().join("index.json")
    }

    pub fn archive_root(&self) -> PathBuf {
        self.workspaces_root.join(".archive")
    }

    /// Ensure state and session directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(self.sessions_root())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.state_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rooted_paths() {
        let config = Config::rooted_at(Path::new("/sandbox"));
        assert_eq!(
            config.mapping_file(),
            PathBuf::from("/sandbox/state/cmux-mapping.json")
        );
        assert_eq!(
            config.sessions_index_file(),
            PathBuf::from("/sandbox/state/cmux-sessions/index.json")
        );
        assert_eq!(
            config.archive_root(),
            PathBuf::from("/sandbox/workspaces/.archive")
        );
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_ensure_dirs_creates_sessions_root() {
        let temp = TempDir::new().unwrap();
        let config = Config::rooted_at(temp.path());
        config.ensure_dirs().unwrap();
        assert!(config.sessions_root().is_dir());
    }
}
