// Persistence helpers shared by the mapping and session stores
// Files are replaced atomically (temp file + fsync + rename); a single writer is assumed

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Atomically save data to a file using write-to-temp + rename
///
/// The temp file lives in the same directory so the rename never crosses filesystems.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    let mut file = File::create(&temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync temp file: {}", temp_path.display()))?;
    drop(file);

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    json.push(b'\n');
    atomic_write(path, &json)
}

/// Read a JSON document, returning `None` if the file does not exist or is blank
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Treat an explicit JSON `null` like a missing field (`#[serde(default, deserialize_with = ...)]`)
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_and_leaves_no_temp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("state.json");

        atomic_write(&path, b"{\"version\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"version\":1}");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_json_optional_missing_and_blank() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.json");
        let value: Option<serde_json::Value> = read_json_optional(&path).unwrap();
        assert!(value.is_none());

        fs::write(&path, "  \n").unwrap();
        let value: Option<serde_json::Value> = read_json_optional(&path).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_read_json_optional_reports_parse_errors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        fs::write(&path, "{not json").unwrap();
        let result: Result<Option<serde_json::Value>> = read_json_optional(&path);
        assert!(result.is_err());
    }
}
