//! Atomic JSON snapshot files.
//!
//! Writes go to a temporary file in the destination directory and are then
//! renamed over the target, so a crash never leaves a truncated snapshot.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{CatalogError, Result};

/// Serialize `value` as JSON and atomically replace `path` with it.
pub fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let bytes = serde_json::to_vec_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a JSON snapshot.
///
/// Returns `Ok(None)` when the file does not exist, and
/// [`CatalogError::Snapshot`] when it exists but cannot be read or parsed.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CatalogError::Snapshot {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| CatalogError::Snapshot {
            path: path.to_path_buf(),
            reason: format!("malformed snapshot: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.json");
        write_atomic(&path, &vec!["a".to_string(), "b".to_string()]).unwrap();
        let back: Option<Vec<String>> = read(&path).unwrap();
        assert_eq!(back, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let back: Option<Vec<String>> = read(&dir.path().join("absent.json")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_corrupt_file_is_snapshot_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = read::<Vec<String>>(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Snapshot { .. }));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        write_atomic(&path, &1u32).unwrap();
        write_atomic(&path, &2u32).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(read::<u32>(&path).unwrap(), Some(2));
    }
}
