//! Small helpers for whole-file JSON persistence.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tradeloop_core::PersistenceError;

/// Reads and parses `path`. A missing file is `Ok(None)`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistenceError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes `value` to a sibling temp file, then renames it over `path`, so
/// readers see either the old content or the new one.
///
/// Creates parent directories if they don't exist.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let body = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let value: Option<Vec<u32>> = read_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_parent_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_json_atomic(&path, &vec![1, 2, 3]).await.unwrap();

        let back: Option<Vec<u32>> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(vec![1, 2, 3]));
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_json_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<Option<Vec<u32>>, _> = read_json(&path).await;
        assert!(matches!(result, Err(PersistenceError::Json(_))));
    }
}
