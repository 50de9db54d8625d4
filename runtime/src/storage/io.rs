use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{StorageResult, StoreError};

pub async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    Ok(())
}

pub async fn read_json_file<T>(path: &Path) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(None),
        Ok(bytes) => Ok(Some(serde_json::from_slice::<T>(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Writes `bytes` through a sibling temp file, fsyncs, then renames into place.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    ensure_parent_dir(path).await?;

    let tmp_path = temp_path(path);
    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub async fn write_json_file<T>(path: &Path, value: &T) -> StorageResult<()>
where
    T: Serialize,
{
    let json = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &json).await
}

pub async fn load_or_default<T>(path: &Path) -> StorageResult<T>
where
    T: DeserializeOwned + Default,
{
    Ok(read_json_file::<T>(path).await?.unwrap_or_default())
}

/// Removes a directory tree; a missing directory is not an error.
pub async fn remove_dir_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Rejects keys that would escape their directory when used as a path segment.
pub fn path_segment(key: &str) -> StorageResult<&str> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains(['/', '\\', '\0']);
    if valid {
        Ok(key)
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|name| format!("{}.tmp", name.to_string_lossy()))
        .unwrap_or_else(|| "tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}
