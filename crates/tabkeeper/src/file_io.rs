use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, SessionError};

const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB
const LARGE_CONTENT_THRESHOLD: usize = 50 * 1024 * 1024; // 50MB
const MAX_ATTEMPTS: u32 = 3;

/// A text document read from its backing location.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub path: PathBuf,
    pub display_name: String,
    pub content: String,
}

pub fn display_name_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a UTF-8 text file. The returned path is canonical so that two
/// spellings of the same file compare equal.
pub async fn read_document(path: &Path) -> Result<LoadedDocument> {
    let path = fs::canonicalize(path)
        .await
        .map_err(|e| SessionError::io(path, e))?;

    let metadata = fs::metadata(&path)
        .await
        .map_err(|e| SessionError::io(&path, e))?;
    if !metadata.is_file() {
        return Err(SessionError::rejected(&path, "not a regular file"));
    }
    if metadata.len() > LARGE_FILE_THRESHOLD {
        log::warn!(
            "Large file detected ({} bytes): {}",
            metadata.len(),
            path.display()
        );
    }

    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Err(SessionError::rejected(&path, "not valid UTF-8"));
        }
        Err(e) => return Err(SessionError::io(&path, e)),
    };
    if content.contains('\0') {
        return Err(SessionError::rejected(&path, "looks like a binary file"));
    }

    log::info!("Successfully opened file: {}", path.display());
    Ok(LoadedDocument {
        display_name: display_name_for(&path),
        path,
        content,
    })
}

/// Write `content` to `path`, creating parent directories as needed.
///
/// Transient failures are retried a few times. Returns the canonical path
/// that was written.
pub async fn write_document(path: &Path, content: &str) -> Result<PathBuf> {
    if content.len() > LARGE_CONTENT_THRESHOLD {
        return Err(SessionError::rejected(
            path,
            format!("content too large ({} bytes)", content.len()),
        ));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !fs::try_exists(parent).await.unwrap_or(false) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::io(parent, e))?;
            log::info!("Created directory: {}", parent.display());
        }
    }

    if let Ok(metadata) = fs::metadata(path).await {
        if metadata.permissions().readonly() {
            return Err(SessionError::rejected(path, "target file is read-only"));
        }
    }

    let mut attempts = 0;
    loop {
        match write_synced(path, content.as_bytes()).await {
            Ok(()) => break,
            Err(e) => {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    return Err(SessionError::io(path, e));
                }
                log::warn!(
                    "Save attempt {} failed for {}, retrying...",
                    attempts,
                    path.display()
                );
                tokio::time::sleep(tokio::time::Duration::from_millis(100 * attempts as u64))
                    .await;
            }
        }
    }

    let written = fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf());
    log::info!("Successfully saved file: {}", written.display());
    Ok(written)
}

/// Create or truncate `path`, write `bytes`, flush and sync.
///
/// The handle is dropped (and closed) on every return path, including after a
/// failed write.
pub(crate) async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    let result = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[tokio::test]
    async fn test_read_document() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "Hello World\nTest content").unwrap();

        let doc = read_document(temp_file.path()).await.unwrap();
        assert_eq!(doc.content, "Hello World\nTest content");
        assert_eq!(doc.path, std::fs::canonicalize(temp_file.path()).unwrap());
        assert_eq!(doc.display_name, display_name_for(temp_file.path()));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_document(&dir.path().join("missing.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Io { .. }));
    }

    #[tokio::test]
    async fn test_read_rejects_binary_and_directories() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"abc\0def").unwrap();
        let err = read_document(temp_file.path()).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected { .. }));

        let dir = TempDir::new().unwrap();
        let err = read_document(dir.path()).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_write_document_creates_parents() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested").join("deeper").join("out.js");

        let written = write_document(&target, "let a = 1;").await.unwrap();
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "let a = 1;");
        assert!(written.ends_with("out.js"));
    }

    #[tokio::test]
    async fn test_write_document_overwrites() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.txt");
        write_document(&target, "first version").await.unwrap();
        write_document(&target, "second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "second");
    }
}
