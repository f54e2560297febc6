//! Remembers which backed files were open, and which one was active, so the
//! next run can reopen the same working set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::fs::try_exists;

use crate::error::{Result, SessionError};
use crate::file_io::write_synced;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub open_files: Vec<PathBuf>,
    pub active_index: Option<usize>,
    pub saved_at: DateTime<Utc>,
}

impl WorkspaceState {
    pub fn new(open_files: Vec<PathBuf>, active_index: Option<usize>) -> Self {
        Self {
            open_files,
            active_index,
            saved_at: Utc::now(),
        }
    }

    pub fn active_file(&self) -> Option<&Path> {
        self.active_index
            .and_then(|i| self.open_files.get(i))
            .map(PathBuf::as_path)
    }
}

/// The `workspace.json` file in the data directory.
#[derive(Debug, Clone)]
pub struct WorkspaceFile {
    path: PathBuf,
}

impl WorkspaceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("workspace.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, state: &WorkspaceState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        write_synced(&self.path, &json)
            .await
            .map_err(|e| SessionError::io(&self.path, e))?;
        log::debug!(
            "Saved workspace with {} file(s) to {}",
            state.open_files.len(),
            self.path.display()
        );
        Ok(())
    }

    /// `None` when nothing was saved yet or the file cannot be parsed.
    pub async fn load(&self) -> Option<WorkspaceState> {
        if !try_exists(&self.path).await.unwrap_or(false) {
            return None;
        }
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) => {
                log::warn!(
                    "Failed to read workspace file '{}': {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };
        match serde_json::from_str::<WorkspaceState>(&json) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("Failed to parse workspace file: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load_workspace() {
        let dir = TempDir::new().unwrap();
        let file = WorkspaceFile::in_data_dir(dir.path());

        let state = WorkspaceState::new(
            vec![PathBuf::from("/a/one.js"), PathBuf::from("/a/two.js")],
            Some(1),
        );
        file.save(&state).await.unwrap();

        let loaded = file.load().await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.active_file(), Some(Path::new("/a/two.js")));
    }

    #[tokio::test]
    async fn test_missing_or_broken_workspace() {
        let dir = TempDir::new().unwrap();
        let file = WorkspaceFile::in_data_dir(dir.path());
        assert!(file.load().await.is_none());

        std::fs::write(file.path(), "[]").unwrap();
        assert!(file.load().await.is_none());
    }

    #[test]
    fn test_active_file_out_of_range() {
        let state = WorkspaceState::new(vec![PathBuf::from("/x")], Some(4));
        assert!(state.active_file().is_none());
    }
}
