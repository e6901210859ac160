// src/file_manager.rs - Path store: one JSON file per recorded path
use crate::path::file_format;
use crate::path::{Path, PathSummary};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum PathStoreError {
    #[error("Path '{0}' not found")]
    NotFound(String),
    #[error("Invalid path file '{name}': {reason}")]
    InvalidPathFile { name: String, reason: String },
    #[error("Refusing to save empty path '{0}'")]
    EmptyPath(String),
    #[error("Invalid path name '{0}'")]
    InvalidName(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct PathStore {
    directory: PathBuf,
}

impl PathStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    pub async fn ensure_directory(&self) -> Result<(), PathStoreError> {
        fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    fn file_for(&self, name: &str) -> Result<PathBuf, PathStoreError> {
        validate_name(name)?;
        Ok(self.directory.join(format!("{}.json", name)))
    }

    pub async fn exists(&self, name: &str) -> bool {
        match self.file_for(name) {
            Ok(file) => fs::try_exists(file).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Write the path atomically: a temporary file is renamed over the target,
    /// so a failed save never leaves a truncated file behind.
    pub async fn save(&self, path: &Path) -> Result<PathBuf, PathStoreError> {
        if path.is_empty() {
            return Err(PathStoreError::EmptyPath(path.name.clone()));
        }
        let target = self.file_for(&path.name)?;
        self.ensure_directory().await?;

        let json = file_format::to_json(path)?;
        let temp = self.directory.join(format!(".{}.json.tmp", path.name));
        if let Err(e) = fs::write(&temp, json.as_bytes()).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::info!(
            "Saved path '{}' with {} waypoints to {}",
            path.name,
            path.len(),
            target.display()
        );
        Ok(target)
    }

    pub async fn load(&self, name: &str) -> Result<Path, PathStoreError> {
        let file = self.file_for(name)?;
        let contents = match fs::read_to_string(&file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PathStoreError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let path = file_format::from_json(&contents, name).map_err(|reason| {
            PathStoreError::InvalidPathFile {
                name: name.to_string(),
                reason,
            }
        })?;
        tracing::debug!("Loaded path '{}' ({} waypoints)", name, path.len());
        Ok(path)
    }

    /// Summaries of every readable path, newest first. Unreadable files are
    /// logged and skipped.
    pub async fn list(&self) -> Result<Vec<PathSummary>, PathStoreError> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.path();
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            match self.load(stem).await {
                Ok(path) => summaries.push(PathSummary {
                    name: stem.to_string(),
                    ..path.summary()
                }),
                Err(e) => tracing::warn!("Skipping {}: {}", file.display(), e),
            }
        }

        summaries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(a.name.cmp(&b.name)));
        Ok(summaries)
    }

    pub async fn delete(&self, name: &str) -> Result<(), PathStoreError> {
        let file = self.file_for(name)?;
        match fs::remove_file(&file).await {
            Ok(()) => {
                tracing::info!("Deleted path '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PathStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Names become file names: no separators, no hidden files, nothing empty.
pub fn validate_name(name: &str) -> Result<(), PathStoreError> {
    let valid = !name.trim().is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' ' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PathStoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("extend").is_ok());
        assert!(validate_name("retract_v2-final").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name(".hidden").is_err());
    }

    #[tokio::test]
    async fn test_save_rejects_empty_path() {
        let dir = tempdir().unwrap();
        let store = PathStore::new(dir.path());
        let path = Path::new("empty", Utc::now());
        assert!(matches!(store.save(&path).await, Err(PathStoreError::EmptyPath(_))));
        assert!(!store.exists("empty").await);
    }

    #[tokio::test]
    async fn test_load_missing_and_corrupt() {
        let dir = tempdir().unwrap();
        let store = PathStore::new(dir.path());
        assert!(matches!(store.load("nope").await, Err(PathStoreError::NotFound(_))));

        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        assert!(matches!(
            store.load("broken").await,
            Err(PathStoreError::InvalidPathFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let store = PathStore::new(dir.path());
        let mut path = Path::new("extend", Utc::now());
        path.push(10.0, 20.0, Duration::from_millis(100));
        store.save(&path).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["extend.json".to_string()]);
    }
}
