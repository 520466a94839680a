//! Backup artifacts on the local filesystem

use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tally_store::snapshot::{self, Envelope};

use crate::CliError;

const DEFAULT_BACKUP_DIR: &str = "backups";

/// One backup file found in the store
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Directory of timestamped backup files
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `--dir` when given, else `TALLY_BACKUP_DIR`, else `./backups`.
    pub fn resolve(dir: Option<PathBuf>) -> Self {
        let dir = dir
            .or_else(|| env::var("TALLY_BACKUP_DIR").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        Self::new(dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an envelope under its timestamped name.
    ///
    /// The file is written next to its final name and hard-linked into place,
    /// so a crash never leaves a truncated artifact that looks complete and an
    /// existing artifact with the same name is never replaced.
    pub async fn write(&self, envelope: &Envelope) -> Result<PathBuf, CliError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CliError::io(&self.dir, source))?;

        let file_name = envelope.file_name();
        let path = self.dir.join(&file_name);
        let partial = self
            .dir
            .join(format!("{file_name}.{}.partial", std::process::id()));
        let bytes = envelope.to_json_pretty()?;

        if let Err(source) = tokio::fs::write(&partial, &bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(CliError::io(&partial, source));
        }
        let published = tokio::fs::hard_link(&partial, &path).await;
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial backup");
        }
        match published {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(CliError::ArtifactExists(path));
            }
            Err(source) => return Err(CliError::io(&path, source)),
        }

        tracing::info!(path = %path.display(), bytes = bytes.len(), "Backup written");
        Ok(path)
    }

    /// Backup files in the store, newest first. A missing directory is empty.
    pub async fn list(&self) -> Result<Vec<Artifact>, CliError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(CliError::io(&self.dir, source)),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| CliError::io(&self.dir, source))?
        {
            let name = entry.file_name();
            let Some(taken_at) = name.to_str().and_then(snapshot::parse_artifact_name) else {
                continue;
            };
            let metadata = entry
                .metadata()
                .await
                .map_err(|source| CliError::io(entry.path(), source))?;
            if !metadata.is_file() {
                continue;
            }
            artifacts.push(Artifact {
                path: entry.path(),
                taken_at,
                size_bytes: metadata.len(),
            });
        }

        artifacts.sort_by(|a, b| b.taken_at.cmp(&a.taken_at).then_with(|| b.path.cmp(&a.path)));
        Ok(artifacts)
    }

    /// Delete all but the newest `keep` artifacts; returns what was removed.
    pub async fn prune(&self, keep: usize) -> Result<Vec<PathBuf>, CliError> {
        let mut removed = Vec::new();
        for artifact in self.list().await?.into_iter().skip(keep) {
            tokio::fs::remove_file(&artifact.path)
                .await
                .map_err(|source| CliError::io(&artifact.path, source))?;
            tracing::info!(path = %artifact.path.display(), "Pruned old backup");
            removed.push(artifact.path);
        }
        Ok(removed)
    }

    /// Load an artifact. Bare file names are looked up in the store.
    pub async fn read(&self, file: &Path) -> Result<Envelope, CliError> {
        let path = if file.components().count() == 1 && !file.exists() {
            self.dir.join(file)
        } else {
            file.to_path_buf()
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| CliError::io(&path, source))?;
        Ok(Envelope::from_slice(&bytes)?)
    }
}
