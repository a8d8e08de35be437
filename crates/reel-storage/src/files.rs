use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_SCHEMA: u32 = 1;

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Replace `path` with `bytes` through a sibling temp file and a rename, so
/// a reader sees either the old contents or the new ones.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;

    let staging = dir.join(format!(".reel-{}.partial", Uuid::new_v4().simple()));
    if let Err(err) = write_staging(&staging, bytes).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(err);
    }
    if let Err(err) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(err).with_context(|| format!("moving {} into place", path.display()));
    }
    Ok(())
}

async fn write_staging(staging: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)
        .await
        .with_context(|| format!("creating {}", staging.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {}", staging.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing {}", staging.display()))
}

/// One file written into a run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub relative_path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub files: Vec<StoredFile>,
}

/// Reports live at `<root>/<run_id>/<name>`; `manifest.json` in the same
/// directory records the hash of each file.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    pub async fn store_run_file(
        &self,
        run_id: Uuid,
        name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredFile> {
        let relative_path = Path::new(&run_id.to_string()).join(name);
        write_atomic(&self.root.join(&relative_path), bytes)
            .await
            .with_context(|| format!("storing {name} for run {run_id}"))?;
        Ok(StoredFile {
            name: name.to_owned(),
            relative_path,
            sha256: sha256_hex(bytes),
            bytes: bytes.len() as u64,
        })
    }

    pub async fn write_manifest(
        &self,
        run_id: Uuid,
        files: Vec<StoredFile>,
    ) -> anyhow::Result<PathBuf> {
        let path = self.run_dir(run_id).join(MANIFEST_FILE);
        let json = serde_json::to_vec_pretty(&RunManifest {
            schema_version: MANIFEST_SCHEMA,
            run_id,
            files,
        })
        .context("encoding run manifest")?;
        write_atomic(&path, &json).await?;
        Ok(path)
    }

    pub async fn read_manifest(&self, run_id: Uuid) -> anyhow::Result<RunManifest> {
        let path = self.run_dir(run_id).join(MANIFEST_FILE);
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("decoding {}", path.display()))
    }

    /// Run directories, newest first by modification time.
    pub fn recent_runs(&self, limit: usize) -> anyhow::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("listing {}", self.root.display()))
            }
        };
        let mut runs = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok();
                (modified, entry.path())
            })
            .collect::<Vec<_>>();
        runs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(runs
            .into_iter()
            .take(limit.max(1))
            .map(|(_, path)| path)
            .collect())
    }
}
