use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_core::{AcquisitionOptions, MediaKind};
use reel_storage::write_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{AcquisitionService, AdapterError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    pub external_id: u64,
    pub title: String,
    pub options: AcquisitionOptions,
    pub requested_at: DateTime<Utc>,
}

/// State of one download manager: what it already tracks, what it refuses,
/// and what reel asked it to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionLedger {
    #[serde(default)]
    pub existing: BTreeSet<u64>,
    #[serde(default)]
    pub excluded: BTreeSet<u64>,
    #[serde(default)]
    pub blocklisted: BTreeSet<u64>,
    #[serde(default)]
    pub requests: Vec<AcquisitionRequest>,
}

/// File-backed acquisition queue, one ledger file per media kind.
#[derive(Debug)]
pub struct JsonAcquisitionQueue {
    kind: MediaKind,
    path: Option<PathBuf>,
    ledger: Mutex<AcquisitionLedger>,
}

impl JsonAcquisitionQueue {
    pub fn in_memory(kind: MediaKind, ledger: AcquisitionLedger) -> Self {
        Self {
            kind,
            path: None,
            ledger: Mutex::new(ledger),
        }
    }

    /// Opens `<dir>/<kind>.json`, starting empty when absent.
    pub async fn open(dir: &Path, kind: MediaKind) -> anyhow::Result<Self> {
        let path = dir.join(format!("{}.json", kind.as_str()));
        let ledger = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            AcquisitionLedger::default()
        };
        Ok(Self {
            kind,
            path: Some(path),
            ledger: Mutex::new(ledger),
        })
    }

    pub async fn ledger(&self) -> AcquisitionLedger {
        self.ledger.lock().await.clone()
    }
}

#[async_trait]
impl AcquisitionService for JsonAcquisitionQueue {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn exists(&self, external_id: u64) -> Result<bool, AdapterError> {
        Ok(self.ledger.lock().await.existing.contains(&external_id))
    }

    async fn is_excluded(&self, external_id: u64) -> Result<bool, AdapterError> {
        Ok(self.ledger.lock().await.excluded.contains(&external_id))
    }

    async fn is_blocklisted(&self, external_id: u64) -> Result<bool, AdapterError> {
        Ok(self.ledger.lock().await.blocklisted.contains(&external_id))
    }

    async fn request(
        &self,
        external_id: u64,
        title: &str,
        options: &AcquisitionOptions,
    ) -> Result<bool, AdapterError> {
        let mut ledger = self.ledger.lock().await;
        if !ledger.existing.insert(external_id) {
            return Ok(false);
        }
        ledger.requests.push(AcquisitionRequest {
            external_id,
            title: title.to_string(),
            options: options.clone(),
            requested_at: Utc::now(),
        });
        if let Some(path) = &self.path {
            let bytes = serde_json::to_vec_pretty(&*ledger)?;
            write_atomic(path, &bytes).await?;
        }
        Ok(true)
    }
}
