use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use reel_adapters::ProviderMode;
use reel_core::{AcquisitionOptions, CollectionSpec, FilterSpec, MediaKind};
use serde::{Deserialize, Serialize};

use crate::SyncError;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub collections_file: PathBuf,
    pub library_snapshot: PathBuf,
    pub acquisition_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub dry_run: bool,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub run_timeout_secs: Option<u64>,
    pub collection_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            collections_file: PathBuf::from("collections.yaml"),
            library_snapshot: PathBuf::from("library.json"),
            acquisition_dir: PathBuf::from("acquisition"),
            reports_dir: PathBuf::from("reports"),
            dry_run: false,
            scheduler_enabled: false,
            sync_cron: "0 0 3 * * *".to_string(),
            user_agent: "reel-sync/0.1".to_string(),
            http_timeout_secs: 20,
            run_timeout_secs: None,
            collection_concurrency: 4,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: env_path("REEL_WORKSPACE_ROOT").unwrap_or(defaults.workspace_root),
            collections_file: env_path("REEL_COLLECTIONS_FILE")
                .unwrap_or(defaults.collections_file),
            library_snapshot: env_path("REEL_LIBRARY_SNAPSHOT")
                .unwrap_or(defaults.library_snapshot),
            acquisition_dir: env_path("REEL_ACQUISITION_DIR").unwrap_or(defaults.acquisition_dir),
            reports_dir: env_path("REEL_REPORTS_DIR").unwrap_or(defaults.reports_dir),
            dry_run: env_flag("REEL_DRY_RUN"),
            scheduler_enabled: env_flag("REEL_SCHEDULER_ENABLED"),
            sync_cron: std::env::var("REEL_SYNC_CRON").unwrap_or(defaults.sync_cron),
            user_agent: std::env::var("REEL_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("REEL_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            run_timeout_secs: env_parse("REEL_RUN_TIMEOUT_SECS"),
            collection_concurrency: env_parse("REEL_COLLECTION_CONCURRENCY")
                .unwrap_or(defaults.collection_concurrency),
        }
    }

    /// Resolves a configured path against the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True" | "yes"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// A registered catalog provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub mode: ProviderMode,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibraryAcquisition {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: AcquisitionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryConfig {
    pub name: String,
    pub library_id: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub acquisition: LibraryAcquisition,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
}

/// Contents of `collections.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionsFile {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub libraries: Vec<LibraryConfig>,
}

impl CollectionsFile {
    pub fn from_yaml(text: &str) -> Result<Self, SyncError> {
        serde_yaml::from_str(text).map_err(|err| SyncError::Configuration(err.to_string()))
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let file = Self::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(file)
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    /// Checks the whole file and reports every problem at once.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut problems = Vec::new();

        let mut source_ids = BTreeSet::new();
        for source in &self.sources {
            if source.source_id.trim().is_empty() {
                problems.push("source with empty source_id".to_string());
            } else if !source_ids.insert(source.source_id.as_str()) {
                problems.push(format!("duplicate source_id {}", source.source_id));
            }
        }

        // Remote collections are addressed by name alone, so names are unique
        // across every library.
        let mut library_ids = BTreeSet::new();
        let mut owners = BTreeMap::new();
        for library in &self.libraries {
            if !library_ids.insert(library.library_id.as_str()) {
                problems.push(format!("duplicate library_id {}", library.library_id));
            }

            for spec in &library.collections {
                let label = format!("{}/{}", library.name, spec.name);
                if spec.name.trim().is_empty() {
                    problems.push(format!("library {}: collection with empty name", library.name));
                } else if let Some(owner) =
                    owners.insert(spec.name.as_str(), library.name.as_str())
                {
                    problems.push(format!(
                        "{label}: duplicate collection name (already defined in {owner})"
                    ));
                }
                if spec.limit == Some(0) {
                    problems.push(format!("{label}: limit must be at least 1"));
                }
                if spec.sources.is_empty() {
                    problems.push(format!("{label}: no sources configured"));
                }
                for query in &spec.sources {
                    if !source_ids.contains(query.source.as_str()) {
                        problems.push(format!("{label}: unknown source {}", query.source));
                    }
                    if query.limit == Some(0) {
                        problems.push(format!("{label}: source {} limit must be at least 1", query.source));
                    }
                }
                validate_filters(&label, &spec.filters, &mut problems);
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Configuration(problems.join("; ")))
        }
    }
}

fn validate_filters(label: &str, filters: &FilterSpec, problems: &mut Vec<String>) {
    if let (Some(gte), Some(lte)) = (filters.year_gte, filters.year_lte) {
        if gte > lte {
            problems.push(format!("{label}: year.gte {gte} is after year.lte {lte}"));
        }
    }
    for rating in [filters.rating_gte, filters.rating_lte].into_iter().flatten() {
        if !(0.0..=10.0).contains(&rating) {
            problems.push(format!("{label}: rating {rating} outside 0..=10"));
        }
    }
    if let (Some(gte), Some(lte)) = (filters.rating_gte, filters.rating_lte) {
        if gte > lte {
            problems.push(format!("{label}: vote_average.gte {gte} exceeds vote_average.lte {lte}"));
        }
    }
    if let (Some(gte), Some(lte)) = (filters.vote_count_gte, filters.vote_count_lte) {
        if gte > lte {
            problems.push(format!(
                "{label}: tmdb_vote_count.gte {gte} exceeds tmdb_vote_count.lte {lte}"
            ));
        }
    }
}

fn default_true() -> bool {
    true
}
