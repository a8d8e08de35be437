use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use reel_core::{AnnotatedItem, MediaKind, OrderingPolicy};
use reel_storage::ReportStore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::acquisition::AcquisitionOutcome;
use crate::assembler::SourceFailure;
use crate::SyncError;

pub const RUN_REPORT_FILE: &str = "run_report.json";
pub const RUN_BRIEF_FILE: &str = "run_brief.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Success,
    Failed,
    PartialReorder,
    Cancelled,
}

impl CollectionStatus {
    pub fn for_error(err: &SyncError) -> Self {
        match err {
            SyncError::PartialReorder { .. } => CollectionStatus::PartialReorder,
            SyncError::Cancelled => CollectionStatus::Cancelled,
            _ => CollectionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialSuccess,
    Failed,
}

/// One catalog item as seen by the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub title: String,
    pub year: Option<i32>,
    pub tmdb_id: Option<u64>,
    pub source_id: String,
    pub matched: bool,
    pub local_id: Option<String>,
}

fn release_year(annotated: &AnnotatedItem) -> Option<i32> {
    annotated
        .item
        .year
        .or_else(|| annotated.item.release_date.map(|d| d.year()))
}

impl From<&AnnotatedItem> for ItemReport {
    fn from(annotated: &AnnotatedItem) -> Self {
        Self {
            title: annotated.item.title.clone(),
            year: release_year(annotated),
            tmdb_id: annotated.item.ids.tmdb,
            source_id: annotated.item.source_id.clone(),
            matched: annotated.is_matched(),
            local_id: annotated.local_id().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionReport {
    pub name: String,
    pub ordering: OrderingPolicy,
    pub dry_run: bool,
    pub sources: Vec<String>,
    pub fetched: usize,
    pub after_filter: usize,
    pub matched: usize,
    pub missing: usize,
    pub match_rate: f64,
    pub collection_id: Option<String>,
    pub collection_existed: bool,
    pub added: usize,
    pub removed: usize,
    pub added_titles: Vec<String>,
    pub removed_ids: Vec<String>,
    pub reordered: bool,
    pub acquisition: AcquisitionOutcome,
    pub source_failures: Vec<SourceFailure>,
    pub status: CollectionStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub items: Vec<ItemReport>,
}

impl CollectionReport {
    pub fn new(name: &str, ordering: OrderingPolicy, dry_run: bool) -> Self {
        Self {
            name: name.to_string(),
            ordering,
            dry_run,
            sources: Vec::new(),
            fetched: 0,
            after_filter: 0,
            matched: 0,
            missing: 0,
            match_rate: 0.0,
            collection_id: None,
            collection_existed: false,
            added: 0,
            removed: 0,
            added_titles: Vec::new(),
            removed_ids: Vec::new(),
            reordered: false,
            acquisition: AcquisitionOutcome::default(),
            source_failures: Vec::new(),
            status: CollectionStatus::Success,
            error: None,
            duration_ms: 0,
            items: Vec::new(),
        }
    }

    pub fn fail(&mut self, err: &SyncError) {
        self.status = CollectionStatus::for_error(err);
        self.error = Some(err.to_string());
    }

    pub fn succeeded(&self) -> bool {
        self.status == CollectionStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryReport {
    pub name: String,
    pub library_id: String,
    pub kind: MediaKind,
    pub collections: Vec<CollectionReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub collections: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub added: usize,
    pub removed: usize,
    pub matched: usize,
    pub missing: usize,
    pub requested: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub outcome: RunOutcome,
    pub totals: RunTotals,
    pub libraries: Vec<LibraryReport>,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        dry_run: bool,
        libraries: Vec<LibraryReport>,
    ) -> Self {
        let mut totals = RunTotals::default();
        for collection in libraries.iter().flat_map(|l| &l.collections) {
            totals.collections += 1;
            if collection.succeeded() {
                totals.succeeded += 1;
            } else {
                totals.failed += 1;
            }
            totals.added += collection.added;
            totals.removed += collection.removed;
            totals.matched += collection.matched;
            totals.missing += collection.missing;
            totals.requested += collection.acquisition.requested.len();
        }
        let outcome = if totals.failed == 0 {
            RunOutcome::Success
        } else if totals.succeeded == 0 {
            RunOutcome::Failed
        } else {
            RunOutcome::PartialSuccess
        };
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            dry_run,
            outcome,
            totals,
            libraries,
        }
    }

    pub fn collections(&self) -> impl Iterator<Item = &CollectionReport> {
        self.libraries.iter().flat_map(|l| l.collections.iter())
    }
}

pub fn render_brief(report: &RunReport) -> String {
    let mut lines = vec![
        "# Reel Sync Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", report.run_id),
        format!("- Started: {}", report.started_at),
        format!("- Finished: {}", report.finished_at),
        format!("- Outcome: {:?}", report.outcome),
        format!(
            "- Collections: {} ({} ok, {} failed)",
            report.totals.collections, report.totals.succeeded, report.totals.failed
        ),
        format!(
            "- Added: {} / Removed: {} / Requested: {}",
            report.totals.added, report.totals.removed, report.totals.requested
        ),
    ];
    if report.dry_run {
        lines.push("- Dry run: no changes were written".to_string());
    }

    for library in &report.libraries {
        lines.push(String::new());
        lines.push(format!("## {} ({})", library.name, library.kind));
        for c in &library.collections {
            lines.push(format!(
                "- **{}** [{}]: {}/{} matched ({:.0}%), +{} -{}{}{}",
                c.name,
                c.ordering,
                c.matched,
                c.matched + c.missing,
                c.match_rate * 100.0,
                c.added,
                c.removed,
                if c.reordered { ", reordered" } else { "" },
                match &c.error {
                    Some(err) => format!(", {:?}: {err}", c.status),
                    None => String::new(),
                }
            ));
            for failure in &c.source_failures {
                lines.push(format!("  - source {} failed: {}", failure.source_id, failure.error));
            }
            if !c.acquisition.requested.is_empty() {
                lines.push(format!("  - requested: {}", c.acquisition.requested.join(", ")));
            }
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Writes the JSON report, the markdown brief and the manifest for one run.
pub async fn write_run_report(store: &ReportStore, report: &RunReport) -> anyhow::Result<PathBuf> {
    let json = serde_json::to_vec_pretty(report).context("serializing run report")?;
    let report_file = store
        .store_run_file(report.run_id, RUN_REPORT_FILE, &json)
        .await?;
    let brief_file = store
        .store_run_file(report.run_id, RUN_BRIEF_FILE, render_brief(report).as_bytes())
        .await?;
    store
        .write_manifest(report.run_id, vec![report_file, brief_file])
        .await?;
    Ok(store.run_dir(report.run_id))
}

/// Markdown digest of the `runs` most recent run reports.
pub fn summarize_recent_runs(store: &ReportStore, runs: usize) -> anyhow::Result<String> {
    let mut lines = vec!["# Reel Recent Runs".to_string(), String::new()];
    for dir in store.recent_runs(runs)? {
        let path = dir.join(RUN_REPORT_FILE);
        if !path.exists() {
            continue;
        }
        let report: RunReport = serde_json::from_str(
            &std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
        )
        .with_context(|| format!("parsing {}", path.display()))?;

        lines.push(format!("## Run `{}`", report.run_id));
        lines.push(format!("- finished: {}", report.finished_at));
        lines.push(format!("- outcome: {:?}", report.outcome));
        lines.push(format!(
            "- collections: {} ok / {} failed",
            report.totals.succeeded, report.totals.failed
        ));
        lines.push(format!(
            "- added {} / removed {} / requested {}",
            report.totals.added, report.totals.removed, report.totals.requested
        ));
        for failed in report.collections().filter(|c| !c.succeeded()) {
            lines.push(format!(
                "- {} {:?}: {}",
                failed.name,
                failed.status,
                failed.error.as_deref().unwrap_or("")
            ));
        }
        let brief = dir.join(RUN_BRIEF_FILE);
        if brief.exists() {
            lines.push(format!("- brief: `{}`", brief.display()));
        }
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}
