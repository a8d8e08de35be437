use reel_adapters::{AcquisitionService, AdapterError};
use reel_core::{AcquisitionOptions, AnnotatedItem, CatalogItem, MediaKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::RunContext;

/// Per-collection tally of missing-item requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionOutcome {
    pub requested: Vec<String>,
    pub already_present: usize,
    pub excluded: usize,
    pub missing_id: usize,
    pub failed: Vec<String>,
}

impl AcquisitionOutcome {
    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
            && self.already_present == 0
            && self.excluded == 0
            && self.missing_id == 0
            && self.failed.is_empty()
    }
}

/// Id the acquisition service for `item.kind` is keyed by.
pub fn acquisition_id(item: &CatalogItem) -> Option<u64> {
    match item.kind {
        MediaKind::Movie => item.ids.tmdb,
        MediaKind::Series => item.ids.tvdb,
    }
}

enum Decision {
    Requested,
    AlreadyPresent,
    Excluded,
}

/// Requests every unmatched item from `service`. Failures are tallied, never
/// returned.
pub async fn dispatch_missing(
    ctx: &RunContext,
    service: &dyn AcquisitionService,
    collection: &str,
    items: &[AnnotatedItem],
    options: &AcquisitionOptions,
) -> AcquisitionOutcome {
    let mut outcome = AcquisitionOutcome::default();
    for annotated in items.iter().filter(|i| !i.is_matched()) {
        let item = &annotated.item;
        if item.kind != service.kind() {
            continue;
        }
        if ctx.is_cancelled() {
            break;
        }
        let Some(external_id) = acquisition_id(item) else {
            warn!(collection, title = %item.title, kind = %item.kind, "missing item has no id to request by");
            outcome.missing_id += 1;
            continue;
        };
        if !ctx.claim_acquisition(item.kind, external_id).await {
            outcome.already_present += 1;
            continue;
        }
        match request_one(ctx, service, item, external_id, options).await {
            Ok(Decision::Requested) => {
                info!(collection, title = %item.title, external_id, dry_run = ctx.dry_run(), "requested missing item");
                outcome.requested.push(item.display_title());
            }
            Ok(Decision::AlreadyPresent) => outcome.already_present += 1,
            Ok(Decision::Excluded) => {
                debug!(collection, title = %item.title, external_id, "acquisition skipped: excluded");
                outcome.excluded += 1;
            }
            Err(err) => {
                ctx.release_acquisition(item.kind, external_id).await;
                warn!(collection, title = %item.title, external_id, error = %err, "acquisition request failed");
                outcome.failed.push(item.display_title());
            }
        }
    }
    outcome
}

async fn request_one(
    ctx: &RunContext,
    service: &dyn AcquisitionService,
    item: &CatalogItem,
    external_id: u64,
    options: &AcquisitionOptions,
) -> Result<Decision, AdapterError> {
    if service.is_excluded(external_id).await? || service.is_blocklisted(external_id).await? {
        return Ok(Decision::Excluded);
    }
    if service.exists(external_id).await? {
        return Ok(Decision::AlreadyPresent);
    }
    if ctx.dry_run() {
        return Ok(Decision::Requested);
    }
    if service.request(external_id, &item.title, options).await? {
        Ok(Decision::Requested)
    } else {
        Ok(Decision::AlreadyPresent)
    }
}
