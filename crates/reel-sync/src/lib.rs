//! Collection sync: library index, media matching, collection assembly and
//! reconciliation, acquisition dispatch and run reports.

pub mod acquisition;
pub mod assembler;
pub mod config;
pub mod context;
mod error;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod reconciler;
pub mod report;

pub use acquisition::{acquisition_id, dispatch_missing, AcquisitionOutcome};
pub use assembler::{dedup_by_primary_id, passes_filters, Assembly, AssemblyStats, CollectionAssembler};
pub use config::{CollectionsFile, LibraryAcquisition, LibraryConfig, SourceConfig, SyncConfig};
pub use context::{MatchKey, RunContext};
pub use error::SyncError;
pub use index::LibraryIndex;
pub use matcher::{is_match, MediaMatcher};
pub use pipeline::{run_sync_once_from_env, SyncPipeline};
pub use reconciler::{order_target, plan, AppliedChanges, CollectionReconciler, ResolvedCollection};
pub use report::{
    render_brief, summarize_recent_runs, CollectionReport, CollectionStatus, LibraryReport,
    RunOutcome, RunReport,
};
