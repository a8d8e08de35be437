use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use reel_adapters::{
    build_provider, AcquisitionService, JsonAcquisitionQueue, JsonLibrary, LibraryService,
    ProviderSource,
};
use reel_core::{CollectionSpec, DisplayMetadata, MediaKind};
use reel_storage::{HttpClientConfig, HttpFetcher, ReportStore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::acquisition::dispatch_missing;
use crate::assembler::CollectionAssembler;
use crate::config::{CollectionsFile, LibraryConfig, SyncConfig};
use crate::context::RunContext;
use crate::reconciler::CollectionReconciler;
use crate::report::{write_run_report, CollectionReport, ItemReport, LibraryReport, RunReport};
use crate::SyncError;

pub struct SyncPipeline {
    config: SyncConfig,
    collections: CollectionsFile,
    providers: HashMap<String, Arc<dyn ProviderSource>>,
    library: Arc<dyn LibraryService>,
    acquisition: HashMap<MediaKind, Arc<dyn AcquisitionService>>,
    reports: ReportStore,
}

impl SyncPipeline {
    /// Validates `collections` before anything touches the network.
    pub fn new(
        config: SyncConfig,
        collections: CollectionsFile,
        library: Arc<dyn LibraryService>,
    ) -> Result<Self, SyncError> {
        collections.validate()?;
        let reports = ReportStore::new(config.resolve(&config.reports_dir));
        Ok(Self {
            config,
            collections,
            providers: HashMap::new(),
            library,
            acquisition: HashMap::new(),
            reports,
        })
    }

    pub fn with_provider(mut self, provider: Arc<dyn ProviderSource>) -> Self {
        self.providers
            .insert(provider.source_id().to_string(), provider);
        self
    }

    pub fn with_acquisition(mut self, service: Arc<dyn AcquisitionService>) -> Self {
        self.acquisition.insert(service.kind(), service);
        self
    }

    /// File-backed pipeline: providers from the source registry, the library
    /// snapshot and one acquisition queue per media kind.
    pub async fn from_config(config: SyncConfig) -> anyhow::Result<Self> {
        let collections_path = config.resolve(&config.collections_file);
        let collections = CollectionsFile::load(&collections_path).await?;

        let http = Arc::new(HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?);
        let providers = collections
            .sources
            .iter()
            .filter(|source| source.enabled)
            .map(|source| {
                build_provider(
                    &source.source_id,
                    &source.mode,
                    &config.workspace_root,
                    http.clone(),
                )
            })
            .collect::<Vec<_>>();

        let library = JsonLibrary::open(config.resolve(&config.library_snapshot)).await?;

        let acquisition_dir = config.resolve(&config.acquisition_dir);
        let kinds = collections
            .libraries
            .iter()
            .filter(|library| library.acquisition.enabled)
            .map(|library| library.kind)
            .collect::<BTreeSet<_>>();
        let mut queues = Vec::new();
        for kind in kinds {
            queues.push(JsonAcquisitionQueue::open(&acquisition_dir, kind).await?);
        }

        let mut pipeline = Self::new(config, collections, Arc::new(library))
            .with_context(|| format!("validating {}", collections_path.display()))?;
        for provider in providers {
            pipeline = pipeline.with_provider(provider);
        }
        for queue in queues {
            pipeline = pipeline.with_acquisition(Arc::new(queue));
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn reports(&self) -> &ReportStore {
        &self.reports
    }

    /// One full run with a fresh context, honoring the run timeout, followed by
    /// the report write.
    pub async fn run_once(&self) -> anyhow::Result<RunReport> {
        let ctx = RunContext::new(Uuid::new_v4()).with_dry_run(self.config.dry_run);
        let timer = self.config.run_timeout_secs.map(|secs| {
            let token = ctx.cancellation().clone();
            let run_id = ctx.run_id();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                warn!(%run_id, timeout_secs = secs, "run timeout reached; cancelling");
                token.cancel();
            })
        });

        let report = self.run_with_context(&ctx).await;
        if let Some(timer) = timer {
            timer.abort();
        }

        let run_dir = write_run_report(&self.reports, &report).await?;
        info!(
            run_id = %report.run_id,
            outcome = ?report.outcome,
            collections = report.totals.collections,
            failed = report.totals.failed,
            reports_dir = %run_dir.display(),
            "sync run finished"
        );
        Ok(report)
    }

    /// Syncs every configured collection. Collections overlap up to the
    /// configured concurrency; reports keep configuration order.
    pub async fn run_with_context(&self, ctx: &RunContext) -> RunReport {
        let started_at = Utc::now();
        let span = info_span!("sync_run", run_id = %ctx.run_id(), dry_run = ctx.dry_run());
        async {
            let mut jobs: Vec<BoxFuture<'_, (usize, CollectionReport)>> = Vec::new();
            for (pos, library) in self.collections.libraries.iter().enumerate() {
                for spec in &library.collections {
                    jobs.push(
                        self.assemble_and_sync(ctx, library, spec)
                            .map(move |report| (pos, report))
                            .boxed(),
                    );
                }
            }
            let results = stream::iter(jobs)
                .buffered(self.config.collection_concurrency.max(1))
                .collect::<Vec<_>>()
                .await;

            let mut libraries = self
                .collections
                .libraries
                .iter()
                .map(|library| LibraryReport {
                    name: library.name.clone(),
                    library_id: library.library_id.clone(),
                    kind: library.kind,
                    collections: Vec::new(),
                })
                .collect::<Vec<_>>();
            for (pos, report) in results {
                libraries[pos].collections.push(report);
            }
            RunReport::new(ctx.run_id(), started_at, ctx.dry_run(), libraries)
        }
        .instrument(span)
        .await
    }

    /// Assembles, reconciles and acquires for one collection. Failures end up
    /// in the returned report and never escape to sibling collections.
    pub async fn assemble_and_sync(
        &self,
        ctx: &RunContext,
        library: &LibraryConfig,
        spec: &CollectionSpec,
    ) -> CollectionReport {
        let started = Instant::now();
        let mut report = CollectionReport::new(&spec.name, spec.ordering, ctx.dry_run());
        let span = info_span!(
            "collection_sync",
            library_id = %library.library_id,
            collection = %spec.name
        );
        let result = self
            .sync_collection(ctx, library, spec, &mut report)
            .instrument(span)
            .await;
        if let Err(err) = result {
            if matches!(err, SyncError::Cancelled) {
                warn!(collection = %spec.name, "collection cancelled");
            } else {
                error!(collection = %spec.name, error = %err, "collection sync failed");
            }
            report.fail(&err);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn sync_collection(
        &self,
        ctx: &RunContext,
        library: &LibraryConfig,
        spec: &CollectionSpec,
        report: &mut CollectionReport,
    ) -> Result<(), SyncError> {
        ctx.ensure_active()?;
        let assembler = CollectionAssembler::new(ctx, &self.providers, self.library.as_ref());
        let assembly = assembler
            .assemble(spec, &library.library_id, library.kind)
            .await?;
        let stats = &assembly.stats;
        report.sources = stats.sources.clone();
        report.fetched = stats.fetched;
        report.after_filter = stats.after_filter;
        report.matched = stats.matched;
        report.missing = stats.missing;
        report.match_rate = stats.match_rate();
        report.source_failures = stats.source_failures.clone();
        report.items = assembly.items.iter().map(ItemReport::from).collect();

        {
            let lock = ctx.collection_lock(&spec.name).await;
            let _guard = lock.lock().await;
            ctx.ensure_active()?;

            let reconciler = CollectionReconciler::new(self.library.as_ref());
            let has_target = assembly.items.iter().any(|item| item.is_matched());
            let collection = reconciler
                .resolve_collection(&spec.name, has_target && !ctx.dry_run())
                .await?;
            report.collection_id = collection.id.clone();
            report.collection_existed = collection.existed;

            if collection.id.is_some() || ctx.dry_run() {
                let plan = reconciler
                    .reconcile(&spec.name, &collection, &assembly.items, spec.ordering)
                    .await?;
                report.added = plan.to_add.len();
                report.removed = plan.to_remove.len();
                report.added_titles = assembly
                    .items
                    .iter()
                    .filter(|item| item.local_id().is_some_and(|id| plan.to_add.contains(id)))
                    .map(|item| item.item.display_title())
                    .collect();
                report.removed_ids = plan.to_remove.iter().cloned().collect();

                if ctx.dry_run() {
                    report.reordered = plan.rewrite;
                } else {
                    // Last point where cancellation can stop a collection cleanly.
                    ctx.ensure_active()?;
                    let changes = reconciler
                        .apply(&spec.name, &plan, &DisplayMetadata::for_spec(spec))
                        .await?;
                    report.reordered = changes.reordered;
                }
            }
        }

        if library.acquisition.enabled && spec.add_missing {
            if let Some(service) = self.acquisition.get(&library.kind) {
                let options = library
                    .acquisition
                    .options
                    .overridden_by(spec.acquisition.as_ref());
                report.acquisition =
                    dispatch_missing(ctx, service.as_ref(), &spec.name, &assembly.items, &options)
                        .await;
            }
        }
        Ok(())
    }

    /// Scheduler running one sync per cron tick, or `None` when disabled.
    pub async fn maybe_build_scheduler(
        pipeline: Arc<SyncPipeline>,
    ) -> anyhow::Result<Option<JobScheduler>> {
        if !pipeline.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = pipeline.config.sync_cron.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(report) => {
                        info!(run_id = %report.run_id, outcome = ?report.outcome, "scheduled sync finished")
                    }
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled sync failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(Some(sched))
    }
}

pub async fn run_sync_once_from_env() -> anyhow::Result<RunReport> {
    let pipeline = SyncPipeline::from_config(SyncConfig::from_env()).await?;
    pipeline.run_once().await
}
