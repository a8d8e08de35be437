use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use reel_adapters::{AdapterContext, LibraryService, ProviderSource};
use reel_core::{AnnotatedItem, CatalogItem, CollectionSpec, FilterSpec, MediaKind, MatchResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::context::RunContext;
use crate::matcher::MediaMatcher;
use crate::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyStats {
    /// Sources queried, in configuration order.
    pub sources: Vec<String>,
    pub fetched: usize,
    pub after_dedup: usize,
    pub after_filter: usize,
    pub after_limit: usize,
    pub matched: usize,
    pub missing: usize,
    pub source_failures: Vec<SourceFailure>,
}

impl AssemblyStats {
    pub fn match_rate(&self) -> f64 {
        if self.after_limit == 0 {
            0.0
        } else {
            self.matched as f64 / self.after_limit as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    pub items: Vec<AnnotatedItem>,
    pub stats: AssemblyStats,
}

/// First occurrence of each primary id wins. Items without one are always kept.
pub fn dedup_by_primary_id(items: Vec<CatalogItem>) -> Vec<CatalogItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| item.ids.tmdb.map_or(true, |tmdb| seen.insert(tmdb)))
        .collect()
}

/// AND of every configured filter. An item lacking the filtered attribute
/// passes that filter.
pub fn passes_filters(item: &CatalogItem, filters: &FilterSpec) -> bool {
    in_range(item.year, filters.year_gte, filters.year_lte)
        && in_range(item.vote_average, filters.rating_gte, filters.rating_lte)
        && in_range(item.vote_count, filters.vote_count_gte, filters.vote_count_lte)
        && (filters.with_genres.is_empty()
            || item.genres.is_empty()
            || filters.with_genres.iter().any(|g| item.genres.contains(g)))
        && !filters.without_genres.iter().any(|g| item.genres.contains(g))
        && item.original_language.as_deref().map_or(true, |lang| {
            !filters
                .original_language_not
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(lang))
        })
        && !item.origin_countries.iter().any(|country| {
            filters
                .origin_country_not
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(country))
        })
}

fn in_range<T: PartialOrd + Copy>(value: Option<T>, gte: Option<T>, lte: Option<T>) -> bool {
    let Some(value) = value else {
        return true;
    };
    gte.map_or(true, |min| value >= min) && lte.map_or(true, |max| value <= max)
}

/// Fetches, deduplicates, filters, truncates and matches the items of one
/// collection.
pub struct CollectionAssembler<'a> {
    ctx: &'a RunContext,
    providers: &'a HashMap<String, Arc<dyn ProviderSource>>,
    library: &'a dyn LibraryService,
}

impl<'a> CollectionAssembler<'a> {
    pub fn new(
        ctx: &'a RunContext,
        providers: &'a HashMap<String, Arc<dyn ProviderSource>>,
        library: &'a dyn LibraryService,
    ) -> Self {
        Self {
            ctx,
            providers,
            library,
        }
    }

    pub async fn assemble(
        &self,
        spec: &CollectionSpec,
        library_id: &str,
        kind: MediaKind,
    ) -> Result<Assembly, SyncError> {
        self.ctx.ensure_active()?;
        let mut stats = AssemblyStats::default();
        let adapter_ctx = AdapterContext::new(self.ctx.run_id());

        let queries = spec
            .sources
            .iter()
            .filter(|query| query.enabled)
            .filter_map(|query| match self.providers.get(&query.source) {
                Some(provider) => Some((query, provider.clone())),
                None => {
                    debug!(source_id = %query.source, collection = %spec.name, "source disabled");
                    None
                }
            })
            .collect::<Vec<_>>();
        stats.sources = queries.iter().map(|(q, _)| q.source.clone()).collect();

        let fetches = queries.iter().map(|(query, provider)| {
            let span = info_span!("source_fetch", source_id = %query.source, collection = %spec.name);
            let adapter_ctx = &adapter_ctx;
            async move { provider.fetch(adapter_ctx, kind, query).await }.instrument(span)
        });
        // join_all keeps configuration order regardless of completion order.
        let results = join_all(fetches).await;

        let mut fetched = Vec::new();
        for ((query, _), result) in queries.iter().zip(results) {
            match result {
                Ok(items) => fetched.extend(items),
                Err(source) => {
                    let err = SyncError::SourceFetch {
                        source_id: query.source.clone(),
                        source,
                    };
                    warn!(collection = %spec.name, error = %err, "provider source failed");
                    stats.source_failures.push(SourceFailure {
                        source_id: query.source.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        stats.fetched = fetched.len();

        let unique = dedup_by_primary_id(fetched);
        stats.after_dedup = unique.len();

        let mut filtered = unique
            .into_iter()
            .filter(|item| item.kind == kind && passes_filters(item, &spec.filters))
            .collect::<Vec<_>>();
        stats.after_filter = filtered.len();

        if let Some(limit) = spec.limit {
            filtered.truncate(limit);
        }
        stats.after_limit = filtered.len();

        let matcher = MediaMatcher::new(self.ctx, self.library);
        let mut items = Vec::with_capacity(filtered.len());
        for item in filtered {
            let found = matcher.find(&item, library_id).await?;
            items.push(MatchResult::new(item, found));
        }
        stats.matched = items.iter().filter(|i| i.is_matched()).count();
        stats.missing = items.len() - stats.matched;

        Ok(Assembly { items, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_and_id_less_items() {
        let items = vec![
            CatalogItem::new(MediaKind::Movie, "A").with_tmdb_id(1).with_year(2020),
            CatalogItem::new(MediaKind::Movie, "A-dup").with_tmdb_id(1).with_year(2020),
            CatalogItem::new(MediaKind::Movie, "B").with_tmdb_id(2).with_year(2021),
            CatalogItem::new(MediaKind::Movie, "C"),
            CatalogItem::new(MediaKind::Movie, "C"),
        ];
        let titles = dedup_by_primary_id(items)
            .into_iter()
            .map(|i| i.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["A", "B", "C", "C"]);
    }

    #[test]
    fn absent_attributes_pass_filters() {
        let filters = FilterSpec {
            year_gte: Some(2000),
            rating_gte: Some(7.0),
            vote_count_gte: Some(100),
            with_genres: vec![28],
            without_genres: vec![16],
            original_language_not: vec!["ja".into()],
            origin_country_not: vec!["JP".into()],
            ..Default::default()
        };
        assert!(passes_filters(&CatalogItem::new(MediaKind::Movie, "Bare"), &filters));

        let mut item = CatalogItem::new(MediaKind::Movie, "Counted").with_year(2010);
        item.vote_count = Some(50);
        assert!(!passes_filters(&item, &filters));
    }

    #[test]
    fn set_filters_check_membership() {
        let filters = FilterSpec {
            with_genres: vec![28, 12],
            without_genres: vec![16],
            original_language_not: vec!["ja".into()],
            origin_country_not: vec!["jp".into()],
            ..Default::default()
        };
        let mut item = CatalogItem::new(MediaKind::Movie, "Action");
        item.genres = vec![12, 35];
        assert!(passes_filters(&item, &filters));

        item.genres = vec![35];
        assert!(!passes_filters(&item, &filters));

        item.genres = vec![28, 16];
        assert!(!passes_filters(&item, &filters));

        item.genres = vec![28];
        item.original_language = Some("JA".into());
        assert!(!passes_filters(&item, &filters));

        item.original_language = Some("en".into());
        item.origin_countries = vec!["US".into(), "JP".into()];
        assert!(!passes_filters(&item, &filters));
    }

    #[test]
    fn ranges_are_inclusive() {
        let filters = FilterSpec {
            year_gte: Some(2000),
            year_lte: Some(2010),
            rating_lte: Some(8.0),
            ..Default::default()
        };
        let mut item = CatalogItem::new(MediaKind::Movie, "Edge").with_year(2010);
        item.vote_average = Some(8.0);
        assert!(passes_filters(&item, &filters));
        item.year = Some(2011);
        assert!(!passes_filters(&item, &filters));
    }
}
