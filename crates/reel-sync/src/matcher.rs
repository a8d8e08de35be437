use std::collections::HashMap;

use reel_adapters::LibraryService;
use reel_core::{normalize, CatalogItem, ExternalId, LibraryItem, MediaIdentity};
use tracing::{debug, warn};

use crate::context::{MatchKey, RunContext};
use crate::SyncError;

/// Catalog and library metadata often disagree by a year on release dates.
pub const YEAR_TOLERANCE: u32 = 1;

/// Whether two titles denote the same media: a shared primary, secondary or
/// tertiary id, or equal normalized titles with compatible years. A missing
/// year on either side matches any year.
pub fn is_match<A, B>(a: &A, b: &B) -> bool
where
    A: MediaIdentity + ?Sized,
    B: MediaIdentity + ?Sized,
{
    let (ia, ib) = (a.ids(), b.ids());
    if matches!((ia.tmdb, ib.tmdb), (Some(x), Some(y)) if x == y) {
        return true;
    }
    if matches!((&ia.imdb, &ib.imdb), (Some(x), Some(y)) if !x.is_empty() && x == y) {
        return true;
    }
    if matches!((ia.tvdb, ib.tvdb), (Some(x), Some(y)) if x == y) {
        return true;
    }
    if normalize(a.title()) != normalize(b.title()) {
        return false;
    }
    match (a.year(), b.year()) {
        (Some(x), Some(y)) => x.abs_diff(y) <= YEAR_TOLERANCE,
        _ => true,
    }
}

/// Resolves catalog items to library items through the run's index, falling
/// back to one live search per unresolved item.
pub struct MediaMatcher<'a> {
    ctx: &'a RunContext,
    library: &'a dyn LibraryService,
}

impl<'a> MediaMatcher<'a> {
    pub fn new(ctx: &'a RunContext, library: &'a dyn LibraryService) -> Self {
        Self { ctx, library }
    }

    pub async fn find(
        &self,
        item: &CatalogItem,
        library_id: &str,
    ) -> Result<Option<LibraryItem>, SyncError> {
        let key = MatchKey::for_item(library_id, item);
        if let Some(cached) = self.ctx.cached_match(&key).await {
            return Ok(cached);
        }

        let index = self.ctx.library_index(self.library, library_id).await?;
        if let Some(hit) = find_in_index(&index, item) {
            self.ctx.remember_match(key, Some(hit.clone())).await;
            return Ok(Some(hit));
        }

        self.ctx.ensure_active()?;
        let results = match self.library.search_items(item.kind, &item.title).await {
            Ok(results) => results,
            Err(err) => {
                // Not cached: the next lookup gets another chance.
                warn!(library_id, title = %item.title, error = %err, "fallback search failed");
                return Ok(None);
            }
        };
        let found = results
            .into_iter()
            .filter(|candidate| {
                candidate.kind == item.kind && candidate.library_id == library_id
            })
            .find(|candidate| is_match(item, candidate));
        if let Some(hit) = &found {
            debug!(
                library_id,
                title = %item.title,
                local_id = %hit.local_id,
                "matched through fallback search"
            );
        }
        self.ctx.remember_match(key, found.clone()).await;
        Ok(found)
    }

    /// Resolves every item; the result is keyed by each item's primary id, so
    /// items without one are resolved but not addressable.
    pub async fn batch_find(
        &self,
        items: &[CatalogItem],
        library_id: &str,
    ) -> Result<HashMap<u64, Option<LibraryItem>>, SyncError> {
        let mut resolved = HashMap::new();
        for item in items {
            let found = self.find(item, library_id).await?;
            if let Some(tmdb) = item.ids.tmdb {
                resolved.entry(tmdb).or_insert(found);
            }
        }
        Ok(resolved)
    }
}

fn find_in_index(index: &crate::index::LibraryIndex, item: &CatalogItem) -> Option<LibraryItem> {
    if let Some(tmdb) = item.ids.tmdb {
        if let Some(hit) = index.lookup_by_id(item.kind, ExternalId::Primary(tmdb)) {
            return Some(hit.clone());
        }
    }
    if let Some(imdb) = item.ids.imdb.as_deref().filter(|id| !id.is_empty()) {
        if let Some(hit) = index.lookup_by_id(item.kind, ExternalId::Secondary(imdb)) {
            return Some(hit.clone());
        }
    }
    index
        .lookup_by_title(item.kind, &normalize(&item.title))
        .into_iter()
        .find(|candidate| is_match(item, *candidate))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::{LibraryItem, MediaKind};

    fn movie(title: &str, year: Option<i32>) -> CatalogItem {
        let item = CatalogItem::new(MediaKind::Movie, title);
        match year {
            Some(year) => item.with_year(year),
            None => item,
        }
    }

    fn lib(title: &str, year: Option<i32>) -> LibraryItem {
        let item = LibraryItem::new("x", "movies", MediaKind::Movie, title);
        match year {
            Some(year) => item.with_year(year),
            None => item,
        }
    }

    #[test]
    fn year_tolerance_is_one_year() {
        assert!(is_match(&movie("Wonka", Some(2023)), &lib("Wonka", Some(2024))));
        assert!(is_match(&movie("Wonka", Some(2023)), &lib("Wonka", Some(2022))));
        assert!(!is_match(&movie("Wonka", Some(2023)), &lib("Wonka", Some(2026))));
    }

    #[test]
    fn extreme_years_do_not_overflow() {
        assert!(!is_match(&movie("Wonka", Some(i32::MIN)), &lib("Wonka", Some(i32::MAX))));
        assert!(is_match(&movie("Wonka", Some(i32::MAX)), &lib("Wonka", Some(i32::MAX - 1))));
    }

    #[test]
    fn missing_year_is_a_wildcard() {
        assert!(is_match(&movie("The Wonka", None), &lib("wonka", Some(1971))));
        assert!(is_match(&movie("Wonka", Some(2023)), &lib("Wonka", None)));
        assert!(!is_match(&movie("Wonka", None), &lib("Willy Wonka", None)));
    }

    #[test]
    fn shared_id_overrides_title_mismatch() {
        let a = movie("Dune: Part Two", Some(2024)).with_tmdb_id(693134);
        let b = lib("Dune Deux", Some(2019)).with_tmdb_id(693134);
        assert!(is_match(&a, &b));

        let a = movie("Alpha", None).with_imdb_id("tt1");
        let b = lib("Beta", None).with_imdb_id("tt1");
        assert!(is_match(&a, &b));

        let a = movie("Alpha", None).with_tvdb_id(9);
        let b = lib("Beta", None).with_tvdb_id(9);
        assert!(is_match(&a, &b));
    }

    #[test]
    fn different_ids_fall_through_to_title() {
        let a = movie("Heat", Some(1995)).with_tmdb_id(949);
        let b = lib("Heat", Some(1995)).with_tmdb_id(1);
        assert!(is_match(&a, &b));
        let c = lib("Heat", Some(1986)).with_tmdb_id(1);
        assert!(!is_match(&a, &c));
    }

    #[test]
    fn predicate_is_symmetric() {
        let items = vec![
            movie("The Fly", Some(1986)),
            movie("Fly", Some(1958)),
            movie("The Fly", None).with_tmdb_id(9426),
            movie("La Mouche", Some(1986)).with_tmdb_id(9426),
            movie("fly!", Some(1987)).with_imdb_id("tt0091064"),
            movie("Another", Some(1987)).with_imdb_id("tt0091064"),
        ];
        for a in &items {
            for b in &items {
                assert_eq!(is_match(a, b), is_match(b, a), "{} vs {}", a.title, b.title);
            }
        }
    }
}
