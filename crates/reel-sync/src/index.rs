use std::collections::HashMap;

use reel_adapters::{AdapterError, LibraryService};
use reel_core::{normalize, ExternalId, LibraryItem, MediaKind};
use tracing::info;

/// Snapshot of one library keyed by primary id, secondary id and normalized
/// title. Built from a single bulk listing and never mutated afterwards.
#[derive(Debug, Default)]
pub struct LibraryIndex {
    library_id: String,
    items: Vec<LibraryItem>,
    by_primary: HashMap<(MediaKind, u64), usize>,
    by_secondary: HashMap<(MediaKind, String), usize>,
    by_title: HashMap<(MediaKind, String), Vec<usize>>,
}

impl LibraryIndex {
    pub async fn build(
        library: &dyn LibraryService,
        library_id: &str,
    ) -> Result<Self, AdapterError> {
        let items = library.list_items(library_id).await?;
        let index = Self::from_items(library_id, items);
        info!(
            library_id,
            items = index.len(),
            primary_ids = index.by_primary.len(),
            titles = index.by_title.len(),
            "library index built"
        );
        Ok(index)
    }

    pub fn from_items(library_id: &str, items: Vec<LibraryItem>) -> Self {
        let mut by_primary = HashMap::new();
        let mut by_secondary = HashMap::new();
        let mut by_title: HashMap<(MediaKind, String), Vec<usize>> = HashMap::new();

        for (pos, item) in items.iter().enumerate() {
            if let Some(tmdb) = item.ids.tmdb {
                by_primary.entry((item.kind, tmdb)).or_insert(pos);
            }
            if let Some(imdb) = item.ids.imdb.as_deref().filter(|id| !id.is_empty()) {
                by_secondary.entry((item.kind, imdb.to_string())).or_insert(pos);
            }
            by_title
                .entry((item.kind, normalize(&item.title)))
                .or_default()
                .push(pos);
        }

        Self {
            library_id: library_id.to_string(),
            items,
            by_primary,
            by_secondary,
            by_title,
        }
    }

    pub fn library_id(&self) -> &str {
        &self.library_id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn lookup_by_id(&self, kind: MediaKind, id: ExternalId<'_>) -> Option<&LibraryItem> {
        let pos = match id {
            ExternalId::Primary(tmdb) => self.by_primary.get(&(kind, tmdb)),
            ExternalId::Secondary(imdb) => self.by_secondary.get(&(kind, imdb.to_string())),
        }?;
        self.items.get(*pos)
    }

    /// Library items of `kind` whose normalized title equals `normalized_title`.
    pub fn lookup_by_title(&self, kind: MediaKind, normalized_title: &str) -> Vec<&LibraryItem> {
        self.by_title
            .get(&(kind, normalized_title.to_string()))
            .map(|positions| positions.iter().filter_map(|p| self.items.get(*p)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LibraryIndex {
        LibraryIndex::from_items(
            "movies",
            vec![
                LibraryItem::new("a", "movies", MediaKind::Movie, "The Thing")
                    .with_year(1982)
                    .with_tmdb_id(1091)
                    .with_imdb_id("tt0084787"),
                LibraryItem::new("b", "movies", MediaKind::Movie, "The Thing").with_year(2011),
                LibraryItem::new("c", "movies", MediaKind::Series, "Thing").with_tmdb_id(1091),
            ],
        )
    }

    #[test]
    fn ids_are_scoped_by_kind() {
        let index = index();
        assert_eq!(
            index
                .lookup_by_id(MediaKind::Movie, ExternalId::Primary(1091))
                .map(|i| i.local_id.as_str()),
            Some("a")
        );
        assert_eq!(
            index
                .lookup_by_id(MediaKind::Series, ExternalId::Primary(1091))
                .map(|i| i.local_id.as_str()),
            Some("c")
        );
        assert!(index
            .lookup_by_id(MediaKind::Series, ExternalId::Secondary("tt0084787"))
            .is_none());
    }

    #[test]
    fn title_lookup_returns_every_collision() {
        let index = index();
        let hits = index.lookup_by_title(MediaKind::Movie, "thing");
        assert_eq!(hits.len(), 2);
        assert_eq!(index.lookup_by_title(MediaKind::Series, "thing").len(), 1);
        assert!(index.lookup_by_title(MediaKind::Movie, "thing 2").is_empty());
        assert_eq!(index.len(), 3);
    }
}
