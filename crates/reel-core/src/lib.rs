//! Core domain model shared by the reel crates: catalog and library items,
//! collection definitions, and reconciliation plans.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

mod normalize;

pub use normalize::{normalize, LEADING_ARTICLES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    #[serde(alias = "tv", alias = "show")]
    Series,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cross-catalog identifiers. `tmdb` is the primary id, `imdb` the secondary
/// and `tvdb` the tertiary cross-reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalIds {
    #[serde(default)]
    pub tmdb: Option<u64>,
    #[serde(default)]
    pub imdb: Option<String>,
    #[serde(default)]
    pub tvdb: Option<u64>,
}

impl ExternalIds {
    pub fn is_empty(&self) -> bool {
        self.tmdb.is_none() && self.imdb.is_none() && self.tvdb.is_none()
    }
}

/// Identifier usable as a Library Index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalId<'a> {
    Primary(u64),
    Secondary(&'a str),
}

/// Anything that can be compared by ids, title and year.
pub trait MediaIdentity {
    fn kind(&self) -> MediaKind;
    fn ids(&self) -> &ExternalIds;
    fn title(&self) -> &str;
    fn year(&self) -> Option<i32>;
}

/// A title offered by a catalog provider, not yet matched against a library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub title: String,
    pub year: Option<i32>,
    pub kind: MediaKind,
    #[serde(default)]
    pub ids: ExternalIds,
    #[serde(default)]
    pub release_date: Option<NaiveDate>,
    #[serde(default)]
    pub genres: Vec<u32>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default)]
    pub vote_count: Option<u64>,
    #[serde(default)]
    pub original_language: Option<String>,
    #[serde(default)]
    pub origin_countries: Vec<String>,
    /// Provider source that produced the item.
    #[serde(default)]
    pub source_id: String,
}

impl CatalogItem {
    pub fn new(kind: MediaKind, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            year: None,
            kind,
            ids: ExternalIds::default(),
            release_date: None,
            genres: Vec::new(),
            vote_average: None,
            vote_count: None,
            original_language: None,
            origin_countries: Vec::new(),
            source_id: String::new(),
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_tmdb_id(mut self, id: u64) -> Self {
        self.ids.tmdb = Some(id);
        self
    }

    pub fn with_imdb_id(mut self, id: impl Into<String>) -> Self {
        self.ids.imdb = Some(id.into());
        self
    }

    pub fn with_tvdb_id(mut self, id: u64) -> Self {
        self.ids.tvdb = Some(id);
        self
    }

    pub fn display_title(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({year})", self.title),
            None => self.title.clone(),
        }
    }
}

impl MediaIdentity for CatalogItem {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn ids(&self) -> &ExternalIds {
        &self.ids
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn year(&self) -> Option<i32> {
        self.year
    }
}

/// An entry of the managed library. Never mutated by the sync core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub local_id: String,
    pub title: String,
    #[serde(default)]
    pub sort_name: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    pub kind: MediaKind,
    #[serde(default)]
    pub ids: ExternalIds,
    pub library_id: String,
    #[serde(default)]
    pub premiere_date: Option<NaiveDate>,
    #[serde(default)]
    pub community_rating: Option<f32>,
    #[serde(default)]
    pub date_added: Option<DateTime<Utc>>,
}

impl LibraryItem {
    pub fn new(
        local_id: impl Into<String>,
        library_id: impl Into<String>,
        kind: MediaKind,
        title: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            title: title.into(),
            sort_name: None,
            year: None,
            kind,
            ids: ExternalIds::default(),
            library_id: library_id.into(),
            premiere_date: None,
            community_rating: None,
            date_added: None,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_tmdb_id(mut self, id: u64) -> Self {
        self.ids.tmdb = Some(id);
        self
    }

    pub fn with_imdb_id(mut self, id: impl Into<String>) -> Self {
        self.ids.imdb = Some(id.into());
        self
    }

    pub fn with_tvdb_id(mut self, id: u64) -> Self {
        self.ids.tvdb = Some(id);
        self
    }
}

impl MediaIdentity for LibraryItem {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn ids(&self) -> &ExternalIds {
        &self.ids
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn year(&self) -> Option<i32> {
        self.year
    }
}

/// A catalog item paired with the library entry it resolved to, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub item: CatalogItem,
    pub library_item: Option<LibraryItem>,
}

/// Assembler output: one entry per surviving catalog item.
pub type AnnotatedItem = MatchResult;

impl MatchResult {
    /// Pairs `item` with `library_item`; a library item of another media kind
    /// is discarded so a match always agrees on kind.
    pub fn new(item: CatalogItem, library_item: Option<LibraryItem>) -> Self {
        let library_item = library_item.filter(|lib| lib.kind == item.kind);
        Self { item, library_item }
    }

    pub fn is_matched(&self) -> bool {
        self.library_item.is_some()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.library_item.as_ref().map(|lib| lib.local_id.as_str())
    }
}

/// Display order of a synced collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingPolicy {
    #[default]
    #[serde(alias = "Default")]
    Custom,
    Random,
    #[serde(alias = "alpha", alias = "SortName", alias = "sort_name")]
    Name,
    #[serde(alias = "release", alias = "PremiereDate", alias = "release_date")]
    ReleaseDate,
    #[serde(alias = "CommunityRating", alias = "critic_rating", alias = "CriticRating")]
    Rating,
    #[serde(alias = "added", alias = "DateCreated", alias = "date_added")]
    DateAdded,
}

impl OrderingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderingPolicy::Custom => "custom",
            OrderingPolicy::Random => "random",
            OrderingPolicy::Name => "name",
            OrderingPolicy::ReleaseDate => "release-date",
            OrderingPolicy::Rating => "rating",
            OrderingPolicy::DateAdded => "date-added",
        }
    }

    /// Library-native display order label for this policy.
    pub fn display_order(&self) -> &'static str {
        match self {
            OrderingPolicy::Custom | OrderingPolicy::Random => "Default",
            OrderingPolicy::Name => "SortName",
            OrderingPolicy::ReleaseDate => "PremiereDate",
            OrderingPolicy::Rating => "CommunityRating",
            OrderingPolicy::DateAdded => "DateCreated",
        }
    }
}

impl fmt::Display for OrderingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative filters, AND-combined. A missing attribute on an item never
/// excludes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    #[serde(default, rename = "year.gte", alias = "year_gte")]
    pub year_gte: Option<i32>,
    #[serde(default, rename = "year.lte", alias = "year_lte")]
    pub year_lte: Option<i32>,
    #[serde(default, rename = "vote_average.gte", alias = "critic_rating.gte", alias = "rating_gte")]
    pub rating_gte: Option<f64>,
    #[serde(default, rename = "vote_average.lte", alias = "rating_lte")]
    pub rating_lte: Option<f64>,
    #[serde(default, rename = "tmdb_vote_count.gte", alias = "vote_count.gte", alias = "vote_count_gte")]
    pub vote_count_gte: Option<u64>,
    #[serde(default, rename = "tmdb_vote_count.lte", alias = "vote_count.lte", alias = "vote_count_lte")]
    pub vote_count_lte: Option<u64>,
    #[serde(default)]
    pub with_genres: Vec<u32>,
    #[serde(default)]
    pub without_genres: Vec<u32>,
    #[serde(default, rename = "original_language.not", alias = "original_language_not")]
    pub original_language_not: Vec<String>,
    #[serde(default, rename = "origin_country.not", alias = "country.not", alias = "origin_country_not")]
    pub origin_country_not: Vec<String>,
}

/// One provider query feeding a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub source: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl SourceQuery {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            enabled: true,
            limit: None,
            params: BTreeMap::new(),
        }
    }
}

/// Options passed to an acquisition service when requesting a missing title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionOptions {
    #[serde(default)]
    pub root_folder: Option<String>,
    #[serde(default)]
    pub quality_profile: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub monitored: bool,
    #[serde(default = "default_true")]
    pub search_on_add: bool,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            root_folder: None,
            quality_profile: None,
            tags: Vec::new(),
            monitored: true,
            search_on_add: true,
        }
    }
}

impl AcquisitionOptions {
    /// Collection-level values win over library-level ones.
    pub fn overridden_by(&self, other: Option<&AcquisitionOptions>) -> AcquisitionOptions {
        let Some(other) = other else {
            return self.clone();
        };
        AcquisitionOptions {
            root_folder: other.root_folder.clone().or_else(|| self.root_folder.clone()),
            quality_profile: other
                .quality_profile
                .clone()
                .or_else(|| self.quality_profile.clone()),
            tags: if other.tags.is_empty() {
                self.tags.clone()
            } else {
                other.tags.clone()
            },
            monitored: other.monitored,
            search_on_add: other.search_on_add,
        }
    }
}

/// Declarative description of one target collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(default, alias = "collection_order")]
    pub ordering: OrderingPolicy,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sources: Vec<SourceQuery>,
    #[serde(default)]
    pub filters: FilterSpec,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sort_title: Option<String>,
    #[serde(default = "default_true")]
    pub add_missing: bool,
    #[serde(default)]
    pub acquisition: Option<AcquisitionOptions>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ordering: OrderingPolicy::Custom,
            limit: None,
            sources: Vec::new(),
            filters: FilterSpec::default(),
            summary: None,
            sort_title: None,
            add_missing: true,
            acquisition: None,
        }
    }
}

/// Display metadata recorded on a remote collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub ordering: OrderingPolicy,
    pub display_order: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub sort_name: Option<String>,
}

impl DisplayMetadata {
    pub fn for_spec(spec: &CollectionSpec) -> Self {
        Self {
            ordering: spec.ordering,
            display_order: spec.ordering.display_order().to_string(),
            overview: spec.summary.clone(),
            sort_name: spec.sort_title.clone(),
        }
    }
}

/// Minimal mutation turning a remote collection into its target state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    pub collection_id: String,
    pub collection_existed: bool,
    pub ordering: OrderingPolicy,
    /// Members read from the remote collection.
    pub current: BTreeSet<String>,
    /// Matched local ids in display order, without duplicates.
    pub target: Vec<String>,
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
    /// Clear and re-add `target` to impose its order.
    pub rewrite: bool,
    /// Display metadata found on the remote collection before this cycle.
    pub recorded_display: Option<DisplayMetadata>,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        !self.rewrite && self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

fn default_true() -> bool {
    true
}
