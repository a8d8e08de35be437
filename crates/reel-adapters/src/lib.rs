//! Collaborator contracts (catalog providers, library service, acquisition
//! services) and the fixture/file/HTTP-backed implementations of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reel_core::{
    AcquisitionOptions, CatalogItem, DisplayMetadata, ExternalIds, LibraryItem, MediaKind,
    SourceQuery,
};
use reel_storage::{FetchError, HttpFetcher};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

mod acquisition;
mod json_library;

pub use acquisition::{AcquisitionLedger, AcquisitionRequest, JsonAcquisitionQueue};
pub use json_library::{JsonLibrary, LibrarySnapshot, RemoteCollection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

impl AdapterContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("collection {0} not found")]
    CollectionNotFound(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// A catalog feed (trending, popular, discover, user list...).
#[async_trait]
pub trait ProviderSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch(
        &self,
        ctx: &AdapterContext,
        kind: MediaKind,
        query: &SourceQuery,
    ) -> Result<Vec<CatalogItem>, AdapterError>;
}

/// The media library holding items and the collections being synced.
#[async_trait]
pub trait LibraryService: Send + Sync {
    async fn list_items(&self, library_id: &str) -> Result<Vec<LibraryItem>, AdapterError>;

    async fn search_items(
        &self,
        kind: MediaKind,
        title: &str,
    ) -> Result<Vec<LibraryItem>, AdapterError>;

    async fn find_collection(&self, name: &str) -> Result<Option<String>, AdapterError>;

    async fn create_collection(&self, name: &str) -> Result<String, AdapterError>;

    /// Current members in insertion (display) order.
    async fn get_collection_members(
        &self,
        collection_id: &str,
    ) -> Result<Vec<String>, AdapterError>;

    async fn add_to_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AdapterError>;

    async fn remove_from_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AdapterError>;

    async fn get_display_metadata(
        &self,
        collection_id: &str,
    ) -> Result<Option<DisplayMetadata>, AdapterError>;

    async fn set_display_metadata(
        &self,
        collection_id: &str,
        metadata: &DisplayMetadata,
    ) -> Result<(), AdapterError>;
}

/// Download manager for one media kind. Movies are keyed by their primary
/// id, series by their tertiary id.
#[async_trait]
pub trait AcquisitionService: Send + Sync {
    fn kind(&self) -> MediaKind;

    async fn exists(&self, external_id: u64) -> Result<bool, AdapterError>;

    async fn is_excluded(&self, external_id: u64) -> Result<bool, AdapterError>;

    async fn is_blocklisted(&self, external_id: u64) -> Result<bool, AdapterError>;

    async fn request(
        &self,
        external_id: u64,
        title: &str,
        options: &AcquisitionOptions,
    ) -> Result<bool, AdapterError>;
}

/// How a registered source is backed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProviderMode {
    /// JSON catalog file, relative to the workspace root.
    Fixture { path: PathBuf },
    /// JSON feed; `{kind}` in the URL expands to `movie` or `series`.
    Http { url: String },
}

pub fn build_provider(
    source_id: &str,
    mode: &ProviderMode,
    workspace_root: &Path,
    http: Arc<HttpFetcher>,
) -> Arc<dyn ProviderSource> {
    match mode {
        ProviderMode::Fixture { path } => Arc::new(FixtureProvider::new(
            source_id,
            workspace_root.join(path),
        )),
        ProviderMode::Http { url } => Arc::new(HttpJsonProvider::new(source_id, url, http)),
    }
}

/// On-disk catalog fixture: loosely-typed provider records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFixture {
    pub source_id: String,
    #[serde(default)]
    pub captured_from_url: Option<String>,
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
    pub items: Vec<JsonValue>,
}

pub async fn load_catalog_fixture(path: &Path) -> anyhow::Result<CatalogFixture> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct FixtureProvider {
    source_id: String,
    path: PathBuf,
}

impl FixtureProvider {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl ProviderSource for FixtureProvider {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(
        &self,
        _ctx: &AdapterContext,
        kind: MediaKind,
        query: &SourceQuery,
    ) -> Result<Vec<CatalogItem>, AdapterError> {
        let fixture = load_catalog_fixture(&self.path).await?;
        if fixture.source_id != self.source_id {
            return Err(AdapterError::Message(format!(
                "fixture source_id={} does not match provider source_id={}",
                fixture.source_id, self.source_id
            )));
        }
        Ok(records_to_items(&fixture.items, kind, &self.source_id, query.limit))
    }
}

#[derive(Debug, Clone)]
pub struct HttpJsonProvider {
    source_id: String,
    url_template: String,
    http: Arc<HttpFetcher>,
}

impl HttpJsonProvider {
    pub fn new(
        source_id: impl Into<String>,
        url_template: impl Into<String>,
        http: Arc<HttpFetcher>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            url_template: url_template.into(),
            http,
        }
    }

    /// Feed URL for `kind`, with the query params form-encoded after any
    /// query the template already carries.
    pub fn url_for(&self, kind: MediaKind, query: &SourceQuery) -> Result<Url, AdapterError> {
        let base = self.url_template.replace("{kind}", kind.as_str());
        let mut url = Url::parse(&base)
            .map_err(|err| AdapterError::Message(format!("invalid feed url {base}: {err}")))?;
        if !query.params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &query.params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ProviderSource for HttpJsonProvider {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(
        &self,
        ctx: &AdapterContext,
        kind: MediaKind,
        query: &SourceQuery,
    ) -> Result<Vec<CatalogItem>, AdapterError> {
        let url = self.url_for(kind, query)?;
        let response = self
            .http
            .fetch_bytes(ctx.run_id, &self.source_id, url.as_str())
            .await?;
        let payload: JsonValue = serde_json::from_slice(&response.body)?;
        let records = match &payload {
            JsonValue::Array(items) => items.as_slice(),
            other => other
                .get("results")
                .or_else(|| other.get("items"))
                .and_then(|v| v.as_array())
                .map(|v| v.as_slice())
                .ok_or_else(|| {
                    AdapterError::Message(format!("no item list in payload from {url}"))
                })?,
        };
        Ok(records_to_items(records, kind, &self.source_id, query.limit))
    }
}

/// Translate provider records into catalog items of `kind`, keeping order.
pub fn records_to_items(
    records: &[JsonValue],
    kind: MediaKind,
    source_id: &str,
    limit: Option<usize>,
) -> Vec<CatalogItem> {
    let items = records
        .iter()
        .filter_map(|record| catalog_item_from_record(record, kind, source_id));
    match limit {
        Some(limit) => items.take(limit).collect(),
        None => items.collect(),
    }
}

/// Build a strict catalog item from one loosely-typed record. Records of the
/// other media kind, or without any title, yield `None`.
pub fn catalog_item_from_record(
    record: &JsonValue,
    kind: MediaKind,
    source_id: &str,
) -> Option<CatalogItem> {
    // List feeds wrap the payload as {"movie": {...}} or {"show": {...}}.
    let (record, wrapped_kind) = match (record.get("movie"), record.get("show")) {
        (Some(inner), _) if inner.is_object() => (inner, Some(MediaKind::Movie)),
        (_, Some(inner)) if inner.is_object() => (inner, Some(MediaKind::Series)),
        _ => (record, None),
    };

    let declared_kind = wrapped_kind.or_else(|| {
        json_str(record, &["media_type"]).and_then(|t| match t {
            "movie" => Some(MediaKind::Movie),
            "tv" | "series" | "show" => Some(MediaKind::Series),
            _ => None,
        })
    });
    if declared_kind.is_some_and(|declared| declared != kind) {
        return None;
    }

    let Some(title) = json_str(record, &["title"])
        .or_else(|| json_str(record, &["name"]))
        .or_else(|| json_str(record, &["original_title"]))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        debug!(source_id, "dropping provider record without title");
        return None;
    };

    let release_date = json_str(record, &["release_date"])
        .or_else(|| json_str(record, &["first_air_date"]))
        .or_else(|| json_str(record, &["released"]))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
    let year = json_i64(record, &["year"])
        .and_then(|y| i32::try_from(y).ok())
        .or_else(|| release_date.map(|d| d.year()));

    let ids = ExternalIds {
        tmdb: json_u64(record, &["tmdb_id"])
            .or_else(|| json_u64(record, &["ids", "tmdb"]))
            .or_else(|| json_u64(record, &["id"])),
        imdb: json_str(record, &["imdb_id"])
            .or_else(|| json_str(record, &["ids", "imdb"]))
            .filter(|s| !s.is_empty())
            .map(ToString::to_string),
        tvdb: json_u64(record, &["tvdb_id"]).or_else(|| json_u64(record, &["ids", "tvdb"])),
    };

    let mut item = CatalogItem::new(kind, title);
    item.year = year;
    item.release_date = release_date;
    item.ids = ids;
    item.genres = json_genres(record);
    item.vote_average = json_f64(record, &["vote_average"]).or_else(|| json_f64(record, &["rating"]));
    item.vote_count = json_u64(record, &["vote_count"]).or_else(|| json_u64(record, &["votes"]));
    item.original_language = json_str(record, &["original_language"])
        .or_else(|| json_str(record, &["language"]))
        .map(ToString::to_string);
    item.origin_countries = match record.get("origin_country").or_else(|| record.get("country")) {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        _ => Vec::new(),
    };
    item.source_id = source_id.to_string();
    Some(item)
}

fn json_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_path(value, path)?.as_str()
}

fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    json_path(value, path)?.as_f64()
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    let v = json_path(value, path)?;
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn json_u64(value: &JsonValue, path: &[&str]) -> Option<u64> {
    let v = json_path(value, path)?;
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn json_genres(record: &JsonValue) -> Vec<u32> {
    let Some(values) = record
        .get("genre_ids")
        .or_else(|| record.get("genres"))
        .and_then(|v| v.as_array())
    else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|v| match v {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            JsonValue::Object(_) => v.get("id").and_then(|id| id.as_u64()),
            _ => None,
        })
        .filter_map(|id| u32::try_from(id).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discover_record_translates_to_catalog_item() {
        let record = json!({
            "id": 693134,
            "title": "Dune: Part Two",
            "release_date": "2024-02-27",
            "genre_ids": [878, 12],
            "vote_average": 8.2,
            "vote_count": 5400,
            "original_language": "en",
            "origin_country": ["US"]
        });
        let item = catalog_item_from_record(&record, MediaKind::Movie, "tmdb-trending").unwrap();
        assert_eq!(item.title, "Dune: Part Two");
        assert_eq!(item.year, Some(2024));
        assert_eq!(item.ids.tmdb, Some(693134));
        assert_eq!(item.genres, vec![878, 12]);
        assert_eq!(item.vote_count, Some(5400));
        assert_eq!(item.origin_countries, vec!["US".to_string()]);
        assert_eq!(item.source_id, "tmdb-trending");
    }

    #[test]
    fn wrapped_list_record_uses_nested_ids() {
        let record = json!({
            "watchers": 120,
            "show": {
                "title": "Severance",
                "year": 2022,
                "ids": {"tmdb": 95396, "imdb": "tt11280740", "tvdb": 371980}
            }
        });
        let item = catalog_item_from_record(&record, MediaKind::Series, "trakt-trending").unwrap();
        assert_eq!(item.ids.tvdb, Some(371980));
        assert_eq!(item.ids.imdb.as_deref(), Some("tt11280740"));
        assert!(catalog_item_from_record(&record, MediaKind::Movie, "trakt-trending").is_none());
    }

    #[test]
    fn records_of_other_kind_or_without_title_are_dropped() {
        let records = vec![
            json!({"id": 1, "name": "Show", "media_type": "tv", "first_air_date": "2020-01-01"}),
            json!({"id": 2, "title": "Film", "media_type": "movie"}),
            json!({"id": 3}),
            json!({"id": 4, "title": "Other Film", "genres": [{"id": 18, "name": "Drama"}]}),
        ];
        let items = records_to_items(&records, MediaKind::Movie, "tmdb", None);
        let titles = items.iter().map(|i| i.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Film", "Other Film"]);
        assert_eq!(items[1].genres, vec![18]);
        assert_eq!(items[0].year, None);

        let limited = records_to_items(&records, MediaKind::Movie, "tmdb", Some(1));
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn http_provider_expands_kind_and_params() {
        let http = Arc::new(HttpFetcher::new(Default::default()).unwrap());
        let provider = HttpJsonProvider::new("feed", "https://feeds.example/{kind}/trending", http);
        let mut query = SourceQuery::new("feed");
        query.params.insert("window".into(), "week".into());
        assert_eq!(
            provider.url_for(MediaKind::Series, &query).unwrap().as_str(),
            "https://feeds.example/series/trending?window=week"
        );
    }

    #[test]
    fn http_provider_encodes_param_values() {
        let http = Arc::new(HttpFetcher::new(Default::default()).unwrap());
        let provider =
            HttpJsonProvider::new("search", "https://feeds.example/{kind}?page=1", http);
        let mut query = SourceQuery::new("search");
        query.params.insert("query".into(), "star wars & co".into());
        let url = provider.url_for(MediaKind::Movie, &query).unwrap();
        assert_eq!(url.as_str(), "https://feeds.example/movie?page=1&query=star+wars+%26+co");
        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                ("page".to_string(), "1".to_string()),
                ("query".to_string(), "star wars & co".to_string()),
            ]
        );

        let broken = HttpJsonProvider::new(
            "broken",
            "not a url/{kind}",
            Arc::new(HttpFetcher::new(Default::default()).unwrap()),
        );
        assert!(broken.url_for(MediaKind::Movie, &query).is_err());
    }

    #[test]
    fn out_of_range_year_is_dropped() {
        let record = json!({"title": "Far Future", "year": 9_000_000_000_i64, "release_date": "2031-05-01"});
        let item = catalog_item_from_record(&record, MediaKind::Movie, "feed").unwrap();
        assert_eq!(item.year, Some(2031));
    }
}
