#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reel_adapters::{
    AdapterContext, AdapterError, JsonLibrary, LibraryService, LibrarySnapshot, ProviderMode,
    ProviderSource,
};
use reel_core::{
    CatalogItem, CollectionSpec, DisplayMetadata, LibraryItem, MediaKind, OrderingPolicy,
    SourceQuery,
};
use reel_sync::{
    CollectionsFile, LibraryAcquisition, LibraryConfig, SourceConfig, SyncConfig, SyncPipeline,
};

/// Provider returning a fixed list, or failing every call.
pub struct StaticProvider {
    id: String,
    items: Vec<CatalogItem>,
    fail: bool,
}

impl StaticProvider {
    pub fn new(id: &str, items: Vec<CatalogItem>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            items,
            fail: false,
        })
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            items: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl ProviderSource for StaticProvider {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(
        &self,
        _ctx: &AdapterContext,
        kind: MediaKind,
        query: &SourceQuery,
    ) -> Result<Vec<CatalogItem>, AdapterError> {
        if self.fail {
            return Err(AdapterError::Message("upstream unavailable".into()));
        }
        Ok(self
            .items
            .iter()
            .filter(|item| item.kind == kind)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .map(|mut item| {
                item.source_id = self.id.clone();
                item
            })
            .collect())
    }
}

/// In-memory library that records every mutation and can be told to fail.
pub struct RecordingLibrary {
    pub inner: JsonLibrary,
    /// Found by `search_items` but absent from `list_items`.
    pub search_only: Vec<LibraryItem>,
    pub list_calls: AtomicUsize,
    pub mutations: Mutex<Vec<String>>,
    /// Highest number of mutating calls seen running at once.
    pub max_concurrent_writes: AtomicUsize,
    writes_in_flight: AtomicUsize,
    pub fail_add: Mutex<HashSet<String>>,
    pub fail_search: Mutex<bool>,
}

impl RecordingLibrary {
    pub fn new(snapshot: LibrarySnapshot) -> Arc<Self> {
        Arc::new(Self::with_search_only(snapshot, Vec::new()))
    }

    pub fn with_search_only(snapshot: LibrarySnapshot, search_only: Vec<LibraryItem>) -> Self {
        Self {
            inner: JsonLibrary::in_memory(snapshot),
            search_only,
            list_calls: AtomicUsize::new(0),
            mutations: Mutex::new(Vec::new()),
            max_concurrent_writes: AtomicUsize::new(0),
            writes_in_flight: AtomicUsize::new(0),
            fail_add: Mutex::new(HashSet::new()),
            fail_search: Mutex::new(false),
        }
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    pub fn fail_adds_to(&self, collection: &str) {
        self.fail_add.lock().unwrap().insert(collection.to_string());
    }

    pub fn clear_faults(&self) {
        self.fail_add.lock().unwrap().clear();
        *self.fail_search.lock().unwrap() = false;
    }

    pub async fn members(&self, collection: &str) -> Option<Vec<String>> {
        self.inner
            .snapshot()
            .await
            .collection(collection)
            .map(|c| c.members.clone())
    }

    async fn name_of(&self, collection_id: &str) -> String {
        self.inner
            .snapshot()
            .await
            .collections
            .iter()
            .find(|c| c.id == collection_id)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    fn record(&self, entry: String) {
        self.mutations.lock().unwrap().push(entry);
    }

    /// Runs a mutating call, yielding once inside it so overlapping callers
    /// on the same task become visible in `max_concurrent_writes`.
    async fn write<T>(&self, call: impl Future<Output = T>) -> T {
        let now = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_writes.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let out = call.await;
        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl LibraryService for RecordingLibrary {
    async fn list_items(&self, library_id: &str) -> Result<Vec<LibraryItem>, AdapterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_items(library_id).await
    }

    async fn search_items(
        &self,
        kind: MediaKind,
        title: &str,
    ) -> Result<Vec<LibraryItem>, AdapterError> {
        if *self.fail_search.lock().unwrap() {
            return Err(AdapterError::Message("search unavailable".into()));
        }
        let mut found = self.inner.search_items(kind, title).await?;
        found.extend(
            self.search_only
                .iter()
                .filter(|item| item.kind == kind && item.title == title)
                .cloned(),
        );
        Ok(found)
    }

    async fn find_collection(&self, name: &str) -> Result<Option<String>, AdapterError> {
        self.inner.find_collection(name).await
    }

    async fn create_collection(&self, name: &str) -> Result<String, AdapterError> {
        self.record(format!("create {name}"));
        self.write(self.inner.create_collection(name)).await
    }

    async fn get_collection_members(
        &self,
        collection_id: &str,
    ) -> Result<Vec<String>, AdapterError> {
        self.inner.get_collection_members(collection_id).await
    }

    async fn add_to_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AdapterError> {
        let name = self.name_of(collection_id).await;
        if self.fail_add.lock().unwrap().contains(&name) {
            return Err(AdapterError::Message(format!("add to {name} rejected")));
        }
        self.record(format!("add {name} {ids:?}"));
        self.write(self.inner.add_to_collection(collection_id, ids)).await
    }

    async fn remove_from_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AdapterError> {
        let name = self.name_of(collection_id).await;
        self.record(format!("remove {name} {ids:?}"));
        self.write(self.inner.remove_from_collection(collection_id, ids)).await
    }

    async fn get_display_metadata(
        &self,
        collection_id: &str,
    ) -> Result<Option<DisplayMetadata>, AdapterError> {
        self.inner.get_display_metadata(collection_id).await
    }

    async fn set_display_metadata(
        &self,
        collection_id: &str,
        metadata: &DisplayMetadata,
    ) -> Result<(), AdapterError> {
        let name = self.name_of(collection_id).await;
        self.record(format!("display {name} {}", metadata.ordering));
        self.write(self.inner.set_display_metadata(collection_id, metadata)).await
    }
}

pub fn movie(title: &str, year: i32, tmdb: Option<u64>) -> CatalogItem {
    let item = CatalogItem::new(MediaKind::Movie, title).with_year(year);
    match tmdb {
        Some(id) => item.with_tmdb_id(id),
        None => item,
    }
}

/// Alien, Blade Runner, Heat (no ids) and Zodiac.
pub fn movie_library() -> LibrarySnapshot {
    LibrarySnapshot {
        items: vec![
            LibraryItem::new("l1", "movies", MediaKind::Movie, "Alien")
                .with_year(1979)
                .with_tmdb_id(348),
            LibraryItem::new("l2", "movies", MediaKind::Movie, "Blade Runner")
                .with_year(1982)
                .with_tmdb_id(78)
                .with_imdb_id("tt0083658"),
            LibraryItem::new("l3", "movies", MediaKind::Movie, "Heat").with_year(1995),
            LibraryItem::new("l4", "movies", MediaKind::Movie, "Zodiac")
                .with_year(2007)
                .with_tmdb_id(1949),
        ],
        collections: Vec::new(),
    }
}

/// Zodiac, Alien, Heat (title match only) and one title the library lacks.
pub fn trending() -> Vec<CatalogItem> {
    vec![
        movie("Zodiac", 2007, Some(1949)),
        movie("Alien", 1979, Some(348)),
        movie("Heat", 1995, None),
        movie("The Wild Robot", 2024, Some(1184918)),
    ]
}

pub fn spec(name: &str, ordering: OrderingPolicy, sources: &[&str]) -> CollectionSpec {
    let mut spec = CollectionSpec::new(name);
    spec.ordering = ordering;
    spec.sources = sources.iter().map(|s| SourceQuery::new(*s)).collect();
    spec
}

pub fn collections_file(specs: Vec<CollectionSpec>, sources: &[&str]) -> CollectionsFile {
    CollectionsFile {
        sources: sources
            .iter()
            .map(|id| SourceConfig {
                source_id: id.to_string(),
                display_name: id.to_string(),
                enabled: true,
                mode: ProviderMode::Fixture {
                    path: PathBuf::from(format!("fixtures/{id}.json")),
                },
            })
            .collect(),
        libraries: vec![LibraryConfig {
            name: "Movies".into(),
            library_id: "movies".into(),
            kind: MediaKind::Movie,
            acquisition: LibraryAcquisition {
                enabled: true,
                options: Default::default(),
            },
            collections: specs,
        }],
    }
}

pub fn pipeline(
    specs: Vec<CollectionSpec>,
    library: Arc<RecordingLibrary>,
    providers: Vec<Arc<StaticProvider>>,
) -> SyncPipeline {
    let ids = providers.iter().map(|p| p.source_id().to_string()).collect::<Vec<_>>();
    let ids = ids.iter().map(String::as_str).collect::<Vec<_>>();
    let mut pipeline = SyncPipeline::new(
        SyncConfig::default(),
        collections_file(specs, &ids),
        library,
    )
    .expect("valid collections");
    for provider in providers {
        pipeline = pipeline.with_provider(provider);
    }
    pipeline
}
