use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use reel_adapters::LibraryService;
use reel_core::{normalize, CatalogItem, LibraryItem, MediaKind};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::index::LibraryIndex;
use crate::SyncError;

/// Key of the per-run match cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Primary {
        library_id: String,
        kind: MediaKind,
        tmdb: u64,
    },
    Title {
        library_id: String,
        kind: MediaKind,
        title: String,
        year: Option<i32>,
    },
}

impl MatchKey {
    pub fn for_item(library_id: &str, item: &CatalogItem) -> Self {
        match item.ids.tmdb {
            Some(tmdb) => MatchKey::Primary {
                library_id: library_id.to_string(),
                kind: item.kind,
                tmdb,
            },
            None => MatchKey::Title {
                library_id: library_id.to_string(),
                kind: item.kind,
                title: normalize(&item.title),
                year: item.year,
            },
        }
    }

    fn library_id(&self) -> &str {
        match self {
            MatchKey::Primary { library_id, .. } | MatchKey::Title { library_id, .. } => library_id,
        }
    }
}

type IndexCell = Arc<OnceCell<Arc<LibraryIndex>>>;

/// Everything memoized during one run. Dropped when the run ends, so a run
/// depends only on its inputs and this context.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    dry_run: bool,
    cancel: CancellationToken,
    indexes: Mutex<HashMap<String, IndexCell>>,
    matches: Mutex<HashMap<MatchKey, Option<LibraryItem>>>,
    collection_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    acquisitions: Mutex<HashSet<(MediaKind, u64)>>,
}

impl RunContext {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            dry_run: false,
            cancel: CancellationToken::new(),
            indexes: Mutex::new(HashMap::new()),
            matches: Mutex::new(HashMap::new()),
            collection_locks: Mutex::new(HashMap::new()),
            acquisitions: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn ensure_active(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Index of `library_id`, listing the library at most once per run even
    /// when several collections ask for it concurrently.
    pub async fn library_index(
        &self,
        library: &dyn LibraryService,
        library_id: &str,
    ) -> Result<Arc<LibraryIndex>, SyncError> {
        let cell = {
            let mut indexes = self.indexes.lock().await;
            indexes.entry(library_id.to_string()).or_default().clone()
        };
        cell.get_or_try_init(|| async {
            LibraryIndex::build(library, library_id)
                .await
                .map(Arc::new)
                .map_err(|source| SyncError::Library {
                    library_id: library_id.to_string(),
                    source,
                })
        })
        .await
        .cloned()
    }

    /// Drops the index of `library_id` and every match resolved against it.
    pub async fn invalidate_index(&self, library_id: &str) {
        self.indexes.lock().await.remove(library_id);
        self.matches
            .lock()
            .await
            .retain(|key, _| key.library_id() != library_id);
    }

    pub async fn cached_match(&self, key: &MatchKey) -> Option<Option<LibraryItem>> {
        self.matches.lock().await.get(key).cloned()
    }

    pub async fn remember_match(&self, key: MatchKey, found: Option<LibraryItem>) {
        self.matches.lock().await.insert(key, found);
    }

    pub async fn collection_lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.collection_locks.lock().await;
        locks.entry(collection.to_string()).or_default().clone()
    }

    /// True the first time `(kind, id)` is claimed in this run.
    pub async fn claim_acquisition(&self, kind: MediaKind, external_id: u64) -> bool {
        self.acquisitions.lock().await.insert((kind, external_id))
    }

    /// Undoes a claim whose request failed, so a later collection retries it.
    pub async fn release_acquisition(&self, kind: MediaKind, external_id: u64) {
        self.acquisitions.lock().await.remove(&(kind, external_id));
    }
}
