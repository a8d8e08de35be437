use reel_adapters::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// One provider failed; recovered by the assembler, never fatal to a run.
    #[error("source {source_id} failed: {source}")]
    SourceFetch {
        source_id: String,
        #[source]
        source: AdapterError,
    },
    #[error("library {library_id} unavailable: {source}")]
    Library {
        library_id: String,
        #[source]
        source: AdapterError,
    },
    #[error("reconciling collection {collection} failed: {source}")]
    Reconciliation {
        collection: String,
        #[source]
        source: AdapterError,
    },
    /// The collection was cleared but re-adding its members failed. It stays
    /// emptied until the next successful run.
    #[error("collection {collection} was cleared but re-adding its members failed: {source}")]
    PartialReorder {
        collection: String,
        #[source]
        source: AdapterError,
    },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn reconciliation(collection: &str, source: AdapterError) -> Self {
        SyncError::Reconciliation {
            collection: collection.to_string(),
            source,
        }
    }
}
