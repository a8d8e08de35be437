use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use reel_core::{normalize, DisplayMetadata, LibraryItem, MediaKind};
use reel_storage::write_atomic;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{AdapterError, LibraryService};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCollection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub display: Option<DisplayMetadata>,
}

/// Library contents plus the collections managed inside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    #[serde(default)]
    pub items: Vec<LibraryItem>,
    #[serde(default)]
    pub collections: Vec<RemoteCollection>,
}

impl LibrarySnapshot {
    pub fn collection(&self, name: &str) -> Option<&RemoteCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn collection_mut(&mut self, id: &str) -> Result<&mut RemoteCollection, AdapterError> {
        self.collections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AdapterError::CollectionNotFound(id.to_string()))
    }
}

/// Library service backed by a JSON snapshot. With a path, every mutation is
/// written back atomically.
#[derive(Debug)]
pub struct JsonLibrary {
    path: Option<PathBuf>,
    state: Mutex<LibrarySnapshot>,
}

impl JsonLibrary {
    pub fn in_memory(snapshot: LibrarySnapshot) -> Self {
        Self {
            path: None,
            state: Mutex::new(snapshot),
        }
    }

    /// Opens `path`, starting empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let snapshot = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        } else {
            LibrarySnapshot::default()
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn snapshot(&self) -> LibrarySnapshot {
        self.state.lock().await.clone()
    }

    async fn persist(&self, snapshot: &LibrarySnapshot) -> Result<(), AdapterError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl LibraryService for JsonLibrary {
    async fn list_items(&self, library_id: &str) -> Result<Vec<LibraryItem>, AdapterError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|item| item.library_id == library_id)
            .cloned()
            .collect())
    }

    async fn search_items(
        &self,
        kind: MediaKind,
        title: &str,
    ) -> Result<Vec<LibraryItem>, AdapterError> {
        let needle = normalize(title);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .filter(|item| item.kind == kind && normalize(&item.title).contains(&needle))
            .cloned()
            .collect())
    }

    async fn find_collection(&self, name: &str) -> Result<Option<String>, AdapterError> {
        let state = self.state.lock().await;
        Ok(state.collection(name).map(|c| c.id.clone()))
    }

    async fn create_collection(&self, name: &str) -> Result<String, AdapterError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.collection(name) {
            return Ok(existing.id.clone());
        }
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).simple().to_string();
        state.collections.push(RemoteCollection {
            id: id.clone(),
            name: name.to_string(),
            members: Vec::new(),
            display: None,
        });
        self.persist(&state).await?;
        debug!(collection = name, %id, "created collection");
        Ok(id)
    }

    async fn get_collection_members(
        &self,
        collection_id: &str,
    ) -> Result<Vec<String>, AdapterError> {
        let mut state = self.state.lock().await;
        Ok(state.collection_mut(collection_id)?.members.clone())
    }

    async fn add_to_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let collection = state.collection_mut(collection_id)?;
        for id in ids {
            if !collection.members.contains(id) {
                collection.members.push(id.clone());
            }
        }
        self.persist(&state).await
    }

    async fn remove_from_collection(
        &self,
        collection_id: &str,
        ids: &[String],
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        let collection = state.collection_mut(collection_id)?;
        collection.members.retain(|member| !ids.contains(member));
        self.persist(&state).await
    }

    async fn get_display_metadata(
        &self,
        collection_id: &str,
    ) -> Result<Option<DisplayMetadata>, AdapterError> {
        let mut state = self.state.lock().await;
        Ok(state.collection_mut(collection_id)?.display.clone())
    }

    async fn set_display_metadata(
        &self,
        collection_id: &str,
        metadata: &DisplayMetadata,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.lock().await;
        state.collection_mut(collection_id)?.display = Some(metadata.clone());
        self.persist(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_core::OrderingPolicy;
    use tempfile::tempdir;

    fn library() -> JsonLibrary {
        JsonLibrary::in_memory(LibrarySnapshot {
            items: vec![
                LibraryItem::new("m1", "movies", MediaKind::Movie, "The Matrix").with_year(1999),
                LibraryItem::new("m2", "movies", MediaKind::Movie, "The Matrix Reloaded")
                    .with_year(2003),
                LibraryItem::new("s1", "shows", MediaKind::Series, "The Matrix Files"),
            ],
            collections: Vec::new(),
        })
    }

    #[tokio::test]
    async fn list_and_search_respect_library_and_kind() {
        let lib = library();
        assert_eq!(lib.list_items("movies").await.unwrap().len(), 2);
        assert!(lib.list_items("music").await.unwrap().is_empty());

        let found = lib.search_items(MediaKind::Movie, "matrix").await.unwrap();
        let ids = found.iter().map(|i| i.local_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(lib.search_items(MediaKind::Movie, "  ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn collection_membership_keeps_insertion_order() {
        let lib = library();
        assert_eq!(lib.find_collection("Picks").await.unwrap(), None);
        let id = lib.create_collection("Picks").await.unwrap();
        assert_eq!(lib.create_collection("Picks").await.unwrap(), id);
        assert_eq!(lib.find_collection("Picks").await.unwrap(), Some(id.clone()));

        lib.add_to_collection(&id, &["m2".into(), "m1".into(), "m2".into()])
            .await
            .unwrap();
        assert_eq!(lib.get_collection_members(&id).await.unwrap(), vec!["m2", "m1"]);

        lib.remove_from_collection(&id, &["m2".into()]).await.unwrap();
        assert_eq!(lib.get_collection_members(&id).await.unwrap(), vec!["m1"]);

        let err = lib.get_collection_members("missing").await.unwrap_err();
        assert!(matches!(err, AdapterError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn mutations_persist_to_snapshot_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("library.json");
        let lib = JsonLibrary::open(&path).await.unwrap();
        let id = lib.create_collection("Trending").await.unwrap();
        lib.add_to_collection(&id, &["a".into()]).await.unwrap();
        let mut spec = reel_core::CollectionSpec::new("Trending");
        spec.ordering = OrderingPolicy::Name;
        lib.set_display_metadata(&id, &DisplayMetadata::for_spec(&spec))
            .await
            .unwrap();

        let reopened = JsonLibrary::open(&path).await.unwrap();
        let snapshot = reopened.snapshot().await;
        let collection = snapshot.collection("Trending").unwrap();
        assert_eq!(collection.members, vec!["a"]);
        assert_eq!(
            collection.display.as_ref().map(|d| d.ordering),
            Some(OrderingPolicy::Name)
        );
    }
}
