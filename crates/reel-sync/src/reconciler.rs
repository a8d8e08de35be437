//! Diffs assembled items against a remote collection and applies the result.
//!
//! The library only exposes insertion order as display order, so any order
//! other than `custom` is imposed by clearing the collection and re-adding the
//! target in order. That trick lives in [`CollectionReconciler::apply`]; the
//! diff in [`plan`] does not depend on it.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use reel_adapters::LibraryService;
use reel_core::{
    AnnotatedItem, DisplayMetadata, LibraryItem, OrderingPolicy, ReconciliationPlan,
};
use serde::Serialize;
use tracing::{error, info};

use crate::SyncError;

/// Remote collection handle resolved by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCollection {
    pub id: Option<String>,
    pub existed: bool,
}

/// What `apply` changed remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub reordered: bool,
    pub metadata_written: bool,
}

struct Entry<'a> {
    local: &'a LibraryItem,
    release: Option<NaiveDate>,
    rating: Option<f64>,
    added: Option<DateTime<Utc>>,
}

/// Matched local ids in display order, each id once.
pub fn order_target(items: &[AnnotatedItem], ordering: OrderingPolicy) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entries = items
        .iter()
        .filter_map(|annotated| {
            let local = annotated.library_item.as_ref()?;
            seen.insert(local.local_id.as_str()).then(|| Entry {
                local,
                release: local
                    .premiere_date
                    .or_else(|| {
                        local
                            .year
                            .or(annotated.item.year)
                            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
                    })
                    .or(annotated.item.release_date),
                rating: local
                    .community_rating
                    .map(f64::from)
                    .or(annotated.item.vote_average),
                added: local.date_added,
            })
        })
        .collect::<Vec<_>>();

    match ordering {
        OrderingPolicy::Custom => {}
        OrderingPolicy::Random => entries.shuffle(&mut rand::rng()),
        OrderingPolicy::Name => entries.sort_by(|a, b| {
            sort_name(a.local)
                .cmp(&sort_name(b.local))
                .then_with(|| tie_break(a, b))
        }),
        OrderingPolicy::ReleaseDate => {
            entries.sort_by(|a, b| descending(a.release, b.release).then_with(|| tie_break(a, b)))
        }
        OrderingPolicy::Rating => entries.sort_by(|a, b| {
            descending_by(a.rating, b.rating, f64::total_cmp).then_with(|| tie_break(a, b))
        }),
        OrderingPolicy::DateAdded => {
            entries.sort_by(|a, b| descending(a.added, b.added).then_with(|| tie_break(a, b)))
        }
    }

    entries
        .into_iter()
        .map(|entry| entry.local.local_id.clone())
        .collect()
}

fn sort_name(item: &LibraryItem) -> String {
    item.sort_name
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&item.title)
        .to_lowercase()
}

fn tie_break(a: &Entry<'_>, b: &Entry<'_>) -> Ordering {
    a.local
        .title
        .cmp(&b.local.title)
        .then_with(|| a.local.local_id.cmp(&b.local.local_id))
}

/// Highest first; missing values last.
fn descending<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    descending_by(a, b, |x, y| x.cmp(y))
}

fn descending_by<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => cmp(&b, &a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Pure diff of a remote collection against assembled items.
pub fn plan(
    collection: &ResolvedCollection,
    current: BTreeSet<String>,
    recorded_display: Option<DisplayMetadata>,
    items: &[AnnotatedItem],
    ordering: OrderingPolicy,
) -> ReconciliationPlan {
    let target = order_target(items, ordering);
    let target_set = target.iter().cloned().collect::<BTreeSet<_>>();
    let to_add = target_set.difference(&current).cloned().collect::<BTreeSet<_>>();
    let to_remove = current.difference(&target_set).cloned().collect::<BTreeSet<_>>();

    let membership_changed = !to_add.is_empty() || !to_remove.is_empty();
    let ordering_changed = collection.existed
        && recorded_display.as_ref().map(|meta| meta.ordering) != Some(ordering);
    let rewrite = ordering != OrderingPolicy::Custom
        && !target.is_empty()
        && (!collection.existed || membership_changed || ordering_changed);

    ReconciliationPlan {
        collection_id: collection.id.clone().unwrap_or_default(),
        collection_existed: collection.existed,
        ordering,
        current,
        target,
        to_add,
        to_remove,
        rewrite,
        recorded_display,
    }
}

pub struct CollectionReconciler<'a> {
    library: &'a dyn LibraryService,
}

impl<'a> CollectionReconciler<'a> {
    pub fn new(library: &'a dyn LibraryService) -> Self {
        Self { library }
    }

    /// Finds the collection by name, creating it unless `create` is false.
    pub async fn resolve_collection(
        &self,
        name: &str,
        create: bool,
    ) -> Result<ResolvedCollection, SyncError> {
        let found = self
            .library
            .find_collection(name)
            .await
            .map_err(|err| SyncError::reconciliation(name, err))?;
        if let Some(id) = found {
            return Ok(ResolvedCollection {
                id: Some(id),
                existed: true,
            });
        }
        if !create {
            return Ok(ResolvedCollection {
                id: None,
                existed: false,
            });
        }
        let id = self
            .library
            .create_collection(name)
            .await
            .map_err(|err| SyncError::reconciliation(name, err))?;
        info!(collection = name, %id, "created collection");
        Ok(ResolvedCollection {
            id: Some(id),
            existed: false,
        })
    }

    /// Reads the remote state of `collection` and diffs it against `items`.
    pub async fn reconcile(
        &self,
        name: &str,
        collection: &ResolvedCollection,
        items: &[AnnotatedItem],
        ordering: OrderingPolicy,
    ) -> Result<ReconciliationPlan, SyncError> {
        let (current, recorded) = match &collection.id {
            Some(id) if collection.existed => {
                let members = self
                    .library
                    .get_collection_members(id)
                    .await
                    .map_err(|err| SyncError::reconciliation(name, err))?;
                let recorded = self
                    .library
                    .get_display_metadata(id)
                    .await
                    .map_err(|err| SyncError::reconciliation(name, err))?;
                (members.into_iter().collect(), recorded)
            }
            _ => (BTreeSet::new(), None),
        };
        let plan = plan(collection, current, recorded, items, ordering);
        info!(
            collection = name,
            ordering = %ordering,
            current = plan.current.len(),
            target = plan.target.len(),
            to_add = plan.to_add.len(),
            to_remove = plan.to_remove.len(),
            rewrite = plan.rewrite,
            "reconciliation planned"
        );
        Ok(plan)
    }

    /// Issues the mutations of `plan`, then records `metadata` when it differs
    /// from what the collection already carries.
    pub async fn apply(
        &self,
        name: &str,
        plan: &ReconciliationPlan,
        metadata: &DisplayMetadata,
    ) -> Result<AppliedChanges, SyncError> {
        let id = plan.collection_id.as_str();
        let mut changes = AppliedChanges {
            added: plan.to_add.iter().cloned().collect(),
            removed: plan.to_remove.iter().cloned().collect(),
            ..Default::default()
        };

        if plan.rewrite {
            let cleared = plan.current.iter().cloned().collect::<Vec<_>>();
            if !cleared.is_empty() {
                self.library
                    .remove_from_collection(id, &cleared)
                    .await
                    .map_err(|err| SyncError::reconciliation(name, err))?;
            }
            if let Err(err) = self.library.add_to_collection(id, &plan.target).await {
                if cleared.is_empty() {
                    return Err(SyncError::reconciliation(name, err));
                }
                let err = SyncError::PartialReorder {
                    collection: name.to_string(),
                    source: err,
                };
                error!(collection = name, error = %err, "collection left cleared");
                return Err(err);
            }
            changes.reordered = true;
        } else {
            if !changes.added.is_empty() {
                // Keep arrival order for appended members.
                let ordered = plan
                    .target
                    .iter()
                    .filter(|id| plan.to_add.contains(*id))
                    .cloned()
                    .collect::<Vec<_>>();
                self.library
                    .add_to_collection(id, &ordered)
                    .await
                    .map_err(|err| SyncError::reconciliation(name, err))?;
            }
            if !changes.removed.is_empty() {
                self.library
                    .remove_from_collection(id, &changes.removed)
                    .await
                    .map_err(|err| SyncError::reconciliation(name, err))?;
            }
        }

        if plan.recorded_display.as_ref() != Some(metadata) {
            self.library
                .set_display_metadata(id, metadata)
                .await
                .map_err(|err| SyncError::reconciliation(name, err))?;
            changes.metadata_written = true;
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reel_core::{CatalogItem, MatchResult, MediaKind};

    fn matched(local_id: &str, title: &str) -> AnnotatedItem {
        MatchResult::new(
            CatalogItem::new(MediaKind::Movie, title),
            Some(LibraryItem::new(local_id, "movies", MediaKind::Movie, title)),
        )
    }

    fn existing(id: &str) -> ResolvedCollection {
        ResolvedCollection {
            id: Some(id.to_string()),
            existed: true,
        }
    }

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn custom_keeps_arrival_order_and_drops_duplicates() {
        let items = vec![
            matched("3", "Zodiac"),
            MatchResult::new(CatalogItem::new(MediaKind::Movie, "Missing"), None),
            matched("1", "Alien"),
            matched("3", "Zodiac"),
        ];
        assert_eq!(order_target(&items, OrderingPolicy::Custom), vec!["3", "1"]);
    }

    #[test]
    fn name_order_uses_sort_name_then_title() {
        let mut items = vec![matched("1", "the Zodiac"), matched("2", "Alien"), matched("3", "alien")];
        items[0].library_item.as_mut().unwrap().sort_name = Some("Zodiac".into());
        assert_eq!(order_target(&items, OrderingPolicy::Name), vec!["2", "3", "1"]);
    }

    #[test]
    fn release_order_is_newest_first_with_missing_last() {
        let mut items = vec![matched("old", "Old"), matched("none", "None"), matched("new", "New")];
        items[0].library_item.as_mut().unwrap().year = Some(1999);
        items[2].library_item.as_mut().unwrap().premiere_date = NaiveDate::from_ymd_opt(2024, 5, 1);
        assert_eq!(
            order_target(&items, OrderingPolicy::ReleaseDate),
            vec!["new", "old", "none"]
        );
    }

    #[test]
    fn rating_and_date_added_sort_descending() {
        let mut items = vec![matched("a", "A"), matched("b", "B"), matched("c", "C")];
        items[0].library_item.as_mut().unwrap().community_rating = Some(6.5);
        items[1].item.vote_average = Some(8.1);
        assert_eq!(order_target(&items, OrderingPolicy::Rating), vec!["b", "a", "c"]);

        items[2].library_item.as_mut().unwrap().date_added =
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single();
        items[0].library_item.as_mut().unwrap().date_added =
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single();
        assert_eq!(order_target(&items, OrderingPolicy::DateAdded), vec!["c", "a", "b"]);
    }

    #[test]
    fn random_is_a_permutation_of_the_target() {
        let items = (0..20).map(|i| matched(&i.to_string(), "T")).collect::<Vec<_>>();
        let shuffled = order_target(&items, OrderingPolicy::Random);
        let mut sorted = shuffled.clone();
        sorted.sort();
        let mut expected = (0..20).map(|i| i.to_string()).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn diff_is_plain_set_difference() {
        let items = vec![matched("1", "One"), matched("2", "Two")];
        let plan = plan(&existing("c"), ids(&["1"]), None, &items, OrderingPolicy::Custom);
        assert_eq!(plan.to_add, ids(&["2"]));
        assert!(plan.to_remove.is_empty());
        assert!(!plan.rewrite);

        let plan = super::plan(&existing("c"), ids(&["1", "9"]), None, &items[..1], OrderingPolicy::Custom);
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove, ids(&["9"]));
    }

    #[test]
    fn ordered_policies_rewrite_on_change_only() {
        let items = vec![matched("1", "One"), matched("2", "Two")];
        let recorded = DisplayMetadata {
            ordering: OrderingPolicy::Name,
            display_order: "SortName".into(),
            overview: None,
            sort_name: None,
        };

        let new = ResolvedCollection {
            id: Some("c".into()),
            existed: false,
        };
        assert!(plan(&new, BTreeSet::new(), None, &items, OrderingPolicy::Name).rewrite);

        let grown = plan(&existing("c"), ids(&["1"]), Some(recorded.clone()), &items, OrderingPolicy::Name);
        assert!(grown.rewrite);

        let stable = plan(&existing("c"), ids(&["1", "2"]), Some(recorded.clone()), &items, OrderingPolicy::Name);
        assert!(stable.is_noop());

        let switched = plan(&existing("c"), ids(&["1", "2"]), Some(recorded), &items, OrderingPolicy::Rating);
        assert!(switched.rewrite);
        assert!(!switched.is_noop());
    }

    #[test]
    fn empty_target_never_rewrites() {
        let plan = plan(&existing("c"), ids(&["1"]), None, &[], OrderingPolicy::Name);
        assert!(!plan.rewrite);
        assert_eq!(plan.to_remove, ids(&["1"]));
    }
}
