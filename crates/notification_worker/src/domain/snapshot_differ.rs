use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Student fields whose edits are reported to the parent
pub const STUDENT_WATCHED_FIELDS: [&str; 8] = [
    "name",
    "schoolName",
    "grade",
    "busId",
    "parentName",
    "parentPhone",
    "address",
    "notes",
];

pub const STUDENT_STATUS_FIELD: &str = "currentStatus";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub old: String,
    pub new: String,
}

/// Difference between the cached snapshot of a record and a new observation
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDiff {
    /// The snapshot the new record was compared against
    pub previous: Map<String, Value>,
    pub changes: BTreeMap<String, FieldChange>,
    pub status_change: Option<StatusChange>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.status_change.is_none()
    }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Watched fields whose value differs and is present (non-null) on both sides
pub fn diff_fields(
    previous: &Map<String, Value>,
    current: &Map<String, Value>,
    watched: &[&str],
) -> BTreeMap<String, FieldChange> {
    watched
        .iter()
        .filter_map(|field| {
            let old = present(previous.get(*field))?;
            let new = present(current.get(*field))?;
            (old != new).then(|| {
                (
                    field.to_string(),
                    FieldChange {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )
            })
        })
        .collect()
}

/// A status transition, reported only when both sides are non-empty strings
pub fn status_transition(
    previous: &Map<String, Value>,
    current: &Map<String, Value>,
    field: &str,
) -> Option<StatusChange> {
    let old = previous.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())?;
    let new = current.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())?;
    (old != new).then(|| StatusChange {
        old: old.to_string(),
        new: new.to_string(),
    })
}

/// Last-seen snapshot per entity id, used to turn full-record change events
/// into field-level diffs.
pub struct SnapshotCache {
    watched: Vec<&'static str>,
    status_field: Option<&'static str>,
    snapshots: RwLock<HashMap<String, Map<String, Value>>>,
}

impl SnapshotCache {
    pub fn new(watched: &[&'static str], status_field: Option<&'static str>) -> Self {
        Self {
            watched: watched.to_vec(),
            status_field,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Cache for student records
    pub fn for_students() -> Self {
        Self::new(&STUDENT_WATCHED_FIELDS, Some(STUDENT_STATUS_FIELD))
    }

    pub async fn seed(&self, id: &str, record: Map<String, Value>) {
        self.snapshots.write().await.insert(id.to_string(), record);
    }

    /// Store `record` as the latest snapshot and diff it against the previous
    /// one. Returns `None` when nothing was cached yet (the record only seeds
    /// the cache).
    pub async fn observe(&self, id: &str, record: Map<String, Value>) -> Option<SnapshotDiff> {
        let previous = self
            .snapshots
            .write()
            .await
            .insert(id.to_string(), record.clone())?;

        let changes = diff_fields(&previous, &record, &self.watched);
        let status_change = self
            .status_field
            .and_then(|field| status_transition(&previous, &record, field));

        Some(SnapshotDiff {
            previous,
            changes,
            status_change,
        })
    }

    pub async fn forget(&self, id: &str) {
        self.snapshots.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_first_observation_seeds_without_changes() {
        let cache = SnapshotCache::for_students();
        let diff = cache
            .observe("s1", record(json!({"name": "Ali", "currentStatus": "home"})))
            .await;

        assert!(diff.is_none());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_identical_records_yield_empty_diff() {
        let cache = SnapshotCache::for_students();
        let snapshot = record(json!({"name": "Ali", "grade": "3", "currentStatus": "home"}));
        cache.seed("s1", snapshot.clone()).await;

        let diff = cache.observe("s1", snapshot).await.unwrap();
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_status_and_field_changes_are_reported_separately() {
        let cache = SnapshotCache::for_students();
        cache
            .seed(
                "s1",
                record(json!({"name": "Ali", "grade": "3", "currentStatus": "onBus"})),
            )
            .await;

        let diff = cache
            .observe(
                "s1",
                record(json!({"name": "Ali", "grade": "4", "currentStatus": "atSchool"})),
            )
            .await
            .unwrap();

        assert_eq!(
            diff.status_change,
            Some(StatusChange {
                old: "onBus".to_string(),
                new: "atSchool".to_string()
            })
        );
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes["grade"].old, json!("3"));
        assert_eq!(diff.changes["grade"].new, json!("4"));
        assert!(!diff.changes.contains_key("currentStatus"));
    }

    #[test]
    fn test_absent_or_null_values_are_not_changes() {
        let previous = record(json!({"notes": null, "address": "A"}));
        let current = record(json!({"notes": "new note", "grade": "5"}));

        let changes = diff_fields(&previous, &current, &STUDENT_WATCHED_FIELDS);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_status_transition_needs_both_sides() {
        let previous = record(json!({"currentStatus": ""}));
        let current = record(json!({"currentStatus": "onBus"}));
        assert!(status_transition(&previous, &current, STUDENT_STATUS_FIELD).is_none());
    }

    #[tokio::test]
    async fn test_forget_resets_to_seeding() {
        let cache = SnapshotCache::for_students();
        cache.seed("s1", record(json!({"name": "Ali"}))).await;
        cache.forget("s1").await;

        let diff = cache.observe("s1", record(json!({"name": "Omar"}))).await;
        assert!(diff.is_none());
    }
}
