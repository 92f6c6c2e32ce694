use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Logical collections of the document database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "fcm_queue")]
    NotificationQueue,
    #[serde(rename = "trips")]
    Trips,
    #[serde(rename = "absences")]
    Absences,
    #[serde(rename = "complaints")]
    Complaints,
    #[serde(rename = "students")]
    Students,
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "buses")]
    Buses,
    #[serde(rename = "notifications")]
    Notifications,
}

impl Collection {
    /// Collections whose change feeds drive notifications
    pub const WATCHED: [Collection; 5] = [
        Collection::NotificationQueue,
        Collection::Trips,
        Collection::Absences,
        Collection::Complaints,
        Collection::Students,
    ];

    pub const ALL: [Collection; 8] = [
        Collection::NotificationQueue,
        Collection::Trips,
        Collection::Absences,
        Collection::Complaints,
        Collection::Students,
        Collection::Users,
        Collection::Buses,
        Collection::Notifications,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::NotificationQueue => "fcm_queue",
            Collection::Trips => "trips",
            Collection::Absences => "absences",
            Collection::Complaints => "complaints",
            Collection::Students => "students",
            Collection::Users => "users",
            Collection::Buses => "buses",
            Collection::Notifications => "notifications",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A schemaless document: an id plus a JSON object of fields
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from any serializable record, dropping its `id` field
    pub fn encode<T: Serialize>(id: impl Into<String>, record: &T) -> DomainResult<Self> {
        let id = id.into();
        let fields = match serde_json::to_value(record) {
            Ok(Value::Object(mut map)) => {
                map.remove("id");
                map
            }
            Ok(other) => {
                return Err(DomainError::InvalidDocument(
                    id,
                    format!("expected an object, got {}", other),
                ))
            }
            Err(e) => return Err(DomainError::InvalidDocument(id, e.to_string())),
        };
        Ok(Self { id, fields })
    }

    /// Decode into a typed record; the document id is exposed as `id`
    pub fn decode<T: DeserializeOwned>(&self) -> DomainResult<T> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| DomainError::InvalidDocument(self.id.clone(), e.to_string()))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Kind of change delivered by a change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => f.write_str("added"),
            ChangeKind::Modified => f.write_str("modified"),
            ChangeKind::Removed => f.write_str("removed"),
        }
    }
}

/// One change notification for a single document
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub kind: ChangeKind,
    pub document: Document,
    /// Part of the initial snapshot replayed at subscription time rather
    /// than a live write
    pub replayed: bool,
}

impl ChangeEvent {
    pub fn new(collection: Collection, kind: ChangeKind, document: Document) -> Self {
        Self {
            collection,
            kind,
            document,
            replayed: false,
        }
    }

    /// An `Added` event for a document that existed before the subscription
    pub fn replay(collection: Collection, document: Document) -> Self {
        Self {
            collection,
            kind: ChangeKind::Added,
            document,
            replayed: true,
        }
    }

    /// A live insert, as opposed to a replayed one
    pub fn is_live_insert(&self) -> bool {
        self.kind == ChangeKind::Added && !self.replayed
    }

    pub fn document_id(&self) -> &str {
        &self.document.id
    }
}

/// Source of change events for a collection.
///
/// A subscription first yields an `Added` event for every document already in
/// the collection, then live changes. Delivery is at-least-once.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, collection: Collection)
        -> DomainResult<BoxStream<'static, ChangeEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Sample {
        id: String,
        display_name: String,
    }

    #[test]
    fn test_collection_names_round_trip() {
        for collection in Collection::ALL {
            assert_eq!(Collection::from_name(collection.name()), Some(collection));
        }
        assert_eq!(Collection::from_name("nope"), None);
    }

    #[test]
    fn test_decode_injects_document_id() {
        let fields = json!({ "displayName": "Bus 7" });
        let doc = Document::new("bus-7", fields.as_object().unwrap().clone());

        let sample: Sample = doc.decode().unwrap();
        assert_eq!(sample.id, "bus-7");
        assert_eq!(sample.display_name, "Bus 7");
    }

    #[test]
    fn test_encode_drops_id_field() {
        let sample = Sample {
            id: "s1".to_string(),
            display_name: "x".to_string(),
        };
        let doc = Document::encode("s1", &sample).unwrap();
        assert_eq!(doc.id, "s1");
        assert!(doc.fields.get("id").is_none());
        assert_eq!(doc.get_str("displayName"), Some("x"));
    }

    #[test]
    fn test_decode_reports_invalid_document() {
        let doc = Document::new("s2", Map::new());
        let result: DomainResult<Sample> = doc.decode();
        assert!(matches!(result, Err(DomainError::InvalidDocument(id, _)) if id == "s2"));
    }
}
