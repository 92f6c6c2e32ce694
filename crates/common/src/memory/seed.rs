use crate::domain::{Collection, Document};
use crate::memory::InMemoryDocumentStore;
use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Initial documents keyed by collection name.
///
/// The file format is a JSON object whose keys are collection names and
/// whose values are arrays of objects, each carrying a string `id`:
///
/// ```json
/// { "users": [{ "id": "p1", "userType": "parent", "fcmToken": "..." }] }
/// ```
#[derive(Debug, Default)]
pub struct SeedData {
    documents: BTreeMap<String, Vec<Document>>,
}

impl SeedData {
    pub fn parse(raw: &str) -> Result<Self> {
        let root: Map<String, Value> =
            serde_json::from_str(raw).context("seed data must be a JSON object")?;

        let mut documents = BTreeMap::new();
        for (name, value) in root {
            Collection::from_name(&name)
                .ok_or_else(|| anyhow!("unknown collection in seed data: {}", name))?;
            let Value::Array(items) = value else {
                return Err(anyhow!("seed collection {} must be an array", name));
            };

            let mut docs = Vec::with_capacity(items.len());
            for item in items {
                let Value::Object(mut fields) = item else {
                    return Err(anyhow!("seed documents in {} must be objects", name));
                };
                let id = match fields.remove("id") {
                    Some(Value::String(id)) if !id.is_empty() => id,
                    _ => return Err(anyhow!("seed document in {} is missing a string id", name)),
                };
                docs.push(Document::new(id, fields));
            }
            documents.insert(name, docs);
        }

        Ok(Self { documents })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn len(&self) -> usize {
        self.documents.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InMemoryDocumentStore {
    /// Write every seed document into the store
    pub async fn apply_seed(&self, seed: SeedData) -> usize {
        let mut written = 0;
        for (name, docs) in seed.documents {
            let Some(collection) = Collection::from_name(&name) else {
                continue;
            };
            let count = docs.len();
            for doc in docs {
                self.put(collection, doc).await;
            }
            info!(collection = %collection, documents = count, "seeded collection");
            written += count;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seed_populates_collections() {
        let seed = SeedData::parse(
            r#"{
                "users": [{"id": "p1", "userType": "parent"}],
                "buses": [{"id": "b1"}, {"id": "b2", "busNumber": "7"}]
            }"#,
        )
        .unwrap();
        assert_eq!(seed.len(), 3);

        let store = InMemoryDocumentStore::new();
        assert_eq!(store.apply_seed(seed).await, 3);
        assert_eq!(store.count(Collection::Buses).await, 2);
        let bus = store.get(Collection::Buses, "b2").await.unwrap();
        assert_eq!(bus.get_str("busNumber"), Some("7"));
        assert!(bus.get("id").is_none());
    }

    #[test]
    fn test_seed_rejects_unknown_collection() {
        let err = SeedData::parse(r#"{"cars": []}"#).unwrap_err();
        assert!(err.to_string().contains("unknown collection"));
    }

    #[test]
    fn test_seed_rejects_documents_without_id() {
        let err = SeedData::parse(r#"{"users": [{"name": "x"}]}"#).unwrap_err();
        assert!(err.to_string().contains("missing a string id"));
    }
}
