// The memory provider (C4): the reference implementation and the canonical
// definition of provider semantics. A two-level mapping from collection name to
// an insertion-ordered (identifier -> document) map; `IndexMap` is what gives the
// query engine's sort-stability tie-break ("preserved insertion order") something
// concrete to fall back on.

use crate::contracts::{Document, Provider, QueryOptions};
use crate::error::Result;
use crate::query;
use crate::types::{ValidatedCollectionName, ValidatedDocumentId};
use crate::validation::validate_connected;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

type Collection = IndexMap<String, Document>;

#[derive(Default)]
pub struct MemoryProvider {
    connected: bool,
    data: RwLock<HashMap<String, Collection>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            tracing::warn!("memory provider already connected; connect() is a no-op");
            return Ok(());
        }
        self.connected = true;
        debug!("memory provider connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            tracing::warn!("memory provider already disconnected; disconnect() is a no-op");
            return Ok(());
        }
        self.data.write().await.clear();
        self.connected = false;
        debug!("memory provider disconnected, storage cleared");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn create(&mut self, collection: &str, mut document: Document) -> Result<Document> {
        validate_connected(self.connected)?;
        let collection_name = ValidatedCollectionName::new(collection)?;

        let id = match document.id() {
            Some(id) => ValidatedDocumentId::new(id)?.into_string(),
            None => {
                let generated = ValidatedDocumentId::generate();
                document.set_id(generated.as_str());
                generated.into_string()
            }
        };

        let mut data = self.data.write().await;
        let bucket = data.entry(collection_name.as_str().to_string()).or_default();
        // The memory provider uniquely replaces an existing id silently; every
        // other back-end rejects a duplicate `create` with a `Query` error.
        bucket.insert(id, document.deep_clone());
        Ok(document)
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let data = self.data.read().await;
        Ok(data
            .get(collection)
            .and_then(|bucket| bucket.get(id))
            .map(Document::deep_clone))
    }

    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        partial: Document,
    ) -> Result<Option<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let mut data = self.data.write().await;
        let Some(bucket) = data.get_mut(collection) else {
            return Ok(None);
        };
        let Some(existing) = bucket.get_mut(id) else {
            return Ok(None);
        };
        existing.merge(&partial);
        Ok(Some(existing.deep_clone()))
    }

    async fn delete(&mut self, collection: &str, id: &str) -> Result<bool> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;
        ValidatedDocumentId::new(id)?;

        let mut data = self.data.write().await;
        Ok(data
            .get_mut(collection)
            .map(|bucket| bucket.shift_remove(id).is_some())
            .unwrap_or(false))
    }

    async fn query(&self, collection: &str, options: QueryOptions) -> Result<Vec<Document>> {
        validate_connected(self.connected)?;
        ValidatedCollectionName::new(collection)?;

        let data = self.data.read().await;
        let items: Vec<Document> = data
            .get(collection)
            .map(|bucket| bucket.values().map(Document::deep_clone).collect())
            .unwrap_or_default();
        Ok(query::run_query(items, &options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{FilterCondition, Operator};
    use serde_json::json;

    #[tokio::test]
    async fn create_and_read_roundtrip() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();

        let created = provider
            .create(
                "items",
                Document::from_value(json!({"name": "a", "value": 1})).unwrap(),
            )
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        let read = provider.read("items", &id).await.unwrap().unwrap();
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn read_is_independent_copy() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();
        let created = provider
            .create("items", Document::from_value(json!({"value": 1})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        let mut copy = provider.read("items", &id).await.unwrap().unwrap();
        copy.set_id("mutated");

        let second = provider.read("items", &id).await.unwrap().unwrap();
        assert_eq!(second.id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn delete_then_read_is_null() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();
        let created = provider
            .create("items", Document::from_value(json!({"value": 1})).unwrap())
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        assert!(provider.delete("items", &id).await.unwrap());
        assert!(provider.read("items", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_preserves_id_and_merges() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();
        let created = provider
            .create(
                "items",
                Document::from_value(json!({"value": 1, "name": "a"})).unwrap(),
            )
            .await
            .unwrap();
        let id = created.id().unwrap().to_string();

        let updated = provider
            .update(
                "items",
                &id,
                Document::from_value(json!({"value": 999})).unwrap(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id(), Some(id.as_str()));
        assert_eq!(updated.get("value"), Some(&json!(999)));
        assert_eq!(updated.get("name"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn missing_reads_updates_deletes() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();
        assert!(provider.read("items", "no-such").await.unwrap().is_none());
        assert!(provider
            .update("items", "no-such", Document::new())
            .await
            .unwrap()
            .is_none());
        assert!(!provider.delete("items", "no-such").await.unwrap());
    }

    #[tokio::test]
    async fn query_filters_by_operator() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();
        for (name, value) in [("A", 100), ("B", 200), ("C", 300)] {
            provider
                .create(
                    "items",
                    Document::from_value(json!({"name": name, "value": value})).unwrap(),
                )
                .await
                .unwrap();
        }

        let opts = QueryOptions::new().with_filter(
            "value",
            FilterCondition {
                operator: Operator::Gt,
                value: json!(150),
            },
        );
        let results = provider.query("items", opts).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn disconnect_clears_storage() {
        let mut provider = MemoryProvider::new();
        provider.connect().await.unwrap();
        provider
            .create("items", Document::from_value(json!({"value": 1})).unwrap())
            .await
            .unwrap();
        provider.disconnect().await.unwrap();
        provider.connect().await.unwrap();
        let results = provider.query("items", QueryOptions::new()).await.unwrap();
        assert!(results.is_empty());
    }
}
