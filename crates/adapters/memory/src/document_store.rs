//! 内存快照文档存储

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use twinguard_errors::AppResult;
use twinguard_ports::{Document, DocumentStore};

#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn save(&self, aggregate_id: &str, document: Document) -> AppResult<()> {
        self.documents
            .write()
            .await
            .insert(aggregate_id.to_string(), document);
        Ok(())
    }

    async fn load(&self, aggregate_id: &str) -> AppResult<Option<Document>> {
        Ok(self.documents.read().await.get(aggregate_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_overwrites_previous_document() {
        let store = InMemoryDocumentStore::new();
        assert!(store.load("policy:p1").await.unwrap().is_none());

        store
            .save("policy:p1", Document::new(serde_json::json!({"revision": 1})))
            .await
            .unwrap();
        store
            .save("policy:p1", Document::new(serde_json::json!({"revision": 2})))
            .await
            .unwrap();

        let doc = store.load("policy:p1").await.unwrap().unwrap();
        assert_eq!(doc.as_value()["revision"], 2);
    }
}
