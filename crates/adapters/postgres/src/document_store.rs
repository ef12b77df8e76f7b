//! PostgreSQL 快照文档存储

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use twinguard_errors::{AppError, AppResult};
use twinguard_ports::{Document, DocumentStore};

/// 每个聚合一行，保存最新快照
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn save(&self, aggregate_id: &str, document: Document) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, document, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (aggregate_id) DO UPDATE
            SET document = EXCLUDED.document, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(aggregate_id)
        .bind(Json(document.into_value()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to save snapshot: {}", e)))?;
        Ok(())
    }

    async fn load(&self, aggregate_id: &str) -> AppResult<Option<Document>> {
        let row: Option<(Json<serde_json::Value>,)> =
            sqlx::query_as("SELECT document FROM snapshots WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::database(format!("Failed to load snapshot: {}", e)))?;

        Ok(row.map(|(Json(value),)| Document::new(value)))
    }
}
