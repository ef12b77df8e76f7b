//! PostgreSQL Event Store 实现

use async_trait::async_trait;
use sqlx::PgPool;
use twinguard_errors::{AppError, AppResult};
use twinguard_event_core::{EventStore, StoredEvent};

/// PostgreSQL Event Store
///
/// 同一聚合的追加由事务级 advisory lock 串行化，
/// `(aggregate_type, aggregate_id, version)` 唯一约束兜底
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::database(format!("{}: {}", context, e))
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: StoredEvent) -> AppResult<u64> {
        let id = uuid::Uuid::parse_str(&event.id)
            .map_err(|e| AppError::validation(format!("Invalid event id '{}': {}", event.id, e)))?;
        let aggregate = format!("{}:{}", event.aggregate_type, event.aggregate_id);
        let expected = event.version.saturating_sub(1);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&aggregate)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to lock aggregate"))?;

        let (actual,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(version), 0)
            FROM event_store
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to get version"))?;

        let actual = actual as u64;
        if event.version == 0 || actual != expected {
            return Err(AppError::concurrent_modification(aggregate, expected, actual));
        }

        sqlx::query(
            r#"
            INSERT INTO event_store (id, aggregate_type, aggregate_id, event_type, version, payload, metadata, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(event.version as i64)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::concurrent_modification(aggregate.clone(), expected, event.version)
            }
            _ => AppError::database(format!("Failed to append event: {}", e)),
        })?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit event"))?;

        tracing::debug!(
            aggregate_type = %event.aggregate_type,
            aggregate_id = %event.aggregate_id,
            version = event.version,
            "Event appended"
        );
        Ok(event.version)
    }

    async fn get_events_from_version(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        from_version: u64,
    ) -> AppResult<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEventRow>(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, version, payload, metadata, occurred_at
            FROM event_store
            WHERE aggregate_type = $1 AND aggregate_id = $2 AND version >= $3
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(from_version as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to get events"))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_current_version(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> AppResult<u64> {
        let (version,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(version), 0)
            FROM event_store
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to get version"))?;

        Ok(version as u64)
    }
}

#[derive(sqlx::FromRow)]
struct StoredEventRow {
    id: uuid::Uuid,
    aggregate_type: String,
    aggregate_id: String,
    event_type: String,
    version: i64,
    payload: String,
    metadata: String,
    occurred_at: chrono::DateTime<chrono::Utc>,
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        Self {
            id: row.id.to_string(),
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            version: row.version as u64,
            payload: row.payload,
            metadata: row.metadata,
            occurred_at: row.occurred_at,
        }
    }
}
