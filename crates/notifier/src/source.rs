//! Subscriber sources: where a broadcast gets its recipient list.
//!
//! A source is queried exactly once per run. Sources are read-only: nothing in
//! the broadcast path writes back to the subscriber store.

use async_trait::async_trait;
use sqlx::PgPool;

use herald_common::error::AppError;
use herald_common::types::SubscriberRecord;

#[async_trait]
pub trait SubscriberSource: Send + Sync {
    /// Enumerate every subscriber. An empty list is a valid result.
    async fn fetch_all(&self) -> Result<Vec<SubscriberRecord>, AppError>;
}

/// Reads subscribers from the `daily_subscribers` table.
pub struct PgSubscriberSource {
    pool: PgPool,
}

impl PgSubscriberSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriberSource for PgSubscriberSource {
    async fn fetch_all(&self) -> Result<Vec<SubscriberRecord>, AppError> {
        let records: Vec<SubscriberRecord> = sqlx::query_as(
            "SELECT id, chat_id FROM daily_subscribers ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;

        tracing::debug!(count = records.len(), "Fetched subscribers");
        Ok(records)
    }
}

/// Fixed subscriber list held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriberSource {
    records: Vec<SubscriberRecord>,
}

impl InMemorySubscriberSource {
    pub fn new(records: Vec<SubscriberRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl SubscriberSource for InMemorySubscriberSource {
    async fn fetch_all(&self) -> Result<Vec<SubscriberRecord>, AppError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_source_returns_records_each_query() {
        let source = InMemorySubscriberSource::new(vec![
            SubscriberRecord::new("1", Some("100")),
            SubscriberRecord::new("2", None),
        ]);

        let first = source.fetch_all().await.unwrap();
        let second = source.fetch_all().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_source_is_not_an_error() {
        let source = InMemorySubscriberSource::default();
        assert!(source.fetch_all().await.unwrap().is_empty());
    }
}
