//! In-memory webhook event repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::DomainError;
use crate::ports::{SaveResult, WebhookEventRecord, WebhookEventRepository};

#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    records: RwLock<HashMap<String, WebhookEventRecord>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        Ok(self.records.read().await.get(event_id).cloned())
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.event_id) {
            Ok(SaveResult::AlreadyExists)
        } else {
            records.insert(record.event_id.clone(), record);
            Ok(SaveResult::Inserted)
        }
    }

    async fn delete_before(&self, timestamp: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.processed_at >= timestamp);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ProcessingResult;

    #[tokio::test]
    async fn save_returns_already_exists_for_duplicate() {
        let repo = InMemoryWebhookEventRepository::new();
        let record = WebhookEventRecord::success("evt_dup", "invoice.paid", "payment-succeeded", serde_json::json!({}));

        let first = repo.save(record.clone()).await.unwrap();
        let second = repo.save(record).await.unwrap();

        assert_eq!(first, SaveResult::Inserted);
        assert_eq!(second, SaveResult::AlreadyExists);
    }

    #[tokio::test]
    async fn delete_before_removes_old_records() {
        let repo = InMemoryWebhookEventRepository::new();
        let mut old = WebhookEventRecord::success("evt_old", "invoice.paid", "payment-succeeded", serde_json::json!({}));
        old.processed_at = Utc::now() - chrono::Duration::days(120);
        repo.save(old).await.unwrap();
        repo.save(WebhookEventRecord::failed(
            "evt_new",
            "checkout.session.completed",
            "subscribed",
            "Missing field: customer",
            serde_json::json!({}),
        ))
        .await
        .unwrap();

        let deleted = repo
            .delete_before(Utc::now() - chrono::Duration::days(90))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(repo.find_by_event_id("evt_old").await.unwrap().is_none());
        let kept = repo.find_by_event_id("evt_new").await.unwrap().unwrap();
        assert_eq!(kept.result, ProcessingResult::Failed);
    }
}
