//! Campaign queue repository

use crate::db::DatabasePool;
use crate::models::{QueueEntry, QueueStatusCounts};
use async_trait::async_trait;
use engage_common::types::{CampaignId, Page, PageRequest, QueueStatus};
use engage_common::{Error, Result};

/// Campaign queue repository trait
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// One page of a campaign's queue in send order, optionally filtered by status
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<QueueStatus>,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>>;

    /// Queue rows of a campaign grouped by status
    async fn status_counts(&self, campaign_id: CampaignId) -> Result<QueueStatusCounts>;
}

/// Database campaign queue repository
pub struct DbQueueRepository {
    pool: DatabasePool,
}

impl DbQueueRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for DbQueueRepository {
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<QueueStatus>,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>> {
        let status = status.map(|s| s.to_string());

        let data = sqlx::query_as::<_, QueueEntry>(
            r#"
            SELECT q.id, q.campaign_id, q.customer_id, q.channel_id, q.message_id,
                   q.status, q.batch_number, q.position_in_batch, q.scheduled_at,
                   q.sent_at, q.error_message, q.created_at,
                   c.name AS customer_name, c.phone AS customer_phone,
                   c.email AS customer_email,
                   ch.name AS channel_name, ch.type AS channel_type
            FROM bulk_message_queue q
            LEFT JOIN customers c ON c.id = q.customer_id
            LEFT JOIN channels ch ON ch.id = q.channel_id
            WHERE q.campaign_id = $1
              AND ($2::text IS NULL OR q.status = $2)
            ORDER BY q.batch_number ASC, q.position_in_batch ASC, q.created_at ASC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(campaign_id)
        .bind(&status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM bulk_message_queue
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(campaign_id)
        .bind(&status)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Page {
            data,
            total: total.0,
        })
    }

    async fn status_counts(&self, campaign_id: CampaignId) -> Result<QueueStatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM bulk_message_queue
            WHERE campaign_id = $1
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let mut counts = QueueStatusCounts::default();
        for (status, count) in rows {
            counts.add(&status, count);
        }
        Ok(counts)
    }
}
