//! Campaign repository

use crate::db::DatabasePool;
use crate::models::{Campaign, CreateCampaign, UpdateCampaign};
use async_trait::async_trait;
use engage_common::types::{CampaignId, CampaignStatus, OrganizationId};
use engage_common::{Error, Result};
use sqlx::types::Json;
use uuid::Uuid;

const CAMPAIGN_COLUMNS: &str = r#"
    id, organization_id, created_by, name, description, content, channel_id,
    stage_ids, tag_ids, custom_field_filters, delay_between_messages, batch_size,
    delay_between_batches, scheduled_at, status, total_recipients, messages_sent,
    messages_failed, started_at, completed_at, created_at, updated_at
"#;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// List campaigns of an organization, newest first
    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>>;

    /// Get a campaign scoped to its organization
    async fn get(
        &self,
        organization_id: OrganizationId,
        id: CampaignId,
    ) -> Result<Option<Campaign>>;

    /// Insert a new campaign
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;

    /// Replace the editable fields of a campaign still in draft or scheduled.
    /// Returns `None` when the campaign is missing or no longer editable.
    async fn update(
        &self,
        organization_id: OrganizationId,
        id: CampaignId,
        input: UpdateCampaign,
    ) -> Result<Option<Campaign>>;
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM bulk_message_campaigns
            WHERE organization_id = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        );

        sqlx::query_as::<_, Campaign>(&sql)
            .bind(organization_id)
            .bind(status.map(|s| s.to_string()))
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn get(
        &self,
        organization_id: OrganizationId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM bulk_message_campaigns
            WHERE id = $1 AND organization_id = $2
            "#
        );

        sqlx::query_as::<_, Campaign>(&sql)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let sql = format!(
            r#"
            INSERT INTO bulk_message_campaigns (
                id, organization_id, created_by, name, description, content, channel_id,
                stage_ids, tag_ids, custom_field_filters, delay_between_messages,
                batch_size, delay_between_batches, scheduled_at, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Campaign>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.organization_id)
            .bind(input.created_by)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.content)
            .bind(input.targeting.channel_id)
            .bind(&input.targeting.stage_ids)
            .bind(&input.targeting.tag_ids)
            .bind(Json(&input.targeting.custom_field_filters))
            .bind(input.delay_between_messages)
            .bind(input.batch_size)
            .bind(input.delay_between_batches)
            .bind(input.scheduled_at)
            .bind(input.status.to_string())
            .fetch_one(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update(
        &self,
        organization_id: OrganizationId,
        id: CampaignId,
        input: UpdateCampaign,
    ) -> Result<Option<Campaign>> {
        let sql = format!(
            r#"
            UPDATE bulk_message_campaigns SET
                name = $3,
                description = $4,
                content = $5,
                channel_id = $6,
                stage_ids = $7,
                tag_ids = $8,
                custom_field_filters = $9,
                delay_between_messages = $10,
                batch_size = $11,
                delay_between_batches = $12,
                scheduled_at = $13,
                status = $14,
                updated_at = NOW()
            WHERE id = $1
              AND organization_id = $2
              AND status IN ('draft', 'scheduled')
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Campaign>(&sql)
            .bind(id)
            .bind(organization_id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.content)
            .bind(input.targeting.channel_id)
            .bind(&input.targeting.stage_ids)
            .bind(&input.targeting.tag_ids)
            .bind(Json(&input.targeting.custom_field_filters))
            .bind(input.delay_between_messages)
            .bind(input.batch_size)
            .bind(input.delay_between_batches)
            .bind(input.scheduled_at)
            .bind(input.status.to_string())
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
