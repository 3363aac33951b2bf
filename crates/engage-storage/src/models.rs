//! Database models

use chrono::{DateTime, Utc};
use engage_common::types::{
    CampaignId, CampaignStatus, ChannelId, CustomerId, OrganizationId, ProfileId, QueueItemId,
    QueueStatus, StageId, TagId,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Campaign table name
pub const CAMPAIGNS_TABLE: &str = "bulk_message_campaigns";

/// Queue table name
pub const QUEUE_TABLE: &str = "bulk_message_queue";

/// Match on one custom field of the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldFilter {
    pub field_id: Uuid,
    pub value: String,
}

/// Which customers a campaign targets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingFilters {
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub stage_ids: Vec<StageId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(default)]
    pub custom_field_filters: Vec<CustomFieldFilter>,
}

/// Campaign model
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub organization_id: OrganizationId,
    pub created_by: Option<ProfileId>,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub channel_id: Option<ChannelId>,
    pub stage_ids: Vec<StageId>,
    pub tag_ids: Vec<TagId>,
    pub custom_field_filters: Json<Vec<CustomFieldFilter>>,
    /// Milliseconds between two messages of a batch
    pub delay_between_messages: i32,
    pub batch_size: i32,
    /// Milliseconds between two batches
    pub delay_between_batches: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: String,
    pub total_recipients: i32,
    pub messages_sent: i32,
    pub messages_failed: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Targeting filters as stored on the campaign
    pub fn targeting(&self) -> TargetingFilters {
        TargetingFilters {
            channel_id: self.channel_id,
            stage_ids: self.stage_ids.clone(),
            tag_ids: self.tag_ids.clone(),
            custom_field_filters: self.custom_field_filters.0.clone(),
        }
    }

    /// Share of recipients already processed, sent or failed
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients <= 0 {
            0.0
        } else {
            let done = (self.messages_sent + self.messages_failed) as f64;
            (done / self.total_recipients as f64 * 100.0).min(100.0)
        }
    }

    /// Merge a realtime row change. Returns whether anything changed.
    pub fn apply_change(&mut self, change: &CampaignChange) -> bool {
        if change.id != self.id {
            return false;
        }

        let before = self.clone();

        if let Some(status) = &change.status {
            self.status = status.clone();
        }
        if let Some(total) = change.total_recipients {
            self.total_recipients = total;
        }
        if let Some(sent) = change.messages_sent {
            self.messages_sent = sent;
        }
        if let Some(failed) = change.messages_failed {
            self.messages_failed = failed;
        }
        if change.scheduled_at.is_some() {
            self.scheduled_at = change.scheduled_at;
        }
        if change.started_at.is_some() {
            self.started_at = change.started_at;
        }
        if change.completed_at.is_some() {
            self.completed_at = change.completed_at;
        }
        if let Some(updated_at) = change.updated_at {
            self.updated_at = updated_at;
        }

        *self != before
    }
}

/// Fields of a campaign row carried by a realtime UPDATE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignChange {
    pub id: CampaignId,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_recipients: Option<i32>,
    #[serde(default)]
    pub messages_sent: Option<i32>,
    #[serde(default)]
    pub messages_failed: Option<i32>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Create campaign input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub organization_id: OrganizationId,
    pub created_by: Option<ProfileId>,
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub targeting: TargetingFilters,
    pub delay_between_messages: i32,
    pub batch_size: i32,
    pub delay_between_batches: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
}

/// Update campaign input, replaces every editable field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateCampaign {
    pub name: String,
    pub description: Option<String>,
    pub content: String,
    pub targeting: TargetingFilters,
    pub delay_between_messages: i32,
    pub batch_size: i32,
    pub delay_between_batches: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
}

/// Queue item joined with its customer and channel
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueItemId,
    pub campaign_id: CampaignId,
    pub customer_id: Option<CustomerId>,
    pub channel_id: Option<ChannelId>,
    pub message_id: Option<Uuid>,
    pub status: String,
    pub batch_number: i32,
    pub position_in_batch: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub channel_name: Option<String>,
    pub channel_type: Option<String>,
}

impl QueueEntry {
    /// Get status enum
    pub fn status_enum(&self) -> Option<QueueStatus> {
        self.status.parse().ok()
    }

    /// Merge a realtime row change. Returns whether anything changed.
    ///
    /// `error_message` is taken as-is: the row clears it on retry.
    pub fn apply_change(&mut self, change: &QueueItemChange) -> bool {
        if change.id != self.id {
            return false;
        }

        let before = self.clone();

        if let Some(status) = &change.status {
            self.status = status.clone();
        }
        if change.sent_at.is_some() {
            self.sent_at = change.sent_at;
        }
        if change.message_id.is_some() {
            self.message_id = change.message_id;
        }
        self.error_message = change.error_message.clone();

        *self != before
    }
}

/// Fields of a queue row carried by a realtime UPDATE
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueItemChange {
    pub id: QueueItemId,
    #[serde(default)]
    pub campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_id: Option<Uuid>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Queue rows of one campaign grouped by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusCounts {
    pub pending: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
}

impl QueueStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.sent + self.failed
    }

    /// Add `count` rows of `status`; unknown statuses are ignored
    pub fn add(&mut self, status: &str, count: i64) {
        match status.parse::<QueueStatus>() {
            Ok(QueueStatus::Pending) => self.pending += count,
            Ok(QueueStatus::Processing) => self.processing += count,
            Ok(QueueStatus::Sent) => self.sent += count,
            Ok(QueueStatus::Failed) => self.failed += count,
            Err(_) => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn campaign(status: CampaignStatus) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            created_by: None,
            name: "Black Friday".to_string(),
            description: None,
            content: "Hi {{name}}!".to_string(),
            channel_id: Some(Uuid::new_v4()),
            stage_ids: vec![],
            tag_ids: vec![],
            custom_field_filters: Json(vec![]),
            delay_between_messages: 1000,
            batch_size: 50,
            delay_between_batches: 30000,
            scheduled_at: None,
            status: status.to_string(),
            total_recipients: 0,
            messages_sent: 0,
            messages_failed: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn queue_entry(campaign_id: CampaignId) -> QueueEntry {
        QueueEntry {
            id: Uuid::new_v4(),
            campaign_id,
            customer_id: Some(Uuid::new_v4()),
            channel_id: None,
            message_id: None,
            status: "pending".to_string(),
            batch_number: 1,
            position_in_batch: 1,
            scheduled_at: None,
            sent_at: None,
            error_message: None,
            created_at: Utc::now(),
            customer_name: Some("Ana".to_string()),
            customer_phone: Some("+5511999999999".to_string()),
            customer_email: None,
            channel_name: None,
            channel_type: None,
        }
    }
}
