//! Campaign form - targeting, timing, validation and submission

use super::lifecycle::{ensure_allowed, CampaignAction};
use super::plan::{SendPlan, SendTiming};
use crate::api::BulkMessageApi;
use chrono::{DateTime, Utc};
use engage_common::types::{CampaignStatus, ChannelId, OrganizationId, ProfileId, StageId, TagId};
use engage_common::{Error, Result};
use engage_storage::models::{
    Campaign, CreateCampaign, CustomFieldFilter, TargetingFilters, UpdateCampaign,
};
use engage_storage::CampaignRepository;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

fn default_delay_between_messages() -> u32 {
    1000
}

fn default_batch_size() -> u32 {
    50
}

fn default_delay_between_batches() -> u32 {
    30000
}

/// Form validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("A channel is required")]
    MissingChannel,

    #[error("Message content is required")]
    EmptyContent,

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Scheduled time is in the past")]
    ScheduledInPast,

    #[error("{0} is too large")]
    ValueTooLarge(&'static str),
}

impl From<FormError> for Error {
    fn from(err: FormError) -> Self {
        Error::Validation(err.to_string())
    }
}

/// Campaign form fields. Delays are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub stage_ids: Vec<StageId>,
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    #[serde(default)]
    pub custom_field_filters: Vec<CustomFieldFilter>,
    #[serde(default = "default_delay_between_messages")]
    pub delay_between_messages: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_delay_between_batches")]
    pub delay_between_batches: u32,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl Default for CampaignForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            content: String::new(),
            channel_id: None,
            stage_ids: Vec::new(),
            tag_ids: Vec::new(),
            custom_field_filters: Vec::new(),
            delay_between_messages: default_delay_between_messages(),
            batch_size: default_batch_size(),
            delay_between_batches: default_delay_between_batches(),
            scheduled_at: None,
        }
    }
}

impl CampaignForm {
    /// Form pre-filled from an existing campaign
    pub fn from_campaign(campaign: &Campaign) -> Self {
        let targeting = campaign.targeting();
        Self {
            name: campaign.name.clone(),
            description: campaign.description.clone(),
            content: campaign.content.clone(),
            channel_id: targeting.channel_id,
            stage_ids: targeting.stage_ids,
            tag_ids: targeting.tag_ids,
            custom_field_filters: targeting.custom_field_filters,
            delay_between_messages: campaign.delay_between_messages.max(0) as u32,
            batch_size: campaign.batch_size.max(0) as u32,
            delay_between_batches: campaign.delay_between_batches.max(0) as u32,
            scheduled_at: campaign.scheduled_at,
        }
    }

    pub fn targeting(&self) -> TargetingFilters {
        TargetingFilters {
            channel_id: self.channel_id,
            stage_ids: self.stage_ids.clone(),
            tag_ids: self.tag_ids.clone(),
            custom_field_filters: self.custom_field_filters.clone(),
        }
    }

    pub fn timing(&self) -> SendTiming {
        SendTiming::from_millis(
            self.delay_between_messages as u64,
            self.batch_size,
            self.delay_between_batches as u64,
        )
    }

    /// Send plan for `recipients` with the form's timing
    pub fn plan(&self, recipients: u64) -> SendPlan {
        self.timing().plan(recipients)
    }

    /// Status a submitted campaign gets
    pub fn status(&self) -> CampaignStatus {
        if self.scheduled_at.is_some() {
            CampaignStatus::Scheduled
        } else {
            CampaignStatus::Draft
        }
    }

    pub fn validate(&self) -> std::result::Result<(), FormError> {
        self.validate_at(Utc::now())
    }

    /// Validate against `now` for the schedule check
    pub fn validate_at(&self, now: DateTime<Utc>) -> std::result::Result<(), FormError> {
        if self.channel_id.is_none() {
            return Err(FormError::MissingChannel);
        }
        if self.content.trim().is_empty() {
            return Err(FormError::EmptyContent);
        }
        if self.batch_size == 0 {
            return Err(FormError::InvalidBatchSize);
        }
        if matches!(self.scheduled_at, Some(at) if at <= now) {
            return Err(FormError::ScheduledInPast);
        }
        Ok(())
    }

    fn millis(value: u32, field: &'static str) -> std::result::Result<i32, FormError> {
        i32::try_from(value).map_err(|_| FormError::ValueTooLarge(field))
    }

    /// Validated update input
    pub fn to_update(&self) -> Result<UpdateCampaign> {
        self.validate()?;

        Ok(UpdateCampaign {
            name: self.name.trim().to_string(),
            description: self
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            content: self.content.clone(),
            targeting: self.targeting(),
            delay_between_messages: Self::millis(
                self.delay_between_messages,
                "delay_between_messages",
            )?,
            batch_size: Self::millis(self.batch_size, "batch_size")?,
            delay_between_batches: Self::millis(
                self.delay_between_batches,
                "delay_between_batches",
            )?,
            scheduled_at: self.scheduled_at,
            status: self.status(),
        })
    }

    /// Validated create input
    pub fn to_create(
        &self,
        organization_id: OrganizationId,
        created_by: Option<ProfileId>,
    ) -> Result<CreateCampaign> {
        let update = self.to_update()?;

        Ok(CreateCampaign {
            organization_id,
            created_by,
            name: update.name,
            description: update.description,
            content: update.content,
            targeting: update.targeting,
            delay_between_messages: update.delay_between_messages,
            batch_size: update.batch_size,
            delay_between_batches: update.delay_between_batches,
            scheduled_at: update.scheduled_at,
            status: update.status,
        })
    }

    /// Create a new campaign from the form
    pub async fn submit(
        &self,
        repo: &dyn CampaignRepository,
        organization_id: OrganizationId,
        created_by: Option<ProfileId>,
    ) -> Result<Campaign> {
        let input = self.to_create(organization_id, created_by)?;
        let campaign = repo.create(input).await?;

        info!(
            campaign_id = %campaign.id,
            status = %campaign.status,
            "Campaign created"
        );
        Ok(campaign)
    }

    /// Save the form over an existing draft or scheduled campaign
    pub async fn submit_update(
        &self,
        repo: &dyn CampaignRepository,
        existing: &Campaign,
    ) -> Result<Campaign> {
        ensure_allowed(existing.status_enum(), CampaignAction::Edit)?;
        let input = self.to_update()?;

        let campaign = repo
            .update(existing.organization_id, existing.id, input)
            .await?
            .ok_or_else(|| {
                Error::InvalidTransition(format!(
                    "Campaign {} is no longer editable",
                    existing.id
                ))
            })?;

        info!(campaign_id = %campaign.id, status = %campaign.status, "Campaign updated");
        Ok(campaign)
    }
}

/// Keeps the recipient estimate for the form's current targeting
pub struct RecipientEstimator {
    api: BulkMessageApi,
    organization_id: OrganizationId,
    estimated_recipients: u64,
}

impl RecipientEstimator {
    pub fn new(api: BulkMessageApi, organization_id: OrganizationId) -> Self {
        Self {
            api,
            organization_id,
            estimated_recipients: 0,
        }
    }

    pub fn estimated_recipients(&self) -> u64 {
        self.estimated_recipients
    }

    /// Re-estimate for `filters`. A failed estimate resets to 0.
    pub async fn refresh(&mut self, filters: &TargetingFilters) -> u64 {
        self.estimated_recipients = if filters.channel_id.is_none() {
            0
        } else {
            match self
                .api
                .estimate_recipients(self.organization_id, filters)
                .await
            {
                Ok(estimate) => estimate,
                Err(e) => {
                    warn!(organization_id = %self.organization_id, "Recipient estimate failed: {}", e);
                    0
                }
            }
        };
        self.estimated_recipients
    }
}
