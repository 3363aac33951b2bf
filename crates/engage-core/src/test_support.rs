//! In-memory repositories, fixtures and helpers shared by the tests

use async_trait::async_trait;
use chrono::Utc;
use engage_common::types::{
    CampaignId, CampaignStatus, OrganizationId, Page, PageRequest, QueueStatus,
};
use engage_common::Result;
use engage_storage::models::{
    Campaign, CreateCampaign, QueueEntry, QueueStatusCounts, UpdateCampaign, CAMPAIGNS_TABLE,
    QUEUE_TABLE,
};
use engage_storage::{CampaignRepository, ChangeEvent, ChangeKind, QueueRepository};
use sqlx::types::Json;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub fn campaign(organization_id: OrganizationId, status: CampaignStatus) -> Campaign {
    let now = Utc::now();
    Campaign {
        id: Uuid::new_v4(),
        organization_id,
        created_by: None,
        name: "Black Friday".to_string(),
        description: None,
        content: "Hi {{name}}, our sale starts today!".to_string(),
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

pub fn queue_entry(campaign_id: CampaignId, batch_number: i32, position: i32) -> QueueEntry {
    QueueEntry {
        id: Uuid::new_v4(),
        campaign_id,
        customer_id: Some(Uuid::new_v4()),
        channel_id: None,
        message_id: None,
        status: QueueStatus::Pending.to_string(),
        batch_number,
        position_in_batch: position,
        scheduled_at: None,
        sent_at: None,
        error_message: None,
        created_at: Utc::now(),
        customer_name: Some(format!("Customer {}-{}", batch_number, position)),
        customer_phone: Some("+5511999990000".to_string()),
        customer_email: None,
        channel_name: Some("WhatsApp Sales".to_string()),
        channel_type: Some("whatsapp".to_string()),
    }
}

/// Row JSON the way the notify trigger emits it
fn row_json<T: serde::Serialize>(row: &T) -> serde_json::Value {
    let mut value = serde_json::to_value(row).unwrap();
    if let Some(object) = value.as_object_mut() {
        object.remove("content");
        for joined in [
            "customer_name",
            "customer_phone",
            "customer_email",
            "channel_name",
            "channel_type",
        ] {
            object.remove(joined);
        }
    }
    value
}

fn event(
    table: &str,
    kind: ChangeKind,
    record: serde_json::Value,
    old_record: Option<serde_json::Value>,
) -> ChangeEvent {
    let (record, old_record) = match kind {
        ChangeKind::Insert => (Some(record), None),
        ChangeKind::Update => (Some(record), old_record),
        ChangeKind::Delete => (None, Some(old_record.unwrap_or(record))),
    };
    ChangeEvent {
        table: table.to_string(),
        kind,
        record,
        old_record,
    }
}

pub fn campaign_event(kind: ChangeKind, campaign: &Campaign) -> ChangeEvent {
    event(CAMPAIGNS_TABLE, kind, row_json(campaign), None)
}

pub fn queue_event(kind: ChangeKind, entry: &QueueEntry, old: Option<&QueueEntry>) -> ChangeEvent {
    event(QUEUE_TABLE, kind, row_json(entry), old.map(row_json))
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[derive(Default)]
pub struct MemoryCampaigns {
    rows: Mutex<Vec<Campaign>>,
    list_calls: AtomicUsize,
}

impl MemoryCampaigns {
    pub fn with(rows: Vec<Campaign>) -> Self {
        Self {
            rows: Mutex::new(rows),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, campaign: Campaign) {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|c| c.id != campaign.id);
        rows.push(campaign);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CampaignRepository for MemoryCampaigns {
    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<Campaign> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.organization_id == organization_id)
            .filter(|c| status.map_or(true, |s| c.status == s.as_str()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn get(
        &self,
        organization_id: OrganizationId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id && c.organization_id == organization_id)
            .cloned())
    }

    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let mut row = campaign(input.organization_id, input.status);
        row.created_by = input.created_by;
        row.name = input.name;
        row.description = input.description;
        row.content = input.content;
        row.channel_id = input.targeting.channel_id;
        row.stage_ids = input.targeting.stage_ids;
        row.tag_ids = input.targeting.tag_ids;
        row.custom_field_filters = Json(input.targeting.custom_field_filters);
        row.delay_between_messages = input.delay_between_messages;
        row.batch_size = input.batch_size;
        row.delay_between_batches = input.delay_between_batches;
        row.scheduled_at = input.scheduled_at;
        self.rows.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        organization_id: OrganizationId,
        id: CampaignId,
        input: UpdateCampaign,
    ) -> Result<Option<Campaign>> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.iter_mut().find(|c| {
            c.id == id
                && c.organization_id == organization_id
                && (c.status == "draft" || c.status == "scheduled")
        }) else {
            return Ok(None);
        };
        row.name = input.name;
        row.description = input.description;
        row.content = input.content;
        row.channel_id = input.targeting.channel_id;
        row.stage_ids = input.targeting.stage_ids;
        row.tag_ids = input.targeting.tag_ids;
        row.custom_field_filters = Json(input.targeting.custom_field_filters);
        row.delay_between_messages = input.delay_between_messages;
        row.batch_size = input.batch_size;
        row.delay_between_batches = input.delay_between_batches;
        row.scheduled_at = input.scheduled_at;
        row.status = input.status.to_string();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    rows: Mutex<Vec<QueueEntry>>,
    list_calls: AtomicUsize,
}

impl MemoryQueue {
    pub fn with(rows: Vec<QueueEntry>) -> Self {
        Self {
            rows: Mutex::new(rows),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, entry: QueueEntry) {
        self.rows.lock().unwrap().push(entry);
    }

    pub fn replace(&self, entry: QueueEntry) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|e| e.id == entry.id) {
            *row = entry;
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueRepository for MemoryQueue {
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        status: Option<QueueStatus>,
        page: PageRequest,
    ) -> Result<Page<QueueEntry>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<QueueEntry> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .filter(|e| status.map_or(true, |s| e.status == s.as_str()))
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.batch_number, e.position_in_batch));

        let total = rows.len() as i64;
        let data = rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok(Page { data, total })
    }

    async fn status_counts(&self, campaign_id: CampaignId) -> Result<QueueStatusCounts> {
        let mut counts = QueueStatusCounts::default();
        for entry in self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
        {
            counts.add(&entry.status, 1);
        }
        Ok(counts)
    }
}
