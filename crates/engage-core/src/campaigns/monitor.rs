//! Campaign monitor - one campaign and its queue, kept live

use super::cache::{CacheEffect, QueueCache};
use super::listener::{spawn_listener, EventHandler, Listener};
use async_trait::async_trait;
use engage_common::types::{CampaignId, OrganizationId, PageRequest, QueueStatus};
use engage_common::{Error, Result};
use engage_storage::models::{Campaign, QueueEntry, QueueStatusCounts, CAMPAIGNS_TABLE, QUEUE_TABLE};
use engage_storage::{
    CampaignRepository, ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, QueueRepository,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Point-in-time view of a monitored campaign
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub campaign: Option<Campaign>,
    pub entries: Vec<QueueEntry>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub status_filter: Option<QueueStatus>,
    pub counts: QueueStatusCounts,
    pub realtime_active: bool,
}

impl MonitorSnapshot {
    pub fn page_count(&self) -> u32 {
        if self.total <= 0 {
            return 0;
        }
        ((self.total + self.page_size as i64 - 1) / self.page_size.max(1) as i64) as u32
    }

    pub fn progress_percentage(&self) -> f64 {
        self.campaign
            .as_ref()
            .map(Campaign::progress_percentage)
            .unwrap_or(0.0)
    }
}

struct MonitorInner {
    organization_id: OrganizationId,
    campaign_id: CampaignId,
    campaigns: Arc<dyn CampaignRepository>,
    queue: Arc<dyn QueueRepository>,
    cache: RwLock<QueueCache>,
}

impl MonitorInner {
    async fn fetch_campaign(&self) -> Result<()> {
        let campaign = self
            .campaigns
            .get(self.organization_id, self.campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Campaign {} not found", self.campaign_id)))?;
        self.cache.write().await.set_campaign(campaign);
        Ok(())
    }

    async fn fetch_page(&self) -> Result<()> {
        let (generation, query) = self.cache.write().await.begin_fetch();

        let page = self
            .queue
            .list_by_campaign(
                self.campaign_id,
                query.status,
                PageRequest::new(query.page, query.page_size),
            )
            .await?;
        let counts = self.queue.status_counts(self.campaign_id).await?;
        let rows = page.data.len();

        if self.cache.write().await.replace_page(generation, page, counts) {
            debug!(campaign_id = %self.campaign_id, page = query.page, rows, "Queue page loaded");
        } else {
            debug!(campaign_id = %self.campaign_id, generation, "Discarding stale queue page");
        }
        Ok(())
    }

    async fn fetch_counts(&self) -> Result<()> {
        let generation = self.cache.read().await.generation();
        let counts = self.queue.status_counts(self.campaign_id).await?;
        if !self.cache.write().await.replace_counts(generation, counts) {
            debug!(campaign_id = %self.campaign_id, generation, "Discarding stale status counts");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MonitorInner {
    async fn handle(&self, event: ChangeEvent) {
        let effect = self.cache.write().await.apply(&event);
        let result = match effect {
            CacheEffect::Refetch => self.fetch_page().await,
            CacheEffect::Recount => self.fetch_counts().await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!(campaign_id = %self.campaign_id, "Queue refetch failed: {}", e);
        }
    }
}

/// Live detail view of one campaign: the campaign row, one page of its
/// queue, and per-status queue counts
pub struct CampaignMonitor {
    inner: Arc<MonitorInner>,
    feed: Arc<dyn ChangeFeed>,
    listener: Mutex<Option<Listener>>,
    realtime_active: Arc<AtomicBool>,
    processed: Arc<watch::Sender<u64>>,
}

impl CampaignMonitor {
    pub fn new(
        organization_id: OrganizationId,
        campaign_id: CampaignId,
        campaigns: Arc<dyn CampaignRepository>,
        queue: Arc<dyn QueueRepository>,
        feed: Arc<dyn ChangeFeed>,
        page_size: u32,
    ) -> Self {
        let (processed, _) = watch::channel(0);
        Self {
            inner: Arc::new(MonitorInner {
                organization_id,
                campaign_id,
                campaigns,
                queue,
                cache: RwLock::new(QueueCache::new(page_size)),
            }),
            feed,
            listener: Mutex::new(None),
            realtime_active: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(processed),
        }
    }

    pub fn campaign_id(&self) -> CampaignId {
        self.inner.campaign_id
    }

    /// Load the campaign and its first queue page, then subscribe to
    /// changes on the campaign row and its queue rows
    pub async fn start(&self) -> Result<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() && self.is_realtime_active() {
            return Ok(());
        }

        self.inner.fetch_campaign().await?;
        self.inner.fetch_page().await?;

        let campaign_id = self.inner.campaign_id;
        let subscription = self
            .feed
            .subscribe(vec![
                ChangeFilter::table(CAMPAIGNS_TABLE)
                    .on(ChangeKind::Update)
                    .eq("id", campaign_id),
                ChangeFilter::table(QUEUE_TABLE).eq("campaign_id", campaign_id),
            ])
            .await?;
        *listener = Some(spawn_listener(
            "campaign-monitor",
            subscription,
            Arc::clone(&self.inner),
            Arc::clone(&self.realtime_active),
            Arc::clone(&self.processed),
        ));

        info!(%campaign_id, "Campaign monitor started");
        Ok(())
    }

    /// Unsubscribe; the cached view stays readable
    pub async fn stop(&self) {
        if let Some(mut listener) = self.listener.lock().await.take() {
            listener.stop().await;
        }
        self.realtime_active.store(false, Ordering::SeqCst);
        info!(campaign_id = %self.inner.campaign_id, "Campaign monitor stopped");
    }

    /// Refetch the campaign and the current page
    pub async fn refresh(&self) -> Result<()> {
        self.inner.fetch_campaign().await?;
        self.inner.fetch_page().await
    }

    pub async fn set_page(&self, page: u32) -> Result<()> {
        self.inner.cache.write().await.set_page(page);
        self.inner.fetch_page().await
    }

    pub async fn set_page_size(&self, page_size: u32) -> Result<()> {
        self.inner.cache.write().await.set_page_size(page_size);
        self.inner.fetch_page().await
    }

    /// Filter the queue by status, back on page one
    pub async fn set_status_filter(&self, status: Option<QueueStatus>) -> Result<()> {
        self.inner.cache.write().await.set_status_filter(status);
        self.inner.fetch_page().await
    }

    pub fn is_realtime_active(&self) -> bool {
        self.realtime_active.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> MonitorSnapshot {
        let cache = self.inner.cache.read().await;
        let query = cache.query();
        MonitorSnapshot {
            campaign: cache.campaign().cloned(),
            entries: cache.entries().to_vec(),
            total: cache.total(),
            page: query.page,
            page_size: query.page_size,
            status_filter: query.status,
            counts: cache.counts(),
            realtime_active: self.is_realtime_active(),
        }
    }

    /// Counter of realtime events handled so far
    pub fn processed_events(&self) -> watch::Receiver<u64> {
        self.processed.subscribe()
    }
}
