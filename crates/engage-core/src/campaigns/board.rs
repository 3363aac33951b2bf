//! Campaign board - the organization's campaign list, kept live

use super::cache::{CacheEffect, CampaignListCache};
use super::dispatch::{CommandDispatcher, Reload};
use super::lifecycle::{allowed_actions, AllowedActions};
use super::listener::{spawn_listener, EventHandler, Listener};
use crate::api::CampaignCommand;
use async_trait::async_trait;
use engage_common::types::{CampaignId, OrganizationId};
use engage_common::{Error, Result};
use engage_storage::models::{Campaign, CAMPAIGNS_TABLE};
use engage_storage::{CampaignRepository, ChangeEvent, ChangeFeed, ChangeFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

struct BoardInner {
    organization_id: OrganizationId,
    campaigns: Arc<dyn CampaignRepository>,
    cache: RwLock<CampaignListCache>,
}

impl BoardInner {
    async fn fetch(&self) -> Result<()> {
        let generation = self.cache.write().await.begin_fetch();
        let campaigns = self
            .campaigns
            .list_by_organization(self.organization_id, None)
            .await?;
        let count = campaigns.len();

        if self.cache.write().await.replace(generation, campaigns) {
            debug!(organization_id = %self.organization_id, count, "Campaign list loaded");
        } else {
            debug!(generation, "Discarding stale campaign list");
        }
        Ok(())
    }
}

#[async_trait]
impl Reload for BoardInner {
    async fn reload(&self) -> Result<()> {
        self.fetch().await
    }
}

#[async_trait]
impl EventHandler for BoardInner {
    async fn handle(&self, event: ChangeEvent) {
        let effect = self.cache.write().await.apply(&event);
        if effect == CacheEffect::Refetch {
            if let Err(e) = self.fetch().await {
                warn!(organization_id = %self.organization_id, "Campaign list refetch failed: {}", e);
            }
        }
    }
}

/// Live list of one organization's campaigns plus the commands on them
#[derive(Clone)]
pub struct CampaignBoard {
    inner: Arc<BoardInner>,
    feed: Arc<dyn ChangeFeed>,
    dispatcher: Arc<CommandDispatcher>,
    listener: Arc<Mutex<Option<Listener>>>,
    realtime_active: Arc<AtomicBool>,
    processed: Arc<watch::Sender<u64>>,
}

impl CampaignBoard {
    pub fn new(
        organization_id: OrganizationId,
        campaigns: Arc<dyn CampaignRepository>,
        feed: Arc<dyn ChangeFeed>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        let (processed, _) = watch::channel(0);
        Self {
            inner: Arc::new(BoardInner {
                organization_id,
                campaigns,
                cache: RwLock::new(CampaignListCache::default()),
            }),
            feed,
            dispatcher: Arc::new(dispatcher),
            listener: Arc::new(Mutex::new(None)),
            realtime_active: Arc::new(AtomicBool::new(false)),
            processed: Arc::new(processed),
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.inner.organization_id
    }

    /// Load the list and subscribe to the organization's campaign changes
    pub async fn start(&self) -> Result<()> {
        let mut listener = self.listener.lock().await;
        if listener.is_some() && self.is_realtime_active() {
            return Ok(());
        }

        self.inner.fetch().await?;

        let subscription = self
            .feed
            .subscribe(vec![
                ChangeFilter::table(CAMPAIGNS_TABLE).eq("organization_id", self.inner.organization_id)
            ])
            .await?;
        *listener = Some(spawn_listener(
            "campaign-board",
            subscription,
            Arc::clone(&self.inner),
            Arc::clone(&self.realtime_active),
            Arc::clone(&self.processed),
        ));

        info!(organization_id = %self.inner.organization_id, "Campaign board started");
        Ok(())
    }

    /// Unsubscribe; the cached list stays readable
    pub async fn stop(&self) {
        if let Some(mut listener) = self.listener.lock().await.take() {
            listener.stop().await;
        }
        self.realtime_active.store(false, Ordering::SeqCst);
        info!(organization_id = %self.inner.organization_id, "Campaign board stopped");
    }

    pub async fn reload(&self) -> Result<()> {
        self.inner.fetch().await
    }

    pub async fn campaigns(&self) -> Vec<Campaign> {
        self.inner.cache.read().await.campaigns().to_vec()
    }

    pub async fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.inner.cache.read().await.get(id).cloned()
    }

    pub fn is_realtime_active(&self) -> bool {
        self.realtime_active.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self, id: CampaignId) -> bool {
        self.dispatcher.is_in_flight(id)
    }

    /// Actions the listed campaign currently offers; none while a command
    /// for it is in flight
    pub async fn allowed_actions(&self, id: CampaignId) -> Option<AllowedActions> {
        let campaign = self.campaign(id).await?;
        if self.is_in_flight(id) {
            return Some(AllowedActions::default());
        }
        Some(campaign.status_enum().map(allowed_actions).unwrap_or_default())
    }

    /// Send `command` for a listed campaign, then reload the list
    pub async fn execute(&self, id: CampaignId, command: CampaignCommand) -> Result<()> {
        let campaign = self
            .campaign(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Campaign {} not found", id)))?;

        self.dispatcher
            .dispatch(&campaign, command, self.inner.as_ref())
            .await
    }

    /// Counter of realtime events handled so far
    pub fn processed_events(&self) -> watch::Receiver<u64> {
        self.processed.subscribe()
    }
}
