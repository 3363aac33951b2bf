//! Local caches patched by realtime change events

use engage_common::types::{CampaignId, Page, QueueStatus};
use engage_storage::models::{
    Campaign, CampaignChange, QueueEntry, QueueItemChange, QueueStatusCounts, CAMPAIGNS_TABLE,
    QUEUE_TABLE,
};
use engage_storage::{ChangeEvent, ChangeKind};
use tracing::{debug, warn};

/// What applying an event did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEffect {
    /// A cached row was merged in place
    Patched,
    /// A cached row was removed
    Removed,
    /// The cached rows are incomplete; fetch them again
    Refetch,
    /// Only the per-status counts are stale
    Recount,
    /// Nothing cached was touched
    Ignored,
}

/// Page and filter the monitor shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueQuery {
    /// One-based
    pub page: u32,
    pub page_size: u32,
    pub status: Option<QueueStatus>,
}

/// One campaign plus the visible page of its queue
#[derive(Debug, Clone)]
pub struct QueueCache {
    pub(crate) campaign: Option<Campaign>,
    pub(crate) entries: Vec<QueueEntry>,
    pub(crate) total: i64,
    pub(crate) counts: QueueStatusCounts,
    pub(crate) query: QueueQuery,
    issued: u64,
}

impl QueueCache {
    pub fn new(page_size: u32) -> Self {
        Self {
            campaign: None,
            entries: Vec::new(),
            total: 0,
            counts: QueueStatusCounts::default(),
            query: QueueQuery {
                page: 1,
                page_size: page_size.max(1),
                status: None,
            },
            issued: 0,
        }
    }

    pub fn campaign(&self) -> Option<&Campaign> {
        self.campaign.as_ref()
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn counts(&self) -> QueueStatusCounts {
        self.counts
    }

    pub fn query(&self) -> QueueQuery {
        self.query
    }

    pub fn set_campaign(&mut self, campaign: Campaign) {
        self.campaign = Some(campaign);
    }

    pub fn set_page(&mut self, page: u32) {
        self.query.page = page.max(1);
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.query.page_size = page_size.max(1);
        self.query.page = 1;
    }

    /// Changing the filter goes back to the first page
    pub fn set_status_filter(&mut self, status: Option<QueueStatus>) {
        self.query.status = status;
        self.query.page = 1;
    }

    /// Start a fetch: returns its generation and the query to run
    pub fn begin_fetch(&mut self) -> (u64, QueueQuery) {
        self.issued += 1;
        (self.issued, self.query)
    }

    /// Install a fetched page unless a newer fetch has started since.
    /// Returns whether the page was applied.
    pub fn replace_page(
        &mut self,
        generation: u64,
        page: Page<QueueEntry>,
        counts: QueueStatusCounts,
    ) -> bool {
        if generation != self.issued {
            return false;
        }
        self.entries = page.data;
        self.total = page.total;
        self.counts = counts;
        true
    }

    /// Install freshly counted statuses unless a page fetch has started since
    pub fn replace_counts(&mut self, generation: u64, counts: QueueStatusCounts) -> bool {
        if generation != self.issued {
            return false;
        }
        self.counts = counts;
        true
    }

    pub fn generation(&self) -> u64 {
        self.issued
    }

    /// Apply one change event from the campaign or queue table
    pub fn apply(&mut self, event: &ChangeEvent) -> CacheEffect {
        match event.table.as_str() {
            CAMPAIGNS_TABLE => self.apply_campaign(event),
            QUEUE_TABLE => self.apply_queue(event),
            other => {
                debug!(table = other, "Ignoring change on unrelated table");
                CacheEffect::Ignored
            }
        }
    }

    fn apply_campaign(&mut self, event: &ChangeEvent) -> CacheEffect {
        if event.kind != ChangeKind::Update {
            return CacheEffect::Ignored;
        }
        let Some(campaign) = self.campaign.as_mut() else {
            return CacheEffect::Ignored;
        };
        let change: CampaignChange = match event.decode() {
            Ok(change) => change,
            Err(e) => {
                warn!("{}", e);
                return CacheEffect::Ignored;
            }
        };

        if campaign.apply_change(&change) {
            debug!(campaign_id = %campaign.id, status = %campaign.status, "Campaign patched");
            CacheEffect::Patched
        } else {
            CacheEffect::Ignored
        }
    }

    fn apply_queue(&mut self, event: &ChangeEvent) -> CacheEffect {
        let change: QueueItemChange = match event.decode() {
            Ok(change) => change,
            Err(e) => {
                warn!("{}", e);
                return CacheEffect::Ignored;
            }
        };
        if let (Some(campaign), Some(campaign_id)) = (&self.campaign, change.campaign_id) {
            if campaign.id != campaign_id {
                return CacheEffect::Ignored;
            }
        }

        match event.kind {
            ChangeKind::Insert => CacheEffect::Refetch,
            ChangeKind::Update => {
                let Some(entry) = self.entries.iter_mut().find(|e| e.id == change.id) else {
                    // Counts cover the whole campaign, not just this page
                    let previous = event
                        .old_record
                        .as_ref()
                        .and_then(|row| row.get("status"))
                        .and_then(|s| s.as_str());
                    return match (previous, change.status.as_deref()) {
                        (Some(old), Some(new)) if old != new => CacheEffect::Recount,
                        _ => CacheEffect::Ignored,
                    };
                };

                let cached = entry.status.clone();
                if !entry.apply_change(&change) {
                    return CacheEffect::Ignored;
                }
                // A redelivered event finds the cached row already moved
                if entry.status != cached {
                    self.counts.add(&cached, -1);
                    self.counts.add(&entry.status, 1);
                }
                debug!(item_id = %change.id, status = %entry.status, "Queue item patched");
                CacheEffect::Patched
            }
            ChangeKind::Delete => {
                let Some(position) = self.entries.iter().position(|e| e.id == change.id) else {
                    return CacheEffect::Ignored;
                };
                let removed = self.entries.remove(position);
                self.total = (self.total - 1).max(0);
                self.counts.add(&removed.status, -1);
                debug!(item_id = %removed.id, "Queue item removed");
                CacheEffect::Removed
            }
        }
    }
}

/// The campaigns of one organization, newest first
#[derive(Debug, Clone, Default)]
pub struct CampaignListCache {
    campaigns: Vec<Campaign>,
    issued: u64,
}

impl CampaignListCache {
    pub fn campaigns(&self) -> &[Campaign] {
        &self.campaigns
    }

    pub fn get(&self, id: CampaignId) -> Option<&Campaign> {
        self.campaigns.iter().find(|c| c.id == id)
    }

    pub fn begin_fetch(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Install a fetched list unless a newer fetch has started since
    pub fn replace(&mut self, generation: u64, campaigns: Vec<Campaign>) -> bool {
        if generation != self.issued {
            return false;
        }
        self.campaigns = campaigns;
        true
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> CacheEffect {
        if event.table != CAMPAIGNS_TABLE {
            return CacheEffect::Ignored;
        }

        match event.kind {
            ChangeKind::Insert => CacheEffect::Refetch,
            ChangeKind::Update => {
                let change: CampaignChange = match event.decode() {
                    Ok(change) => change,
                    Err(e) => {
                        warn!("{}", e);
                        return CacheEffect::Ignored;
                    }
                };
                match self.campaigns.iter_mut().find(|c| c.id == change.id) {
                    Some(campaign) => {
                        if campaign.apply_change(&change) {
                            CacheEffect::Patched
                        } else {
                            CacheEffect::Ignored
                        }
                    }
                    // Not listed yet, e.g. created before the first fetch finished
                    None => CacheEffect::Refetch,
                }
            }
            ChangeKind::Delete => {
                let Some(id) = event.row_id() else {
                    return CacheEffect::Ignored;
                };
                let before = self.campaigns.len();
                self.campaigns.retain(|c| c.id != id);
                if self.campaigns.len() < before {
                    CacheEffect::Removed
                } else {
                    CacheEffect::Ignored
                }
            }
        }
    }
}
