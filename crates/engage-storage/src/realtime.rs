//! Realtime change feed
//!
//! Row triggers on the bulk-message tables publish a JSON document on a
//! Postgres NOTIFY channel:
//!
//! ```json
//! { "table": "bulk_message_queue", "type": "UPDATE", "record": {...}, "old_record": {...} }
//! ```
//!
//! Rows carry only the columns subscribers filter on or merge.
//!
//! A [`ChangeFeed`] turns those notifications into a per-subscriber stream
//! of [`ChangeEvent`]s, keeping only the events that match the subscriber's
//! [`ChangeFilter`]s.

use async_trait::async_trait;
use engage_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::db::DatabasePool;

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// New row image; absent on DELETE
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    /// Old row image; absent on INSERT
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

impl ChangeEvent {
    /// The row the event is about: the new image, or the old one for deletes
    pub fn row(&self) -> Option<&serde_json::Value> {
        match self.kind {
            ChangeKind::Delete => self.old_record.as_ref().or(self.record.as_ref()),
            _ => self.record.as_ref().or(self.old_record.as_ref()),
        }
    }

    /// Primary key of the affected row
    pub fn row_id(&self) -> Option<Uuid> {
        self.row()?
            .get("id")?
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Decode the affected row into `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let row = self
            .row()
            .ok_or_else(|| Error::Realtime(format!("{:?} event without a row", self.kind)))?;
        serde_json::from_value(row.clone())
            .map_err(|e| Error::Realtime(format!("Malformed {} row: {}", self.table, e)))
    }
}

/// Subscription filter: table, optional event kinds, optional column equality
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeFilter {
    pub table: String,
    pub kinds: Vec<ChangeKind>,
    pub column: Option<(String, String)>,
}

impl ChangeFilter {
    /// All changes on `table`
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            kinds: Vec::new(),
            column: None,
        }
    }

    /// Restrict to one more event kind
    pub fn on(mut self, kind: ChangeKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    /// Restrict to rows where `column` equals `value`
    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.column = Some((column.into(), value.to_string()));
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        match &self.column {
            None => true,
            Some((column, expected)) => event
                .row()
                .and_then(|row| row.get(column))
                .map(|value| match value {
                    serde_json::Value::String(s) => s == expected,
                    other => other.to_string() == *expected,
                })
                .unwrap_or(false),
        }
    }
}

/// A live stream of matching change events.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Next event; `None` once the feed is gone
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Token cancelled when this subscription is dropped
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Source of realtime row changes
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to events matching any of `filters`
    async fn subscribe(&self, filters: Vec<ChangeFilter>) -> Result<Subscription>;
}

/// Change feed backed by Postgres LISTEN/NOTIFY
pub struct PgChangeFeed {
    pool: DatabasePool,
    channel: String,
    buffer: usize,
}

impl PgChangeFeed {
    pub fn new(pool: DatabasePool, channel: impl Into<String>, buffer: usize) -> Self {
        Self {
            pool,
            channel: channel.into(),
            buffer: buffer.max(1),
        }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, filters: Vec<ChangeFilter>) -> Result<Subscription> {
        let mut listener = PgListener::connect_with(self.pool.pool())
            .await
            .map_err(|e| Error::Realtime(format!("Failed to open listener: {}", e)))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| Error::Realtime(format!("Failed to LISTEN {}: {}", self.channel, e)))?;

        debug!(channel = %self.channel, filters = filters.len(), "Realtime subscription opened");

        let (tx, rx) = mpsc::channel(self.buffer);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let channel = self.channel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    notification = listener.recv() => {
                        let notification = match notification {
                            Ok(n) => n,
                            Err(e) => {
                                error!(channel = %channel, "Realtime listener failed: {}", e);
                                break;
                            }
                        };

                        let event: ChangeEvent = match serde_json::from_str(notification.payload()) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(channel = %channel, "Dropping malformed change payload: {}", e);
                                continue;
                            }
                        };

                        if !filters.iter().any(|f| f.matches(&event)) {
                            continue;
                        }

                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(channel = %channel, "Realtime subscription closed");
        });

        Ok(Subscription::new(rx, cancel))
    }
}

/// In-process change feed; events are published by the caller
pub struct MemoryChangeFeed {
    buffer: usize,
    subscribers: Mutex<Vec<(Vec<ChangeFilter>, mpsc::Sender<ChangeEvent>)>>,
}

impl MemoryChangeFeed {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Deliver `event` to every live subscriber whose filters match.
    /// Returns the number of subscribers reached.
    pub async fn publish(&self, event: ChangeEvent) -> usize {
        let targets: Vec<mpsc::Sender<ChangeEvent>> = {
            let mut subscribers = match self.subscribers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subscribers.retain(|(_, tx)| !tx.is_closed());
            subscribers
                .iter()
                .filter(|(filters, _)| filters.iter().any(|f| f.matches(&event)))
                .map(|(_, tx)| tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every subscriber, ending their streams
    pub fn disconnect_all(&self) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.clear();
    }

    /// Subscribers still listening
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn subscribe(&self, filters: Vec<ChangeFilter>) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push((filters, tx));
        Ok(Subscription::new(rx, CancellationToken::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignChange, QueueItemChange, CAMPAIGNS_TABLE, QUEUE_TABLE};
    use pretty_assertions::assert_eq;

    fn queue_event(kind: ChangeKind, campaign_id: Uuid, id: Uuid) -> ChangeEvent {
        let row = serde_json::json!({
            "id": id.to_string(),
            "campaign_id": campaign_id.to_string(),
            "status": "sent",
            "batch_number": 1,
        });
        let (record, old_record) = match kind {
            ChangeKind::Insert => (Some(row), None),
            ChangeKind::Update => (Some(row.clone()), Some(row)),
            ChangeKind::Delete => (None, Some(row)),
        };
        ChangeEvent {
            table: QUEUE_TABLE.to_string(),
            kind,
            record,
            old_record,
        }
    }

    #[test]
    fn test_parse_notification_payload() {
        let payload = r#"{
            "table": "bulk_message_queue",
            "type": "DELETE",
            "record": null,
            "old_record": {"id": "0b8f7c9e-2f6b-4c47-9d0f-5a8c3e1b2d4f", "campaign_id": "1c9f8d0e-3a7c-4d58-8e1a-6b9d4f2c3e5a"}
        }"#;
        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(
            event.row_id(),
            Some(Uuid::parse_str("0b8f7c9e-2f6b-4c47-9d0f-5a8c3e1b2d4f").unwrap())
        );
    }

    #[test]
    fn test_trigger_row_subset_is_enough() {
        // Campaign rows arrive without name, description or content
        let payload = r#"{
            "table": "bulk_message_campaigns",
            "type": "UPDATE",
            "record": {
                "id": "0b8f7c9e-2f6b-4c47-9d0f-5a8c3e1b2d4f",
                "organization_id": "1c9f8d0e-3a7c-4d58-8e1a-6b9d4f2c3e5a",
                "status": "processing",
                "total_recipients": 120,
                "messages_sent": 10,
                "messages_failed": 2,
                "scheduled_at": null,
                "started_at": "2024-11-29T09:00:00+00:00",
                "completed_at": null,
                "updated_at": "2024-11-29T09:05:00+00:00"
            },
            "old_record": {
                "id": "0b8f7c9e-2f6b-4c47-9d0f-5a8c3e1b2d4f",
                "organization_id": "1c9f8d0e-3a7c-4d58-8e1a-6b9d4f2c3e5a",
                "status": "processing"
            }
        }"#;
        let event: ChangeEvent = serde_json::from_str(payload).unwrap();
        let org = Uuid::parse_str("1c9f8d0e-3a7c-4d58-8e1a-6b9d4f2c3e5a").unwrap();
        assert!(ChangeFilter::table(CAMPAIGNS_TABLE)
            .eq("organization_id", org)
            .matches(&event));

        let change: CampaignChange = event.decode().unwrap();
        assert_eq!(change.status.as_deref(), Some("processing"));
        assert_eq!(change.messages_sent, Some(10));
        assert_eq!(change.completed_at, None);
        assert!(change.started_at.is_some());
    }

    #[test]
    fn test_filter_by_column() {
        let campaign_id = Uuid::new_v4();
        let filter = ChangeFilter::table(QUEUE_TABLE).eq("campaign_id", campaign_id);

        assert!(filter.matches(&queue_event(ChangeKind::Insert, campaign_id, Uuid::new_v4())));
        assert!(filter.matches(&queue_event(ChangeKind::Delete, campaign_id, Uuid::new_v4())));
        assert!(!filter.matches(&queue_event(
            ChangeKind::Update,
            Uuid::new_v4(),
            Uuid::new_v4()
        )));
    }

    #[test]
    fn test_filter_by_kind_and_table() {
        let campaign_id = Uuid::new_v4();
        let filter = ChangeFilter::table(QUEUE_TABLE).on(ChangeKind::Update);
        assert!(filter.matches(&queue_event(ChangeKind::Update, campaign_id, Uuid::new_v4())));
        assert!(!filter.matches(&queue_event(ChangeKind::Insert, campaign_id, Uuid::new_v4())));

        let other = ChangeFilter::table("bulk_message_campaigns");
        assert!(!other.matches(&queue_event(ChangeKind::Update, campaign_id, Uuid::new_v4())));
    }

    #[test]
    fn test_numeric_column_match() {
        let event = queue_event(ChangeKind::Update, Uuid::new_v4(), Uuid::new_v4());
        assert!(ChangeFilter::table(QUEUE_TABLE).eq("batch_number", 1).matches(&event));
        assert!(!ChangeFilter::table(QUEUE_TABLE).eq("batch_number", 2).matches(&event));
    }

    #[test]
    fn test_decode_row() {
        let id = Uuid::new_v4();
        let event = queue_event(ChangeKind::Update, Uuid::new_v4(), id);
        let change: QueueItemChange = event.decode().unwrap();
        assert_eq!(change.id, id);
        assert_eq!(change.status.as_deref(), Some("sent"));

        let empty = ChangeEvent {
            table: QUEUE_TABLE.to_string(),
            kind: ChangeKind::Delete,
            record: None,
            old_record: None,
        };
        assert!(empty.decode::<QueueItemChange>().is_err());
    }

    #[tokio::test]
    async fn test_memory_feed_routes_by_filter() {
        let feed = MemoryChangeFeed::new(8);
        let campaign_id = Uuid::new_v4();

        let mut mine = feed
            .subscribe(vec![ChangeFilter::table(QUEUE_TABLE).eq("campaign_id", campaign_id)])
            .await
            .unwrap();
        let _other = feed
            .subscribe(vec![ChangeFilter::table(QUEUE_TABLE).eq("campaign_id", Uuid::new_v4())])
            .await
            .unwrap();

        let event = queue_event(ChangeKind::Insert, campaign_id, Uuid::new_v4());
        assert_eq!(feed.publish(event.clone()).await, 1);
        assert_eq!(mine.next().await, Some(event));
    }

    #[tokio::test]
    async fn test_memory_feed_drops_closed_subscribers() {
        let feed = MemoryChangeFeed::new(8);
        let subscription = feed.subscribe(vec![ChangeFilter::table(QUEUE_TABLE)]).await.unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_feed_disconnect_ends_stream() {
        let feed = MemoryChangeFeed::new(8);
        let mut subscription = feed.subscribe(vec![ChangeFilter::table(QUEUE_TABLE)]).await.unwrap();
        feed.disconnect_all();
        assert_eq!(subscription.next().await, None);
    }
}
