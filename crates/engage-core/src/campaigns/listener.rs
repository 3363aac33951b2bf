//! Background task draining a realtime subscription

use async_trait::async_trait;
use engage_storage::{ChangeEvent, Subscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[async_trait]
pub(crate) trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: ChangeEvent);
}

/// Handle on a running listener task; dropping it stops the task
pub(crate) struct Listener {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Stop the task and wait for it to finish
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Realtime listener task failed: {}", e);
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Feed every event of `subscription` to `handler` until stopped or the
/// stream ends. `active` is true while the stream is live; `processed`
/// counts handled events.
pub(crate) fn spawn_listener<H: EventHandler>(
    label: &'static str,
    mut subscription: Subscription,
    handler: Arc<H>,
    active: Arc<AtomicBool>,
    processed: Arc<watch::Sender<u64>>,
) -> Listener {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    active.store(true, Ordering::SeqCst);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(listener = label, "Realtime listener stopped");
                    break;
                }
                event = subscription.next() => {
                    let Some(event) = event else {
                        warn!(listener = label, "Realtime stream ended; updates paused until restart");
                        break;
                    };
                    handler.handle(event).await;
                    processed.send_modify(|n| *n += 1);
                }
            }
        }
        active.store(false, Ordering::SeqCst);
    });

    Listener {
        cancel,
        handle: Some(handle),
    }
}
