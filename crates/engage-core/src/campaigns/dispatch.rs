//! Campaign command dispatch

use super::lifecycle::ensure_allowed;
use crate::api::{BulkMessageApi, CampaignCommand};
use async_trait::async_trait;
use engage_common::types::{CampaignId, OrganizationId};
use engage_common::{Error, Result};
use engage_storage::models::Campaign;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

/// Something that refetches the campaign list after a command
#[async_trait]
pub trait Reload: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Sends lifecycle commands, one at a time per campaign
pub struct CommandDispatcher {
    api: BulkMessageApi,
    organization_id: OrganizationId,
    in_flight: Mutex<HashSet<CampaignId>>,
}

/// Clears the in-flight mark when dropped
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<CampaignId>>,
    id: CampaignId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

fn lock(set: &Mutex<HashSet<CampaignId>>) -> MutexGuard<'_, HashSet<CampaignId>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CommandDispatcher {
    pub fn new(api: BulkMessageApi, organization_id: OrganizationId) -> Self {
        Self {
            api,
            organization_id,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_in_flight(&self, id: CampaignId) -> bool {
        lock(&self.in_flight).contains(&id)
    }

    fn begin(&self, id: CampaignId) -> Result<InFlightGuard<'_>> {
        if !lock(&self.in_flight).insert(id) {
            return Err(Error::InFlight(id));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            id,
        })
    }

    /// Send `command` for `campaign`, then reload through `reloader`
    /// whether the call succeeded or not.
    ///
    /// Commands the campaign's status does not allow, and commands for a
    /// campaign that already has one in flight, are refused without a request.
    pub async fn dispatch(
        &self,
        campaign: &Campaign,
        command: CampaignCommand,
        reloader: &dyn Reload,
    ) -> Result<()> {
        ensure_allowed(campaign.status_enum(), command.into())?;
        let _guard = self.begin(campaign.id)?;

        let result = self
            .api
            .execute(self.organization_id, campaign.id, command)
            .await;

        match &result {
            Ok(()) => info!(campaign_id = %campaign.id, %command, "Campaign command succeeded"),
            Err(e) => error!(
                campaign_id = %campaign.id,
                %command,
                "{}: {}",
                command.fallback_message(),
                e
            ),
        }

        if let Err(e) = reloader.reload().await {
            warn!(campaign_id = %campaign.id, "Reload after {} failed: {}", command, e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiAuth;
    use crate::test_support::campaign;
    use engage_common::types::CampaignStatus;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingReload {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Reload for CountingReload {
        async fn reload(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher(server: &MockServer, org: OrganizationId) -> CommandDispatcher {
        let api = BulkMessageApi::with_auth(&server.uri(), ApiAuth::None, Duration::from_secs(5))
            .unwrap();
        CommandDispatcher::new(api, org)
    }

    #[tokio::test]
    async fn test_reloads_after_success_and_failure() {
        let server = MockServer::start().await;
        let org = Uuid::new_v4();
        let dispatcher = dispatcher(&server, org);
        let reload = CountingReload::default();
        let draft = campaign(org, CampaignStatus::Draft);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        dispatcher
            .dispatch(&draft, CampaignCommand::Start, &reload)
            .await
            .unwrap();
        assert_eq!(reload.calls.load(Ordering::SeqCst), 1);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "error": "No recipients match the filters"
            })))
            .mount(&server)
            .await;
        let err = dispatcher
            .dispatch(&draft, CampaignCommand::Start, &reload)
            .await
            .unwrap_err();
        assert_eq!(
            err.user_message(CampaignCommand::Start.fallback_message()),
            "No recipients match the filters"
        );
        assert_eq!(reload.calls.load(Ordering::SeqCst), 2);
        assert!(!dispatcher.is_in_flight(draft.id));
    }

    #[tokio::test]
    async fn test_disallowed_command_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let org = Uuid::new_v4();
        let dispatcher = dispatcher(&server, org);
        let reload = CountingReload::default();
        let processing = campaign(org, CampaignStatus::Processing);

        let err = dispatcher
            .dispatch(&processing, CampaignCommand::Resume, &reload)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
        assert_eq!(reload.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_command_while_in_flight_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .expect(1)
            .mount(&server)
            .await;

        let org = Uuid::new_v4();
        let dispatcher = dispatcher(&server, org);
        let reload = CountingReload::default();
        let paused = campaign(org, CampaignStatus::Paused);

        let (first, second) = tokio::join!(
            dispatcher.dispatch(&paused, CampaignCommand::Resume, &reload),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                dispatcher
                    .dispatch(&paused, CampaignCommand::Cancel, &reload)
                    .await
            }
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::InFlight(id)) if id == paused.id));
        assert!(!dispatcher.is_in_flight(paused.id));
        assert_eq!(reload.calls.load(Ordering::SeqCst), 1);
    }
}
