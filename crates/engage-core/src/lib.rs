//! Engage Core - Bulk-messaging campaign client
//!
//! Realtime-synchronized campaign list and monitor, the campaign form, and
//! command dispatch to the bulk-messages API.

pub mod api;
pub mod campaigns;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiAuth, BulkMessageApi, CampaignCommand};
pub use campaigns::{
    allowed_actions, can_transition, AllowedActions, CampaignAction, CampaignBoard,
    CampaignForm, CampaignMonitor, CommandDispatcher, FormError, MonitorSnapshot,
    RecipientEstimator, SendPlan, SendSlot, SendTiming,
};
