//! Campaigns - lifecycle rules, form, send plan and realtime views

mod board;
mod cache;
mod dispatch;
mod form;
mod lifecycle;
mod listener;
mod monitor;
mod plan;

pub use board::CampaignBoard;
pub use cache::{CacheEffect, CampaignListCache, QueueCache, QueueQuery};
pub use dispatch::{CommandDispatcher, Reload};
pub use form::{CampaignForm, FormError, RecipientEstimator};
pub use lifecycle::{
    allowed_actions, can_transition, ensure_allowed, AllowedActions, CampaignAction,
};
pub use monitor::{CampaignMonitor, MonitorSnapshot};
pub use plan::{format_duration, SendPlan, SendSlot, SendTiming};
