//! Campaign lifecycle rules
//!
//! The server enforces transitions; these rules decide which actions the
//! client offers and which commands it refuses to send at all.

use crate::api::CampaignCommand;
use engage_common::types::CampaignStatus;
use engage_common::{Error, Result};
use serde::Serialize;

/// Something a user can do to a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignAction {
    Edit,
    Start,
    Pause,
    Resume,
    Cancel,
    Delete,
}

impl CampaignAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignAction::Edit => "edit",
            CampaignAction::Start => "start",
            CampaignAction::Pause => "pause",
            CampaignAction::Resume => "resume",
            CampaignAction::Cancel => "cancel",
            CampaignAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for CampaignAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CampaignCommand> for CampaignAction {
    fn from(command: CampaignCommand) -> Self {
        match command {
            CampaignCommand::Start => CampaignAction::Start,
            CampaignCommand::Pause => CampaignAction::Pause,
            CampaignCommand::Resume => CampaignAction::Resume,
            CampaignCommand::Cancel => CampaignAction::Cancel,
            CampaignCommand::Delete => CampaignAction::Delete,
        }
    }
}

/// Actions enabled for one status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllowedActions {
    pub edit: bool,
    pub start: bool,
    pub pause: bool,
    pub resume: bool,
    pub cancel: bool,
    pub delete: bool,
}

impl AllowedActions {
    pub fn allows(&self, action: CampaignAction) -> bool {
        match action {
            CampaignAction::Edit => self.edit,
            CampaignAction::Start => self.start,
            CampaignAction::Pause => self.pause,
            CampaignAction::Resume => self.resume,
            CampaignAction::Cancel => self.cancel,
            CampaignAction::Delete => self.delete,
        }
    }

    /// Enabled actions in display order
    pub fn actions(&self) -> Vec<CampaignAction> {
        [
            CampaignAction::Edit,
            CampaignAction::Start,
            CampaignAction::Pause,
            CampaignAction::Resume,
            CampaignAction::Cancel,
            CampaignAction::Delete,
        ]
        .into_iter()
        .filter(|a| self.allows(*a))
        .collect()
    }
}

/// Which actions a campaign in `status` offers
pub fn allowed_actions(status: CampaignStatus) -> AllowedActions {
    match status {
        CampaignStatus::Draft | CampaignStatus::Scheduled => AllowedActions {
            edit: true,
            start: true,
            cancel: true,
            delete: true,
            ..Default::default()
        },
        CampaignStatus::Processing => AllowedActions {
            pause: true,
            cancel: true,
            ..Default::default()
        },
        CampaignStatus::Paused => AllowedActions {
            resume: true,
            cancel: true,
            ..Default::default()
        },
        CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed => {
            AllowedActions {
                delete: true,
                ..Default::default()
            }
        }
    }
}

/// Whether the server may move a campaign from `from` to `to`
pub fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
    use CampaignStatus::*;

    matches!(
        (from, to),
        (Draft, Scheduled)
            | (Draft, Processing)
            | (Draft, Cancelled)
            | (Scheduled, Draft)
            | (Scheduled, Processing)
            | (Scheduled, Cancelled)
            | (Processing, Paused)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Cancelled)
            | (Paused, Processing)
            | (Paused, Cancelled)
    )
}

/// Refuse `action` unless `status` offers it
pub fn ensure_allowed(status: Option<CampaignStatus>, action: CampaignAction) -> Result<()> {
    match status {
        Some(status) if allowed_actions(status).allows(action) => Ok(()),
        Some(status) => Err(Error::InvalidTransition(format!(
            "Cannot {} a {} campaign",
            action, status
        ))),
        None => Err(Error::InvalidTransition(format!(
            "Cannot {} a campaign with an unknown status",
            action
        ))),
    }
}
