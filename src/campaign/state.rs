use crate::models::campaign::CampaignStatus;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignAction {
    Schedule,
    Start,
    Pause,
    Resume,
    Cancel,
    Complete,
}

impl CampaignAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "schedule" => Some(Self::Schedule),
            "start" => Some(Self::Start),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "cancel" => Some(Self::Cancel),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for CampaignAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn status_name(status: &CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Draft => "draft",
        CampaignStatus::Scheduled => "scheduled",
        CampaignStatus::InProgress => "in_progress",
        CampaignStatus::Paused => "paused",
        CampaignStatus::Completed => "completed",
        CampaignStatus::Cancelled => "cancelled",
    }
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("cannot {action} a campaign that is {}", status_name(.from))]
    InvalidTransition {
        from: CampaignStatus,
        action: CampaignAction,
    },
    #[error("campaign has no contacts")]
    NoContacts,
    #[error("agent is not ready to place calls: {0}")]
    AgentNotReady(String),
    #[error("contacts can only be changed while the campaign is draft, scheduled or paused")]
    ContactsLocked,
    #[error("campaign is {}, not in progress", status_name(.0))]
    NotRunning(CampaignStatus),
    #[error("campaign not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<sea_orm::DbErr> for CampaignError {
    fn from(err: sea_orm::DbErr) -> Self {
        CampaignError::Internal(err.into())
    }
}

/// Next status for `action`, or `InvalidTransition`.
pub fn transition(
    from: CampaignStatus,
    action: CampaignAction,
) -> Result<CampaignStatus, CampaignError> {
    use CampaignAction as A;
    use CampaignStatus as S;
    let next = match (from, action) {
        (S::Draft, A::Schedule) => S::Scheduled,
        (S::Draft | S::Scheduled, A::Start) => S::InProgress,
        (S::InProgress, A::Pause) => S::Paused,
        (S::Paused, A::Resume) => S::InProgress,
        (S::Draft | S::Scheduled | S::InProgress | S::Paused, A::Cancel) => S::Cancelled,
        (S::InProgress | S::Paused, A::Complete) => S::Completed,
        _ => return Err(CampaignError::InvalidTransition { from, action }),
    };
    Ok(next)
}

pub fn is_finished(status: CampaignStatus) -> bool {
    matches!(status, CampaignStatus::Completed | CampaignStatus::Cancelled)
}

pub fn contacts_editable(status: CampaignStatus) -> bool {
    matches!(
        status,
        CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Paused
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let s = transition(CampaignStatus::Draft, CampaignAction::Schedule).unwrap();
        assert_eq!(s, CampaignStatus::Scheduled);
        let s = transition(s, CampaignAction::Start).unwrap();
        assert_eq!(s, CampaignStatus::InProgress);
        let s = transition(s, CampaignAction::Pause).unwrap();
        assert_eq!(s, CampaignStatus::Paused);
        let s = transition(s, CampaignAction::Resume).unwrap();
        assert_eq!(s, CampaignStatus::InProgress);
        let s = transition(s, CampaignAction::Complete).unwrap();
        assert_eq!(s, CampaignStatus::Completed);
    }

    #[test]
    fn test_draft_can_start_directly() {
        assert_eq!(
            transition(CampaignStatus::Draft, CampaignAction::Start).unwrap(),
            CampaignStatus::InProgress
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let cases = [
            (CampaignStatus::Draft, CampaignAction::Pause),
            (CampaignStatus::Draft, CampaignAction::Resume),
            (CampaignStatus::InProgress, CampaignAction::Start),
            (CampaignStatus::Paused, CampaignAction::Start),
            (CampaignStatus::Scheduled, CampaignAction::Schedule),
            (CampaignStatus::Completed, CampaignAction::Cancel),
            (CampaignStatus::Cancelled, CampaignAction::Resume),
            (CampaignStatus::Draft, CampaignAction::Complete),
        ];
        for (from, action) in cases {
            assert!(
                matches!(
                    transition(from, action),
                    Err(CampaignError::InvalidTransition { .. })
                ),
                "{:?} --{}--> should be rejected",
                from,
                action
            );
        }
    }

    #[test]
    fn test_error_message_names_status() {
        let err = transition(CampaignStatus::Completed, CampaignAction::Pause).unwrap_err();
        assert_eq!(err.to_string(), "cannot pause a campaign that is completed");
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(CampaignAction::parse("resume"), Some(CampaignAction::Resume));
        assert_eq!(CampaignAction::parse("process"), None);
        assert!(contacts_editable(CampaignStatus::Paused));
        assert!(!contacts_editable(CampaignStatus::InProgress));
        assert!(is_finished(CampaignStatus::Cancelled));
    }
}
