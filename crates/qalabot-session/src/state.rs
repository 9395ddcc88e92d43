use chrono::{DateTime, Utc};
use qalabot_core::validate::ReportCategory;
use serde::{Deserialize, Serialize};

/// Where a conversation currently stands in a flow's step sequence.
///
/// `Idle` is both the initial and the terminal state: an `Idle`
/// conversation is behaviorally identical to an absent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingRegistrationName,
    AwaitingRegistrationPhone,
    AwaitingReportCategory,
    AwaitingReportDescription,
    AwaitingReportLocation,
    AwaitingReportPhoto,
    BrowsingEvents,
    AwaitingEventSubscription,
}

impl Phase {
    /// Whether a flow is currently in progress.
    pub fn in_flow(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Partially-filled registration data, accumulated across steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Partially-filled report data, accumulated across steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDraft {
    pub category: Option<ReportCategory>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub photo_url: Option<String>,
    pub address: Option<String>,
}

/// The flow-specific data in progress. Exactly one kind is active at a
/// time; `Phase::Idle` implies `Draft::None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Draft {
    #[default]
    None,
    Registration(RegistrationDraft),
    Report(ReportDraft),
}

/// One conversation per transport identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable identifier of the chat participant — the store's key.
    pub transport_id: String,
    /// Link to the authenticated backend user, once registration succeeds.
    pub domain_user_id: Option<i64>,
    pub phase: Phase,
    pub draft: Draft,
    /// Bumped by the store on every successful `set`.
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh idle conversation for a transport identity.
    pub fn idle(transport_id: impl Into<String>) -> Self {
        Self {
            transport_id: transport_id.into(),
            domain_user_id: None,
            phase: Phase::Idle,
            draft: Draft::None,
            last_activity_at: Utc::now(),
        }
    }

    /// Demote back to the idle state, discarding any draft.
    ///
    /// Keeps `domain_user_id`: finishing one flow must not log the user out.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.draft = Draft::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_conversation_has_no_draft() {
        let conv = Conversation::idle("42");
        assert_eq!(conv.phase, Phase::Idle);
        assert_eq!(conv.draft, Draft::None);
        assert!(conv.domain_user_id.is_none());
    }

    #[test]
    fn test_reset_keeps_domain_user() {
        let mut conv = Conversation::idle("42");
        conv.domain_user_id = Some(7);
        conv.phase = Phase::AwaitingReportPhoto;
        conv.draft = Draft::Report(ReportDraft::default());

        conv.reset();

        assert_eq!(conv.phase, Phase::Idle);
        assert_eq!(conv.draft, Draft::None);
        assert_eq!(conv.domain_user_id, Some(7));
    }

    #[test]
    fn test_in_flow() {
        assert!(!Phase::Idle.in_flow());
        assert!(Phase::AwaitingRegistrationName.in_flow());
        assert!(Phase::BrowsingEvents.in_flow());
    }
}
