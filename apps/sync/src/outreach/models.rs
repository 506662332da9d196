use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Source records (backend shapes)
// ────────────────────────────────────────────────────────────────────────────

/// Message-engagement sub-record embedded in a saved contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementRecord {
    pub sent_at: Option<DateTime<Utc>>,
    /// Most recent open.
    pub opened_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub open_count: u32,
}

/// A coach the user saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedContact {
    /// Saved-record id.
    pub id: String,
    /// External contact id, the dedup key across sources.
    pub contact_id: String,
    pub name: String,
    pub school: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub engagement: EngagementRecord,
}

/// A social-platform account matched to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMatch {
    pub id: String,
    pub contact_id: String,
    pub name: Option<String>,
    pub handle: String,
    #[serde(default)]
    pub is_following: bool,
    /// When the follow was first seen.
    pub discovered_at: Option<DateTime<Utc>>,
    pub dm_sent_at: Option<DateTime<Utc>>,
    pub replied_at: Option<DateTime<Utc>>,
}

/// Whether the user's outbound mail account is linked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub email_connected: bool,
    pub provider: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Derived view
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    Responded,
    Engaged,
    Waiting,
    NeedContact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    ViewReply,
    ThankYou,
    FollowUp,
    SendEmail,
    SendDm,
}

/// One contact, merged across sources. Recomputed in full on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutreachItem {
    pub contact_id: String,
    pub saved_id: Option<String>,
    pub social_match_id: Option<String>,
    pub name: String,
    pub school: Option<String>,
    pub has_email: bool,
    pub has_social: bool,
    pub is_following: bool,
    pub message_sent_at: Option<DateTime<Utc>>,
    pub message_opened_at: Option<DateTime<Utc>>,
    pub message_replied_at: Option<DateTime<Utc>>,
    pub open_count: u32,
    pub social_discovered_at: Option<DateTime<Utc>>,
    pub social_dm_sent_at: Option<DateTime<Utc>>,
    pub social_replied_at: Option<DateTime<Utc>>,
    pub status: OutreachStatus,
    pub is_hot: bool,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub days_since_contact: Option<i64>,
    pub suggested_action: SuggestedAction,
}

impl OutreachItem {
    /// Latest reply on either channel.
    pub fn replied_at(&self) -> Option<DateTime<Utc>> {
        self.message_replied_at.max(self.social_replied_at)
    }

    /// Latest outbound message on either channel.
    pub fn last_outreach_at(&self) -> Option<DateTime<Utc>> {
        self.message_sent_at.max(self.social_dm_sent_at)
    }

    pub fn channel_count(&self) -> usize {
        usize::from(self.has_email) + usize::from(self.has_social)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachSource {
    SavedContacts,
    SocialMatches,
    ConnectionStatus,
}

/// Sectioned action list handed to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutreachView {
    pub engaged: Vec<OutreachItem>,
    pub waiting: Vec<OutreachItem>,
    pub responded: Vec<OutreachItem>,
    pub need_contact: Vec<OutreachItem>,
    pub hot_count: usize,
    /// At least one source was served from a stale cache.
    pub is_stale: bool,
    /// Sources that contributed nothing this pass.
    pub failed_sources: Vec<OutreachSource>,
}

impl OutreachView {
    pub fn total(&self) -> usize {
        self.engaged.len() + self.waiting.len() + self.responded.len() + self.need_contact.len()
    }

    pub fn section(&self, status: OutreachStatus) -> &[OutreachItem] {
        match status {
            OutreachStatus::Engaged => &self.engaged,
            OutreachStatus::Waiting => &self.waiting,
            OutreachStatus::Responded => &self.responded,
            OutreachStatus::NeedContact => &self.need_contact,
        }
    }
}
