//! Status, hot-lead and next-action derivation for one merged contact.
//!
//! All functions are pure in their inputs and `now`.

use chrono::{DateTime, Duration, Utc};

use super::models::{OutreachItem, OutreachStatus, SuggestedAction};

/// Recency windows and counts used by the derivation.
///
/// The two follow windows are separate knobs: a follow keeps a contact
/// "engaged" for longer than it keeps them "hot".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationThresholds {
    pub engaged_follow_window: Duration,
    pub hot_follow_window: Duration,
    pub hot_open_window: Duration,
    pub hot_open_count: u32,
}

impl Default for AggregationThresholds {
    fn default() -> Self {
        Self {
            engaged_follow_window: Duration::days(7),
            hot_follow_window: Duration::days(3),
            hot_open_window: Duration::hours(24),
            hot_open_count: 2,
        }
    }
}

fn within(ts: Option<DateTime<Utc>>, now: DateTime<Utc>, window: Duration) -> bool {
    ts.is_some_and(|t| now - t <= window)
}

fn followed_within(item: &OutreachItem, now: DateTime<Utc>, window: Duration) -> bool {
    item.is_following && within(item.social_discovered_at, now, window)
}

/// First match wins: responded, engaged, waiting, need_contact.
pub fn derive_status(
    item: &OutreachItem,
    now: DateTime<Utc>,
    thresholds: &AggregationThresholds,
) -> OutreachStatus {
    if item.message_replied_at.is_some() || item.social_replied_at.is_some() {
        OutreachStatus::Responded
    } else if item.message_opened_at.is_some()
        || followed_within(item, now, thresholds.engaged_follow_window)
    {
        OutreachStatus::Engaged
    } else if item.message_sent_at.is_some() || item.social_dm_sent_at.is_some() {
        OutreachStatus::Waiting
    } else {
        OutreachStatus::NeedContact
    }
}

pub fn is_hot(item: &OutreachItem, now: DateTime<Utc>, thresholds: &AggregationThresholds) -> bool {
    item.open_count >= thresholds.hot_open_count
        || within(item.message_opened_at, now, thresholds.hot_open_window)
        || followed_within(item, now, thresholds.hot_follow_window)
}

pub fn suggested_action(status: OutreachStatus, has_email: bool, has_social: bool) -> SuggestedAction {
    match status {
        OutreachStatus::Responded => SuggestedAction::ViewReply,
        OutreachStatus::Engaged => SuggestedAction::ThankYou,
        OutreachStatus::Waiting => SuggestedAction::FollowUp,
        OutreachStatus::NeedContact if has_email => SuggestedAction::SendEmail,
        OutreachStatus::NeedContact if has_social => SuggestedAction::SendDm,
        OutreachStatus::NeedContact => SuggestedAction::SendEmail,
    }
}

/// Latest of every engagement timestamp on the item.
pub fn last_activity_at(item: &OutreachItem) -> Option<DateTime<Utc>> {
    [
        item.message_sent_at,
        item.message_opened_at,
        item.message_replied_at,
        item.social_discovered_at,
        item.social_dm_sent_at,
        item.social_replied_at,
    ]
    .into_iter()
    .flatten()
    .max()
}

/// Whole days since the latest outbound message; `None` if never contacted.
pub fn days_since_contact(item: &OutreachItem, now: DateTime<Utc>) -> Option<i64> {
    item.last_outreach_at().map(|t| (now - t).num_days())
}

/// Fills every derived field from the raw ones.
pub fn annotate(item: &mut OutreachItem, now: DateTime<Utc>, thresholds: &AggregationThresholds) {
    item.status = derive_status(item, now, thresholds);
    item.is_hot = is_hot(item, now, thresholds);
    item.last_activity_at = last_activity_at(item);
    item.days_since_contact = days_since_contact(item, now);
    item.suggested_action = suggested_action(item.status, item.has_email, item.has_social);
}
