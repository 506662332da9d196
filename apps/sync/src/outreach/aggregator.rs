//! Outreach aggregation: merges saved contacts, social matches and mail
//! connection status into one sectioned, prioritized action list.
//!
//! Flow: fetch the three sources concurrently (each through its own
//! `SyncedQuery`) → degrade any failed source to empty → merge by contact id
//! → annotate → split into sections → stable-sort each section.
//!
//! Nothing here is persisted; the view is rebuilt from scratch every pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api_client::{endpoints, ApiClient};
use crate::errors::SyncError;
use crate::network::NetworkMonitor;
use crate::outreach::models::{
    ConnectionStatus, OutreachItem, OutreachSource, OutreachStatus, OutreachView, SavedContact,
    SocialMatch, SuggestedAction,
};
use crate::outreach::status::{annotate, AggregationThresholds};
use crate::storage::CacheStore;
use crate::sync::query::{Fetcher, QueryOptions, SyncedQuery};

pub const SAVED_CONTACTS_KEY: &str = "saved_contacts";
pub const SOCIAL_MATCHES_KEY: &str = "social_matches";
pub const CONNECTION_STATUS_KEY: &str = "message_connection_status";

// ────────────────────────────────────────────────────────────────────────────
// Merge
// ────────────────────────────────────────────────────────────────────────────

/// Decides whether items get an email channel.
///
/// `None` means the connection-status source failed; the contact's own
/// address is then the only signal.
fn email_available(contact_email: Option<&str>, connection: Option<&ConnectionStatus>) -> bool {
    let has_address = contact_email.is_some_and(|e| !e.trim().is_empty());
    match connection {
        Some(status) => has_address && status.email_connected,
        None => has_address,
    }
}

fn item_from_saved(contact: &SavedContact, has_email: bool) -> OutreachItem {
    OutreachItem {
        contact_id: contact.contact_id.clone(),
        saved_id: Some(contact.id.clone()),
        social_match_id: None,
        name: contact.name.clone(),
        school: contact.school.clone(),
        has_email,
        has_social: false,
        is_following: false,
        message_sent_at: contact.engagement.sent_at,
        message_opened_at: contact.engagement.opened_at,
        message_replied_at: contact.engagement.replied_at,
        open_count: contact.engagement.open_count,
        social_discovered_at: None,
        social_dm_sent_at: None,
        social_replied_at: None,
        status: OutreachStatus::NeedContact,
        is_hot: false,
        last_activity_at: None,
        days_since_contact: None,
        suggested_action: SuggestedAction::SendEmail,
    }
}

fn item_from_social(social: &SocialMatch) -> OutreachItem {
    let mut item = item_from_saved(
        &SavedContact {
            id: String::new(),
            contact_id: social.contact_id.clone(),
            name: social.name.clone().unwrap_or_else(|| social.handle.clone()),
            school: None,
            email: None,
            engagement: Default::default(),
        },
        false,
    );
    item.saved_id = None;
    apply_social(&mut item, social);
    item
}

/// Social-channel fields always come from the social record.
fn apply_social(item: &mut OutreachItem, social: &SocialMatch) {
    item.social_match_id = Some(social.id.clone());
    item.has_social = true;
    item.is_following = social.is_following;
    item.social_discovered_at = social.discovered_at;
    item.social_dm_sent_at = social.dm_sent_at;
    item.social_replied_at = social.replied_at;
}

/// Merges the sources into one item per external contact id.
///
/// Saved contacts come first in source order; followers that were never
/// saved follow in social-source order. Duplicate ids within a source keep
/// the first record.
pub fn merge_sources(
    saved: &[SavedContact],
    social: &[SocialMatch],
    connection: Option<&ConnectionStatus>,
) -> Vec<OutreachItem> {
    let mut social_by_contact: HashMap<&str, &SocialMatch> = HashMap::new();
    for record in social {
        social_by_contact
            .entry(record.contact_id.as_str())
            .or_insert(record);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut items = Vec::with_capacity(saved.len() + social.len());

    for contact in saved {
        if !seen.insert(contact.contact_id.as_str()) {
            continue;
        }
        let has_email = email_available(contact.email.as_deref(), connection);
        let mut item = item_from_saved(contact, has_email);
        if let Some(record) = social_by_contact.get(contact.contact_id.as_str()) {
            apply_social(&mut item, record);
        }
        items.push(item);
    }

    for record in social {
        if seen.insert(record.contact_id.as_str()) {
            items.push(item_from_social(record));
        }
    }

    items
}

// ────────────────────────────────────────────────────────────────────────────
// Sections
// ────────────────────────────────────────────────────────────────────────────

/// Annotates every item and splits them into ordered sections.
pub fn build_view(
    mut items: Vec<OutreachItem>,
    now: DateTime<Utc>,
    thresholds: &AggregationThresholds,
) -> OutreachView {
    let mut view = OutreachView::default();
    for item in items.iter_mut() {
        annotate(item, now, thresholds);
    }
    view.hot_count = items.iter().filter(|i| i.is_hot).count();

    for item in items {
        match item.status {
            OutreachStatus::Engaged => view.engaged.push(item),
            OutreachStatus::Waiting => view.waiting.push(item),
            OutreachStatus::Responded => view.responded.push(item),
            OutreachStatus::NeedContact => view.need_contact.push(item),
        }
    }

    // All sorts are stable; equal keys keep merge order.
    view.engaged.sort_by(|a, b| {
        b.is_hot
            .cmp(&a.is_hot)
            .then_with(|| b.last_activity_at.cmp(&a.last_activity_at))
    });
    view.waiting.sort_by_key(|i| i.last_outreach_at());
    view.responded
        .sort_by(|a, b| b.replied_at().cmp(&a.replied_at()));
    view.need_contact.sort_by(|a, b| {
        b.channel_count()
            .cmp(&a.channel_count())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    view
}

/// Pure aggregation: merge + annotate + section.
pub fn aggregate(
    saved: &[SavedContact],
    social: &[SocialMatch],
    connection: Option<&ConnectionStatus>,
    now: DateTime<Utc>,
    thresholds: &AggregationThresholds,
) -> OutreachView {
    build_view(merge_sources(saved, social, connection), now, thresholds)
}

// ────────────────────────────────────────────────────────────────────────────
// Aggregator
// ────────────────────────────────────────────────────────────────────────────

pub struct OutreachAggregator {
    saved: SyncedQuery<Vec<SavedContact>>,
    social: SyncedQuery<Vec<SocialMatch>>,
    connection: SyncedQuery<ConnectionStatus>,
    thresholds: AggregationThresholds,
}

impl OutreachAggregator {
    pub fn new(
        saved: impl Fetcher<Vec<SavedContact>> + 'static,
        social: impl Fetcher<Vec<SocialMatch>> + 'static,
        connection: impl Fetcher<ConnectionStatus> + 'static,
        network: Arc<NetworkMonitor>,
        cache: CacheStore,
        options: QueryOptions,
    ) -> Self {
        Self {
            saved: SyncedQuery::new(SAVED_CONTACTS_KEY, saved, options, network.clone(), cache.clone()),
            social: SyncedQuery::new(SOCIAL_MATCHES_KEY, social, options, network.clone(), cache.clone()),
            connection: SyncedQuery::new(CONNECTION_STATUS_KEY, connection, options, network, cache),
            thresholds: AggregationThresholds::default(),
        }
    }

    /// Aggregator reading the three backend endpoints.
    pub fn from_backend(
        client: ApiClient,
        network: Arc<NetworkMonitor>,
        cache: CacheStore,
        options: QueryOptions,
    ) -> Self {
        let saved_client = client.clone();
        let social_client = client.clone();
        Self::new(
            move || {
                let client = saved_client.clone();
                async move {
                    let contacts: Vec<SavedContact> = client.get_json(endpoints::SAVED_CONTACTS).await?;
                    anyhow::Ok(contacts)
                }
            },
            move || {
                let client = social_client.clone();
                async move {
                    let matches: Vec<SocialMatch> = client.get_json(endpoints::SOCIAL_MATCHES).await?;
                    anyhow::Ok(matches)
                }
            },
            move || {
                let client = client.clone();
                async move {
                    let status: ConnectionStatus = client.get_json(endpoints::MESSAGE_CONNECTION_STATUS).await?;
                    anyhow::Ok(status)
                }
            },
            network,
            cache,
            options,
        )
    }

    pub fn with_thresholds(mut self, thresholds: AggregationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Fetches all sources and rebuilds the view. Fails only when every
    /// source came back empty-handed.
    pub async fn refresh(&self) -> Result<OutreachView, SyncError> {
        self.refresh_at(Utc::now()).await
    }

    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Result<OutreachView, SyncError> {
        let (saved, social, connection) = tokio::join!(
            self.saved.refetch(),
            self.social.refetch(),
            self.connection.refetch()
        );

        let mut failed_sources = Vec::new();
        let mut is_stale = false;

        let saved = match saved.into_result() {
            Ok((data, stale)) => {
                is_stale |= stale;
                data
            }
            Err(e) => {
                warn!("Saved contacts unavailable, treating as empty: {e}");
                failed_sources.push(OutreachSource::SavedContacts);
                Vec::new()
            }
        };
        let social = match social.into_result() {
            Ok((data, stale)) => {
                is_stale |= stale;
                data
            }
            Err(e) => {
                warn!("Social matches unavailable, treating as empty: {e}");
                failed_sources.push(OutreachSource::SocialMatches);
                Vec::new()
            }
        };
        let connection = match connection.into_result() {
            Ok((data, stale)) => {
                is_stale |= stale;
                Some(data)
            }
            Err(e) => {
                warn!("Mail connection status unavailable: {e}");
                failed_sources.push(OutreachSource::ConnectionStatus);
                None
            }
        };

        if failed_sources.len() == 3 {
            return Err(SyncError::AllSourcesFailed);
        }

        let mut view = aggregate(&saved, &social, connection.as_ref(), now, &self.thresholds);
        view.is_stale = is_stale;
        view.failed_sources = failed_sources;

        debug!(
            "Outreach merged {} saved + {} social into {} items",
            saved.len(),
            social.len(),
            view.total()
        );
        info!(
            "Outreach view: {} engaged, {} waiting, {} responded, {} need contact ({} hot)",
            view.engaged.len(),
            view.waiting.len(),
            view.responded.len(),
            view.need_contact.len(),
            view.hot_count
        );
        Ok(view)
    }
}
