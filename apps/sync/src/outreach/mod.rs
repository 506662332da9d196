pub mod aggregator;
pub mod models;
pub mod status;

pub use aggregator::{aggregate, merge_sources, OutreachAggregator};
pub use models::{
    ConnectionStatus, EngagementRecord, OutreachItem, OutreachSource, OutreachStatus,
    OutreachView, SavedContact, SocialMatch, SuggestedAction,
};
pub use status::AggregationThresholds;
