//! Client-side resilience layer for the recruiting app: connectivity
//! tracking, a persisted offline write queue, cache-backed reads, the
//! outreach dashboard aggregate and streamed assistant responses.

pub mod api_client;
pub mod chat;
pub mod config;
pub mod errors;
pub mod network;
pub mod outreach;
pub mod state;
pub mod storage;
pub mod sync;

pub use errors::SyncError;
pub use state::SyncContext;
