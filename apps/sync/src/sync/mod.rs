pub mod mutation;
pub mod processor;
pub mod query;

pub use mutation::{Action, OptimisticPhase, OptimisticUpdate, SyncedMutation};
pub use processor::{HttpReplayExecutor, ProcessReport, QueueExecutor, QueueProcessor, MAX_RETRIES};
pub use query::{DataSource, Fetcher, QueryOptions, QueryState, SyncedQuery, DEFAULT_STALE_TIME};
