pub mod cache_sync_listener;
pub mod counter_buffer;
pub mod distributed_lock;
pub mod featured_service;
pub mod list_cache;
pub mod realtime_score;
pub mod refresh_coordinator;

pub use cache_sync_listener::{CacheSyncListener, SyncPools};
pub use counter_buffer::{CounterBuffer, PendingDeltas};
pub use distributed_lock::{DistributedLock, LockGuard};
pub use featured_service::{FeaturedPostService, FeaturedRunStats};
pub use list_cache::{BackfillOutcome, ListProjectionCache};
pub use realtime_score::{LocalScoreSink, RealtimeScoreLedger, ScoreSink, StoreScoreSink};
pub use refresh_coordinator::{CacheRefreshCoordinator, RefreshOutcome};
