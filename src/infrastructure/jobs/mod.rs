pub mod cache_refresh_job;
pub mod counter_flush_job;
pub mod metrics_server;
pub mod scheduler;
pub mod score_decay_job;
pub mod sync_metrics;

pub use cache_refresh_job::{CacheRefreshJob, RefreshKind};
pub use counter_flush_job::{CounterFlushJob, CounterFlushStats};
pub use metrics_server::spawn_prometheus_exporter;
pub use scheduler::{SchedulerHandle, SyncJobs, SyncScheduler};
pub use score_decay_job::ScoreDecayJob;
pub use sync_metrics::SyncMetricsRecorder;
