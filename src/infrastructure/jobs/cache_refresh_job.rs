use super::sync_metrics::SyncMetricsRecorder;
use crate::application::services::{CacheRefreshCoordinator, RefreshOutcome};
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Instant;

/// ロック付き再構築の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// リアルタイム・週間・殿堂入り・お知らせ
    AllCaches,
    /// 週間・殿堂入りの再選定
    Featured,
    /// 先頭ページが消えていれば作り直す
    FirstPageCheck,
}

impl RefreshKind {
    pub fn job_name(&self) -> &'static str {
        match self {
            RefreshKind::AllCaches => "cache_refresh",
            RefreshKind::Featured => "featured_posts",
            RefreshKind::FirstPageCheck => "first_page_check",
        }
    }
}

pub struct CacheRefreshJob {
    coordinator: Arc<CacheRefreshCoordinator>,
    kind: RefreshKind,
    metrics_recorder: Option<Arc<SyncMetricsRecorder>>,
}

impl CacheRefreshJob {
    pub fn new(
        coordinator: Arc<CacheRefreshCoordinator>,
        kind: RefreshKind,
        metrics_recorder: Option<Arc<SyncMetricsRecorder>>,
    ) -> Self {
        Self {
            coordinator,
            kind,
            metrics_recorder,
        }
    }

    pub fn kind(&self) -> RefreshKind {
        self.kind
    }

    pub async fn run_once(&self) -> Result<(), AppError> {
        let job = self.kind.job_name();
        let started = Instant::now();
        let outcome = match self.kind {
            RefreshKind::AllCaches => Some(self.coordinator.refresh_all_caches().await),
            RefreshKind::Featured => Some(self.coordinator.refresh_featured().await),
            RefreshKind::FirstPageCheck => self.coordinator.refresh_first_page_if_missing().await,
        };
        let duration = started.elapsed();

        let Some(outcome) = outcome else {
            return Ok(());
        };

        if let Some(recorder) = &self.metrics_recorder {
            match &outcome {
                RefreshOutcome::Skipped => recorder.record_lock_skip(job),
                RefreshOutcome::Completed { failed_phases } if failed_phases.is_empty() => {
                    recorder.record_success(job, duration)
                }
                _ => recorder.record_failure(job, duration),
            }
        }

        match outcome {
            RefreshOutcome::Completed { failed_phases } if !failed_phases.is_empty() => {
                Err(AppError::Internal(format!(
                    "{job} finished with failed phases: {}",
                    failed_phases.join(", ")
                )))
            }
            RefreshOutcome::Panicked => Err(AppError::Internal(format!("{job} panicked"))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::kv_store::KeyValueStore;
    use crate::application::ports::notifier::FeaturedNotifier;
    use crate::application::ports::post_store::PostStore;
    use crate::application::services::{
        DistributedLock, FeaturedPostService, ListProjectionCache, RealtimeScoreLedger,
    };
    use crate::domain::constants::REFRESH_LOCK_NAME;
    use crate::domain::entities::{
        CounterKind, FeaturedFlag, FeaturedNotification, ListCategory, PostDetail, PostSummary,
    };
    use crate::infrastructure::cache::MemoryStore;
    use crate::shared::config::{BreakerConfig, ListConfig, LockConfig, ScoreConfig};
    use crate::shared::retry::RetryPolicy;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct NewestPosts;

    #[async_trait]
    impl PostStore for NewestPosts {
        async fn find_posts_by_cursor(
            &self,
            after_id: Option<i64>,
            limit: usize,
        ) -> Result<Vec<PostSummary>, AppError> {
            let start = after_id.unwrap_or(101) - 1;
            Ok((1..=start)
                .rev()
                .take(limit)
                .map(|id| PostSummary::new(id, format!("post {id}"), "w"))
                .collect())
        }
        async fn find_weekly_popular(&self) -> Result<Vec<PostSummary>, AppError> {
            Ok(Vec::new())
        }
        async fn find_legendary(&self) -> Result<Vec<PostSummary>, AppError> {
            Ok(Vec::new())
        }
        async fn find_notices(&self) -> Result<Vec<PostSummary>, AppError> {
            Ok(Vec::new())
        }
        async fn find_by_ids(&self, _ids: &[i64]) -> Result<Vec<PostSummary>, AppError> {
            Ok(Vec::new())
        }
        async fn find_post_detail(&self, _id: i64) -> Result<Option<PostDetail>, AppError> {
            Ok(None)
        }
        async fn find_featured_ids(&self, _flag: FeaturedFlag) -> Result<Vec<i64>, AppError> {
            Ok(Vec::new())
        }
        async fn bulk_increment_counter(
            &self,
            _deltas: &HashMap<i64, i64>,
            _kind: CounterKind,
        ) -> Result<u64, AppError> {
            Ok(0)
        }
        async fn clear_featured_flag(&self, _flag: FeaturedFlag) -> Result<u64, AppError> {
            Ok(0)
        }
        async fn set_featured_flag(
            &self,
            ids: &[i64],
            _flag: FeaturedFlag,
        ) -> Result<u64, AppError> {
            Ok(ids.len() as u64)
        }
        async fn set_featured_flag_overriding(
            &self,
            ids: &[i64],
            _flag: FeaturedFlag,
            _overridden: FeaturedFlag,
        ) -> Result<u64, AppError> {
            Ok(ids.len() as u64)
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl FeaturedNotifier for SilentNotifier {
        async fn notify_featured(&self, _notification: FeaturedNotification) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn coordinator(store: &MemoryStore) -> Arc<CacheRefreshCoordinator> {
        let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());
        let posts: Arc<dyn PostStore> = Arc::new(NewestPosts);
        let lists = Arc::new(ListProjectionCache::new(
            Arc::clone(&shared),
            Arc::clone(&posts),
            ListConfig::default(),
        ));
        let ledger = Arc::new(RealtimeScoreLedger::with_store(
            Arc::clone(&shared),
            ScoreConfig::default(),
            BreakerConfig::default(),
        ));
        let featured = Arc::new(FeaturedPostService::new(
            Arc::clone(&posts),
            Arc::clone(&lists),
            Arc::new(SilentNotifier),
            RetryPolicy::new(1, Duration::from_millis(1), 1.0),
        ));
        Arc::new(CacheRefreshCoordinator::new(
            shared,
            posts,
            lists,
            ledger,
            featured,
            LockConfig::default(),
        ))
    }

    #[tokio::test]
    async fn held_lock_is_counted_as_skip() {
        let store = MemoryStore::new();
        let recorder = Arc::new(SyncMetricsRecorder::new(false).unwrap());
        let job = CacheRefreshJob::new(
            coordinator(&store),
            RefreshKind::AllCaches,
            Some(Arc::clone(&recorder)),
        );

        let lock = DistributedLock::new(
            Arc::new(store.clone()),
            REFRESH_LOCK_NAME,
            Duration::from_secs(60),
        );
        let guard = lock.try_acquire().await.unwrap().unwrap();
        assert!(job.run_once().await.is_ok());
        guard.release().await;
        assert!(job.run_once().await.is_ok());

        let snapshot = String::from_utf8(recorder.encode().unwrap()).unwrap();
        assert!(snapshot.contains("popularity_sync_job_lock_skips_total{job=\"cache_refresh\"} 1"));
        assert!(snapshot.contains("popularity_sync_job_runs_total{job=\"cache_refresh\"} 1"));
    }

    #[tokio::test]
    async fn first_page_check_rebuilds_once() {
        let store = MemoryStore::new();
        let recorder = Arc::new(SyncMetricsRecorder::new(false).unwrap());
        let job = CacheRefreshJob::new(
            coordinator(&store),
            RefreshKind::FirstPageCheck,
            Some(Arc::clone(&recorder)),
        );

        job.run_once().await.unwrap();
        job.run_once().await.unwrap();

        let cached = store
            .list_range(&ListCategory::FirstPage.cache_key())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.len(), 21);
        let snapshot = String::from_utf8(recorder.encode().unwrap()).unwrap();
        assert!(snapshot.contains("popularity_sync_job_runs_total{job=\"first_page_check\"} 1"));
    }
}
