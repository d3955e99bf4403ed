use super::distributed_lock::DistributedLock;
use super::featured_service::{FeaturedPostService, FeaturedRunStats};
use super::list_cache::ListProjectionCache;
use super::realtime_score::RealtimeScoreLedger;
use crate::application::ports::kv_store::KeyValueStore;
use crate::application::ports::post_store::PostStore;
use crate::domain::constants::{FIRST_PAGE_LOCK_NAME, REFRESH_LOCK_NAME};
use crate::domain::entities::{FeaturedFlag, ListCategory, PostSummary};
use crate::shared::config::{FeaturedConfig, LockConfig};
use crate::shared::error::AppError;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 全フェーズを実行した。失敗したフェーズ名を持つ
    Completed { failed_phases: Vec<&'static str> },
    /// 他のインスタンスがロックを保持していた、またはロックを取れなかった
    Skipped,
    /// 実行中にパニックした（ロックは解放済み）
    Panicked,
}

impl RefreshOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, RefreshOutcome::Completed { failed_phases } if failed_phases.is_empty())
    }
}

/// 一覧キャッシュの定期再構築
///
/// 複数インスタンスで同じ再構築を重ねないよう分散ロックの下で動く。
pub struct CacheRefreshCoordinator {
    store: Arc<dyn KeyValueStore>,
    posts: Arc<dyn PostStore>,
    lists: Arc<ListProjectionCache>,
    ledger: Arc<RealtimeScoreLedger>,
    featured: Arc<FeaturedPostService>,
    locks: LockConfig,
    phase_timeout: Duration,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl CacheRefreshCoordinator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        posts: Arc<dyn PostStore>,
        lists: Arc<ListProjectionCache>,
        ledger: Arc<RealtimeScoreLedger>,
        featured: Arc<FeaturedPostService>,
        locks: LockConfig,
    ) -> Self {
        Self {
            store,
            posts,
            lists,
            ledger,
            featured,
            locks,
            phase_timeout: FeaturedConfig::default().phase_timeout(),
        }
    }

    /// 週間人気・殿堂入りそれぞれの再選定に許す時間
    pub fn with_phase_timeout(mut self, phase_timeout: Duration) -> Self {
        self.phase_timeout = phase_timeout;
        self
    }

    fn refresh_lock(&self) -> DistributedLock {
        DistributedLock::new(
            Arc::clone(&self.store),
            REFRESH_LOCK_NAME,
            self.locks.refresh_lock_ttl(),
        )
    }

    fn first_page_lock(&self) -> DistributedLock {
        DistributedLock::new(
            Arc::clone(&self.store),
            FIRST_PAGE_LOCK_NAME,
            self.locks.first_page_lock_ttl(),
        )
    }

    /// ロックを取って work を実行する。パニックしてもロックは解放する
    async fn with_lock<Fut>(&self, lock: DistributedLock, work: Fut) -> RefreshOutcome
    where
        Fut: Future<Output = Vec<&'static str>>,
    {
        let guard = match lock.try_acquire().await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!(
                    target: "popularity::refresh",
                    lock = lock.name(),
                    "lock held elsewhere, skipping refresh"
                );
                return RefreshOutcome::Skipped;
            }
            Err(err) => {
                tracing::warn!(
                    target: "popularity::refresh",
                    lock = lock.name(),
                    error = %err,
                    "could not acquire lock, skipping refresh"
                );
                return RefreshOutcome::Skipped;
            }
        };

        let result = AssertUnwindSafe(work).catch_unwind().await;
        guard.release().await;

        match result {
            Ok(failed_phases) => RefreshOutcome::Completed { failed_phases },
            Err(payload) => {
                tracing::error!(
                    target: "popularity::refresh",
                    lock = lock.name(),
                    panic = %panic_message(payload.as_ref()),
                    "refresh panicked"
                );
                RefreshOutcome::Panicked
            }
        }
    }

    /// リアルタイム・週間・殿堂入り・お知らせの一覧を順に再構築する
    pub async fn refresh_all_caches(&self) -> RefreshOutcome {
        let outcome = self
            .with_lock(self.refresh_lock(), async {
                let mut failed = Vec::new();
                if let Err(err) = self.rebuild_realtime_list().await {
                    log_phase_failure("realtime", &err);
                    failed.push("realtime");
                }
                failed.extend(self.featured_phases().await);
                if let Err(err) = self.rebuild_notice_list().await {
                    log_phase_failure("notice", &err);
                    failed.push("notice");
                }
                failed
            })
            .await;
        log_outcome("refresh_all_caches", &outcome);
        outcome
    }

    /// 週間人気と殿堂入りの再選定だけを行う
    pub async fn refresh_featured(&self) -> RefreshOutcome {
        let outcome = self
            .with_lock(self.refresh_lock(), self.featured_phases())
            .await;
        log_outcome("refresh_featured", &outcome);
        outcome
    }

    async fn featured_phases(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for (phase, flag) in [
            ("weekly", FeaturedFlag::Weekly),
            ("legend", FeaturedFlag::Legend),
        ] {
            match tokio::time::timeout(self.phase_timeout, self.featured.run_category(flag)).await
            {
                Ok(Ok(stats)) => log_featured(phase, &stats),
                Ok(Err(err)) => {
                    log_phase_failure(phase, &err);
                    failed.push(phase);
                }
                Err(_) => {
                    tracing::warn!(
                        target: "popularity::refresh",
                        phase,
                        timeout_secs = self.phase_timeout.as_secs(),
                        "featured phase timed out"
                    );
                    failed.push(phase);
                }
            }
        }
        failed
    }

    pub async fn refresh_first_page(&self) -> RefreshOutcome {
        let outcome = self
            .with_lock(self.first_page_lock(), async {
                match self.rebuild_first_page().await {
                    Ok(_) => Vec::new(),
                    Err(err) => {
                        log_phase_failure("first-page", &err);
                        vec!["first-page"]
                    }
                }
            })
            .await;
        log_outcome("refresh_first_page", &outcome);
        outcome
    }

    /// 先頭ページのキャッシュが無いときだけ再構築する
    pub async fn refresh_first_page_if_missing(&self) -> Option<RefreshOutcome> {
        match self.store.exists(&ListCategory::FirstPage.cache_key()).await {
            Ok(true) => None,
            Ok(false) => Some(self.refresh_first_page().await),
            Err(err) => {
                tracing::warn!(
                    target: "popularity::refresh",
                    error = %err,
                    "could not check first page cache"
                );
                None
            }
        }
    }

    async fn rebuild_first_page(&self) -> Result<usize, AppError> {
        let capacity = self.lists.config().first_page_capacity();
        let posts = self.posts.find_posts_by_cursor(None, capacity).await?;
        self.lists.replace_all(ListCategory::FirstPage, &posts).await?;
        Ok(posts.len())
    }

    /// スコア上位から一覧を作る。DB に存在しない投稿は外す
    pub async fn rebuild_realtime_list(&self) -> Result<usize, AppError> {
        let size = self.lists.config().realtime_size;
        let top = self.ledger.top_n(size).await;
        let ids: Vec<i64> = top.iter().map(|(id, _)| *id).collect();
        let found = if ids.is_empty() {
            Vec::new()
        } else {
            self.posts.find_by_ids(&ids).await?
        };

        let mut by_id: HashMap<i64, PostSummary> = found
            .into_iter()
            .map(|post| (post.post_id, post))
            .collect();
        let ordered: Vec<PostSummary> = ids.iter().filter_map(|id| by_id.remove(id)).collect();

        self.lists.replace_all(ListCategory::Realtime, &ordered).await?;
        Ok(ordered.len())
    }

    pub async fn rebuild_notice_list(&self) -> Result<usize, AppError> {
        let notices = self.posts.find_notices().await?;
        self.lists.replace_all(ListCategory::Notice, &notices).await?;
        Ok(notices.len())
    }
}

fn log_phase_failure(phase: &'static str, err: &AppError) {
    tracing::warn!(target: "popularity::refresh", phase, error = %err, "refresh phase failed");
}

fn log_featured(phase: &'static str, stats: &FeaturedRunStats) {
    tracing::info!(
        target: "popularity::featured",
        phase,
        candidates = stats.candidates,
        flagged = stats.flagged,
        newly_flagged = stats.newly_flagged,
        notified = stats.notified,
        skipped_anonymous = stats.skipped_anonymous,
        unchanged = stats.unchanged,
        "featured posts recomputed"
    );
}

fn log_outcome(operation: &'static str, outcome: &RefreshOutcome) {
    if let RefreshOutcome::Completed { failed_phases } = outcome {
        tracing::info!(
            target: "popularity::refresh",
            operation,
            failed_phases = ?failed_phases,
            "refresh completed"
        );
    }
}
