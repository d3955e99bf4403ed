mod common;

use async_trait::async_trait;
use common::harness;
use popularity_sync::application::ports::post_store::PostStore;
use popularity_sync::application::services::{DistributedLock, RefreshOutcome};
use popularity_sync::domain::constants::REFRESH_LOCK_NAME;
use popularity_sync::domain::entities::{CounterKind, FeaturedFlag, PostDetail, PostSummary};
use popularity_sync::infrastructure::cache::MemoryStore;
use popularity_sync::shared::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy)]
enum Fault {
    SlowWeekly(Duration),
    PanicOnNotices,
}

/// 実 DB に委譲しつつ、特定の呼び出しだけ遅延・パニックさせる
struct FaultyPosts {
    inner: Arc<dyn PostStore>,
    fault: Fault,
}

#[async_trait]
impl PostStore for FaultyPosts {
    async fn find_posts_by_cursor(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostSummary>, AppError> {
        self.inner.find_posts_by_cursor(after_id, limit).await
    }

    async fn find_weekly_popular(&self) -> Result<Vec<PostSummary>, AppError> {
        if let Fault::SlowWeekly(delay) = self.fault {
            tokio::time::sleep(delay).await;
        }
        self.inner.find_weekly_popular().await
    }

    async fn find_legendary(&self) -> Result<Vec<PostSummary>, AppError> {
        self.inner.find_legendary().await
    }

    async fn find_notices(&self) -> Result<Vec<PostSummary>, AppError> {
        if let Fault::PanicOnNotices = self.fault {
            panic!("notice query exploded");
        }
        self.inner.find_notices().await
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<PostSummary>, AppError> {
        self.inner.find_by_ids(ids).await
    }

    async fn find_post_detail(&self, id: i64) -> Result<Option<PostDetail>, AppError> {
        self.inner.find_post_detail(id).await
    }

    async fn find_featured_ids(&self, flag: FeaturedFlag) -> Result<Vec<i64>, AppError> {
        self.inner.find_featured_ids(flag).await
    }

    async fn bulk_increment_counter(
        &self,
        deltas: &HashMap<i64, i64>,
        kind: CounterKind,
    ) -> Result<u64, AppError> {
        self.inner.bulk_increment_counter(deltas, kind).await
    }

    async fn clear_featured_flag(&self, flag: FeaturedFlag) -> Result<u64, AppError> {
        self.inner.clear_featured_flag(flag).await
    }

    async fn set_featured_flag(&self, ids: &[i64], flag: FeaturedFlag) -> Result<u64, AppError> {
        self.inner.set_featured_flag(ids, flag).await
    }

    async fn set_featured_flag_overriding(
        &self,
        ids: &[i64],
        flag: FeaturedFlag,
        overridden: FeaturedFlag,
    ) -> Result<u64, AppError> {
        self.inner
            .set_featured_flag_overriding(ids, flag, overridden)
            .await
    }
}

async fn lock_is_free(store: &MemoryStore) -> bool {
    let lock = DistributedLock::new(
        Arc::new(store.clone()),
        REFRESH_LOCK_NAME,
        Duration::from_secs(5),
    );
    match lock.try_acquire().await {
        Ok(Some(guard)) => {
            guard.release().await;
            true
        }
        _ => false,
    }
}

#[tokio::test]
async fn concurrent_refreshes_admit_only_one() {
    let h = harness().await;
    let coordinator = h.coordinator_over(Arc::new(FaultyPosts {
        inner: Arc::clone(&h.posts),
        fault: Fault::SlowWeekly(Duration::from_millis(300)),
    }));

    let (first, second) = tokio::join!(coordinator.refresh_all_caches(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.refresh_all_caches().await
    });

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| matches!(outcome, RefreshOutcome::Completed { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&RefreshOutcome::Skipped));
    assert!(lock_is_free(&h.store).await);
}

#[tokio::test]
async fn lock_is_released_after_a_panicking_refresh() {
    let h = harness().await;
    let coordinator = h.coordinator_over(Arc::new(FaultyPosts {
        inner: Arc::clone(&h.posts),
        fault: Fault::PanicOnNotices,
    }));

    assert_eq!(
        coordinator.refresh_all_caches().await,
        RefreshOutcome::Panicked
    );
    assert!(lock_is_free(&h.store).await);

    // 次の周期は普通に実行できる
    assert!(h.coordinator.refresh_all_caches().await.is_clean());
}

#[tokio::test]
async fn lock_is_released_when_a_refresh_is_cancelled() {
    let h = harness().await;
    let coordinator = h.coordinator_over(Arc::new(FaultyPosts {
        inner: Arc::clone(&h.posts),
        fault: Fault::SlowWeekly(Duration::from_secs(30)),
    }));

    let timed_out =
        tokio::time::timeout(Duration::from_millis(100), coordinator.refresh_all_caches()).await;
    assert!(timed_out.is_err());

    let mut free = false;
    for _ in 0..50 {
        if lock_is_free(&h.store).await {
            free = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(free, "lock still held after cancellation");
}
