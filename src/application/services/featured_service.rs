use super::list_cache::ListProjectionCache;
use crate::application::ports::notifier::FeaturedNotifier;
use crate::application::ports::post_store::PostStore;
use crate::domain::entities::{FeaturedFlag, FeaturedNotification, ListCategory, PostSummary};
use crate::shared::error::AppError;
use crate::shared::retry::RetryPolicy;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeaturedRunStats {
    pub category: FeaturedFlag,
    pub candidates: usize,
    pub flagged: u64,
    pub newly_flagged: usize,
    pub notified: usize,
    pub skipped_anonymous: usize,
    /// DB の読み書きがリトライを使い切り、今回は何も変更しなかった
    pub unchanged: bool,
}

impl FeaturedRunStats {
    fn unchanged(category: FeaturedFlag) -> Self {
        Self {
            category,
            candidates: 0,
            flagged: 0,
            newly_flagged: 0,
            notified: 0,
            skipped_anonymous: 0,
            unchanged: true,
        }
    }
}

/// 週間人気・殿堂入りの選定とフラグの付け替え
///
/// 何度実行しても同じ結果になる。通知は新しくフラグが付いた投稿にだけ送る。
pub struct FeaturedPostService {
    posts: Arc<dyn PostStore>,
    lists: Arc<ListProjectionCache>,
    notifier: Arc<dyn FeaturedNotifier>,
    retry: RetryPolicy,
}

impl FeaturedPostService {
    pub fn new(
        posts: Arc<dyn PostStore>,
        lists: Arc<ListProjectionCache>,
        notifier: Arc<dyn FeaturedNotifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            posts,
            lists,
            notifier,
            retry,
        }
    }

    async fn fetch_candidates(&self, flag: FeaturedFlag) -> Result<Vec<PostSummary>, AppError> {
        match flag {
            FeaturedFlag::Weekly => self.posts.find_weekly_popular().await,
            FeaturedFlag::Legend => self.posts.find_legendary().await,
            other => Err(AppError::Internal(format!(
                "{other} posts are not selected automatically"
            ))),
        }
    }

    pub async fn run_category(&self, flag: FeaturedFlag) -> Result<FeaturedRunStats, AppError> {
        let Some(category) = ListCategory::from_featured(flag) else {
            return Err(AppError::Internal(format!("no list for flag {flag}")));
        };
        if flag == FeaturedFlag::Notice {
            return Err(AppError::Internal("notices are pinned manually".to_string()));
        }

        let fetched = self
            .retry
            .run_or_recover(
                "featured.fetch",
                || async move { self.fetch_candidates(flag).await.map(Some) },
                |_| None,
            )
            .await;
        let Some(candidates) = fetched else {
            return Ok(FeaturedRunStats::unchanged(flag));
        };

        let previous = self
            .retry
            .run_or_recover(
                "featured.previous",
                || async move { self.posts.find_featured_ids(flag).await.map(Some) },
                |_| None,
            )
            .await;
        let Some(previous) = previous else {
            return Ok(FeaturedRunStats::unchanged(flag));
        };

        let ids: Vec<i64> = candidates.iter().map(|post| post.post_id).collect();
        let ids = ids.as_slice();
        let applied = self
            .retry
            .run_or_recover(
                "featured.apply",
                || async move { self.posts.replace_featured_flags(flag, ids).await.map(Some) },
                |_| None,
            )
            .await;
        let Some(flagged) = applied else {
            return Ok(FeaturedRunStats::unchanged(flag));
        };

        if let Err(err) = self.lists.replace_all(category, &candidates).await {
            tracing::warn!(
                target: "popularity::featured",
                category = %category,
                error = %err,
                "failed to replace featured list"
            );
        }

        let mut stats = FeaturedRunStats {
            category: flag,
            candidates: candidates.len(),
            flagged,
            newly_flagged: 0,
            notified: 0,
            skipped_anonymous: 0,
            unchanged: false,
        };

        let current = match self.posts.find_featured_ids(flag).await {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(
                    target: "popularity::featured",
                    flag = %flag,
                    error = %err,
                    "could not read flags back, skipping notifications"
                );
                return Ok(stats);
            }
        };

        let previous: HashSet<i64> = previous.into_iter().collect();
        let newly: HashSet<i64> = current
            .into_iter()
            .filter(|id| !previous.contains(id))
            .collect();
        stats.newly_flagged = newly.len();

        for post in candidates.iter().filter(|post| newly.contains(&post.post_id)) {
            let Some(author_id) = post.author_id else {
                stats.skipped_anonymous += 1;
                continue;
            };
            let notification = FeaturedNotification {
                author_id,
                post_id: post.post_id,
                category: flag,
                message: flag.notification_message().to_string(),
            };
            match self.notifier.notify_featured(notification).await {
                Ok(()) => stats.notified += 1,
                Err(err) => {
                    tracing::warn!(
                        target: "popularity::featured",
                        post_id = post.post_id,
                        error = %err,
                        "failed to publish featured notification"
                    );
                }
            }
        }

        Ok(stats)
    }
}
