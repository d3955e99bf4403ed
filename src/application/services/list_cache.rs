use crate::application::ports::kv_store::{KeyValueStore, TailAppend};
use crate::application::ports::post_store::PostStore;
use crate::domain::constants::{LIST_ID_FIELD, post_detail_key};
use crate::domain::entities::{CounterKind, ListCategory, PostDetail, PostSummary};
use crate::shared::config::ListConfig;
use crate::shared::error::AppError;
use std::sync::Arc;

/// 同時書き換えに負けたときに読み直す回数
const CAS_ATTEMPTS: usize = 3;

/// 先頭ページから 1 件削除したときの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackfillOutcome {
    pub removed: bool,
    pub backfilled: Option<i64>,
}

/// 投稿一覧キャッシュ（5 カテゴリ）と投稿詳細キャッシュ
pub struct ListProjectionCache {
    store: Arc<dyn KeyValueStore>,
    posts: Arc<dyn PostStore>,
    config: ListConfig,
}

impl ListProjectionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, posts: Arc<dyn PostStore>, config: ListConfig) -> Self {
        Self {
            store,
            posts,
            config,
        }
    }

    pub fn config(&self) -> &ListConfig {
        &self.config
    }

    /// 一覧をまるごと差し替える
    pub async fn replace_all(
        &self,
        category: ListCategory,
        items: &[PostSummary],
    ) -> Result<(), AppError> {
        let encoded = items
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.store
            .list_replace(
                &category.cache_key(),
                &encoded,
                Some(self.config.ttl_for(category)),
            )
            .await?;
        tracing::debug!(
            target: "popularity::lists",
            category = %category,
            size = encoded.len(),
            "list replaced"
        );
        Ok(())
    }

    /// 先頭に新着を追加する。キャッシュが無い場合は何もしない
    pub async fn append_newest(
        &self,
        category: ListCategory,
        item: &PostSummary,
    ) -> Result<bool, AppError> {
        let encoded = serde_json::to_string(item)?;
        let max_len = match category {
            ListCategory::FirstPage => self.config.first_page_capacity(),
            ListCategory::Realtime => self.config.realtime_size,
            _ => usize::MAX,
        };
        self.store
            .list_push_front_bounded(&category.cache_key(), &encoded, max_len)
            .await
    }

    /// 投稿を含む全一覧の要素に mutation を適用し、書き換えた要素数を返す
    ///
    /// 一覧ごとの失敗はログに残して次の一覧へ進む。
    pub async fn apply_to_all_lists<F>(&self, post_id: i64, mutation: F) -> usize
    where
        F: Fn(&mut PostSummary) + Send + Sync,
    {
        let mut rewritten = 0;
        for category in ListCategory::ALL {
            match self.apply_to_list(category, post_id, &mutation).await {
                Ok(count) => rewritten += count,
                Err(err) => {
                    tracing::warn!(
                        target: "popularity::lists",
                        category = %category,
                        post_id,
                        error = %err,
                        "failed to update cached list"
                    );
                }
            }
        }
        rewritten
    }

    async fn apply_to_list<F>(
        &self,
        category: ListCategory,
        post_id: i64,
        mutation: &F,
    ) -> Result<usize, AppError>
    where
        F: Fn(&mut PostSummary) + Send + Sync,
    {
        let key = category.cache_key();
        for _ in 0..CAS_ATTEMPTS {
            let Some(items) = self.store.list_range(&key).await? else {
                return Ok(0);
            };

            let mut rewritten = 0;
            let mut conflicted = false;
            for (index, raw) in items.iter().enumerate() {
                let Ok(mut summary) = serde_json::from_str::<PostSummary>(raw) else {
                    continue;
                };
                if summary.post_id != post_id {
                    continue;
                }
                mutation(&mut summary);
                let replacement = serde_json::to_string(&summary)?;
                if replacement == *raw {
                    continue;
                }
                if self
                    .store
                    .list_compare_and_set(&key, index, raw, &replacement)
                    .await?
                {
                    rewritten += 1;
                } else {
                    conflicted = true;
                    break;
                }
            }
            if !conflicted {
                return Ok(rewritten);
            }
        }
        Err(AppError::Store(format!(
            "list {category} kept changing while updating post {post_id}"
        )))
    }

    pub async fn update_title_everywhere(&self, post_id: i64, title: &str) -> usize {
        if !self.config.point_updates {
            return 0;
        }
        self.apply_to_all_lists(post_id, |summary| summary.title = title.to_string())
            .await
    }

    pub async fn increment_counter_everywhere(
        &self,
        post_id: i64,
        kind: CounterKind,
        delta: i64,
    ) -> usize {
        if !self.config.point_updates || delta == 0 {
            return 0;
        }
        self.apply_to_all_lists(post_id, |summary| summary.apply_counter(kind, delta))
            .await
    }

    /// 先頭ページから投稿を外し、件数が足りなくなったら次の 1 件で埋める
    ///
    /// 補充は末尾がまだ読んだときの要素である場合だけ行う。他のインスタンスが
    /// 先に補充していたら新しい末尾から読み直す。
    pub async fn remove_and_backfill_first_page(
        &self,
        post_id: i64,
    ) -> Result<BackfillOutcome, AppError> {
        let key = ListCategory::FirstPage.cache_key();
        let capacity = self.config.first_page_capacity();
        let removal = self
            .store
            .list_remove_entry(&key, LIST_ID_FIELD, post_id)
            .await?;
        if !removal.removed {
            return Ok(BackfillOutcome::default());
        }

        let mut outcome = BackfillOutcome {
            removed: true,
            backfilled: None,
        };
        let mut remaining = removal.remaining;
        let mut boundary = removal.boundary_id;
        for _ in 0..CAS_ATTEMPTS {
            let Some(tail) = boundary else {
                break;
            };
            if remaining >= capacity {
                break;
            }
            let next = self.posts.find_posts_by_cursor(Some(tail), 1).await?;
            let Some(candidate) = next.into_iter().find(|summary| summary.post_id != post_id)
            else {
                break;
            };
            let encoded = serde_json::to_string(&candidate)?;
            match self
                .store
                .list_push_back_if_tail(
                    &key,
                    LIST_ID_FIELD,
                    tail,
                    candidate.post_id,
                    &encoded,
                    capacity,
                )
                .await?
            {
                TailAppend::Appended => {
                    outcome.backfilled = Some(candidate.post_id);
                    break;
                }
                TailAppend::TailMoved {
                    remaining: now,
                    boundary_id,
                } => {
                    remaining = now;
                    boundary = boundary_id;
                }
                TailAppend::Skipped => break,
            }
        }
        tracing::debug!(
            target: "popularity::lists",
            post_id,
            backfilled = ?outcome.backfilled,
            "removed post from first page"
        );
        Ok(outcome)
    }

    /// 先頭ページ以外の一覧から投稿を外す
    pub async fn remove_everywhere(&self, post_id: i64) -> usize {
        let mut removed = 0;
        for category in ListCategory::ALL {
            if category == ListCategory::FirstPage {
                continue;
            }
            match self
                .store
                .list_remove_entry(&category.cache_key(), LIST_ID_FIELD, post_id)
                .await
            {
                Ok(removal) if removal.removed => removed += 1,
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        target: "popularity::lists",
                        category = %category,
                        post_id,
                        error = %err,
                        "failed to remove post from cached list"
                    );
                }
            }
        }
        removed
    }

    /// キャッシュ済みの一覧。未キャッシュや読めない場合は None（呼び出し側で DB から読む）
    pub async fn get_cached_list(&self, category: ListCategory) -> Option<Vec<PostSummary>> {
        let items = match self.store.list_range(&category.cache_key()).await {
            Ok(items) => items?,
            Err(err) => {
                tracing::warn!(
                    target: "popularity::lists",
                    category = %category,
                    error = %err,
                    "cache read failed, treating as miss"
                );
                return None;
            }
        };

        match items
            .iter()
            .map(|raw| serde_json::from_str::<PostSummary>(raw))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(list) => Some(list),
            Err(err) => {
                tracing::warn!(
                    target: "popularity::lists",
                    category = %category,
                    error = %err,
                    "cached list is corrupt, treating as miss"
                );
                None
            }
        }
    }

    pub async fn cache_post_detail(&self, detail: &PostDetail) -> Result<(), AppError> {
        let encoded = serde_json::to_string(detail)?;
        self.store
            .set(
                &post_detail_key(detail.summary.post_id),
                &encoded,
                Some(self.config.detail_ttl()),
            )
            .await
    }

    pub async fn get_cached_post_detail(&self, post_id: i64) -> Option<PostDetail> {
        match self.store.get(&post_detail_key(post_id)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(target: "popularity::lists", post_id, error = %err, "detail cache read failed");
                None
            }
        }
    }

    pub async fn evict_post_detail(&self, post_id: i64) {
        if let Err(err) = self.store.delete(&post_detail_key(post_id)).await {
            tracing::warn!(target: "popularity::lists", post_id, error = %err, "failed to evict detail cache");
        }
    }
}
