use crate::domain::entities::{CounterKind, FeaturedFlag, PostDetail, PostSummary};
use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;

/// キャッシュ同期エンジンが必要とするリレーショナルストアの契約
#[async_trait]
pub trait PostStore: Send + Sync {
    /// after_id より古い投稿を新しい順に limit 件
    async fn find_posts_by_cursor(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostSummary>, AppError>;

    async fn find_weekly_popular(&self) -> Result<Vec<PostSummary>, AppError>;

    async fn find_legendary(&self) -> Result<Vec<PostSummary>, AppError>;

    async fn find_notices(&self) -> Result<Vec<PostSummary>, AppError>;

    /// 指定 ID の投稿（順序は保証しない）
    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<PostSummary>, AppError>;

    async fn find_post_detail(&self, id: i64) -> Result<Option<PostDetail>, AppError>;

    async fn find_featured_ids(&self, flag: FeaturedFlag) -> Result<Vec<i64>, AppError>;

    /// 種類ごとに 1 文で差分を反映する
    async fn bulk_increment_counter(
        &self,
        deltas: &HashMap<i64, i64>,
        kind: CounterKind,
    ) -> Result<u64, AppError>;

    async fn clear_featured_flag(&self, flag: FeaturedFlag) -> Result<u64, AppError>;

    /// フラグが NONE の投稿にだけ付与する
    async fn set_featured_flag(&self, ids: &[i64], flag: FeaturedFlag) -> Result<u64, AppError>;

    /// フラグが NONE または overridden の投稿に付与する
    async fn set_featured_flag_overriding(
        &self,
        ids: &[i64],
        flag: FeaturedFlag,
        overridden: FeaturedFlag,
    ) -> Result<u64, AppError>;

    /// カテゴリのフラグを付け替える（クリアしてから付与）。
    /// 実装はトランザクションで包むこと。既定実装は単純に順番に呼び出す。
    async fn replace_featured_flags(
        &self,
        flag: FeaturedFlag,
        ids: &[i64],
    ) -> Result<u64, AppError> {
        self.clear_featured_flag(flag).await?;
        match flag {
            FeaturedFlag::Legend => {
                self.set_featured_flag_overriding(ids, flag, FeaturedFlag::Weekly)
                    .await
            }
            _ => self.set_featured_flag(ids, flag).await,
        }
    }
}
