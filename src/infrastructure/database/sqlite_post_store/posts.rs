use super::SqlitePostStore;
use super::mapper::{map_detail_row, map_summary_row};
use super::queries::{
    CLEAR_FEATURED_FLAG, SELECT_FEATURED_IDS, SELECT_LEGENDARY, SELECT_NOTICES,
    SELECT_POST_DETAIL, SELECT_POSTS_BY_CURSOR, SELECT_SUMMARIES_BY_IDS_PREFIX,
    SELECT_WEEKLY_POPULAR,
};
use crate::application::ports::post_store::PostStore;
use crate::domain::entities::{CounterKind, FeaturedFlag, PostDetail, PostSummary};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::{Executor, QueryBuilder, Row, Sqlite};
use std::collections::HashMap;

/// 1 文あたりの投稿数。SQLite のバインド上限に収まるよう分割する
const BULK_CHUNK: usize = 5_000;

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

async fn clear_flag<'e, E>(executor: E, flag: FeaturedFlag) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(CLEAR_FEATURED_FLAG)
        .bind(flag.as_str())
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

async fn assign_flag<'e, E>(
    executor: E,
    ids: &[i64],
    flag: FeaturedFlag,
    replaceable: &[FeaturedFlag],
) -> Result<u64, AppError>
where
    E: Executor<'e, Database = Sqlite>,
{
    if ids.is_empty() || replaceable.is_empty() {
        return Ok(0);
    }

    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE posts SET featured = ");
    builder.push_bind(flag.as_str());
    builder.push(" WHERE featured IN (");
    let mut current = builder.separated(", ");
    for existing in replaceable {
        current.push_bind(existing.as_str());
    }
    current.push_unseparated(") AND id IN (");
    let mut targets = builder.separated(", ");
    for id in ids {
        targets.push_bind(*id);
    }
    targets.push_unseparated(")");

    let result = builder.build().execute(executor).await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn find_posts_by_cursor(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<PostSummary>, AppError> {
        let rows = sqlx::query(SELECT_POSTS_BY_CURSOR)
            .bind(after_id)
            .bind(clamp_limit(limit))
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.iter().map(map_summary_row).collect()
    }

    async fn find_weekly_popular(&self) -> Result<Vec<PostSummary>, AppError> {
        let since = Utc::now() - Duration::days(self.rules.weekly_window_days);
        let rows = sqlx::query(SELECT_WEEKLY_POPULAR)
            .bind(since.timestamp_millis())
            .bind(self.rules.view_weight)
            .bind(self.rules.like_weight)
            .bind(self.rules.comment_weight)
            .bind(clamp_limit(self.rules.weekly_limit))
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.iter().map(map_summary_row).collect()
    }

    async fn find_legendary(&self) -> Result<Vec<PostSummary>, AppError> {
        let rows = sqlx::query(SELECT_LEGENDARY)
            .bind(self.rules.legend_like_threshold)
            .bind(clamp_limit(self.rules.legend_limit))
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.iter().map(map_summary_row).collect()
    }

    async fn find_notices(&self) -> Result<Vec<PostSummary>, AppError> {
        let rows = sqlx::query(SELECT_NOTICES)
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.iter().map(map_summary_row).collect()
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<PostSummary>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_SUMMARIES_BY_IDS_PREFIX);
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder.build().fetch_all(self.pool.get_pool()).await?;
        rows.iter().map(map_summary_row).collect()
    }

    async fn find_post_detail(&self, id: i64) -> Result<Option<PostDetail>, AppError> {
        let row = sqlx::query(SELECT_POST_DETAIL)
            .bind(id)
            .fetch_optional(self.pool.get_pool())
            .await?;

        row.as_ref().map(map_detail_row).transpose()
    }

    async fn find_featured_ids(&self, flag: FeaturedFlag) -> Result<Vec<i64>, AppError> {
        let rows = sqlx::query(SELECT_FEATURED_IDS)
            .bind(flag.as_str())
            .fetch_all(self.pool.get_pool())
            .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(AppError::from))
            .collect()
    }

    async fn bulk_increment_counter(
        &self,
        deltas: &HashMap<i64, i64>,
        kind: CounterKind,
    ) -> Result<u64, AppError> {
        let entries: Vec<(i64, i64)> = deltas
            .iter()
            .filter(|(_, delta)| **delta != 0)
            .map(|(id, delta)| (*id, *delta))
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let column = kind.column();
        let mut tx = self.pool.get_pool().begin().await?;
        let mut updated = 0;
        for chunk in entries.chunks(BULK_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(format!(
                "UPDATE posts SET {column} = MAX(0, {column} + CASE id"
            ));
            for (id, delta) in chunk {
                builder.push(" WHEN ");
                builder.push_bind(*id);
                builder.push(" THEN ");
                builder.push_bind(*delta);
            }
            builder.push(" ELSE 0 END) WHERE id IN (");
            let mut separated = builder.separated(", ");
            for (id, _) in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            updated += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;

        Ok(updated)
    }

    async fn clear_featured_flag(&self, flag: FeaturedFlag) -> Result<u64, AppError> {
        clear_flag(self.pool.get_pool(), flag).await
    }

    async fn set_featured_flag(&self, ids: &[i64], flag: FeaturedFlag) -> Result<u64, AppError> {
        assign_flag(self.pool.get_pool(), ids, flag, &[FeaturedFlag::None]).await
    }

    async fn set_featured_flag_overriding(
        &self,
        ids: &[i64],
        flag: FeaturedFlag,
        overridden: FeaturedFlag,
    ) -> Result<u64, AppError> {
        assign_flag(
            self.pool.get_pool(),
            ids,
            flag,
            &[FeaturedFlag::None, overridden],
        )
        .await
    }

    async fn replace_featured_flags(
        &self,
        flag: FeaturedFlag,
        ids: &[i64],
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.get_pool().begin().await?;
        clear_flag(&mut *tx, flag).await?;
        let flagged = assign_flag(&mut *tx, ids, flag, flag.overridable()).await?;
        tx.commit().await?;

        tracing::debug!(
            target: "popularity::db",
            flag = %flag,
            requested = ids.len(),
            flagged,
            "featured flags replaced"
        );
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{ConnectionPool, NewPost};
    use crate::shared::config::{FeaturedConfig, ScoreConfig};

    async fn setup_store() -> SqlitePostStore {
        let pool = ConnectionPool::from_memory().await.unwrap();
        let store = SqlitePostStore::new(pool, &FeaturedConfig::default(), &ScoreConfig::default());
        store.initialize().await.unwrap();
        store
    }

    async fn insert(store: &SqlitePostStore, title: &str) -> i64 {
        store
            .insert_post(&NewPost::new(title, "writer").with_author_id(1))
            .await
            .unwrap()
    }

    async fn flag_of(store: &SqlitePostStore, id: i64) -> FeaturedFlag {
        store.find_post_detail(id).await.unwrap().unwrap().featured
    }

    #[tokio::test]
    async fn cursor_pages_newest_first() {
        let store = setup_store().await;
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(insert(&store, &format!("post {n}")).await);
        }

        let first = store.find_posts_by_cursor(None, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|p| p.post_id).collect::<Vec<_>>(),
            vec![ids[4], ids[3]]
        );

        let next = store.find_posts_by_cursor(Some(ids[3]), 10).await.unwrap();
        assert_eq!(
            next.iter().map(|p| p.post_id).collect::<Vec<_>>(),
            vec![ids[2], ids[1], ids[0]]
        );
    }

    #[tokio::test]
    async fn bulk_increment_applies_each_delta_and_clamps() {
        let store = setup_store().await;
        let a = insert(&store, "a").await;
        let b = insert(&store, "b").await;

        let deltas = HashMap::from([(a, 5), (b, 2)]);
        let updated = store
            .bulk_increment_counter(&deltas, CounterKind::Like)
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let deltas = HashMap::from([(b, -7), (9_999, 3)]);
        store
            .bulk_increment_counter(&deltas, CounterKind::Like)
            .await
            .unwrap();

        let posts = store.find_by_ids(&[a, b]).await.unwrap();
        let likes: HashMap<i64, i64> = posts.iter().map(|p| (p.post_id, p.like_count)).collect();
        assert_eq!(likes[&a], 5);
        assert_eq!(likes[&b], 0);
    }

    #[tokio::test]
    async fn legend_overrides_weekly_but_never_notice() {
        let store = setup_store().await;
        let weekly = insert(&store, "weekly").await;
        let notice = insert(&store, "notice").await;
        let plain = insert(&store, "plain").await;
        store
            .set_flag_for_post(notice, FeaturedFlag::Notice)
            .await
            .unwrap();

        store
            .replace_featured_flags(FeaturedFlag::Weekly, &[weekly, notice])
            .await
            .unwrap();
        assert_eq!(flag_of(&store, weekly).await, FeaturedFlag::Weekly);
        assert_eq!(flag_of(&store, notice).await, FeaturedFlag::Notice);

        let flagged = store
            .replace_featured_flags(FeaturedFlag::Legend, &[weekly, notice, plain])
            .await
            .unwrap();
        assert_eq!(flagged, 2);
        assert_eq!(flag_of(&store, weekly).await, FeaturedFlag::Legend);
        assert_eq!(flag_of(&store, plain).await, FeaturedFlag::Legend);
        assert_eq!(flag_of(&store, notice).await, FeaturedFlag::Notice);

        // 週間の再計算は殿堂入りを奪わない
        store
            .replace_featured_flags(FeaturedFlag::Weekly, &[weekly])
            .await
            .unwrap();
        assert_eq!(flag_of(&store, weekly).await, FeaturedFlag::Legend);
        assert!(
            store
                .find_featured_ids(FeaturedFlag::Weekly)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn replace_clears_previous_members() {
        let store = setup_store().await;
        let a = insert(&store, "a").await;
        let b = insert(&store, "b").await;

        store
            .replace_featured_flags(FeaturedFlag::Weekly, &[a])
            .await
            .unwrap();
        store
            .replace_featured_flags(FeaturedFlag::Weekly, &[b])
            .await
            .unwrap();

        assert_eq!(
            store.find_featured_ids(FeaturedFlag::Weekly).await.unwrap(),
            vec![b]
        );
        assert_eq!(flag_of(&store, a).await, FeaturedFlag::None);
    }

    #[tokio::test]
    async fn weekly_selection_skips_old_and_idle_posts() {
        let store = setup_store().await;
        let old = store
            .insert_post(
                &NewPost::new("old", "w").created_at(Utc::now() - Duration::days(30)),
            )
            .await
            .unwrap();
        let idle = insert(&store, "idle").await;
        let liked = insert(&store, "liked").await;
        let viewed = insert(&store, "viewed").await;

        store
            .bulk_increment_counter(&HashMap::from([(old, 100), (liked, 3)]), CounterKind::Like)
            .await
            .unwrap();
        store
            .bulk_increment_counter(&HashMap::from([(viewed, 1)]), CounterKind::View)
            .await
            .unwrap();

        let weekly = store.find_weekly_popular().await.unwrap();
        let ids: Vec<i64> = weekly.iter().map(|p| p.post_id).collect();
        assert_eq!(ids, vec![liked, viewed]);
        assert!(!ids.contains(&idle));
    }

    #[tokio::test]
    async fn notices_and_details_round_trip() {
        let store = setup_store().await;
        let id = store
            .insert_post(&NewPost::new("pinned", "admin").with_content("read me"))
            .await
            .unwrap();
        store.set_flag_for_post(id, FeaturedFlag::Notice).await.unwrap();

        let notices = store.find_notices().await.unwrap();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].is_anonymous());

        let detail = store.find_post_detail(id).await.unwrap().unwrap();
        assert_eq!(detail.content, "read me");
        assert_eq!(detail.featured, FeaturedFlag::Notice);

        assert!(store.delete_post(id).await.unwrap());
        assert!(store.find_post_detail(id).await.unwrap().is_none());
    }
}
