use super::ConnectionPool;
use crate::domain::entities::FeaturedFlag;
use crate::shared::config::{FeaturedConfig, ScoreConfig};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};

mod mapper;
mod posts;
mod queries;

use queries::{DELETE_POST, INSERT_POST, UPDATE_FEATURED_FLAG_BY_ID};

/// 週間人気・殿堂入りの選定条件
#[derive(Debug, Clone, Copy)]
struct SelectionRules {
    weekly_window_days: i64,
    weekly_limit: usize,
    legend_like_threshold: i64,
    legend_limit: usize,
    view_weight: f64,
    like_weight: f64,
    comment_weight: f64,
}

/// 投稿の登録内容
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub author_id: Option<i64>,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

impl NewPost {
    pub fn new(title: impl Into<String>, author_name: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            author_id: None,
            author_name: author_name.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_author_id(mut self, author_id: i64) -> Self {
        self.author_id = Some(author_id);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

pub struct SqlitePostStore {
    pool: ConnectionPool,
    rules: SelectionRules,
}

impl SqlitePostStore {
    pub fn new(pool: ConnectionPool, featured: &FeaturedConfig, scores: &ScoreConfig) -> Self {
        Self {
            pool,
            rules: SelectionRules {
                weekly_window_days: featured.weekly_window_days,
                weekly_limit: featured.weekly_limit,
                legend_like_threshold: featured.legend_like_threshold,
                legend_limit: featured.legend_limit,
                view_weight: scores.view_delta,
                like_weight: scores.like_delta,
                comment_weight: scores.comment_delta,
            },
        }
    }

    pub async fn initialize(&self) -> Result<(), AppError> {
        self.pool.migrate().await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool, AppError> {
        let result = sqlx::query("SELECT 1")
            .fetch_one(self.pool.get_pool())
            .await;
        Ok(result.is_ok())
    }

    pub async fn insert_post(&self, post: &NewPost) -> Result<i64, AppError> {
        let result = sqlx::query(INSERT_POST)
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.author_id)
            .bind(&post.author_name)
            .bind(post.created_at.timestamp_millis())
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete_post(&self, post_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query(DELETE_POST)
            .bind(post_id)
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 管理者によるフラグの直接指定（お知らせの固定など）
    pub async fn set_flag_for_post(
        &self,
        post_id: i64,
        flag: FeaturedFlag,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(UPDATE_FEATURED_FLAG_BY_ID)
            .bind(post_id)
            .bind(flag.as_str())
            .execute(self.pool.get_pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
