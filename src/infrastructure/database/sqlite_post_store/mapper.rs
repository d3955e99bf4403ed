use crate::domain::entities::{FeaturedFlag, PostDetail, PostSummary};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use sqlx::{Row, sqlite::SqliteRow};

pub(super) fn map_summary_row(row: &SqliteRow) -> Result<PostSummary, AppError> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(PostSummary {
        post_id: row.try_get("id")?,
        title: row.try_get("title")?,
        view_count: row.try_get("view_count")?,
        like_count: row.try_get("like_count")?,
        comment_count: row.try_get("comment_count")?,
        created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
        author_id: row.try_get("author_id")?,
        author_name: row.try_get("author_name")?,
    })
}

pub(super) fn map_detail_row(row: &SqliteRow) -> Result<PostDetail, AppError> {
    let featured: String = row.try_get("featured")?;
    Ok(PostDetail {
        summary: map_summary_row(row)?,
        content: row.try_get("content")?,
        featured: featured.parse::<FeaturedFlag>().map_err(AppError::Database)?,
    })
}
