use super::counter::CounterKind;
use super::featured::FeaturedFlag;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一覧キャッシュに載せる投稿の要約（非正規化コピー）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSummary {
    pub post_id: i64,
    pub title: String,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author_id: Option<i64>,
    pub author_name: String,
}

impl PostSummary {
    pub fn new(post_id: i64, title: impl Into<String>, author_name: impl Into<String>) -> Self {
        Self {
            post_id,
            title: title.into(),
            view_count: 0,
            like_count: 0,
            comment_count: 0,
            created_at: Utc::now(),
            author_id: None,
            author_name: author_name.into(),
        }
    }

    pub fn with_author_id(mut self, author_id: i64) -> Self {
        self.author_id = Some(author_id);
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.author_id.is_none()
    }

    pub fn counter(&self, kind: CounterKind) -> i64 {
        match kind {
            CounterKind::View => self.view_count,
            CounterKind::Like => self.like_count,
            CounterKind::Comment => self.comment_count,
        }
    }

    pub fn apply_counter(&mut self, kind: CounterKind, delta: i64) {
        let slot = match kind {
            CounterKind::View => &mut self.view_count,
            CounterKind::Like => &mut self.like_count,
            CounterKind::Comment => &mut self.comment_count,
        };
        *slot = slot.saturating_add(delta).max(0);
    }
}

/// 投稿詳細キャッシュ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    #[serde(flatten)]
    pub summary: PostSummary,
    pub content: String,
    pub featured: FeaturedFlag,
}
