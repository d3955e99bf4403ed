use super::post_summary::PostSummary;
use serde::{Deserialize, Serialize};

/// 書き込み経路から発行されるドメインイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostEvent {
    Viewed { post_id: i64, viewer_key: String },
    Created { summary: PostSummary },
    Updated { post_id: i64, title: String },
    Deleted { post_id: i64 },
    LikeChanged { post_id: i64, delta: i64 },
    CommentCreated { post_id: i64 },
    CommentDeleted { post_id: i64 },
}

impl PostEvent {
    pub fn post_id(&self) -> i64 {
        match self {
            PostEvent::Viewed { post_id, .. }
            | PostEvent::Updated { post_id, .. }
            | PostEvent::Deleted { post_id }
            | PostEvent::LikeChanged { post_id, .. }
            | PostEvent::CommentCreated { post_id }
            | PostEvent::CommentDeleted { post_id } => *post_id,
            PostEvent::Created { summary } => summary.post_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PostEvent::Viewed { .. } => "viewed",
            PostEvent::Created { .. } => "created",
            PostEvent::Updated { .. } => "updated",
            PostEvent::Deleted { .. } => "deleted",
            PostEvent::LikeChanged { .. } => "like_changed",
            PostEvent::CommentCreated { .. } => "comment_created",
            PostEvent::CommentDeleted { .. } => "comment_deleted",
        }
    }
}
