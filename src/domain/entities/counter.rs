use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    View,
    Like,
    Comment,
}

impl CounterKind {
    pub const ALL: [CounterKind; 3] = [CounterKind::View, CounterKind::Like, CounterKind::Comment];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterKind::View => "view",
            CounterKind::Like => "like",
            CounterKind::Comment => "comment",
        }
    }

    /// 保留中の差分を貯めるハッシュのキー
    pub fn pending_key(&self) -> &'static str {
        match self {
            CounterKind::View => "post:pending:views",
            CounterKind::Like => "post:pending:likes",
            CounterKind::Comment => "post:pending:comments",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            CounterKind::View => "view_count",
            CounterKind::Like => "like_count",
            CounterKind::Comment => "comment_count",
        }
    }
}

/// flush で取り出した差分（postId -> delta）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushBatch {
    pub views: HashMap<i64, i64>,
    pub likes: HashMap<i64, i64>,
    pub comments: HashMap<i64, i64>,
}

impl FlushBatch {
    pub fn get(&self, kind: CounterKind) -> &HashMap<i64, i64> {
        match kind {
            CounterKind::View => &self.views,
            CounterKind::Like => &self.likes,
            CounterKind::Comment => &self.comments,
        }
    }

    pub fn get_mut(&mut self, kind: CounterKind) -> &mut HashMap<i64, i64> {
        match kind {
            CounterKind::View => &mut self.views,
            CounterKind::Like => &mut self.likes,
            CounterKind::Comment => &mut self.comments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty() && self.likes.is_empty() && self.comments.is_empty()
    }
}
