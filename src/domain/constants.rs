/// リアルタイム人気スコアのソート済みセット
pub const REALTIME_SCORE_KEY: &str = "popular:realtime";

/// 全キャッシュ再構築用の分散ロック
pub const REFRESH_LOCK_NAME: &str = "scheduler-lock";

/// 先頭ページ再構築用の分散ロック
pub const FIRST_PAGE_LOCK_NAME: &str = "first-page-lock";

/// 一覧キャッシュ内で投稿を識別する JSON フィールド
pub const LIST_ID_FIELD: &str = "postId";

pub fn lock_key(name: &str) -> String {
    format!("lock:{name}")
}

pub fn view_marker_key(post_id: i64, viewer_key: &str) -> String {
    format!("post:view:{post_id}:{viewer_key}")
}

pub fn post_detail_key(post_id: i64) -> String {
    format!("post:detail:{post_id}")
}
