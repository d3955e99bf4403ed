use crate::shared::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// スコア減衰の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecayOutcome {
    pub decayed: u64,
    pub removed: u64,
}

/// 一覧から 1 件取り除いた結果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListRemoval {
    pub removed: bool,
    pub remaining: usize,
    /// 末尾要素の ID（次のカーソル）。一覧が空なら None
    pub boundary_id: Option<i64>,
}

/// 末尾への条件付き追加の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailAppend {
    Appended,
    /// 末尾が期待した要素ではなかった。現在の件数と末尾の ID
    TailMoved {
        remaining: usize,
        boundary_id: Option<i64>,
    },
    /// 一覧が無い、上限に達している、または同じ ID の要素が既にある
    Skipped,
}

/// 共有キーバリューストア（Redis 相当）のポート
///
/// 複数プロセスから同時に呼ばれても安全であること。複数手順からなる操作は
/// すべてストア側で原子的に実行する。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), AppError>;

    async fn delete(&self, key: &str) -> Result<(), AppError>;

    async fn exists(&self, key: &str) -> Result<bool, AppError>;

    /// ハッシュのフィールドに delta を加算し、加算後の値を返す
    async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64, AppError>;

    /// ハッシュ全体を読み出して削除する（原子的）
    async fn hash_get_and_clear(&self, key: &str) -> Result<HashMap<String, i64>, AppError>;

    async fn zset_increment(&self, key: &str, member: &str, delta: f64) -> Result<f64, AppError>;

    async fn zset_remove(&self, key: &str, member: &str) -> Result<(), AppError>;

    /// スコア降順で上位 n 件
    async fn zset_top(&self, key: &str, n: usize) -> Result<Vec<(String, f64)>, AppError>;

    async fn zset_score(&self, key: &str, member: &str) -> Result<Option<f64>, AppError>;

    /// 全メンバーのスコアに factor を掛け、floor 未満になったものを削除する（原子的）
    async fn zset_decay(&self, key: &str, factor: f64, floor: f64)
    -> Result<DecayOutcome, AppError>;

    /// キーが存在しないときだけ token を書き込む
    async fn try_acquire_lock(&self, key: &str, token: &str, ttl: Duration)
    -> Result<bool, AppError>;

    /// token が一致するときだけ削除する
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, AppError>;

    /// マーカーが無ければ TTL 付きで作成し、カウンターを 1 加算する（原子的）。
    /// 初回なら true
    async fn check_mark_increment(
        &self,
        marker_key: &str,
        counter_key: &str,
        field: &str,
        ttl: Duration,
    ) -> Result<bool, AppError>;

    /// 一覧を丸ごと差し替える。items が空ならキーを削除する
    async fn list_replace(
        &self,
        key: &str,
        items: &[String],
        ttl: Option<Duration>,
    ) -> Result<(), AppError>;

    /// 既存の一覧の先頭に追加し max_len に切り詰める。一覧が無ければ何もせず false
    async fn list_push_front_bounded(
        &self,
        key: &str,
        item: &str,
        max_len: usize,
    ) -> Result<bool, AppError>;

    /// 末尾要素の `id_field` が expected_tail のままで、件数が max_len 未満、かつ
    /// item_id の要素がまだ無いときだけ末尾に追加する（原子的）
    async fn list_push_back_if_tail(
        &self,
        key: &str,
        id_field: &str,
        expected_tail: i64,
        item_id: i64,
        item: &str,
        max_len: usize,
    ) -> Result<TailAppend, AppError>;

    /// 一覧全体。キーが無ければ None
    async fn list_range(&self, key: &str) -> Result<Option<Vec<String>>, AppError>;

    /// JSON 要素の `id_field` が id に一致する要素を削除し、残りの件数と末尾の ID を返す
    async fn list_remove_entry(
        &self,
        key: &str,
        id_field: &str,
        id: i64,
    ) -> Result<ListRemoval, AppError>;

    /// index の要素が expected と一致するときだけ置き換える
    async fn list_compare_and_set(
        &self,
        key: &str,
        index: usize,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, AppError>;
}
