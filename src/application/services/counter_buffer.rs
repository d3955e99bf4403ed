use crate::application::ports::kv_store::KeyValueStore;
use crate::domain::constants::view_marker_key;
use crate::domain::entities::{CounterKind, FlushBatch};
use crate::shared::config::CounterConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 閲覧数・いいね数・コメント数の差分を共有ストアに溜めておくバッファ
///
/// 差分は投稿ごとのハッシュフィールドに加算され、`flush` で種類ごとに
/// 原子的に取り出される。ストア障害時は警告を出して差分を捨てる。
pub struct CounterBuffer {
    store: Arc<dyn KeyValueStore>,
    dedup_ttl: Duration,
}

impl CounterBuffer {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CounterConfig) -> Self {
        Self {
            store,
            dedup_ttl: Duration::from_secs(config.view_dedup_ttl_secs),
        }
    }

    /// 閲覧を記録する。同じ閲覧者の TTL 内の再閲覧は数えない。
    /// 新規の閲覧なら true
    pub async fn record_view(&self, post_id: i64, viewer_key: &str) -> bool {
        let marker = view_marker_key(post_id, viewer_key);
        match self
            .store
            .check_mark_increment(
                &marker,
                CounterKind::View.pending_key(),
                &post_id.to_string(),
                self.dedup_ttl,
            )
            .await
        {
            Ok(first) => first,
            Err(err) => {
                tracing::warn!(
                    target: "popularity::counter",
                    post_id,
                    error = %err,
                    "failed to record view"
                );
                false
            }
        }
    }

    pub async fn bump_counter(&self, post_id: i64, kind: CounterKind, delta: i64) {
        if delta == 0 {
            return;
        }
        if let Err(err) = self
            .store
            .hash_increment(kind.pending_key(), &post_id.to_string(), delta)
            .await
        {
            tracing::warn!(
                target: "popularity::counter",
                post_id,
                kind = kind.as_str(),
                delta,
                error = %err,
                "failed to buffer counter delta"
            );
        }
    }

    /// 溜まった差分を種類ごとに取り出す。取り出しに失敗した種類は空になり、
    /// 差分はストアに残ったまま次回に回る
    pub async fn flush(&self) -> FlushBatch {
        let mut batch = FlushBatch::default();
        for kind in CounterKind::ALL {
            *batch.get_mut(kind) = self.drain(kind).await;
        }
        batch
    }

    pub async fn drain(&self, kind: CounterKind) -> HashMap<i64, i64> {
        match self.store.hash_get_and_clear(kind.pending_key()).await {
            Ok(raw) => parse_deltas(kind, raw),
            Err(err) => {
                tracing::warn!(
                    target: "popularity::counter",
                    kind = kind.as_str(),
                    error = %err,
                    "failed to drain counter buffer"
                );
                HashMap::new()
            }
        }
    }

    /// 1 種類分を取り出す。`disarm` されないまま破棄されたら差分をバッファに戻す
    pub async fn take_pending(self: &Arc<Self>, kind: CounterKind) -> PendingDeltas {
        let deltas = self.drain(kind).await;
        PendingDeltas {
            buffer: Arc::clone(self),
            kind,
            deltas,
            armed: true,
        }
    }

    /// 反映できなかった差分をバッファに戻す
    pub async fn requeue(&self, kind: CounterKind, deltas: &HashMap<i64, i64>) {
        for (post_id, delta) in deltas {
            self.bump_counter(*post_id, kind, *delta).await;
        }
    }
}

/// 取り出し済みで、まだ DB に反映していない差分
pub struct PendingDeltas {
    buffer: Arc<CounterBuffer>,
    kind: CounterKind,
    deltas: HashMap<i64, i64>,
    armed: bool,
}

impl PendingDeltas {
    pub fn deltas(&self) -> &HashMap<i64, i64> {
        &self.deltas
    }

    /// 反映済みまたは呼び出し側で戻したものとして差分を受け取る
    pub fn disarm(&mut self) -> HashMap<i64, i64> {
        self.armed = false;
        std::mem::take(&mut self.deltas)
    }
}

impl Drop for PendingDeltas {
    fn drop(&mut self) {
        if !self.armed || self.deltas.is_empty() {
            return;
        }
        let kind = self.kind;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                target: "popularity::counter",
                kind = kind.as_str(),
                posts = self.deltas.len(),
                "no runtime to re-buffer interrupted counter flush, deltas dropped"
            );
            return;
        };
        let deltas = std::mem::take(&mut self.deltas);
        tracing::warn!(
            target: "popularity::counter",
            kind = kind.as_str(),
            posts = deltas.len(),
            "counter flush interrupted, re-buffering deltas"
        );
        let buffer = Arc::clone(&self.buffer);
        handle.spawn(async move {
            buffer.requeue(kind, &deltas).await;
        });
    }
}

fn parse_deltas(kind: CounterKind, raw: HashMap<String, i64>) -> HashMap<i64, i64> {
    raw.into_iter()
        .filter_map(|(field, delta)| match field.parse::<i64>() {
            Ok(post_id) if delta != 0 => Some((post_id, delta)),
            Ok(_) => None,
            Err(_) => {
                tracing::warn!(
                    target: "popularity::counter",
                    kind = kind.as_str(),
                    field = %field,
                    "ignoring non-numeric post id"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::MemoryStore;

    fn buffer(store: &MemoryStore) -> CounterBuffer {
        CounterBuffer::new(Arc::new(store.clone()), CounterConfig::default())
    }

    #[tokio::test]
    async fn flush_returns_sum_then_nothing() {
        let store = MemoryStore::new();
        let buffer = buffer(&store);
        for delta in [1, 1, -1, 1, 1] {
            buffer.bump_counter(10, CounterKind::Like, delta).await;
        }
        buffer.bump_counter(11, CounterKind::Comment, 2).await;

        let batch = buffer.flush().await;
        assert_eq!(batch.likes.get(&10), Some(&3));
        assert_eq!(batch.comments.get(&11), Some(&2));
        assert!(batch.views.is_empty());

        let second = buffer.flush().await;
        assert_eq!(second.likes.get(&10).copied().unwrap_or(0), 0);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn cancelled_out_deltas_are_skipped() {
        let store = MemoryStore::new();
        let buffer = buffer(&store);
        buffer.bump_counter(3, CounterKind::Like, 1).await;
        buffer.bump_counter(3, CounterKind::Like, -1).await;

        assert!(buffer.flush().await.likes.is_empty());
    }

    #[tokio::test]
    async fn repeated_view_counts_once() {
        let store = MemoryStore::new();
        let buffer = buffer(&store);

        assert!(buffer.record_view(5, "viewer-a").await);
        assert!(!buffer.record_view(5, "viewer-a").await);
        assert!(buffer.record_view(5, "viewer-b").await);

        assert_eq!(buffer.flush().await.views.get(&5), Some(&2));
    }

    #[tokio::test]
    async fn requeued_deltas_come_back_on_next_flush() {
        let store = MemoryStore::new();
        let buffer = buffer(&store);
        buffer.bump_counter(8, CounterKind::View, 4).await;

        let batch = buffer.flush().await;
        buffer.requeue(CounterKind::View, &batch.views).await;
        buffer.bump_counter(8, CounterKind::View, 1).await;

        assert_eq!(buffer.flush().await.views.get(&8), Some(&5));
    }

    #[tokio::test]
    async fn store_outage_is_swallowed() {
        let store = MemoryStore::new();
        let buffer = buffer(&store);
        store.set_unavailable(true);

        assert!(!buffer.record_view(1, "v").await);
        buffer.bump_counter(1, CounterKind::Like, 1).await;
        assert!(buffer.flush().await.is_empty());
    }
}
