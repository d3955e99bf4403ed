use super::counter_buffer::CounterBuffer;
use super::list_cache::ListProjectionCache;
use super::realtime_score::RealtimeScoreLedger;
use crate::application::ports::post_store::PostStore;
use crate::domain::entities::{CounterKind, ListCategory, PostDetail, PostEvent, PostSummary};
use crate::shared::config::PoolsConfig;
use crate::shared::task_pool::TaskPool;
use std::sync::Arc;

/// 用途ごとのワーカープール
pub struct SyncPools {
    pub score: Arc<TaskPool>,
    pub cache_refresh: Arc<TaskPool>,
    pub counter: Arc<TaskPool>,
    pub read_model: Arc<TaskPool>,
}

impl SyncPools {
    pub fn new(config: &PoolsConfig) -> Self {
        Self {
            score: Arc::new(TaskPool::new("score", config.score)),
            cache_refresh: Arc::new(TaskPool::new("cache-refresh", config.cache_refresh)),
            counter: Arc::new(TaskPool::new("counter", config.counter)),
            read_model: Arc::new(TaskPool::new("read-model", config.read_model)),
        }
    }

    fn all(&self) -> [&Arc<TaskPool>; 4] {
        [
            &self.score,
            &self.cache_refresh,
            &self.counter,
            &self.read_model,
        ]
    }

    pub fn dropped(&self) -> u64 {
        self.all().iter().map(|pool| pool.dropped()).sum()
    }

    /// 全プールが空になるまで待つ（後続のタスクが別プールに投入される場合も含む）
    pub async fn wait_idle(&self) {
        loop {
            for pool in self.all() {
                pool.wait_idle().await;
            }
            if self.all().iter().all(|pool| pool.in_flight() == 0) {
                return;
            }
        }
    }
}

/// 書き込み経路のイベントを受けてキャッシュを同期するリスナー
///
/// `on_*` は即座に戻り、実際の処理はプール上で非同期に行われる。
/// 失敗は呼び出し元に伝わらない。
pub struct CacheSyncListener {
    ledger: Arc<RealtimeScoreLedger>,
    buffer: Arc<CounterBuffer>,
    lists: Arc<ListProjectionCache>,
    posts: Arc<dyn PostStore>,
    pools: SyncPools,
}

impl CacheSyncListener {
    pub fn new(
        ledger: Arc<RealtimeScoreLedger>,
        buffer: Arc<CounterBuffer>,
        lists: Arc<ListProjectionCache>,
        posts: Arc<dyn PostStore>,
        pools: SyncPools,
    ) -> Self {
        Self {
            ledger,
            buffer,
            lists,
            posts,
            pools,
        }
    }

    pub fn pools(&self) -> &SyncPools {
        &self.pools
    }

    pub fn dispatch(&self, event: PostEvent) {
        tracing::trace!(
            target: "popularity::listener",
            kind = event.kind(),
            post_id = event.post_id(),
            "post event received"
        );
        match event {
            PostEvent::Viewed {
                post_id,
                viewer_key,
            } => self.on_post_viewed(post_id, viewer_key),
            PostEvent::Created { summary } => self.on_post_created(summary),
            PostEvent::Updated { post_id, title } => self.on_post_updated(post_id, title),
            PostEvent::Deleted { post_id } => self.on_post_deleted(post_id),
            PostEvent::LikeChanged { post_id, delta } => self.on_like_changed(post_id, delta),
            PostEvent::CommentCreated { post_id } => self.on_comment_created(post_id),
            PostEvent::CommentDeleted { post_id } => self.on_comment_deleted(post_id),
        }
    }

    /// 閲覧。初回の閲覧だけ閲覧数とスコアに加算する
    pub fn on_post_viewed(&self, post_id: i64, viewer_key: impl Into<String>) {
        let viewer_key = viewer_key.into();
        let buffer = Arc::clone(&self.buffer);
        let ledger = Arc::clone(&self.ledger);
        let score_pool = Arc::clone(&self.pools.score);
        self.pools.counter.submit(async move {
            if buffer.record_view(post_id, &viewer_key).await {
                score_pool.submit(async move { ledger.on_view(post_id).await });
            }
        });
    }

    pub fn on_post_created(&self, summary: PostSummary) {
        let lists = Arc::clone(&self.lists);
        self.pools.cache_refresh.submit(async move {
            if let Err(err) = lists.append_newest(ListCategory::FirstPage, &summary).await {
                tracing::warn!(
                    target: "popularity::listener",
                    post_id = summary.post_id,
                    error = %err,
                    "failed to add new post to first page"
                );
            }
        });
    }

    pub fn on_post_updated(&self, post_id: i64, title: impl Into<String>) {
        let title = title.into();
        let lists = Arc::clone(&self.lists);
        self.pools.cache_refresh.submit(async move {
            lists.update_title_everywhere(post_id, &title).await;
        });
        self.evict_detail(post_id);
    }

    pub fn on_post_deleted(&self, post_id: i64) {
        let lists = Arc::clone(&self.lists);
        self.pools.cache_refresh.submit(async move {
            if let Err(err) = lists.remove_and_backfill_first_page(post_id).await {
                tracing::warn!(
                    target: "popularity::listener",
                    post_id,
                    error = %err,
                    "failed to remove post from first page"
                );
            }
            lists.remove_everywhere(post_id).await;
        });
        let ledger = Arc::clone(&self.ledger);
        self.pools.score.submit(async move { ledger.remove(post_id).await });
        self.evict_detail(post_id);
    }

    pub fn on_like_changed(&self, post_id: i64, delta: i64) {
        if delta == 0 {
            return;
        }
        let ledger = Arc::clone(&self.ledger);
        self.pools
            .score
            .submit(async move { ledger.on_like(post_id, delta).await });
        self.bump(post_id, CounterKind::Like, delta);
    }

    pub fn on_comment_created(&self, post_id: i64) {
        let ledger = Arc::clone(&self.ledger);
        self.pools
            .score
            .submit(async move { ledger.on_comment(post_id, true).await });
        self.bump(post_id, CounterKind::Comment, 1);
    }

    pub fn on_comment_deleted(&self, post_id: i64) {
        let ledger = Arc::clone(&self.ledger);
        self.pools
            .score
            .submit(async move { ledger.on_comment(post_id, false).await });
        self.bump(post_id, CounterKind::Comment, -1);
    }

    fn bump(&self, post_id: i64, kind: CounterKind, delta: i64) {
        let buffer = Arc::clone(&self.buffer);
        self.pools
            .counter
            .submit(async move { buffer.bump_counter(post_id, kind, delta).await });
    }

    fn evict_detail(&self, post_id: i64) {
        let lists = Arc::clone(&self.lists);
        self.pools
            .read_model
            .submit(async move { lists.evict_post_detail(post_id).await });
    }

    /// キャッシュ済みの一覧。None なら呼び出し側で DB から読む
    pub async fn get_cached_list(&self, category: ListCategory) -> Option<Vec<PostSummary>> {
        self.lists.get_cached_list(category).await
    }

    /// 投稿詳細。キャッシュに無ければ DB から読んでキャッシュする
    pub async fn get_cached_post_detail(&self, post_id: i64) -> Option<PostDetail> {
        if let Some(detail) = self.lists.get_cached_post_detail(post_id).await {
            return Some(detail);
        }
        let detail = match self.posts.find_post_detail(post_id).await {
            Ok(detail) => detail?,
            Err(err) => {
                tracing::warn!(target: "popularity::listener", post_id, error = %err, "failed to load post detail");
                return None;
            }
        };
        if let Err(err) = self.lists.cache_post_detail(&detail).await {
            tracing::warn!(target: "popularity::listener", post_id, error = %err, "failed to cache post detail");
        }
        Some(detail)
    }
}
