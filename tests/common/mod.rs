#![allow(dead_code)]

use popularity_sync::application::ports::kv_store::KeyValueStore;
use popularity_sync::application::ports::post_store::PostStore;
use popularity_sync::application::services::{
    CacheRefreshCoordinator, CacheSyncListener, CounterBuffer, FeaturedPostService,
    ListProjectionCache, RealtimeScoreLedger, SyncPools,
};
use popularity_sync::domain::entities::{FeaturedNotification, ListCategory, PostSummary};
use popularity_sync::infrastructure::cache::MemoryStore;
use popularity_sync::infrastructure::database::{ConnectionPool, NewPost, SqlitePostStore};
use popularity_sync::infrastructure::event::ChannelNotifier;
use popularity_sync::shared::config::AppConfig;
use popularity_sync::shared::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// MemoryStore とインメモリ SQLite で組み立てた一式
pub struct Harness {
    pub config: AppConfig,
    pub store: MemoryStore,
    pub db: Arc<SqlitePostStore>,
    pub posts: Arc<dyn PostStore>,
    pub ledger: Arc<RealtimeScoreLedger>,
    pub buffer: Arc<CounterBuffer>,
    pub lists: Arc<ListProjectionCache>,
    pub coordinator: Arc<CacheRefreshCoordinator>,
    pub notifications: mpsc::Receiver<FeaturedNotification>,
}

pub async fn harness() -> Harness {
    harness_with(AppConfig::default()).await
}

pub async fn harness_with(config: AppConfig) -> Harness {
    let store = MemoryStore::new();
    let shared: Arc<dyn KeyValueStore> = Arc::new(store.clone());

    let pool = ConnectionPool::from_memory().await.expect("sqlite pool");
    let db = Arc::new(SqlitePostStore::new(
        pool,
        &config.featured,
        &config.scores,
    ));
    db.initialize().await.expect("migrations");
    let posts: Arc<dyn PostStore> = db.clone();

    let ledger = Arc::new(RealtimeScoreLedger::with_store(
        Arc::clone(&shared),
        config.scores,
        config.breaker,
    ));
    let buffer = Arc::new(CounterBuffer::new(Arc::clone(&shared), config.counters));
    let lists = Arc::new(ListProjectionCache::new(
        Arc::clone(&shared),
        Arc::clone(&posts),
        config.lists.clone(),
    ));
    let (notifier, notifications) = ChannelNotifier::new(64);
    let featured = Arc::new(FeaturedPostService::new(
        Arc::clone(&posts),
        Arc::clone(&lists),
        Arc::new(notifier),
        RetryPolicy::new(2, Duration::from_millis(1), 1.0),
    ));
    let coordinator = Arc::new(CacheRefreshCoordinator::new(
        shared,
        Arc::clone(&posts),
        Arc::clone(&lists),
        Arc::clone(&ledger),
        featured,
        config.locks,
    ));

    Harness {
        config,
        store,
        db,
        posts,
        ledger,
        buffer,
        lists,
        coordinator,
        notifications,
    }
}

impl Harness {
    /// 同じストアを使い、DB 側だけ差し替えたコーディネーター
    pub fn coordinator_over(&self, posts: Arc<dyn PostStore>) -> CacheRefreshCoordinator {
        let shared: Arc<dyn KeyValueStore> = Arc::new(self.store.clone());
        let lists = Arc::new(ListProjectionCache::new(
            Arc::clone(&shared),
            Arc::clone(&posts),
            self.config.lists.clone(),
        ));
        let (notifier, _) = ChannelNotifier::new(1);
        let featured = Arc::new(FeaturedPostService::new(
            Arc::clone(&posts),
            Arc::clone(&lists),
            Arc::new(notifier),
            RetryPolicy::new(1, Duration::from_millis(1), 1.0),
        ));
        CacheRefreshCoordinator::new(
            shared,
            posts,
            lists,
            Arc::clone(&self.ledger),
            featured,
            self.config.locks,
        )
    }

    pub fn listener(&self) -> CacheSyncListener {
        CacheSyncListener::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.buffer),
            Arc::clone(&self.lists),
            Arc::clone(&self.posts),
            SyncPools::new(&self.config.pools),
        )
    }

    /// count 件の投稿を作る。ID は作成順に増える
    pub async fn seed_posts(&self, count: usize) -> Vec<i64> {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let post = NewPost::new(format!("post {n}"), format!("author {n}"))
                .with_author_id(1_000 + n as i64);
            ids.push(self.db.insert_post(&post).await.expect("insert post"));
        }
        ids
    }

    pub async fn cached_ids(&self, category: ListCategory) -> Option<Vec<i64>> {
        self.lists
            .get_cached_list(category)
            .await
            .map(|items| items.iter().map(|item| item.post_id).collect())
    }

    pub fn drain_notifications(&mut self) -> Vec<FeaturedNotification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            drained.push(notification);
        }
        drained
    }
}

pub fn summary(post_id: i64) -> PostSummary {
    PostSummary::new(post_id, format!("post {post_id}"), "writer")
}
