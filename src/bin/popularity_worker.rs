use anyhow::{Context, Result, anyhow};
use popularity_sync::application::ports::kv_store::KeyValueStore;
use popularity_sync::application::ports::notifier::FeaturedNotifier;
use popularity_sync::application::ports::post_store::PostStore;
use popularity_sync::application::services::{
    CacheRefreshCoordinator, CacheSyncListener, CounterBuffer, FeaturedPostService,
    ListProjectionCache, RealtimeScoreLedger, SyncPools,
};
use popularity_sync::domain::entities::PostEvent;
use popularity_sync::infrastructure::cache::RedisStore;
use popularity_sync::infrastructure::database::{ConnectionPool, SqlitePostStore};
use popularity_sync::infrastructure::event::{ChannelNotifier, spawn_logging_consumer};
use popularity_sync::infrastructure::jobs::{
    CacheRefreshJob, CounterFlushJob, RefreshKind, ScoreDecayJob, SyncJobs, SyncMetricsRecorder,
    SyncScheduler, spawn_prometheus_exporter,
};
use popularity_sync::shared::config::AppConfig;
use popularity_sync::shared::logging;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NOTIFICATION_BUFFER: usize = 256;
const EVENT_LINE_BUFFER: usize = 1_024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn parse_event_line(line: &str) -> Option<Result<PostEvent, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// 標準入力の JSON 行をイベントとしてリスナーへ渡す。
/// 読み取りはランタイムの終了を妨げないよう専用スレッドで行う
fn spawn_stdin_feed(listener: Arc<CacheSyncListener>) -> JoinHandle<()> {
    let (sender, mut receiver) = mpsc::channel::<String>(EVENT_LINE_BUFFER);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if sender.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = receiver.recv().await {
            match parse_event_line(&line) {
                Some(Ok(event)) => listener.dispatch(event),
                Some(Err(err)) => {
                    tracing::warn!(target: "popularity::worker", error = %err, "skipping malformed event line");
                }
                None => {}
            }
        }
        tracing::info!(target: "popularity::worker", "event input closed");
    })
}

fn ensure_database_dir(database_url: &str) -> Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("popularity-worker");

    let config = AppConfig::from_env();
    config
        .validate()
        .map_err(|err| anyhow!(err))
        .context("Invalid configuration")?;

    let store: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&config.store)
            .await
            .with_context(|| format!("Failed to connect to redis at {}", config.store.redis_url))?,
    );

    ensure_database_dir(&config.database.url)?;
    let pool = ConnectionPool::new(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to connect to database at {}", config.database.url))?;
    let sqlite = SqlitePostStore::new(pool.clone(), &config.featured, &config.scores);
    sqlite
        .initialize()
        .await
        .context("Failed to run database migrations")?;
    let posts: Arc<dyn PostStore> = Arc::new(sqlite);

    let recorder = Arc::new(
        SyncMetricsRecorder::new(config.metrics.emit_histogram)
            .context("Failed to build metrics registry")?,
    );
    if let Some(port) = config.metrics.prometheus_port {
        spawn_prometheus_exporter(port, Arc::clone(&recorder));
    }

    let (channel_notifier, notifications) = ChannelNotifier::new(NOTIFICATION_BUFFER);
    let consumer = spawn_logging_consumer(notifications);
    let notifier: Arc<dyn FeaturedNotifier> = Arc::new(channel_notifier);

    let ledger = Arc::new(RealtimeScoreLedger::with_store(
        Arc::clone(&store),
        config.scores,
        config.breaker,
    ));
    let buffer = Arc::new(CounterBuffer::new(Arc::clone(&store), config.counters));
    let lists = Arc::new(ListProjectionCache::new(
        Arc::clone(&store),
        Arc::clone(&posts),
        config.lists.clone(),
    ));
    let featured = Arc::new(FeaturedPostService::new(
        Arc::clone(&posts),
        Arc::clone(&lists),
        notifier,
        config.featured.retry_policy(),
    ));
    let coordinator = Arc::new(
        CacheRefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&posts),
            Arc::clone(&lists),
            Arc::clone(&ledger),
            featured,
            config.locks,
        )
        .with_phase_timeout(config.featured.phase_timeout()),
    );

    let listener = Arc::new(CacheSyncListener::new(
        Arc::clone(&ledger),
        Arc::clone(&buffer),
        Arc::clone(&lists),
        Arc::clone(&posts),
        SyncPools::new(&config.pools),
    ));
    let feed = spawn_stdin_feed(Arc::clone(&listener));

    let refresh_job = |kind| {
        Arc::new(CacheRefreshJob::new(
            Arc::clone(&coordinator),
            kind,
            Some(Arc::clone(&recorder)),
        ))
    };
    let jobs = SyncJobs {
        counter_flush: Arc::new(CounterFlushJob::new(
            Arc::clone(&buffer),
            Arc::clone(&posts),
            Arc::clone(&lists),
            Some(Arc::clone(&recorder)),
        )),
        score_decay: Arc::new(ScoreDecayJob::new(
            Arc::clone(&ledger),
            Some(Arc::clone(&recorder)),
        )),
        featured: refresh_job(RefreshKind::Featured),
        cache_refresh: refresh_job(RefreshKind::AllCaches),
        first_page_check: refresh_job(RefreshKind::FirstPageCheck),
    };
    let scheduler = SyncScheduler::spawn(jobs, config.schedule);

    tracing::info!(
        target: "popularity::worker",
        database = %config.database.url,
        "popularity worker running, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!(target: "popularity::worker", "shutting down");
    feed.abort();
    scheduler.shutdown().await;
    listener.pools().wait_idle().await;
    tracing::info!(
        target: "popularity::worker",
        dropped_tasks = listener.pools().dropped(),
        "listener pools drained"
    );
    drop(listener);
    drop(coordinator);
    match tokio::time::timeout(DRAIN_TIMEOUT, consumer).await {
        Ok(Ok(delivered)) => {
            tracing::info!(target: "popularity::worker", delivered, "notifications drained");
        }
        _ => tracing::warn!(target: "popularity::worker", "notification consumer did not finish"),
    }
    pool.close().await;
    Ok(())
}
