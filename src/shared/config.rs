use crate::domain::entities::ListCategory;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 再選定 1 回のうちリトライ付きで呼ぶ DB 操作の数
const FEATURED_RETRIED_CALLS: u32 = 3;

/// 全キャッシュ再構築に含まれる再選定フェーズの数（週間人気・殿堂入り）
const FEATURED_PHASES: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub scores: ScoreConfig,
    pub counters: CounterConfig,
    pub lists: ListConfig,
    pub featured: FeaturedConfig,
    pub locks: LockConfig,
    pub breaker: BreakerConfig,
    pub schedule: ScheduleConfig,
    pub pools: PoolsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub redis_url: String,
    pub connect_timeout_ms: u64,
    pub response_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub view_delta: f64,
    pub comment_delta: f64,
    pub like_delta: f64,
    pub decay_factor: f64,
    pub floor: f64,
    pub fallback_capacity: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CounterConfig {
    pub view_dedup_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    pub first_page_size: usize,
    pub realtime_size: usize,
    pub first_page_ttl_secs: u64,
    pub featured_ttl_secs: u64,
    pub notice_ttl_secs: u64,
    pub realtime_ttl_secs: u64,
    pub detail_ttl_secs: u64,
    /// false にするとファンアウトの点更新を止め、定期リビルドだけで同期する
    pub point_updates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturedConfig {
    pub weekly_window_days: i64,
    pub weekly_limit: usize,
    pub legend_like_threshold: i64,
    pub legend_limit: usize,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    /// 週間人気・殿堂入りそれぞれの再選定に許す時間
    pub phase_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockConfig {
    pub refresh_lock_ttl_secs: u64,
    pub first_page_lock_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub flush_interval_secs: u64,
    pub decay_interval_secs: u64,
    pub featured_interval_secs: u64,
    pub refresh_interval_secs: u64,
    pub first_page_check_interval_secs: u64,
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolsConfig {
    pub score: PoolConfig,
    pub cache_refresh: PoolConfig,
    pub counter: PoolConfig,
    pub read_model: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub prometheus_port: Option<u16>,
    #[serde(default)]
    pub emit_histogram: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            connect_timeout_ms: 5_000,
            response_timeout_ms: 2_000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:data/posts.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            view_delta: 2.0,
            comment_delta: 3.0,
            like_delta: 4.0,
            decay_factor: 0.9,
            floor: 1.0,
            fallback_capacity: 10_000,
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            view_dedup_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            first_page_size: 20,
            realtime_size: 10,
            first_page_ttl_secs: 300,
            featured_ttl_secs: 3_600,
            notice_ttl_secs: 3_600,
            realtime_ttl_secs: 300,
            detail_ttl_secs: 300,
            point_updates: true,
        }
    }
}

impl Default for FeaturedConfig {
    fn default() -> Self {
        Self {
            weekly_window_days: 7,
            weekly_limit: 10,
            legend_like_threshold: 50,
            legend_limit: 50,
            retry_attempts: 7,
            retry_base_delay_ms: 1_000,
            retry_multiplier: 3.0,
            phase_timeout_secs: 1_200,
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            refresh_lock_ttl_secs: 3_000,
            first_page_lock_ttl_secs: 10,
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_secs: 30,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 60,
            decay_interval_secs: 300,
            featured_interval_secs: 3_600,
            refresh_interval_secs: 300,
            first_page_check_interval_secs: 30,
            run_timeout_secs: 2_700,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1_024,
        }
    }
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            score: PoolConfig::default(),
            cache_refresh: PoolConfig {
                workers: 1,
                queue_capacity: 256,
            },
            counter: PoolConfig::default(),
            read_model: PoolConfig::default(),
        }
    }
}

impl LockConfig {
    pub fn refresh_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_lock_ttl_secs)
    }

    pub fn first_page_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.first_page_lock_ttl_secs)
    }
}

impl ScheduleConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs.max(1))
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl ListConfig {
    pub fn ttl_for(&self, category: ListCategory) -> Duration {
        let secs = match category {
            ListCategory::FirstPage => self.first_page_ttl_secs,
            ListCategory::Weekly | ListCategory::Legend => self.featured_ttl_secs,
            ListCategory::Notice => self.notice_ttl_secs,
            ListCategory::Realtime => self.realtime_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn detail_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_ttl_secs)
    }

    /// 先頭ページは「次ページあり」判定用に 1 件余分に保持する
    pub fn first_page_capacity(&self) -> usize {
        self.first_page_size + 1
    }
}

impl FeaturedConfig {
    pub fn retry_policy(&self) -> super::retry::RetryPolicy {
        super::retry::RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_multiplier,
        )
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs.max(1))
    }

    /// 1 回の再選定で最悪かかる待機時間。取得・前回分の読み出し・付け替えの
    /// 3 つがそれぞれリトライを使い切る場合
    pub fn worst_case_phase_backoff(&self) -> Duration {
        self.retry_policy().total_backoff() * FEATURED_RETRIED_CALLS
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("POPSYNC_REDIS_URL")
            && !v.trim().is_empty()
        {
            cfg.store.redis_url = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("POPSYNC_REDIS_RESPONSE_TIMEOUT_MS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.store.response_timeout_ms = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_REDIS_CONNECT_TIMEOUT_MS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.store.connect_timeout_ms = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_DATABASE_URL")
            && !v.trim().is_empty()
        {
            cfg.database.url = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("POPSYNC_DATABASE_MAX_CONNECTIONS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.database.max_connections = value.min(u64::from(u32::MAX)) as u32;
        }

        if let Ok(v) = std::env::var("POPSYNC_DECAY_FACTOR")
            && let Some(value) = parse_f64(&v)
        {
            cfg.scores.decay_factor = value;
        }
        if let Ok(v) = std::env::var("POPSYNC_SCORE_FLOOR")
            && let Some(value) = parse_f64(&v)
        {
            cfg.scores.floor = value.max(0.0);
        }
        if let Ok(v) = std::env::var("POPSYNC_VIEW_DEDUP_TTL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.counters.view_dedup_ttl_secs = value.max(1);
        }

        if let Ok(v) = std::env::var("POPSYNC_FIRST_PAGE_SIZE")
            && let Some(value) = parse_u64(&v)
        {
            cfg.lists.first_page_size = value as usize;
        }
        if let Ok(v) = std::env::var("POPSYNC_LIST_TTL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.lists.first_page_ttl_secs = value.max(1);
            cfg.lists.realtime_ttl_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_POINT_UPDATES") {
            cfg.lists.point_updates = parse_bool(&v, cfg.lists.point_updates);
        }

        if let Ok(v) = std::env::var("POPSYNC_LEGEND_LIKE_THRESHOLD")
            && let Some(value) = parse_u64(&v)
        {
            cfg.featured.legend_like_threshold = value as i64;
        }
        if let Ok(v) = std::env::var("POPSYNC_FEATURED_RETRY_ATTEMPTS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.featured.retry_attempts = value.clamp(1, 16) as u32;
        }

        if let Ok(v) = std::env::var("POPSYNC_FEATURED_PHASE_TIMEOUT_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.featured.phase_timeout_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_RUN_TIMEOUT_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.schedule.run_timeout_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_REFRESH_LOCK_TTL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.locks.refresh_lock_ttl_secs = value.max(1);
        }

        if let Ok(v) = std::env::var("POPSYNC_FLUSH_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.schedule.flush_interval_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_DECAY_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.schedule.decay_interval_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_FEATURED_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.schedule.featured_interval_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("POPSYNC_REFRESH_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.schedule.refresh_interval_secs = value.max(1);
        }

        if let Ok(v) = std::env::var("POPSYNC_METRICS_PROMETHEUS_PORT")
            && let Some(value) = parse_u16(&v)
        {
            cfg.metrics.prometheus_port = if value == 0 { None } else { Some(value) };
        }
        if let Ok(v) = std::env::var("POPSYNC_METRICS_EMIT_HISTOGRAM") {
            cfg.metrics.emit_histogram = parse_bool(&v, cfg.metrics.emit_histogram);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if !(self.scores.decay_factor > 0.0 && self.scores.decay_factor < 1.0) {
            return Err("Score decay_factor must be within (0, 1)".to_string());
        }
        if self.lists.first_page_size == 0 {
            return Err("List first_page_size must be greater than 0".to_string());
        }
        if self.scores.fallback_capacity == 0 {
            return Err("Score fallback_capacity must be greater than 0".to_string());
        }
        if self.featured.retry_attempts == 0 {
            return Err("Featured retry_attempts must be greater than 0".to_string());
        }
        if self.featured.retry_multiplier < 1.0 {
            return Err("Featured retry_multiplier must be at least 1".to_string());
        }
        let worst_case = self.featured.worst_case_phase_backoff();
        if self.featured.phase_timeout() <= worst_case {
            return Err(format!(
                "Featured phase_timeout_secs must exceed the retry budget of {}s",
                worst_case.as_secs()
            ));
        }
        let refresh_budget = self.featured.phase_timeout() * FEATURED_PHASES;
        if self.schedule.run_timeout() <= refresh_budget {
            return Err(format!(
                "Schedule run_timeout_secs must exceed {}s so every refresh phase can finish",
                refresh_budget.as_secs()
            ));
        }
        if self.locks.refresh_lock_ttl() <= self.schedule.run_timeout() {
            return Err(
                "Lock refresh_lock_ttl_secs must exceed schedule run_timeout_secs".to_string(),
            );
        }
        if self.breaker.failure_threshold == 0 {
            return Err("Breaker failure_threshold must be greater than 0".to_string());
        }
        for (name, pool) in [
            ("score", self.pools.score),
            ("cache_refresh", self.pools.cache_refresh),
            ("counter", self.pools.counter),
            ("read_model", self.pools.read_model),
        ] {
            if pool.workers == 0 || pool.queue_capacity == 0 {
                return Err(format!("Pool {name} needs at least one worker and queue slot"));
            }
        }
        Ok(())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_f64(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

fn parse_u16(value: &str) -> Option<u16> {
    value.trim().parse::<u16>().ok()
}
