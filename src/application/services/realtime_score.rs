use crate::application::ports::kv_store::{DecayOutcome, KeyValueStore};
use crate::domain::constants::REALTIME_SCORE_KEY;
use crate::shared::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::shared::config::{BreakerConfig, ScoreConfig};
use crate::shared::error::AppError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// スコアの保存先
#[async_trait]
pub trait ScoreSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn increment(&self, post_id: i64, delta: f64) -> Result<f64, AppError>;

    async fn decay(&self, factor: f64, floor: f64) -> Result<DecayOutcome, AppError>;

    async fn top(&self, n: usize) -> Result<Vec<(i64, f64)>, AppError>;

    async fn score(&self, post_id: i64) -> Result<Option<f64>, AppError>;

    async fn remove(&self, post_id: i64) -> Result<(), AppError>;
}

/// 共有ストアのソート済みセットに書き込む
pub struct StoreScoreSink {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl StoreScoreSink {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: REALTIME_SCORE_KEY.to_string(),
        }
    }
}

#[async_trait]
impl ScoreSink for StoreScoreSink {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn increment(&self, post_id: i64, delta: f64) -> Result<f64, AppError> {
        self.store
            .zset_increment(&self.key, &post_id.to_string(), delta)
            .await
    }

    async fn decay(&self, factor: f64, floor: f64) -> Result<DecayOutcome, AppError> {
        self.store.zset_decay(&self.key, factor, floor).await
    }

    async fn top(&self, n: usize) -> Result<Vec<(i64, f64)>, AppError> {
        let members = self.store.zset_top(&self.key, n).await?;
        Ok(members
            .into_iter()
            .filter_map(|(member, score)| member.parse::<i64>().ok().map(|id| (id, score)))
            .collect())
    }

    async fn score(&self, post_id: i64) -> Result<Option<f64>, AppError> {
        self.store.zset_score(&self.key, &post_id.to_string()).await
    }

    async fn remove(&self, post_id: i64) -> Result<(), AppError> {
        self.store.zset_remove(&self.key, &post_id.to_string()).await
    }
}

/// ストア障害時に使うプロセス内のスコア表
///
/// 件数は LRU で上限を設ける。インスタンス間では共有されない。
pub struct LocalScoreSink {
    scores: Mutex<LruCache<i64, f64>>,
}

impl LocalScoreSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            scores: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<i64, f64>> {
        self.scores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 溜まったスコアを全件取り出す
    pub fn drain(&self) -> Vec<(i64, f64)> {
        let mut scores = self.lock();
        let drained = scores.iter().map(|(id, score)| (*id, *score)).collect();
        scores.clear();
        drained
    }
}

#[async_trait]
impl ScoreSink for LocalScoreSink {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn increment(&self, post_id: i64, delta: f64) -> Result<f64, AppError> {
        let mut scores = self.lock();
        let score = scores.get(&post_id).copied().unwrap_or(0.0) + delta;
        scores.put(post_id, score);
        Ok(score)
    }

    async fn decay(&self, factor: f64, floor: f64) -> Result<DecayOutcome, AppError> {
        let mut scores = self.lock();
        let mut outcome = DecayOutcome::default();
        let mut expired = Vec::new();
        for (post_id, score) in scores.iter_mut() {
            *score *= factor;
            if *score < floor {
                expired.push(*post_id);
            } else {
                outcome.decayed += 1;
            }
        }
        for post_id in expired {
            scores.pop(&post_id);
            outcome.removed += 1;
        }
        Ok(outcome)
    }

    async fn top(&self, n: usize) -> Result<Vec<(i64, f64)>, AppError> {
        let scores = self.lock();
        let mut ranked: Vec<(i64, f64)> = scores.iter().map(|(id, s)| (*id, *s)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        ranked.truncate(n);
        Ok(ranked)
    }

    async fn score(&self, post_id: i64) -> Result<Option<f64>, AppError> {
        Ok(self.lock().peek(&post_id).copied())
    }

    async fn remove(&self, post_id: i64) -> Result<(), AppError> {
        self.lock().pop(&post_id);
        Ok(())
    }
}

/// リアルタイム人気スコアの台帳
///
/// 通常は共有ストアに書き込み、ブレーカーが開いている間はプロセス内の
/// 代替ストアに切り替える。呼び出し元にエラーは返さない。
pub struct RealtimeScoreLedger {
    primary: Arc<dyn ScoreSink>,
    fallback: Arc<LocalScoreSink>,
    breaker: CircuitBreaker,
    config: ScoreConfig,
}

impl RealtimeScoreLedger {
    pub fn new(
        primary: Arc<dyn ScoreSink>,
        config: ScoreConfig,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self {
            primary,
            fallback: Arc::new(LocalScoreSink::new(config.fallback_capacity)),
            breaker: CircuitBreaker::new(
                "realtime-score",
                breaker_config.failure_threshold,
                Duration::from_secs(breaker_config.open_secs),
            ),
            config,
        }
    }

    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        config: ScoreConfig,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self::new(Arc::new(StoreScoreSink::new(store)), config, breaker_config)
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn fallback(&self) -> &LocalScoreSink {
        &self.fallback
    }

    /// ブレーカーの状態に応じて主ストアか代替ストアへ振り分ける
    async fn route<T, F>(&self, operation: &'static str, op: F) -> Result<T, AppError>
    where
        F: for<'a> Fn(&'a dyn ScoreSink) -> BoxFuture<'a, Result<T, AppError>>,
    {
        if self.breaker.allow_request() {
            match op(self.primary.as_ref()).await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => self.on_primary_failure(operation, &err),
            }
        }
        let fallback: &dyn ScoreSink = &*self.fallback;
        op(fallback).await
    }

    fn on_primary_failure(&self, operation: &'static str, err: &AppError) {
        if err.is_store_failure() {
            self.breaker.record_failure();
        } else {
            // ストア自体は応答している
            self.breaker.record_success();
        }
        tracing::warn!(
            target: "popularity::score",
            operation,
            sink = self.primary.name(),
            error = %err,
            "score store call failed, using fallback"
        );
    }

    pub async fn increment_score(&self, post_id: i64, delta: f64) {
        if delta == 0.0 {
            return;
        }
        if let Err(err) = self
            .route("increment", |sink| sink.increment(post_id, delta))
            .await
        {
            tracing::warn!(target: "popularity::score", post_id, delta, error = %err, "score increment dropped");
        }
    }

    pub async fn on_view(&self, post_id: i64) {
        self.increment_score(post_id, self.config.view_delta).await;
    }

    pub async fn on_comment(&self, post_id: i64, created: bool) {
        let delta = if created {
            self.config.comment_delta
        } else {
            -self.config.comment_delta
        };
        self.increment_score(post_id, delta).await;
    }

    pub async fn on_like(&self, post_id: i64, delta: i64) {
        self.increment_score(post_id, self.config.like_delta * delta as f64)
            .await;
    }

    /// 全スコアを減衰させる
    ///
    /// 主ストアが使えるときは主ストアを減衰させ、代替ストアに残ったスコアを
    /// 主ストアへ戻す。代替ストアは常に減衰させる。
    pub async fn decay_all(&self) -> DecayOutcome {
        let factor = self.config.decay_factor;
        let floor = self.config.floor;
        let mut outcome = DecayOutcome::default();

        if self.breaker.allow_request() {
            match self.primary.decay(factor, floor).await {
                Ok(primary) => {
                    self.breaker.record_success();
                    outcome = primary;
                }
                Err(err) => self.on_primary_failure("decay", &err),
            }
        }

        if let Ok(local) = self.fallback.decay(factor, floor).await {
            outcome.decayed += local.decayed;
            outcome.removed += local.removed;
        }

        if self.breaker.state() == CircuitState::Closed && !self.fallback.is_empty() {
            self.reconcile_fallback().await;
        }

        tracing::debug!(
            target: "popularity::score",
            decayed = outcome.decayed,
            removed = outcome.removed,
            "scores decayed"
        );
        outcome
    }

    /// 障害中に代替ストアへ溜まったスコアを主ストアへ加算する
    async fn reconcile_fallback(&self) {
        let pending = self.fallback.drain();
        let total = pending.len();
        for (index, (post_id, score)) in pending.iter().enumerate() {
            if let Err(err) = self.primary.increment(*post_id, *score).await {
                self.on_primary_failure("reconcile", &err);
                for (post_id, score) in &pending[index..] {
                    let _ = self.fallback.increment(*post_id, *score).await;
                }
                return;
            }
        }
        tracing::info!(target: "popularity::score", moved = total, "fallback scores merged into store");
    }

    pub async fn top_n(&self, n: usize) -> Vec<(i64, f64)> {
        match self.route("top", |sink| sink.top(n)).await {
            Ok(top) => top,
            Err(err) => {
                tracing::warn!(target: "popularity::score", error = %err, "failed to read top scores");
                Vec::new()
            }
        }
    }

    pub async fn score(&self, post_id: i64) -> Option<f64> {
        self.route("score", |sink| sink.score(post_id))
            .await
            .ok()
            .flatten()
    }

    pub async fn remove(&self, post_id: i64) {
        let _ = self.fallback.remove(post_id).await;
        if let Err(err) = self.route("remove", |sink| sink.remove(post_id)).await {
            tracing::warn!(target: "popularity::score", post_id, error = %err, "failed to remove score");
        }
    }
}
