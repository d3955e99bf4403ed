use super::sync_metrics::SyncMetricsRecorder;
use crate::application::ports::post_store::PostStore;
use crate::application::services::{CounterBuffer, ListProjectionCache};
use crate::domain::entities::CounterKind;
use crate::shared::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

pub const JOB_NAME: &str = "counter_flush";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterFlushStats {
    pub applied_kinds: Vec<CounterKind>,
    pub failed_kinds: Vec<CounterKind>,
    pub rows_updated: u64,
    pub list_updates: usize,
    pub details_evicted: usize,
}

/// バッファに溜まったカウンター差分を DB と一覧キャッシュへ反映する
pub struct CounterFlushJob {
    buffer: Arc<CounterBuffer>,
    posts: Arc<dyn PostStore>,
    lists: Arc<ListProjectionCache>,
    metrics_recorder: Option<Arc<SyncMetricsRecorder>>,
}

impl CounterFlushJob {
    pub fn new(
        buffer: Arc<CounterBuffer>,
        posts: Arc<dyn PostStore>,
        lists: Arc<ListProjectionCache>,
        metrics_recorder: Option<Arc<SyncMetricsRecorder>>,
    ) -> Self {
        Self {
            buffer,
            posts,
            lists,
            metrics_recorder,
        }
    }

    pub async fn run_once(&self) -> Result<(), AppError> {
        let started = Instant::now();
        let stats = self.execute_once().await;
        let duration = started.elapsed();

        if let Some(recorder) = &self.metrics_recorder {
            if stats.failed_kinds.is_empty() {
                recorder.record_success(JOB_NAME, duration);
            } else {
                recorder.record_failure(JOB_NAME, duration);
            }
        }

        tracing::info!(
            target: "popularity::counter",
            applied = ?stats.applied_kinds,
            failed = ?stats.failed_kinds,
            rows_updated = stats.rows_updated,
            list_updates = stats.list_updates,
            details_evicted = stats.details_evicted,
            duration_ms = duration.as_millis() as u64,
            "counter flush completed"
        );

        if stats.failed_kinds.is_empty() {
            Ok(())
        } else {
            Err(AppError::Database(format!(
                "counter flush failed for {:?}",
                stats.failed_kinds
            )))
        }
    }

    /// 種類ごとに取り出してすぐ反映する。失敗した種類の差分はバッファに戻す。
    /// 途中で中断された場合も取り出し済みの差分はバッファに戻る
    pub async fn execute_once(&self) -> CounterFlushStats {
        let mut stats = CounterFlushStats::default();
        let mut touched = HashSet::new();
        for kind in CounterKind::ALL {
            let mut pending = self.buffer.take_pending(kind).await;
            if pending.deltas().is_empty() {
                continue;
            }

            match self.posts.bulk_increment_counter(pending.deltas(), kind).await {
                Ok(rows) => {
                    let deltas = pending.disarm();
                    stats.rows_updated += rows;
                    stats.applied_kinds.push(kind);
                    if let Some(recorder) = &self.metrics_recorder {
                        recorder.record_flushed(kind, deltas.values().sum());
                    }
                    for (post_id, delta) in deltas {
                        stats.list_updates += self
                            .lists
                            .increment_counter_everywhere(post_id, kind, delta)
                            .await;
                        touched.insert(post_id);
                    }
                }
                Err(err) => {
                    let deltas = pending.disarm();
                    tracing::warn!(
                        target: "popularity::counter",
                        kind = kind.as_str(),
                        posts = deltas.len(),
                        error = %err,
                        "failed to apply counter deltas, re-buffering"
                    );
                    self.buffer.requeue(kind, &deltas).await;
                    stats.failed_kinds.push(kind);
                }
            }
        }

        for post_id in touched {
            self.lists.evict_post_detail(post_id).await;
            stats.details_evicted += 1;
        }
        stats
    }
}
