use super::sync_metrics::SyncMetricsRecorder;
use crate::application::ports::kv_store::DecayOutcome;
use crate::application::services::RealtimeScoreLedger;
use crate::shared::circuit_breaker::CircuitState;
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Instant;

pub const JOB_NAME: &str = "score_decay";

pub struct ScoreDecayJob {
    ledger: Arc<RealtimeScoreLedger>,
    metrics_recorder: Option<Arc<SyncMetricsRecorder>>,
}

impl ScoreDecayJob {
    pub fn new(
        ledger: Arc<RealtimeScoreLedger>,
        metrics_recorder: Option<Arc<SyncMetricsRecorder>>,
    ) -> Self {
        Self {
            ledger,
            metrics_recorder,
        }
    }

    pub async fn run_once(&self) -> Result<(), AppError> {
        let started = Instant::now();
        let outcome: DecayOutcome = self.ledger.decay_all().await;
        let duration = started.elapsed();
        let breaker_open = self.ledger.breaker_state() != CircuitState::Closed;

        if let Some(recorder) = &self.metrics_recorder {
            recorder.record_success(JOB_NAME, duration);
            recorder.set_score_fallback(breaker_open, self.ledger.fallback().len());
        }

        tracing::info!(
            target: "popularity::score",
            decayed = outcome.decayed,
            removed = outcome.removed,
            breaker_open,
            duration_ms = duration.as_millis() as u64,
            "score decay completed"
        );
        Ok(())
    }
}
