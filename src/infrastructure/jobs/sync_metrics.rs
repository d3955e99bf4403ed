use crate::domain::entities::CounterKind;
use crate::shared::error::AppError;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn prometheus_err(err: prometheus::Error) -> AppError {
    AppError::Internal(err.to_string())
}

pub struct SyncMetricsRecorder {
    registry: Arc<Registry>,
    encoder: TextEncoder,
    runs_total: IntCounterVec,
    failures_total: IntCounterVec,
    lock_skips_total: IntCounterVec,
    last_success_ms: IntGaugeVec,
    last_failure_ms: IntGaugeVec,
    flushed_deltas: IntCounterVec,
    breaker_open: IntGauge,
    fallback_entries: IntGauge,
    duration_seconds: Option<HistogramVec>,
}

impl SyncMetricsRecorder {
    pub fn new(emit_histogram: bool) -> Result<Self, AppError> {
        let registry =
            Registry::new_custom(Some("popularity".into()), None).map_err(prometheus_err)?;

        let runs_total = IntCounterVec::new(
            Opts::new("sync_job_runs_total", "Total number of successful sync job executions"),
            &["job"],
        )
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(runs_total.clone()))
            .map_err(prometheus_err)?;

        let failures_total = IntCounterVec::new(
            Opts::new("sync_job_failures_total", "Total number of failed sync job executions"),
            &["job"],
        )
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(failures_total.clone()))
            .map_err(prometheus_err)?;

        let lock_skips_total = IntCounterVec::new(
            Opts::new(
                "sync_job_lock_skips_total",
                "Runs skipped because another instance held the lock",
            ),
            &["job"],
        )
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(lock_skips_total.clone()))
            .map_err(prometheus_err)?;

        let last_success_ms = IntGaugeVec::new(
            Opts::new(
                "sync_job_last_success_timestamp",
                "Unix timestamp in milliseconds of the last successful execution",
            ),
            &["job"],
        )
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(last_success_ms.clone()))
            .map_err(prometheus_err)?;

        let last_failure_ms = IntGaugeVec::new(
            Opts::new(
                "sync_job_last_failure_timestamp",
                "Unix timestamp in milliseconds of the last failed execution",
            ),
            &["job"],
        )
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(last_failure_ms.clone()))
            .map_err(prometheus_err)?;

        let flushed_deltas = IntCounterVec::new(
            Opts::new(
                "counter_flushed_deltas_total",
                "Sum of counter deltas written to the database",
            ),
            &["kind"],
        )
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(flushed_deltas.clone()))
            .map_err(prometheus_err)?;

        let breaker_open = IntGauge::with_opts(Opts::new(
            "score_breaker_open",
            "1 while realtime scores are served from the in-process fallback",
        ))
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(breaker_open.clone()))
            .map_err(prometheus_err)?;

        let fallback_entries = IntGauge::with_opts(Opts::new(
            "score_fallback_entries",
            "Scores currently held by the in-process fallback",
        ))
        .map_err(prometheus_err)?;
        registry
            .register(Box::new(fallback_entries.clone()))
            .map_err(prometheus_err)?;

        let duration_seconds = if emit_histogram {
            let histogram = HistogramVec::new(
                HistogramOpts::new(
                    "sync_job_duration_seconds",
                    "Observed duration of sync job executions",
                )
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
                &["job"],
            )
            .map_err(prometheus_err)?;
            registry
                .register(Box::new(histogram.clone()))
                .map_err(prometheus_err)?;
            Some(histogram)
        } else {
            None
        };

        Ok(Self {
            registry: Arc::new(registry),
            encoder: TextEncoder::new(),
            runs_total,
            failures_total,
            lock_skips_total,
            last_success_ms,
            last_failure_ms,
            flushed_deltas,
            breaker_open,
            fallback_entries,
            duration_seconds,
        })
    }

    fn observe(&self, job: &str, duration: Duration) {
        if let Some(histogram) = &self.duration_seconds {
            histogram
                .with_label_values(&[job])
                .observe(duration.as_secs_f64());
        }
    }

    pub fn record_success(&self, job: &str, duration: Duration) {
        self.runs_total.with_label_values(&[job]).inc();
        self.last_success_ms.with_label_values(&[job]).set(now_millis());
        self.observe(job, duration);
    }

    pub fn record_failure(&self, job: &str, duration: Duration) {
        self.failures_total.with_label_values(&[job]).inc();
        self.last_failure_ms.with_label_values(&[job]).set(now_millis());
        self.observe(job, duration);
    }

    pub fn record_lock_skip(&self, job: &str) {
        self.lock_skips_total.with_label_values(&[job]).inc();
    }

    pub fn record_flushed(&self, kind: CounterKind, total: i64) {
        // 差分は負になり得るので絶対値で数える
        self.flushed_deltas
            .with_label_values(&[kind.as_str()])
            .inc_by(total.unsigned_abs());
    }

    pub fn set_score_fallback(&self, breaker_open: bool, entries: usize) {
        self.breaker_open.set(i64::from(breaker_open));
        self.fallback_entries
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        self.encoder
            .encode(&metric_families, &mut buffer)
            .map_err(prometheus_err)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str;

    fn contains_metric(haystack: &str, key: &str, value: &str) -> bool {
        haystack
            .lines()
            .any(|line| line.trim().starts_with(key) && line.trim().ends_with(value))
    }

    #[test]
    fn job_outcomes_are_labelled_per_job() {
        let recorder = SyncMetricsRecorder::new(true).expect("recorder");
        recorder.record_success("counter_flush", Duration::from_millis(20));
        recorder.record_success("counter_flush", Duration::from_millis(30));
        recorder.record_failure("score_decay", Duration::from_millis(5));
        recorder.record_lock_skip("cache_refresh");

        let snapshot = String::from_utf8(recorder.encode().expect("encode")).expect("utf8");
        assert!(
            contains_metric(
                &snapshot,
                "popularity_sync_job_runs_total{job=\"counter_flush\"}",
                "2"
            ),
            "runs_total metric missing: {snapshot}"
        );
        assert!(contains_metric(
            &snapshot,
            "popularity_sync_job_failures_total{job=\"score_decay\"}",
            "1"
        ));
        assert!(contains_metric(
            &snapshot,
            "popularity_sync_job_lock_skips_total{job=\"cache_refresh\"}",
            "1"
        ));
        assert!(snapshot.contains("popularity_sync_job_duration_seconds"));
    }

    #[test]
    fn flushed_deltas_and_fallback_gauges() {
        let recorder = SyncMetricsRecorder::new(false).expect("recorder");
        recorder.record_flushed(CounterKind::Like, -3);
        recorder.record_flushed(CounterKind::Like, 5);
        recorder.set_score_fallback(true, 12);

        let snapshot = String::from_utf8(recorder.encode().expect("encode")).expect("utf8");
        assert!(contains_metric(
            &snapshot,
            "popularity_counter_flushed_deltas_total{kind=\"like\"}",
            "8"
        ));
        assert!(contains_metric(&snapshot, "popularity_score_breaker_open", "1"));
        assert!(contains_metric(&snapshot, "popularity_score_fallback_entries", "12"));
        assert!(!snapshot.contains("sync_job_duration_seconds"));
    }
}
