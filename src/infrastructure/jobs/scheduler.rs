use super::cache_refresh_job::CacheRefreshJob;
use super::counter_flush_job::CounterFlushJob;
use super::score_decay_job::ScoreDecayJob;
use crate::shared::config::ScheduleConfig;
use crate::shared::error::AppError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 定期実行するジョブ一式
pub struct SyncJobs {
    pub counter_flush: Arc<CounterFlushJob>,
    pub score_decay: Arc<ScoreDecayJob>,
    pub featured: Arc<CacheRefreshJob>,
    pub cache_refresh: Arc<CacheRefreshJob>,
    pub first_page_check: Arc<CacheRefreshJob>,
}

pub struct SchedulerHandle {
    loops: Vec<(&'static str, JoinHandle<()>)>,
}

impl SchedulerHandle {
    pub fn loop_names(&self) -> Vec<&'static str> {
        self.loops.iter().map(|(name, _)| *name).collect()
    }

    /// 全ループを止める。実行中のジョブはキャンセルされ、保持中のロックは解放される
    pub async fn shutdown(self) {
        for (name, handle) in self.loops {
            handle.abort();
            match handle.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    tracing::warn!(target: "popularity::scheduler", job = name, error = %err, "job loop ended abnormally");
                }
            }
        }
        tracing::info!(target: "popularity::scheduler", "scheduler stopped");
    }
}

pub struct SyncScheduler;

impl SyncScheduler {
    pub fn spawn(jobs: SyncJobs, config: ScheduleConfig) -> SchedulerHandle {
        let run_timeout = config.run_timeout();
        let mut loops = Vec::new();

        let job = jobs.counter_flush;
        loops.push(spawn_loop(
            "counter_flush",
            Duration::from_secs(config.flush_interval_secs),
            run_timeout,
            move || {
                let job = Arc::clone(&job);
                async move { job.run_once().await }
            },
        ));

        let job = jobs.score_decay;
        loops.push(spawn_loop(
            "score_decay",
            Duration::from_secs(config.decay_interval_secs),
            run_timeout,
            move || {
                let job = Arc::clone(&job);
                async move { job.run_once().await }
            },
        ));

        for (job, every) in [
            (jobs.featured, config.featured_interval_secs),
            (jobs.cache_refresh, config.refresh_interval_secs),
            (jobs.first_page_check, config.first_page_check_interval_secs),
        ] {
            let name = job.kind().job_name();
            loops.push(spawn_loop(
                name,
                Duration::from_secs(every),
                run_timeout,
                move || {
                    let job = Arc::clone(&job);
                    async move { job.run_once().await }
                },
            ));
        }

        tracing::info!(
            target: "popularity::scheduler",
            loops = loops.len(),
            run_timeout_secs = run_timeout.as_secs(),
            "scheduler started"
        );
        SchedulerHandle { loops }
    }
}

/// every ごとに run を実行するループを起動する。最初の実行は即時
fn spawn_loop<F, Fut>(
    name: &'static str,
    every: Duration,
    run_timeout: Duration,
    mut run: F,
) -> (&'static str, JoinHandle<()>)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let every = every.max(Duration::from_millis(1));
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let attempt = AssertUnwindSafe(tokio::time::timeout(run_timeout, run()))
                .catch_unwind()
                .await;
            match attempt {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => {
                    tracing::error!(target: "popularity::scheduler", job = name, error = %err, "job run failed");
                }
                Ok(Err(_)) => {
                    tracing::error!(
                        target: "popularity::scheduler",
                        job = name,
                        timeout_secs = run_timeout.as_secs(),
                        "job run timed out"
                    );
                }
                Err(_) => {
                    tracing::error!(target: "popularity::scheduler", job = name, "job run panicked");
                }
            }
        }
    });
    (name, handle)
}
