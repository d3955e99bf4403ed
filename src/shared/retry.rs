use crate::shared::error::AppError;
use std::future::Future;
use std::time::Duration;

/// 指数バックオフ付きリトライ設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(7, Duration::from_secs(1), 3.0)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1.0),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// `attempt` 回目（1 始まり）が失敗した後の待機時間
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.multiplier.powi(exponent))
    }

    /// 全試行が失敗した場合の待機時間の合計
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|n| self.delay_for(n)).sum()
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// リトライを使い切った場合は `recover` の値で処理を続行する
    pub async fn run_or_recover<T, F, Fut, R>(&self, operation: &str, op: F, recover: R) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
        R: FnOnce(&AppError) -> T,
    {
        match self.run(operation, op).await {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    operation,
                    attempts = self.max_attempts,
                    error = %err,
                    "retries exhausted, recovering"
                );
                recover(&err)
            }
        }
    }
}
